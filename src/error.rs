/*!
Error taxonomy and the HTTP rendering of it
*/
use std::fmt;

use tide::StatusCode;

use crate::LOG;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Spotify,
    AppleMusic,
    News,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::Spotify => "Spotify",
            Provider::AppleMusic => "Apple Music",
            Provider::News => "news",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} did not respond within {seconds}s")]
    Timeout { provider: Provider, seconds: u64 },
    #[error("{provider} rejected the request with status {status}: {message}")]
    Rejected {
        provider: Provider,
        status: u16,
        message: String,
    },
    #[error("{provider} request failed: {message}")]
    Transport { provider: Provider, message: String },
}

impl ProviderError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ProviderError::Rejected { status: 401, .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Invalid state parameter")]
    InvalidState,
    #[error("Not connected to {0}")]
    NotConnected(Provider),
    #[error("No {0} refresh token available")]
    NoRefreshToken(Provider),
    #[error("Please reconnect your {0} account")]
    ReconnectRequired(Provider),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Unauthenticated(_)
            | Error::InvalidState
            | Error::NotConnected(_)
            | Error::NoRefreshToken(_)
            | Error::ReconnectRequired(_) => StatusCode::Unauthorized,
            Error::Unauthorized(_) => StatusCode::Forbidden,
            Error::Validation(_) => StatusCode::BadRequest,
            Error::NotFound(_) => StatusCode::NotFound,
            Error::Provider(_)
            | Error::Configuration(_)
            | Error::Database(_)
            | Error::Internal(_) => StatusCode::InternalServerError,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Error::Unauthenticated(_) => "Unauthenticated",
            Error::Unauthorized(_) => "Unauthorized",
            Error::Validation(_) => "ValidationError",
            Error::NotFound(_) => "NotFound",
            Error::InvalidState => "InvalidState",
            Error::NotConnected(_) => "NotConnected",
            Error::NoRefreshToken(_) | Error::ReconnectRequired(_) => "ReconnectRequired",
            Error::Provider(_) => "ProviderError",
            Error::Configuration(_) => "ConfigurationError",
            Error::Database(_) | Error::Internal(_) => "InternalError",
        }
    }

    /// True when an upstream provider refused the credential we sent.
    pub fn is_upstream_unauthorized(&self) -> bool {
        matches!(self, Error::Provider(e) if e.is_unauthorized())
    }

    fn reconnect_required(&self) -> bool {
        matches!(self, Error::NoRefreshToken(_) | Error::ReconnectRequired(_))
    }

    /// The message shown to clients. Anything that could leak
    /// server internals collapses to a generic string.
    pub fn public_message(&self) -> String {
        match self {
            Error::Provider(_) => "Upstream music service request failed".to_string(),
            Error::Configuration(_) | Error::Database(_) | Error::Internal(_) => {
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "error": self.kind(),
            "message": self.public_message(),
        });
        if self.reconnect_required() {
            body["reconnectRequired"] = serde_json::Value::Bool(true);
        }
        body
    }
}

/// Rewrites any response carrying an error into the json error shape.
/// Installed with `tide::utils::After` around every route.
pub async fn render(mut res: tide::Response) -> tide::Result {
    let rendered = res
        .downcast_error::<Error>()
        .map(|e| (e.status(), e.body(), e.to_string()));
    if let Some((status, body, detail)) = rendered {
        if status.is_server_error() {
            slog::error!(LOG, "request failed"; "error" => detail);
        }
        res.set_status(status);
        res.set_body(body);
        return Ok(res);
    }

    let generic = res.error().map(|e| e.to_string());
    if let Some(detail) = generic {
        let status = res.status();
        let message = if status.is_server_error() {
            slog::error!(LOG, "unhandled request error"; "error" => &detail);
            "Internal Server Error".to_string()
        } else {
            detail
        };
        res.set_body(serde_json::json!({ "message": message }));
    }
    Ok(res)
}
