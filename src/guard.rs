/*!
Session guard

Every request passes through `SessionGuard`. One table decides how much
identity a route needs; the guard verifies whatever token was presented
and attaches the `SessionUser` to the request for handlers to pick up.
*/
use tide::http::Method;

use crate::token::{SessionUser, TokenCodec, TokenError};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No identity needed. A valid token still identifies the caller,
    /// a bad one is ignored.
    Public,
    /// Anonymous callers are fine, a presented token must be valid.
    Optional,
    /// A valid token is mandatory.
    Required,
}

struct Rule {
    // `None` matches any method
    method: Option<Method>,
    prefix: &'static str,
    access: Access,
}

const fn rule(method: Option<Method>, prefix: &'static str, access: Access) -> Rule {
    Rule {
        method,
        prefix,
        access,
    }
}

// first match wins
const RULES: &[Rule] = &[
    rule(None, "/api/auth/signup", Access::Public),
    rule(None, "/api/auth/login", Access::Public),
    rule(None, "/api/auth/logout", Access::Public),
    rule(None, "/api/status", Access::Public),
    rule(Some(Method::Get), "/api/news", Access::Public),
    rule(Some(Method::Get), "/api/weekly-playlist/current", Access::Public),
    rule(Some(Method::Get), "/api/applemusic/token", Access::Public),
    rule(None, "/api/applemusic/user-token", Access::Optional),
    rule(Some(Method::Get), "/api/applemusic/status", Access::Optional),
];

/// `prefix` matches itself and anything below it, segment-wise.
fn under(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

pub fn classify(method: Method, path: &str) -> Access {
    RULES
        .iter()
        .find(|r| r.method.map(|m| m == method).unwrap_or(true) && under(path, r.prefix))
        .map(|r| r.access)
        .unwrap_or_else(|| {
            if under(path, "/api") {
                Access::Required
            } else {
                Access::Public
            }
        })
}

#[derive(Debug, PartialEq, Eq)]
enum Presented {
    Nothing,
    Malformed,
    Token(String),
}

/// The bearer token from the authorization header, falling back to
/// the `token` query parameter.
fn presented<State>(req: &tide::Request<State>) -> Presented {
    if let Some(values) = req.header("authorization") {
        return match values.last().as_str().strip_prefix("Bearer ") {
            Some(token) if !token.trim().is_empty() => Presented::Token(token.trim().to_string()),
            _ => Presented::Malformed,
        };
    }
    req.url()
        .query_pairs()
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.to_string())
        .filter(|v| !v.is_empty())
        .map(Presented::Token)
        .unwrap_or(Presented::Nothing)
}

#[derive(Clone)]
pub struct SessionGuard {
    codec: TokenCodec,
}

impl SessionGuard {
    pub fn new(codec: TokenCodec) -> Self {
        Self { codec }
    }

    fn identify(&self, presented: Presented) -> Result<Option<SessionUser>> {
        match presented {
            Presented::Nothing => Ok(None),
            Presented::Malformed => Err(Error::Unauthenticated(
                "Invalid authorization header".to_string(),
            )),
            Presented::Token(token) => match self.codec.verify(&token) {
                Ok(claims) => Ok(Some(claims.user)),
                Err(TokenError::Expired) => {
                    Err(Error::Unauthenticated("Session expired".to_string()))
                }
                Err(TokenError::Invalid) => Err(Error::Unauthenticated("Invalid token".to_string())),
            },
        }
    }
}

#[async_trait::async_trait]
impl<State: Clone + Send + Sync + 'static> tide::Middleware<State> for SessionGuard {
    async fn handle(
        &self,
        mut req: tide::Request<State>,
        next: tide::Next<'_, State>,
    ) -> tide::Result {
        let access = classify(req.method(), req.url().path());
        let identity = self.identify(presented(&req));
        let user = match (access, identity) {
            (Access::Public, identity) => identity.ok().flatten(),
            (_, Err(e)) => return Err(e.into()),
            (Access::Optional, Ok(user)) => user,
            (Access::Required, Ok(Some(user))) => Some(user),
            (Access::Required, Ok(None)) => {
                return Err(Error::Unauthenticated("No token provided".to_string()).into())
            }
        };
        if let Some(user) = user {
            req.set_ext(user);
        }
        Ok(next.run(req).await)
    }
}

/// The identified caller, for handlers behind `Access::Required`.
pub fn caller<State>(req: &tide::Request<State>) -> Result<SessionUser> {
    req.ext::<SessionUser>()
        .cloned()
        .ok_or_else(|| Error::Unauthenticated("No token provided".to_string()))
}

pub fn maybe_caller<State>(req: &tide::Request<State>) -> Option<SessionUser> {
    req.ext::<SessionUser>().cloned()
}
