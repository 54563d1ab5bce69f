/*!
Apple Music connection

The developer token is service wide and signed on demand. The music-user
token comes from MusicKit on the client and is stored verbatim, either
on the user or, for anonymous callers, in their short lived session.
*/
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use tide::sessions::Session;

use crate::store::Store;
use crate::token::SessionUser;
use crate::{Error, Result, LOG};

pub const SESSION_KEY: &str = "apple_music_user_token";

pub fn developer_token_ttl() -> Duration {
    Duration::hours(24)
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct DeveloperClaims {
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppleMusicStatus {
    pub connected: bool,
    pub is_temporary: bool,
}

pub struct AppleMusicConnector {
    store: Arc<dyn Store>,
    private_key: Option<String>,
    key_id: Option<String>,
    team_id: Option<String>,
}

impl AppleMusicConnector {
    pub fn new(store: Arc<dyn Store>, config: &crate::config::AppleMusicConfig) -> Self {
        Self {
            store,
            private_key: config.private_key.clone(),
            key_id: config.key_id.clone(),
            team_id: config.team_id.clone(),
        }
    }

    pub fn issue_developer_token(&self) -> Result<String> {
        self.issue_developer_token_at(Utc::now())
    }

    pub fn issue_developer_token_at(&self, now: DateTime<Utc>) -> Result<String> {
        let (private_key, key_id, team_id) =
            match (&self.private_key, &self.key_id, &self.team_id) {
                (Some(p), Some(k), Some(t)) => (p, k, t),
                _ => {
                    return Err(Error::Configuration(
                        "Apple Music private key, key id and team id are required".to_string(),
                    ))
                }
            };
        let key = EncodingKey::from_ec_pem(private_key.as_bytes())
            .map_err(|e| Error::Configuration(format!("invalid Apple Music private key: {}", e)))?;
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(key_id.clone());
        let claims = DeveloperClaims {
            iss: team_id.clone(),
            iat: now.timestamp(),
            exp: (now + developer_token_ttl()).timestamp(),
        };
        jsonwebtoken::encode(&header, &claims, &key)
            .map_err(|e| Error::Internal(format!("developer token signing failed: {}", e)))
    }

    /// Keep a music-user token. Identified callers get it persisted,
    /// anonymous ones get it in their session. Returns whether the
    /// token is only held temporarily.
    pub async fn save_user_token(
        &self,
        caller: Option<&SessionUser>,
        session: &mut Session,
        token: &str,
    ) -> Result<bool> {
        if token.trim().is_empty() {
            return Err(Error::Validation("Music user token is required".to_string()));
        }
        match caller {
            Some(user) => {
                self.store
                    .save_apple_music_user_token(user.id, token)
                    .await?
                    .ok_or_else(|| Error::NotFound("User not found".to_string()))?;
                slog::info!(LOG, "apple music connected"; "user_id" => user.id);
                Ok(false)
            }
            None => {
                session
                    .insert(SESSION_KEY, token)
                    .map_err(|e| Error::Internal(format!("session write failed: {}", e)))?;
                slog::info!(LOG, "apple music connected for anonymous session");
                Ok(true)
            }
        }
    }

    pub async fn status(
        &self,
        caller: Option<&SessionUser>,
        session: &Session,
    ) -> Result<AppleMusicStatus> {
        if let Some(user) = caller {
            let stored = self.store.user_by_id(user.id).await?;
            if stored.map(|u| u.apple_music_connected()).unwrap_or(false) {
                return Ok(AppleMusicStatus {
                    connected: true,
                    is_temporary: false,
                });
            }
        }
        let temporary = session.get::<String>(SESSION_KEY).is_some();
        Ok(AppleMusicStatus {
            connected: temporary,
            is_temporary: temporary,
        })
    }

    pub async fn disconnect(&self, user_id: i64, session: &mut Session) -> Result<()> {
        self.store
            .clear_apple_music(user_id)
            .await?
            .ok_or_else(|| Error::NotFound("User not found".to_string()))?;
        session.remove(SESSION_KEY);
        slog::info!(LOG, "apple music disconnected"; "user_id" => user_id);
        Ok(())
    }
}
