/*!
Spotify connection lifecycle

Connecting, refreshing, reporting and dropping a user's Spotify
credential. Expiry is checked lazily whenever the credential is used.
Refreshes are single-flight per user: concurrent requests that all find
the same expired token wait on one upstream refresh.
*/
use std::future::Future;
use std::sync::Arc;

use cached::Cached;
use chrono::Utc;

use crate::error::{Provider, ProviderError};
use crate::models::{SpotifyCredential, User};
use crate::store::Store;
use crate::token::SessionUser;
use crate::{utils, Error, Result, LOG};

pub mod client;
#[cfg(test)]
pub mod fake;

pub use client::{PlayHistory, SpotifyApi, SpotifyHttp};

const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
const SCOPES: &[&str] = &[
    "user-library-read",
    "playlist-modify-private",
    "playlist-modify-public",
    "user-top-read",
    "user-read-recently-played",
];

// idle refresh locks are dropped after ten minutes
const REFRESH_LOCK_SECONDS: u64 = 600;

type RefreshLock = Arc<async_mutex::Mutex<()>>;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotifyStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

pub struct SpotifyConnector {
    api: Arc<dyn SpotifyApi>,
    store: Arc<dyn Store>,
    client_id: Option<String>,
    redirect_uri: Option<String>,
    refresh_locks: async_mutex::Mutex<cached::TimedCache<i64, RefreshLock>>,
}

impl SpotifyConnector {
    pub fn new(
        api: Arc<dyn SpotifyApi>,
        store: Arc<dyn Store>,
        config: &crate::config::SpotifyConfig,
    ) -> Self {
        Self {
            api,
            store,
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            refresh_locks: async_mutex::Mutex::new(cached::TimedCache::with_lifespan(
                REFRESH_LOCK_SECONDS,
            )),
        }
    }

    async fn user(&self, user_id: i64) -> Result<User> {
        self.store
            .user_by_id(user_id)
            .await?
            .ok_or_else(|| Error::NotFound("User not found".to_string()))
    }

    /// The spotify consent page url. The caller's id rides along as
    /// `state` and must come back unchanged on the callback.
    pub fn authorization_url(&self, user_id: i64) -> Result<String> {
        let client_id = self
            .client_id
            .as_deref()
            .ok_or_else(|| Error::Configuration("SPOTIFY_CLIENT_ID is not set".to_string()))?;
        let redirect_uri = self
            .redirect_uri
            .as_deref()
            .ok_or_else(|| Error::Configuration("SPOTIFY_REDIRECT_URI is not set".to_string()))?;
        let scope = SCOPES.join(" ");
        let state = user_id.to_string();
        let url = surf::Url::parse_with_params(
            AUTHORIZE_URL,
            &[
                ("client_id", client_id),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri),
                ("scope", scope.as_str()),
                ("state", state.as_str()),
                ("show_dialog", "true"),
            ],
        )
        .map_err(|e| Error::Internal(format!("authorize url error {}", e)))?;
        Ok(url.to_string())
    }

    /// Complete the oauth callback for `caller`.
    pub async fn exchange_code(&self, caller: &SessionUser, code: &str, state: &str) -> Result<User> {
        if state != caller.id.to_string() {
            slog::warn!(LOG, "spotify callback state mismatch"; "user_id" => caller.id);
            return Err(Error::InvalidState);
        }
        let access = self.api.exchange_code(code).await?;
        let profile = self.api.me(&access.access_token).await?;
        let credential = SpotifyCredential {
            access_token: Some(access.access_token),
            refresh_token: access.refresh_token,
            expiry: Some(utils::expiry_from_now(access.expires_in)),
            spotify_id: Some(profile.id),
        };
        let user = self
            .store
            .save_spotify_credential(caller.id, &credential)
            .await?
            .ok_or_else(|| Error::NotFound("User not found".to_string()))?;
        slog::info!(
            LOG, "spotify connected";
            "user_id" => user.id,
            "spotify_id" => user.spotify.spotify_id.as_deref(),
        );
        Ok(user)
    }

    async fn refresh_lock(&self, user_id: i64) -> RefreshLock {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .cache_get_or_set_with(user_id, || Arc::new(async_mutex::Mutex::new(())))
            .clone()
    }

    /// Trade the stored refresh token for a new access token.
    ///
    /// `user` is the snapshot the caller was working from. If another
    /// request already replaced its access token with a live one, that
    /// credential is returned without calling spotify again.
    pub async fn refresh(&self, user: &User) -> Result<User> {
        let lock = self.refresh_lock(user.id).await;
        let _guard = lock.lock().await;

        let current = self.user(user.id).await?;
        let now = Utc::now();
        let replaced = current.spotify.access_token.is_some()
            && current.spotify.access_token != user.spotify.access_token;
        if replaced && !current.spotify.is_expired(now) {
            slog::debug!(LOG, "spotify token already refreshed"; "user_id" => user.id);
            return Ok(current);
        }

        let refresh_token = current
            .spotify
            .refresh_token
            .clone()
            .ok_or(Error::NoRefreshToken(Provider::Spotify))?;
        slog::info!(LOG, "refreshing spotify token"; "user_id" => user.id);
        let access = self.api.refresh(&refresh_token).await?;
        let credential = SpotifyCredential {
            access_token: Some(access.access_token),
            refresh_token: access.refresh_token.or(Some(refresh_token)),
            expiry: Some(utils::expiry_from(now, access.expires_in)),
            spotify_id: current.spotify.spotify_id.clone(),
        };
        self.store
            .save_spotify_credential(user.id, &credential)
            .await?
            .ok_or_else(|| Error::NotFound("User not found".to_string()))
    }

    async fn clear(&self, user_id: i64, cause: &Error) -> Result<()> {
        slog::warn!(
            LOG, "spotify credential dropped";
            "user_id" => user_id, "cause" => cause.to_string(),
        );
        self.store.clear_spotify_credential(user_id).await?;
        Ok(())
    }

    /// Refresh, or forget the credential when it can no longer be
    /// refreshed. Timeouts and transport failures leave it in place.
    async fn refresh_or_disconnect(&self, user: &User) -> Result<User> {
        match self.refresh(user).await {
            Ok(user) => Ok(user),
            Err(e) if credential_lost(&e) => {
                self.clear(user.id, &e).await?;
                Err(Error::ReconnectRequired(Provider::Spotify))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn status(&self, user_id: i64) -> Result<SpotifyStatus> {
        let user = self.user(user_id).await?;
        let now = Utc::now();
        if user.spotify.is_expired(now) && user.spotify.refresh_token.is_some() {
            return match self.refresh_or_disconnect(&user).await {
                Ok(user) => Ok(SpotifyStatus {
                    connected: true,
                    user_id: user.spotify.spotify_id,
                }),
                Err(Error::ReconnectRequired(_)) => Ok(SpotifyStatus {
                    connected: false,
                    user_id: None,
                }),
                Err(e) => Err(e),
            };
        }
        let connected = user.spotify.is_connected(now);
        Ok(SpotifyStatus {
            connected,
            user_id: user.spotify.spotify_id.filter(|_| connected),
        })
    }

    pub async fn disconnect(&self, user_id: i64) -> Result<()> {
        self.store
            .clear_spotify_credential(user_id)
            .await?
            .ok_or_else(|| Error::NotFound("User not found".to_string()))?;
        slog::info!(LOG, "spotify disconnected"; "user_id" => user_id);
        Ok(())
    }

    /// Run `call` with a live access token for `user_id`.
    ///
    /// Expired tokens are refreshed first. When spotify answers 401 the
    /// token is refreshed once and `call` retried once; a second 401, or
    /// a credential that cannot be refreshed, clears the stored tokens
    /// and fails with `ReconnectRequired`.
    pub async fn with_token<T, F, Fut>(&self, user_id: i64, call: F) -> Result<T>
    where
        F: Fn(Arc<dyn SpotifyApi>, String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut user = self.user(user_id).await?;
        if user.spotify.access_token.is_none() {
            return Err(Error::NotConnected(Provider::Spotify));
        }
        if user.spotify.is_expired(Utc::now()) {
            user = self.refresh_or_disconnect(&user).await?;
        }

        match call(self.api.clone(), live_token(&user)?).await {
            Err(e) if e.is_upstream_unauthorized() => {
                slog::info!(LOG, "spotify rejected access token, retrying"; "user_id" => user_id);
                let user = self.refresh_or_disconnect(&user).await?;
                match call(self.api.clone(), live_token(&user)?).await {
                    Err(e) if e.is_upstream_unauthorized() => {
                        self.clear(user_id, &e).await?;
                        Err(Error::ReconnectRequired(Provider::Spotify))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }
}

fn live_token(user: &User) -> Result<String> {
    user.spotify
        .access_token
        .clone()
        .ok_or(Error::NotConnected(Provider::Spotify))
}

/// The refresh token itself was refused. A 5xx from the token endpoint
/// is an outage and leaves the credential alone.
fn credential_lost(e: &Error) -> bool {
    match e {
        Error::NoRefreshToken(_) => true,
        Error::Provider(ProviderError::Rejected { status, .. }) => (400..500).contains(status),
        _ => false,
    }
}
