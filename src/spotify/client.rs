/*!
Spotify Web API calls

Every call takes the access token it should use as a parameter. Nothing
here holds per-user state, so one client is shared by every request.
*/
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::{Provider, ProviderError};
use crate::{Error, Result};

const ACCOUNTS_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";

#[derive(serde::Deserialize, Debug, Clone)]
pub struct SpotifyAccess {
    pub access_token: String,
    pub expires_in: i64,
    // only sent on refresh when spotify rotates it
    pub refresh_token: Option<String>,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct SpotifyProfile {
    pub id: String,
}

#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
pub struct Artist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub popularity: u32,
    #[serde(default)]
    pub genres: Vec<String>,
}

#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
pub struct Album {
    pub id: String,
    pub name: String,
}

#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub uri: String,
    pub album: Album,
    #[serde(default)]
    pub popularity: u32,
}

/// One entry of the recently played history.
#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
pub struct PlayHistory {
    pub played_at: chrono::DateTime<chrono::Utc>,
    pub track: Track,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct ExternalUrls {
    pub spotify: String,
}

#[derive(serde::Deserialize, Debug, Clone)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub external_urls: ExternalUrls,
}

#[derive(serde::Deserialize, Debug)]
struct Paging<T> {
    items: Vec<T>,
}

#[derive(serde::Deserialize, Debug)]
struct SavedTrack {
    track: Track,
}

#[derive(serde::Serialize)]
struct AccessParams<'a> {
    grant_type: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
}

#[derive(serde::Serialize)]
struct RefreshParams<'a> {
    grant_type: &'a str,
    refresh_token: &'a str,
}

#[derive(serde::Serialize)]
struct NewPlaylist<'a> {
    name: &'a str,
    description: &'a str,
    public: bool,
}

#[derive(serde::Serialize)]
struct AddTracks<'a> {
    uris: &'a [String],
}

#[async_trait::async_trait]
pub trait SpotifyApi: Send + Sync {
    /// Trade an authorization code for a token pair.
    async fn exchange_code(&self, code: &str) -> Result<SpotifyAccess>;
    async fn refresh(&self, refresh_token: &str) -> Result<SpotifyAccess>;
    async fn me(&self, token: &str) -> Result<SpotifyProfile>;
    async fn top_artists(&self, token: &str, limit: u32) -> Result<Vec<Artist>>;
    async fn top_tracks(&self, token: &str, limit: u32) -> Result<Vec<Track>>;
    async fn saved_tracks(&self, token: &str, limit: u32) -> Result<Vec<Track>>;
    async fn recently_played(&self, token: &str, limit: u32) -> Result<Vec<PlayHistory>>;
    /// Creates a private playlist owned by `spotify_user_id`.
    async fn create_playlist(
        &self,
        token: &str,
        spotify_user_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Playlist>;
    async fn add_tracks(&self, token: &str, playlist_id: &str, uris: &[String]) -> Result<()>;
}

fn transport<E: std::fmt::Display>(e: E) -> Error {
    ProviderError::Transport {
        provider: Provider::Spotify,
        message: e.to_string(),
    }
    .into()
}

/// `SpotifyApi` over https with surf.
pub struct SpotifyHttp {
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
    timeout: Duration,
}

impl SpotifyHttp {
    pub fn new(config: &crate::config::SpotifyConfig, timeout: Duration) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            timeout,
        }
    }

    fn basic_auth(&self) -> Result<String> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Ok(format!(
                "Basic {}",
                base64::encode(format!("{}:{}", id, secret).as_bytes())
            )),
            _ => Err(Error::Configuration(
                "SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET are required".to_string(),
            )),
        }
    }

    /// Send with a deadline, turning non-2xx answers into `Rejected`.
    async fn send<T: DeserializeOwned>(&self, req: surf::RequestBuilder) -> Result<T> {
        let mut resp = async_std::future::timeout(self.timeout, req.send())
            .await
            .map_err(|_| ProviderError::Timeout {
                provider: Provider::Spotify,
                seconds: self.timeout.as_secs(),
            })?
            .map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.body_string().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                provider: Provider::Spotify,
                status: status.into(),
                message,
            }
            .into());
        }
        resp.body_json().await.map_err(transport)
    }

    async fn token_request<T: serde::Serialize>(&self, form: &T) -> Result<SpotifyAccess> {
        let body = surf::Body::from_form(form).map_err(transport)?;
        let req = surf::post(ACCOUNTS_TOKEN_URL)
            .body(body)
            .header("authorization", self.basic_auth()?);
        self.send(req).await
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

#[async_trait::async_trait]
impl SpotifyApi for SpotifyHttp {
    async fn exchange_code(&self, code: &str) -> Result<SpotifyAccess> {
        let redirect_uri = self
            .redirect_uri
            .as_deref()
            .ok_or_else(|| Error::Configuration("SPOTIFY_REDIRECT_URI is not set".to_string()))?;
        self.token_request(&AccessParams {
            grant_type: "authorization_code",
            code,
            redirect_uri,
        })
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<SpotifyAccess> {
        self.token_request(&RefreshParams {
            grant_type: "refresh_token",
            refresh_token,
        })
        .await
    }

    async fn me(&self, token: &str) -> Result<SpotifyProfile> {
        let req = surf::get(format!("{}/me", API_BASE)).header("authorization", bearer(token));
        self.send(req).await
    }

    async fn top_artists(&self, token: &str, limit: u32) -> Result<Vec<Artist>> {
        let req = surf::get(format!(
            "{}/me/top/artists?limit={}&time_range=short_term",
            API_BASE, limit
        ))
        .header("authorization", bearer(token));
        let page: Paging<Artist> = self.send(req).await?;
        Ok(page.items)
    }

    async fn top_tracks(&self, token: &str, limit: u32) -> Result<Vec<Track>> {
        let req = surf::get(format!(
            "{}/me/top/tracks?limit={}&time_range=short_term",
            API_BASE, limit
        ))
        .header("authorization", bearer(token));
        let page: Paging<Track> = self.send(req).await?;
        Ok(page.items)
    }

    async fn saved_tracks(&self, token: &str, limit: u32) -> Result<Vec<Track>> {
        let req = surf::get(format!("{}/me/tracks?limit={}", API_BASE, limit))
            .header("authorization", bearer(token));
        let page: Paging<SavedTrack> = self.send(req).await?;
        Ok(page.items.into_iter().map(|s| s.track).collect())
    }

    async fn recently_played(&self, token: &str, limit: u32) -> Result<Vec<PlayHistory>> {
        let req = surf::get(format!(
            "{}/me/player/recently-played?limit={}",
            API_BASE, limit
        ))
        .header("authorization", bearer(token));
        let page: Paging<PlayHistory> = self.send(req).await?;
        Ok(page.items)
    }

    async fn create_playlist(
        &self,
        token: &str,
        spotify_user_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Playlist> {
        let body = surf::Body::from_json(&NewPlaylist {
            name,
            description,
            public: false,
        })
        .map_err(transport)?;
        let req = surf::post(format!("{}/users/{}/playlists", API_BASE, spotify_user_id))
            .header("authorization", bearer(token))
            .body(body);
        self.send(req).await
    }

    async fn add_tracks(&self, token: &str, playlist_id: &str, uris: &[String]) -> Result<()> {
        let body = surf::Body::from_json(&AddTracks { uris }).map_err(transport)?;
        let req = surf::post(format!("{}/playlists/{}/tracks", API_BASE, playlist_id))
            .header("authorization", bearer(token))
            .body(body);
        let _snapshot: serde_json::Value = self.send(req).await?;
        Ok(())
    }
}
