use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::client::{
    Album, Artist, PlayHistory, Playlist, SpotifyAccess, SpotifyApi, SpotifyProfile, Track,
};
use crate::error::{Provider, ProviderError};
use crate::{Error, Result};

/// Scripted `SpotifyApi` that counts calls.
#[derive(Default)]
pub struct FakeSpotify {
    pub exchange_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub data_calls: AtomicUsize,
    // refresh answers 400 invalid_grant
    pub fail_refresh: AtomicBool,
    // refresh answers 503
    pub refresh_outage: AtomicBool,
    // data calls made with this token answer 401
    pub rejected_token: Mutex<Option<String>>,
    // data calls answer 401 no matter the token
    pub reject_all: AtomicBool,
    pub refresh_delay: Option<Duration>,
    // refresh answers without a new refresh token
    pub keep_refresh_token: bool,
    pub saved: Vec<Track>,
    pub artists: Vec<Artist>,
    pub tracks: Vec<Track>,
    pub recent: Vec<PlayHistory>,
    pub playlists: Mutex<Vec<(String, Vec<String>)>>,
}

pub fn track(id: &str, album: &str) -> Track {
    Track {
        id: id.to_string(),
        name: format!("track {}", id),
        uri: format!("spotify:track:{}", id),
        album: Album {
            id: format!("album-{}", album),
            name: album.to_string(),
        },
        popularity: 0,
    }
}

pub fn artist(id: &str, popularity: u32, genres: &[&str]) -> Artist {
    Artist {
        id: id.to_string(),
        name: format!("artist {}", id),
        popularity,
        genres: genres.iter().map(|g| g.to_string()).collect(),
    }
}

fn unauthorized() -> Error {
    ProviderError::Rejected {
        provider: Provider::Spotify,
        status: 401,
        message: "The access token expired".to_string(),
    }
    .into()
}

impl FakeSpotify {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn reject_token(&self, token: &str) {
        *self.rejected_token.lock().unwrap() = Some(token.to_string());
    }

    fn check(&self, token: &str) -> Result<()> {
        self.data_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_all.load(Ordering::SeqCst) {
            return Err(unauthorized());
        }
        if self.rejected_token.lock().unwrap().as_deref() == Some(token) {
            return Err(unauthorized());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SpotifyApi for FakeSpotify {
    async fn exchange_code(&self, code: &str) -> Result<SpotifyAccess> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        if code == "bad-code" {
            return Err(ProviderError::Rejected {
                provider: Provider::Spotify,
                status: 400,
                message: "invalid_grant".to_string(),
            }
            .into());
        }
        Ok(SpotifyAccess {
            access_token: format!("access-{}", code),
            expires_in: 3600,
            refresh_token: Some(format!("refresh-{}", code)),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<SpotifyAccess> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.refresh_delay {
            async_std::task::sleep(delay).await;
        }
        if self.refresh_outage.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected {
                provider: Provider::Spotify,
                status: 503,
                message: "Service Unavailable".to_string(),
            }
            .into());
        }
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected {
                provider: Provider::Spotify,
                status: 400,
                message: "invalid_grant".to_string(),
            }
            .into());
        }
        Ok(SpotifyAccess {
            access_token: format!("fresh-{}", n),
            expires_in: 3600,
            refresh_token: if self.keep_refresh_token {
                None
            } else {
                Some(format!("{}-rotated", refresh_token))
            },
        })
    }

    async fn me(&self, token: &str) -> Result<SpotifyProfile> {
        self.check(token)?;
        Ok(SpotifyProfile {
            id: "spotify-user".to_string(),
        })
    }

    async fn top_artists(&self, token: &str, limit: u32) -> Result<Vec<Artist>> {
        self.check(token)?;
        Ok(self.artists.iter().take(limit as usize).cloned().collect())
    }

    async fn top_tracks(&self, token: &str, limit: u32) -> Result<Vec<Track>> {
        self.check(token)?;
        Ok(self.tracks.iter().take(limit as usize).cloned().collect())
    }

    async fn saved_tracks(&self, token: &str, limit: u32) -> Result<Vec<Track>> {
        self.check(token)?;
        Ok(self.saved.iter().take(limit as usize).cloned().collect())
    }

    async fn recently_played(&self, token: &str, limit: u32) -> Result<Vec<PlayHistory>> {
        self.check(token)?;
        Ok(self.recent.iter().take(limit as usize).cloned().collect())
    }

    async fn create_playlist(
        &self,
        token: &str,
        _spotify_user_id: &str,
        name: &str,
        _description: &str,
    ) -> Result<Playlist> {
        self.check(token)?;
        let mut playlists = self.playlists.lock().unwrap();
        playlists.push((name.to_string(), vec![]));
        let id = format!("playlist{}", playlists.len());
        Ok(Playlist {
            external_urls: super::client::ExternalUrls {
                spotify: format!("https://open.spotify.com/playlist/{}", id),
            },
            id,
            name: name.to_string(),
        })
    }

    async fn add_tracks(&self, token: &str, _playlist_id: &str, uris: &[String]) -> Result<()> {
        self.check(token)?;
        if let Some(last) = self.playlists.lock().unwrap().last_mut() {
            last.1.extend(uris.iter().cloned());
        }
        Ok(())
    }
}
