use std::io::Read;
use std::time::Duration;
use std::{env, fs};

use crate::{Error, Result, LOG};

#[derive(Debug, Clone, Default)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AppleMusicConfig {
    // PKCS8 PEM of the MusicKit signing key
    pub private_key: Option<String>,
    pub key_id: Option<String>,
    pub team_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub version: String,
    pub ssl: bool,
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub session_secret: String,
    // 32 bytes, AES_256_GCM key for provider tokens at rest
    pub enc_key: Vec<u8>,
    pub admin_secret_code: Option<String>,
    pub spotify: SpotifyConfig,
    pub apple_music: AppleMusicConfig,
    pub news_api_key: Option<String>,
    pub provider_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        let version = fs::File::open("commit_hash.txt")
            .map(|mut f| {
                let mut s = String::new();
                f.read_to_string(&mut s).ok();
                s.trim().to_string()
            })
            .unwrap_or_else(|_| "unknown".to_string());
        let mut config = Self::from_lookup(|k| env::var(k).ok())?;
        config.version = version;
        Ok(config)
    }

    /// Build a config from any key lookup. Required values that are
    /// missing are a configuration error, per-feature values are left
    /// unset and checked when the feature is used.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        let required = |k: &str| {
            optional(k).ok_or_else(|| Error::Configuration(format!("{} is not set", k)))
        };
        let parsed = |k: &str, default: &str| -> Result<u64> {
            optional(k)
                .unwrap_or_else(|| default.to_string())
                .parse()
                .map_err(|_| Error::Configuration(format!("invalid {}", k)))
        };

        let enc_key = required("ENC_KEY")?.into_bytes();
        if enc_key.len() != 32 {
            return Err(Error::Configuration(
                "ENC_KEY must be exactly 32 bytes".to_string(),
            ));
        }
        let port = parsed("PORT", "3001")?;
        let port = u16::try_from(port).map_err(|_| Error::Configuration("invalid PORT".into()))?;

        Ok(Self {
            version: "unknown".to_string(),
            ssl: optional("SSL").as_deref() == Some("true"),
            host: optional("HOST").unwrap_or_else(|| "localhost".to_string()),
            port,
            database_url: required("DATABASE_URL")?,
            session_secret: required("SECRET")?,
            enc_key,
            admin_secret_code: optional("ADMIN_SECRET_CODE"),
            spotify: SpotifyConfig {
                client_id: optional("SPOTIFY_CLIENT_ID"),
                client_secret: optional("SPOTIFY_CLIENT_SECRET"),
                redirect_uri: optional("SPOTIFY_REDIRECT_URI"),
            },
            apple_music: AppleMusicConfig {
                // keys pasted into a .env usually carry literal \n sequences
                private_key: optional("APPLE_MUSIC_PRIVATE_KEY").map(|k| k.replace("\\n", "\n")),
                key_id: optional("APPLE_MUSIC_KEY_ID"),
                team_id: optional("APPLE_MUSIC_TEAM_ID"),
            },
            news_api_key: optional("NEWS_API_KEY"),
            provider_timeout: Duration::from_secs(parsed("PROVIDER_TIMEOUT_SECONDS", "10")?),
        })
    }

    pub fn initialize(&self) {
        slog::info!(
            LOG, "initialized config";
            "version" => &self.version,
            "ssl" => self.ssl,
            "host" => &self.host,
            "port" => self.port,
            "spotify" => self.spotify.client_id.is_some(),
            "apple_music" => self.apple_music.private_key.is_some(),
            "news" => self.news_api_key.is_some(),
            "provider_timeout_seconds" => self.provider_timeout.as_secs(),
        );
    }

    pub fn host(&self) -> String {
        let p = if self.ssl { "https" } else { "http" };
        format!("{}://{}:{}", p, self.host, self.port)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
pub(crate) fn test_lookup(overrides: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let mut vars: std::collections::HashMap<String, String> = [
        ("DATABASE_URL", "postgres://localhost/dashboard"),
        ("SECRET", "session-secret"),
        ("ENC_KEY", "01234567890123456789012345678901"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in overrides {
        vars.insert(k.to_string(), v.to_string());
    }
    move |k: &str| vars.get(k).cloned()
}
