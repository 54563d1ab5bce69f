use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::token::SessionUser;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(Error::Validation("Invalid role".to_string())),
        }
    }
}

/// Spotify tokens held on behalf of a user. All four fields are set
/// together on connect and cleared together on disconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpotifyCredential {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    // when the current access_token stops being accepted
    pub expiry: Option<DateTime<Utc>>,
    // the spotify account id, from /v1/me
    pub spotify_id: Option<String>,
}

impl SpotifyCredential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.map(|e| now > e).unwrap_or(false)
    }

    pub fn is_connected(&self, now: DateTime<Utc>) -> bool {
        self.access_token.is_some() && !self.is_expired(now)
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub name: String,
    // always stored lowercase
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub spotify: SpotifyCredential,
    // earlier schema stored the music-user token here; still honored
    // when reporting connection status
    pub apple_music_token: Option<String>,
    pub apple_music_user_token: Option<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl User {
    pub fn session_user(&self) -> SessionUser {
        SessionUser {
            id: self.id,
            display_name: self.name.clone(),
            role: self.role,
        }
    }

    pub fn apple_music_connected(&self) -> bool {
        self.apple_music_token.is_some() || self.apple_music_user_token.is_some()
    }

    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            spotify_id: self.spotify.spotify_id.clone(),
            apple_music_connected: self.apple_music_connected(),
            created_at: self.created,
            updated_at: self.modified,
        }
    }
}

/// What clients get to see of a user. Never carries the password hash
/// or any provider token.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub spotify_id: Option<String>,
    pub apple_music_connected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

#[derive(sqlx::FromRow, Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyPlaylist {
    pub id: i64,
    pub spotify_playlist_id: String,
    pub embed_url: String,
    pub title: String,
    pub description: String,
    pub week_number: i32,
    pub year: i32,
    pub active: bool,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWeeklyPlaylist {
    pub spotify_playlist_id: String,
    pub embed_url: String,
    pub title: String,
    pub description: String,
    pub week_number: i32,
    pub year: i32,
}

pub const VINYL_CONDITIONS: &[&str] = &[
    "Mint",
    "Near Mint",
    "Very Good Plus",
    "Very Good",
    "Good",
    "Fair",
    "Poor",
];

#[derive(sqlx::FromRow, Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vinyl {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub artist: String,
    pub release_year: Option<i32>,
    pub genre: Option<String>,
    pub condition: Option<String>,
    pub notes: Option<String>,
    pub cover_image: Option<String>,
    pub discogs_id: Option<String>,
    pub date_added: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVinyl {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub release_year: Option<i32>,
    pub genre: Option<String>,
    pub condition: Option<String>,
    pub notes: Option<String>,
    pub cover_image: Option<String>,
    pub discogs_id: Option<String>,
}

fn blank(v: &Option<String>) -> bool {
    v.as_deref().map(|s| s.trim().is_empty()).unwrap_or(true)
}

impl NewVinyl {
    pub fn validate(&self) -> Result<(), Error> {
        if blank(&self.title) || blank(&self.artist) {
            return Err(Error::Validation(
                "Title and artist are required".to_string(),
            ));
        }
        self.validate_changes()
    }

    /// Checks for a partial update: only fields that are present are
    /// validated, but title and artist may not be blanked out.
    pub fn validate_changes(&self) -> Result<(), Error> {
        if (self.title.is_some() && blank(&self.title))
            || (self.artist.is_some() && blank(&self.artist))
        {
            return Err(Error::Validation(
                "Title and artist cannot be empty".to_string(),
            ));
        }
        if let Some(condition) = &self.condition {
            if !VINYL_CONDITIONS.contains(&condition.as_str()) {
                return Err(Error::Validation(format!(
                    "Invalid condition {:?}",
                    condition
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VinylStats {
    pub total_records: i64,
    pub unique_genres: i64,
    // rounded; 0 when no record has a year
    pub avg_year: i64,
    pub by_condition: BTreeMap<String, i64>,
}

/// A comment as stored under its post.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub content: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// A feed post with its likers and comments, oldest comment first.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub content: String,
    pub current_song: String,
    // ids of the users who like it
    pub likes: Vec<i64>,
    pub comments: Vec<Comment>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Post {
    pub fn comment(&self, id: i64) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == id)
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    pub content: Option<String>,
    pub current_song: Option<String>,
}

impl NewPost {
    pub fn validate(&self) -> Result<(), Error> {
        if blank(&self.content) {
            return Err(Error::Validation("Content is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct NewComment {
    pub content: Option<String>,
}

impl NewComment {
    /// The trimmed comment text, or a validation error when empty.
    pub fn content(&self) -> Result<&str, Error> {
        match self.content.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => Ok(c),
            _ => Err(Error::Validation("Comment content is required".to_string())),
        }
    }
}
