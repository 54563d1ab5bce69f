use crate::models::{
    Comment, NewPost, NewUser, NewVinyl, NewWeeklyPlaylist, Post, Role, SpotifyCredential, User,
    Vinyl, VinylStats, WeeklyPlaylist,
};
use crate::Result;

#[cfg(test)]
pub mod memory;
mod postgres;

pub use postgres::PgStore;

/// Everything the service persists. Provider tokens go in and come
/// out in plaintext; implementations decide how they are kept at rest.
///
/// Methods that mutate a single user return `None` when the user does
/// not exist.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Fails with a validation error when the email is already taken.
    async fn create_user(&self, user: NewUser) -> Result<User>;
    async fn user_by_id(&self, id: i64) -> Result<Option<User>>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn update_name(&self, id: i64, name: &str) -> Result<Option<User>>;
    async fn set_role(&self, id: i64, role: Role) -> Result<Option<User>>;

    /// Replaces all four spotify fields at once.
    async fn save_spotify_credential(
        &self,
        id: i64,
        credential: &SpotifyCredential,
    ) -> Result<Option<User>>;
    async fn clear_spotify_credential(&self, id: i64) -> Result<Option<User>> {
        self.save_spotify_credential(id, &SpotifyCredential::default())
            .await
    }

    async fn save_apple_music_user_token(&self, id: i64, token: &str) -> Result<Option<User>>;
    async fn clear_apple_music(&self, id: i64) -> Result<Option<User>>;

    async fn current_weekly_playlist(&self) -> Result<Option<WeeklyPlaylist>>;
    /// Inserts `playlist` as the only active weekly playlist.
    async fn activate_weekly_playlist(&self, playlist: NewWeeklyPlaylist)
        -> Result<WeeklyPlaylist>;

    /// One page of a user's records, newest first, plus the total count.
    async fn vinyl_page(&self, user_id: i64, offset: i64, limit: i64)
        -> Result<(Vec<Vinyl>, i64)>;
    async fn create_vinyl(&self, user_id: i64, record: NewVinyl) -> Result<Vinyl>;
    async fn vinyl_by_id(&self, user_id: i64, id: i64) -> Result<Option<Vinyl>>;
    /// Overwrites the fields that are set in `changes`.
    async fn update_vinyl(&self, user_id: i64, id: i64, changes: NewVinyl)
        -> Result<Option<Vinyl>>;
    /// False when no record with `id` belongs to `user_id`.
    async fn delete_vinyl(&self, user_id: i64, id: i64) -> Result<bool>;
    async fn vinyl_stats(&self, user_id: i64) -> Result<VinylStats>;

    /// Every post, newest first.
    async fn posts(&self) -> Result<Vec<Post>>;
    async fn create_post(&self, user_id: i64, post: NewPost) -> Result<Post>;
    async fn post_by_id(&self, id: i64) -> Result<Option<Post>>;
    /// False when no post with `id` belongs to `user_id`.
    async fn delete_post(&self, user_id: i64, id: i64) -> Result<bool>;
    /// Adds or removes `user_id`'s like. `None` when the post does not
    /// exist, otherwise whether the user now likes it.
    async fn toggle_like(&self, post_id: i64, user_id: i64) -> Result<Option<bool>>;
    /// `None` when the post does not exist.
    async fn add_comment(&self, post_id: i64, user_id: i64, content: &str)
        -> Result<Option<Comment>>;
    async fn update_comment(&self, id: i64, content: &str) -> Result<Option<Comment>>;
    async fn delete_comment(&self, id: i64) -> Result<bool>;
}
