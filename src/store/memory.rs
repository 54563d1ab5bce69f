use std::sync::Mutex;

use chrono::Utc;

use crate::models::{
    Comment, NewPost, NewUser, NewVinyl, NewWeeklyPlaylist, Post, Role, SpotifyCredential, User,
    Vinyl, VinylStats, WeeklyPlaylist,
};
use crate::{Error, Result};

use super::Store;

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    playlists: Vec<WeeklyPlaylist>,
    vinyl: Vec<Vinyl>,
    posts: Vec<Post>,
    next_id: i64,
}

impl Tables {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn update_user<F: FnOnce(&mut User)>(&mut self, id: i64, f: F) -> Option<User> {
        let user = self.users.iter_mut().find(|u| u.id == id)?;
        f(user);
        user.modified = Utc::now();
        Some(user.clone())
    }

    fn user_name(&self, id: i64) -> String {
        self.users
            .iter()
            .find(|u| u.id == id)
            .map(|u| u.name.clone())
            .unwrap_or_default()
    }

    fn post_mut(&mut self, id: i64) -> Option<&mut Post> {
        self.posts.iter_mut().find(|p| p.id == id)
    }

    fn comment_mut(&mut self, id: i64) -> Option<&mut Comment> {
        self.posts
            .iter_mut()
            .flat_map(|p| p.comments.iter_mut())
            .find(|c| c.id == id)
    }
}

fn tally<'a>(records: impl IntoIterator<Item = &'a Vinyl>) -> VinylStats {
    let mut stats = VinylStats::default();
    let mut genres = std::collections::HashSet::new();
    let (mut year_sum, mut year_count) = (0i64, 0i64);
    for record in records {
        stats.total_records += 1;
        if let Some(genre) = &record.genre {
            genres.insert(genre.clone());
        }
        if let Some(year) = record.release_year {
            year_sum += year as i64;
            year_count += 1;
        }
        if let Some(condition) = &record.condition {
            *stats.by_condition.entry(condition.clone()).or_insert(0) += 1;
        }
    }
    stats.unique_genres = genres.len() as i64;
    if year_count > 0 {
        stats.avg_year = (year_sum as f64 / year_count as f64).round() as i64;
    }
    stats
}

/// In-memory `Store` for tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut t = self.tables();
        if t.users.iter().any(|u| u.email == user.email) {
            return Err(Error::Validation("User already exists".to_string()));
        }
        let now = Utc::now();
        let created = User {
            id: t.id(),
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            spotify: SpotifyCredential::default(),
            apple_music_token: None,
            apple_music_user_token: None,
            created: now,
            modified: now,
        };
        t.users.push(created.clone());
        Ok(created)
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        Ok(self.tables().users.iter().find(|u| u.id == id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .tables()
            .users
            .iter()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn update_name(&self, id: i64, name: &str) -> Result<Option<User>> {
        Ok(self.tables().update_user(id, |u| u.name = name.to_string()))
    }

    async fn set_role(&self, id: i64, role: Role) -> Result<Option<User>> {
        Ok(self.tables().update_user(id, |u| u.role = role))
    }

    async fn save_spotify_credential(
        &self,
        id: i64,
        credential: &SpotifyCredential,
    ) -> Result<Option<User>> {
        Ok(self
            .tables()
            .update_user(id, |u| u.spotify = credential.clone()))
    }

    async fn save_apple_music_user_token(&self, id: i64, token: &str) -> Result<Option<User>> {
        Ok(self
            .tables()
            .update_user(id, |u| u.apple_music_user_token = Some(token.to_string())))
    }

    async fn clear_apple_music(&self, id: i64) -> Result<Option<User>> {
        Ok(self.tables().update_user(id, |u| {
            u.apple_music_token = None;
            u.apple_music_user_token = None;
        }))
    }

    async fn current_weekly_playlist(&self) -> Result<Option<WeeklyPlaylist>> {
        Ok(self
            .tables()
            .playlists
            .iter()
            .rev()
            .find(|p| p.active)
            .cloned())
    }

    async fn activate_weekly_playlist(
        &self,
        playlist: NewWeeklyPlaylist,
    ) -> Result<WeeklyPlaylist> {
        let mut t = self.tables();
        for p in t.playlists.iter_mut() {
            p.active = false;
        }
        let created = WeeklyPlaylist {
            id: t.id(),
            spotify_playlist_id: playlist.spotify_playlist_id,
            embed_url: playlist.embed_url,
            title: playlist.title,
            description: playlist.description,
            week_number: playlist.week_number,
            year: playlist.year,
            active: true,
            created: Utc::now(),
        };
        t.playlists.push(created.clone());
        Ok(created)
    }

    async fn vinyl_page(
        &self,
        user_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Vinyl>, i64)> {
        let t = self.tables();
        let owned: Vec<&Vinyl> = t.vinyl.iter().rev().filter(|v| v.user_id == user_id).collect();
        let total = owned.len() as i64;
        let page = owned
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn create_vinyl(&self, user_id: i64, record: NewVinyl) -> Result<Vinyl> {
        let mut t = self.tables();
        let created = Vinyl {
            id: t.id(),
            user_id,
            title: record.title.unwrap_or_default(),
            artist: record.artist.unwrap_or_default(),
            release_year: record.release_year,
            genre: record.genre,
            condition: record.condition,
            notes: record.notes,
            cover_image: record.cover_image,
            discogs_id: record.discogs_id,
            date_added: Utc::now(),
        };
        t.vinyl.push(created.clone());
        Ok(created)
    }

    async fn vinyl_by_id(&self, user_id: i64, id: i64) -> Result<Option<Vinyl>> {
        Ok(self
            .tables()
            .vinyl
            .iter()
            .find(|v| v.id == id && v.user_id == user_id)
            .cloned())
    }

    async fn update_vinyl(
        &self,
        user_id: i64,
        id: i64,
        changes: NewVinyl,
    ) -> Result<Option<Vinyl>> {
        let mut t = self.tables();
        let record = match t.vinyl.iter_mut().find(|v| v.id == id && v.user_id == user_id) {
            Some(record) => record,
            None => return Ok(None),
        };
        if let Some(title) = changes.title {
            record.title = title;
        }
        if let Some(artist) = changes.artist {
            record.artist = artist;
        }
        if changes.release_year.is_some() {
            record.release_year = changes.release_year;
        }
        if changes.genre.is_some() {
            record.genre = changes.genre;
        }
        if changes.condition.is_some() {
            record.condition = changes.condition;
        }
        if changes.notes.is_some() {
            record.notes = changes.notes;
        }
        if changes.cover_image.is_some() {
            record.cover_image = changes.cover_image;
        }
        if changes.discogs_id.is_some() {
            record.discogs_id = changes.discogs_id;
        }
        Ok(Some(record.clone()))
    }

    async fn delete_vinyl(&self, user_id: i64, id: i64) -> Result<bool> {
        let mut t = self.tables();
        let before = t.vinyl.len();
        t.vinyl.retain(|v| !(v.id == id && v.user_id == user_id));
        Ok(t.vinyl.len() != before)
    }

    async fn vinyl_stats(&self, user_id: i64) -> Result<VinylStats> {
        let t = self.tables();
        Ok(tally(t.vinyl.iter().filter(|v| v.user_id == user_id)))
    }

    async fn posts(&self) -> Result<Vec<Post>> {
        Ok(self.tables().posts.iter().rev().cloned().collect())
    }

    async fn create_post(&self, user_id: i64, post: NewPost) -> Result<Post> {
        let mut t = self.tables();
        let now = Utc::now();
        let created = Post {
            id: t.id(),
            user_id,
            user_name: t.user_name(user_id),
            content: post.content.unwrap_or_default(),
            current_song: post.current_song.unwrap_or_default(),
            likes: vec![],
            comments: vec![],
            created: now,
            modified: now,
        };
        t.posts.push(created.clone());
        Ok(created)
    }

    async fn post_by_id(&self, id: i64) -> Result<Option<Post>> {
        Ok(self.tables().posts.iter().find(|p| p.id == id).cloned())
    }

    async fn delete_post(&self, user_id: i64, id: i64) -> Result<bool> {
        let mut t = self.tables();
        let before = t.posts.len();
        t.posts.retain(|p| !(p.id == id && p.user_id == user_id));
        Ok(t.posts.len() != before)
    }

    async fn toggle_like(&self, post_id: i64, user_id: i64) -> Result<Option<bool>> {
        let mut t = self.tables();
        let post = match t.post_mut(post_id) {
            Some(post) => post,
            None => return Ok(None),
        };
        if post.likes.contains(&user_id) {
            post.likes.retain(|id| *id != user_id);
            Ok(Some(false))
        } else {
            post.likes.push(user_id);
            Ok(Some(true))
        }
    }

    async fn add_comment(
        &self,
        post_id: i64,
        user_id: i64,
        content: &str,
    ) -> Result<Option<Comment>> {
        let mut t = self.tables();
        if t.post_mut(post_id).is_none() {
            return Ok(None);
        }
        let now = Utc::now();
        let comment = Comment {
            id: t.id(),
            post_id,
            user_id,
            user_name: t.user_name(user_id),
            content: content.to_string(),
            created: now,
            modified: now,
        };
        if let Some(post) = t.post_mut(post_id) {
            post.comments.push(comment.clone());
        }
        Ok(Some(comment))
    }

    async fn update_comment(&self, id: i64, content: &str) -> Result<Option<Comment>> {
        let mut t = self.tables();
        Ok(t.comment_mut(id).map(|c| {
            c.content = content.to_string();
            c.modified = Utc::now();
            c.clone()
        }))
    }

    async fn delete_comment(&self, id: i64) -> Result<bool> {
        let mut t = self.tables();
        let mut removed = false;
        for post in t.posts.iter_mut() {
            let before = post.comments.len();
            post.comments.retain(|c| c.id != id);
            removed |= post.comments.len() != before;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(genre: Option<&str>, year: Option<i32>, condition: Option<&str>) -> NewVinyl {
        NewVinyl {
            title: Some("Blue Train".into()),
            artist: Some("John Coltrane".into()),
            release_year: year,
            genre: genre.map(String::from),
            condition: condition.map(String::from),
            ..Default::default()
        }
    }

    #[async_std::test]
    async fn vinyl_stats_tally() {
        let store = MemoryStore::new();
        for r in [
            record(Some("Jazz"), Some(1957), Some("Mint")),
            record(Some("Jazz"), Some(1959), Some("Good")),
            record(Some("Rock"), None, Some("Mint")),
            record(None, Some(1970), None),
        ] {
            store.create_vinyl(1, r).await.unwrap();
        }
        store
            .create_vinyl(2, record(Some("Soul"), Some(1990), None))
            .await
            .unwrap();

        let stats = store.vinyl_stats(1).await.unwrap();
        assert_eq!(stats.total_records, 4);
        assert_eq!(stats.unique_genres, 2);
        assert_eq!(stats.avg_year, 1962);
        assert_eq!(stats.by_condition.get("Mint"), Some(&2));
        assert_eq!(stats.by_condition.get("Good"), Some(&1));
    }

    #[async_std::test]
    async fn empty_collection_stats_are_zero() {
        let stats = MemoryStore::new().vinyl_stats(1).await.unwrap();
        assert_eq!(stats, VinylStats::default());
    }

    #[async_std::test]
    async fn likes_toggle_per_user() {
        let store = MemoryStore::new();
        let post = store
            .create_post(
                1,
                NewPost {
                    content: Some("spinning Blue Train".into()),
                    current_song: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(store.toggle_like(post.id, 2).await.unwrap(), Some(true));
        assert_eq!(store.toggle_like(post.id, 3).await.unwrap(), Some(true));
        assert_eq!(store.toggle_like(post.id, 2).await.unwrap(), Some(false));
        assert_eq!(store.post_by_id(post.id).await.unwrap().unwrap().likes, vec![3]);
        assert_eq!(store.toggle_like(post.id + 100, 2).await.unwrap(), None);
    }
}
