use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{
    Comment, NewPost, NewUser, NewVinyl, NewWeeklyPlaylist, Post, Role, SpotifyCredential, User,
    Vinyl, VinylStats, WeeklyPlaylist,
};
use crate::{crypto, Error, Result};

use super::Store;

const USER_COLUMNS: &str = "
    id, name, email, password_hash, role,
    spotify_access_token, spotify_refresh_token, spotify_token_expiry, spotify_id,
    apple_music_token, apple_music_user_token,
    created, modified
";

#[derive(sqlx::FromRow, Debug)]
struct UserRow {
    id: i64,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    // provider tokens are AES_256_GCM sealed, see `crypto::seal`
    spotify_access_token: Option<String>,
    spotify_refresh_token: Option<String>,
    spotify_token_expiry: Option<DateTime<Utc>>,
    spotify_id: Option<String>,
    apple_music_token: Option<String>,
    apple_music_user_token: Option<String>,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

const POST_SELECT: &str = "
    select p.id, p.user_id, u.name as user_name, p.content, p.current_song, p.created, p.modified
    from dashboard.posts p
    join dashboard.users u on u.id = p.user_id
";

// selects from a `c` relation shaped like dashboard.post_comments
const COMMENT_COLUMNS: &str = "
    c.id, c.post_id, c.user_id, u.name as user_name, c.content, c.created, c.modified
";

#[derive(sqlx::FromRow, Debug)]
struct PostRow {
    id: i64,
    user_id: i64,
    user_name: String,
    content: String,
    current_song: String,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

pub struct PgStore {
    pool: PgPool,
    enc_key: Vec<u8>,
}

impl PgStore {
    pub fn new(pool: PgPool, enc_key: Vec<u8>) -> Self {
        Self { pool, enc_key }
    }

    fn seal(&self, value: Option<&str>) -> Result<Option<String>> {
        value.map(|v| crypto::seal(v, &self.enc_key)).transpose()
    }

    fn open(&self, value: Option<String>) -> Result<Option<String>> {
        value
            .map(|v| crypto::open(&v, &self.enc_key))
            .transpose()
    }

    fn to_user(&self, row: UserRow) -> Result<User> {
        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            role: row.role.parse()?,
            spotify: SpotifyCredential {
                access_token: self.open(row.spotify_access_token)?,
                refresh_token: self.open(row.spotify_refresh_token)?,
                expiry: row.spotify_token_expiry,
                spotify_id: row.spotify_id,
            },
            apple_music_token: self.open(row.apple_music_token)?,
            apple_music_user_token: self.open(row.apple_music_user_token)?,
            created: row.created,
            modified: row.modified,
        })
    }

    fn to_maybe_user(&self, row: Option<UserRow>) -> Result<Option<User>> {
        row.map(|r| self.to_user(r)).transpose()
    }

    /// Attach likes and comments to post rows, keeping row order.
    async fn assemble(&self, rows: Vec<PostRow>) -> Result<Vec<Post>> {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let likes: Vec<(i64, i64)> = sqlx::query_as(
            "
            select post_id, user_id from dashboard.post_likes
            where post_id = any($1)
            order by created
            ",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        let comments = sqlx::query_as::<_, Comment>(&format!(
            "
            select {}
            from dashboard.post_comments c
            join dashboard.users u on u.id = c.user_id
            where c.post_id = any($1)
            order by c.created, c.id
            ",
            COMMENT_COLUMNS
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_post: HashMap<i64, Vec<Comment>> = HashMap::new();
        for comment in comments {
            by_post.entry(comment.post_id).or_default().push(comment);
        }

        Ok(rows
            .into_iter()
            .map(|row| Post {
                likes: likes
                    .iter()
                    .filter(|(post_id, _)| *post_id == row.id)
                    .map(|(_, user_id)| *user_id)
                    .collect(),
                comments: by_post.remove(&row.id).unwrap_or_default(),
                id: row.id,
                user_id: row.user_id,
                user_name: row.user_name,
                content: row.content,
                current_song: row.current_song,
                created: row.created,
                modified: row.modified,
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "
            insert into dashboard.users (name, email, password_hash, role)
            values ($1, $2, $3, $4)
            returning {}
            ",
            USER_COLUMNS
        ))
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::Validation("User already exists".to_string())
            } else {
                Error::from(e)
            }
        })?;
        self.to_user(row)
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "select {} from dashboard.users where id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        self.to_maybe_user(row)
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "select {} from dashboard.users where email = $1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        self.to_maybe_user(row)
    }

    async fn update_name(&self, id: i64, name: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "update dashboard.users set name = $1, modified = now() where id = $2 returning {}",
            USER_COLUMNS
        ))
        .bind(name)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        self.to_maybe_user(row)
    }

    async fn set_role(&self, id: i64, role: Role) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "update dashboard.users set role = $1, modified = now() where id = $2 returning {}",
            USER_COLUMNS
        ))
        .bind(role.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        self.to_maybe_user(row)
    }

    async fn save_spotify_credential(
        &self,
        id: i64,
        credential: &SpotifyCredential,
    ) -> Result<Option<User>> {
        let access = self.seal(credential.access_token.as_deref())?;
        let refresh = self.seal(credential.refresh_token.as_deref())?;
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "
            update dashboard.users set
                spotify_access_token = $1,
                spotify_refresh_token = $2,
                spotify_token_expiry = $3,
                spotify_id = $4,
                modified = now()
            where id = $5
            returning {}
            ",
            USER_COLUMNS
        ))
        .bind(access)
        .bind(refresh)
        .bind(credential.expiry)
        .bind(&credential.spotify_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        self.to_maybe_user(row)
    }

    async fn save_apple_music_user_token(&self, id: i64, token: &str) -> Result<Option<User>> {
        let sealed = self.seal(Some(token))?;
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "
            update dashboard.users set apple_music_user_token = $1, modified = now()
            where id = $2
            returning {}
            ",
            USER_COLUMNS
        ))
        .bind(sealed)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        self.to_maybe_user(row)
    }

    async fn clear_apple_music(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "
            update dashboard.users set
                apple_music_token = null,
                apple_music_user_token = null,
                modified = now()
            where id = $1
            returning {}
            ",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        self.to_maybe_user(row)
    }

    async fn current_weekly_playlist(&self) -> Result<Option<WeeklyPlaylist>> {
        Ok(sqlx::query_as::<_, WeeklyPlaylist>(
            "
            select * from dashboard.weekly_playlists
            where active
            order by created desc
            limit 1
            ",
        )
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn activate_weekly_playlist(
        &self,
        playlist: NewWeeklyPlaylist,
    ) -> Result<WeeklyPlaylist> {
        let mut tr = self.pool.begin().await?;
        // serializes rotations; concurrent ones would otherwise race on
        // weekly_playlists_single_active
        sqlx::query("lock table dashboard.weekly_playlists in share row exclusive mode")
            .execute(&mut tr)
            .await?;
        sqlx::query("update dashboard.weekly_playlists set active = false where active")
            .execute(&mut tr)
            .await?;
        let created = sqlx::query_as::<_, WeeklyPlaylist>(
            "
            insert into dashboard.weekly_playlists
            (spotify_playlist_id, embed_url, title, description, week_number, year, active)
            values ($1, $2, $3, $4, $5, $6, true)
            returning *
            ",
        )
        .bind(&playlist.spotify_playlist_id)
        .bind(&playlist.embed_url)
        .bind(&playlist.title)
        .bind(&playlist.description)
        .bind(playlist.week_number)
        .bind(playlist.year)
        .fetch_one(&mut tr)
        .await?;
        tr.commit().await?;
        Ok(created)
    }

    async fn vinyl_page(
        &self,
        user_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Vinyl>, i64)> {
        let records = sqlx::query_as::<_, Vinyl>(
            "
            select * from dashboard.vinyl_records
            where user_id = $1
            order by date_added desc, id desc
            limit $2 offset $3
            ",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total: i64 =
            sqlx::query_scalar("select count(*) from dashboard.vinyl_records where user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok((records, total))
    }

    async fn create_vinyl(&self, user_id: i64, record: NewVinyl) -> Result<Vinyl> {
        Ok(sqlx::query_as::<_, Vinyl>(
            "
            insert into dashboard.vinyl_records
            (user_id, title, artist, release_year, genre, condition, notes, cover_image, discogs_id)
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            returning *
            ",
        )
        .bind(user_id)
        .bind(&record.title)
        .bind(&record.artist)
        .bind(record.release_year)
        .bind(&record.genre)
        .bind(&record.condition)
        .bind(&record.notes)
        .bind(&record.cover_image)
        .bind(&record.discogs_id)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn vinyl_by_id(&self, user_id: i64, id: i64) -> Result<Option<Vinyl>> {
        Ok(sqlx::query_as::<_, Vinyl>(
            "select * from dashboard.vinyl_records where id = $1 and user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn update_vinyl(
        &self,
        user_id: i64,
        id: i64,
        changes: NewVinyl,
    ) -> Result<Option<Vinyl>> {
        Ok(sqlx::query_as::<_, Vinyl>(
            "
            update dashboard.vinyl_records set
                title = coalesce($3, title),
                artist = coalesce($4, artist),
                release_year = coalesce($5, release_year),
                genre = coalesce($6, genre),
                condition = coalesce($7, condition),
                notes = coalesce($8, notes),
                cover_image = coalesce($9, cover_image),
                discogs_id = coalesce($10, discogs_id)
            where id = $1 and user_id = $2
            returning *
            ",
        )
        .bind(id)
        .bind(user_id)
        .bind(&changes.title)
        .bind(&changes.artist)
        .bind(changes.release_year)
        .bind(&changes.genre)
        .bind(&changes.condition)
        .bind(&changes.notes)
        .bind(&changes.cover_image)
        .bind(&changes.discogs_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_vinyl(&self, user_id: i64, id: i64) -> Result<bool> {
        let done = sqlx::query("delete from dashboard.vinyl_records where id = $1 and user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn vinyl_stats(&self, user_id: i64) -> Result<VinylStats> {
        let (total_records, unique_genres, avg_year): (i64, i64, i64) = sqlx::query_as(
            "
            select
                count(*),
                count(distinct genre),
                coalesce(round(avg(release_year)), 0)::bigint
            from dashboard.vinyl_records
            where user_id = $1
            ",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        let by_condition: Vec<(String, i64)> = sqlx::query_as(
            "
            select condition, count(*)
            from dashboard.vinyl_records
            where user_id = $1 and condition is not null
            group by condition
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(VinylStats {
            total_records,
            unique_genres,
            avg_year,
            by_condition: by_condition.into_iter().collect(),
        })
    }

    async fn posts(&self) -> Result<Vec<Post>> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "{} order by p.created desc, p.id desc",
            POST_SELECT
        ))
        .fetch_all(&self.pool)
        .await?;
        self.assemble(rows).await
    }

    async fn create_post(&self, user_id: i64, post: NewPost) -> Result<Post> {
        let id: i64 = sqlx::query_scalar(
            "
            insert into dashboard.posts (user_id, content, current_song)
            values ($1, $2, $3)
            returning id
            ",
        )
        .bind(user_id)
        .bind(post.content.unwrap_or_default())
        .bind(post.current_song.unwrap_or_default())
        .fetch_one(&self.pool)
        .await?;
        self.post_by_id(id)
            .await?
            .ok_or_else(|| Error::Internal(format!("post {} vanished after insert", id)))
    }

    async fn post_by_id(&self, id: i64) -> Result<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!("{} where p.id = $1", POST_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(self.assemble(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn delete_post(&self, user_id: i64, id: i64) -> Result<bool> {
        let done = sqlx::query("delete from dashboard.posts where id = $1 and user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn toggle_like(&self, post_id: i64, user_id: i64) -> Result<Option<bool>> {
        let mut tr = self.pool.begin().await?;
        let exists: Option<i64> = sqlx::query_scalar(
            "select id from dashboard.posts where id = $1 for update",
        )
        .bind(post_id)
        .fetch_optional(&mut tr)
        .await?;
        if exists.is_none() {
            return Ok(None);
        }
        let unliked =
            sqlx::query("delete from dashboard.post_likes where post_id = $1 and user_id = $2")
                .bind(post_id)
                .bind(user_id)
                .execute(&mut tr)
                .await?
                .rows_affected()
                > 0;
        if !unliked {
            sqlx::query("insert into dashboard.post_likes (post_id, user_id) values ($1, $2)")
                .bind(post_id)
                .bind(user_id)
                .execute(&mut tr)
                .await?;
        }
        tr.commit().await?;
        Ok(Some(!unliked))
    }

    async fn add_comment(
        &self,
        post_id: i64,
        user_id: i64,
        content: &str,
    ) -> Result<Option<Comment>> {
        Ok(sqlx::query_as::<_, Comment>(&format!(
            "
            with c as (
                insert into dashboard.post_comments (post_id, user_id, content)
                select $1, $2, $3
                where exists (select 1 from dashboard.posts where id = $1)
                returning *
            )
            select {} from c join dashboard.users u on u.id = c.user_id
            ",
            COMMENT_COLUMNS
        ))
        .bind(post_id)
        .bind(user_id)
        .bind(content)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn update_comment(&self, id: i64, content: &str) -> Result<Option<Comment>> {
        Ok(sqlx::query_as::<_, Comment>(&format!(
            "
            with c as (
                update dashboard.post_comments set content = $2, modified = now()
                where id = $1
                returning *
            )
            select {} from c join dashboard.users u on u.id = c.user_id
            ",
            COMMENT_COLUMNS
        ))
        .bind(id)
        .bind(content)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_comment(&self, id: i64) -> Result<bool> {
        let done = sqlx::query("delete from dashboard.post_comments where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }
}
