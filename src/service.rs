use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Utc};
use serde::de::DeserializeOwned;
use tide::sessions::MemoryStore as SessionStore;
use tide::Request;

use crate::applemusic::AppleMusicConnector;
use crate::guard::{self, SessionGuard};
use crate::models::{
    NewComment, NewPost, NewUser, NewVinyl, NewWeeklyPlaylist, PublicUser, Role, Vinyl,
};
use crate::news::NewsClient;
use crate::spotify::SpotifyConnector;
use crate::store::Store;
use crate::token::{session_ttl, TokenCodec};
use crate::{crypto, posts, stats, utils, Error, Result, LOG};

const VINYL_PAGE_SIZE: i64 = 12;
const ANONYMOUS_SESSION_TTL: Duration = Duration::from_secs(60 * 60);
const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn Store>,
    pub codec: TokenCodec,
    pub spotify: Arc<SpotifyConnector>,
    pub apple: Arc<AppleMusicConnector>,
    pub news: Arc<NewsClient>,
    pub version: String,
}

/// Only requests that write to their session get one stored, so the
/// store holds anonymous apple music tokens and nothing else.
pub fn app(ctx: Context, sessions: SessionStore, session_secret: &str) -> tide::Server<Context> {
    let guard = SessionGuard::new(ctx.codec.clone());
    let mut app = tide::with_state(ctx);
    app.with(crate::logging::LogMiddleware::new());
    app.with(tide::utils::After(crate::error::render));
    app.with(
        tide::sessions::SessionMiddleware::new(sessions, &crypto::hash(session_secret.as_bytes()))
            .with_session_ttl(Some(ANONYMOUS_SESSION_TTL))
            .without_save_unchanged(),
    );
    app.with(guard);

    app.at("/api/status").get(status);

    app.at("/api/auth/signup").post(signup);
    app.at("/api/auth/login").post(login);
    app.at("/api/auth/logout").post(logout);
    app.at("/api/auth/profile").get(profile);
    app.at("/api/auth/update-role").post(update_role);

    app.at("/api/users/profile").get(profile).post(update_profile);

    app.at("/api/spotify/connect").get(spotify_connect);
    app.at("/api/spotify/callback").post(spotify_callback);
    app.at("/api/spotify/status").get(spotify_status);
    app.at("/api/spotify/disconnect").post(spotify_disconnect);
    app.at("/api/spotify/stats").get(spotify_summary);
    app.at("/api/spotify/playlist").post(daily_mix);

    app.at("/api/playlist").post(daily_mix);
    app.at("/api/playlist/stats").get(listening_stats);

    app.at("/api/applemusic/token").get(apple_token);
    app.at("/api/applemusic/user-token").post(apple_user_token);
    app.at("/api/applemusic/status").get(apple_status);
    app.at("/api/applemusic/disconnect").post(apple_disconnect);

    app.at("/api/weekly-playlist/current").get(weekly_current);
    app.at("/api/weekly-playlist/update").post(weekly_update);

    app.at("/api/vinyl").get(vinyl_index).post(vinyl_create);
    app.at("/api/vinyl/stats").get(vinyl_stats);
    app.at("/api/vinyl/recent").get(vinyl_recent);
    app.at("/api/vinyl/:id")
        .get(vinyl_show)
        .put(vinyl_update)
        .delete(vinyl_delete);

    app.at("/api/posts").get(post_index).post(post_create);
    app.at("/api/posts/:id").delete(post_delete);
    app.at("/api/posts/:id/like").post(post_like);
    app.at("/api/posts/:id/comments").post(comment_create);
    app.at("/api/posts/:id/comments/:comment_id")
        .put(comment_update)
        .delete(comment_delete);

    app.at("/api/news").get(news);
    app
}

/// Drops expired anonymous sessions every ten minutes.
async fn expire_sessions(sessions: SessionStore) {
    loop {
        async_std::task::sleep(SESSION_CLEANUP_INTERVAL).await;
        if let Err(e) = sessions.cleanup().await {
            slog::error!(LOG, "session cleanup failed: {}", e);
            continue;
        }
        let remaining = sessions.count().await;
        slog::debug!(LOG, "session cleanup"; "remaining" => remaining);
    }
}

pub async fn start(ctx: Context, config: &crate::config::Config) -> anyhow::Result<()> {
    let sessions = SessionStore::new();
    async_std::task::spawn(expire_sessions(sessions.clone()));
    let app = app(ctx, sessions, &config.session_secret);
    slog::info!(LOG, "running at {}", config.host());
    app.listen(config.listen_addr()).await?;
    Ok(())
}

async fn json_body<T: DeserializeOwned>(req: &mut Request<Context>) -> Result<T> {
    req.body_json()
        .await
        .map_err(|_| Error::Validation("Invalid request body".to_string()))
}

fn query<T: DeserializeOwned>(req: &Request<Context>) -> Result<T> {
    req.query()
        .map_err(|_| Error::Validation("invalid query parameters".to_string()))
}

/// `Some` only for values that are not blank.
fn filled(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn require_admin(caller: &crate::token::SessionUser) -> Result<()> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(Error::Unauthorized("Admin access required".to_string()))
    }
}

#[derive(serde::Serialize)]
struct Status<'a> {
    ok: &'a str,
    version: &'a str,
}

async fn status(req: Request<Context>) -> tide::Result {
    Ok(resp!(json => Status {
        ok: "ok",
        version: &req.state().version,
    }))
}

#[derive(serde::Serialize)]
struct AuthResponse {
    user: PublicUser,
    token: String,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignupBody {
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
    // accepted and ignored, admins are granted with `grant-admin`
    admin_code: Option<String>,
}

async fn signup(mut req: Request<Context>) -> tide::Result {
    let body: SignupBody = json_body(&mut req).await?;
    let ctx = req.state();
    let (name, email, password) = match (
        filled(body.name),
        filled(body.email),
        body.password.filter(|p| !p.is_empty()),
    ) {
        (Some(name), Some(email), Some(password)) => (name, email.to_lowercase(), password),
        _ => {
            return Err(
                Error::Validation("Name, email and password are required".to_string()).into(),
            )
        }
    };
    if body.admin_code.is_some() {
        slog::warn!(LOG, "ignoring admin code submitted at signup"; "email" => &email);
    }

    let user = ctx
        .store
        .create_user(NewUser {
            name,
            email,
            password_hash: crypto::hash_password(password).await?,
            role: Role::User,
        })
        .await?;
    let token = ctx.codec.issue(&user.session_user(), session_ttl())?;
    slog::info!(LOG, "user signed up"; "user_id" => user.id);
    Ok(resp!(status => 201, json => AuthResponse {
        user: user.public(),
        token,
    }))
}

#[derive(serde::Deserialize)]
struct LoginBody {
    email: Option<String>,
    password: Option<String>,
}

async fn login(mut req: Request<Context>) -> tide::Result {
    let body: LoginBody = json_body(&mut req).await?;
    let ctx = req.state();
    let (email, password) = match (filled(body.email), body.password.filter(|p| !p.is_empty())) {
        (Some(email), Some(password)) => (email.to_lowercase(), password),
        _ => {
            return Err(Error::Validation("Email and password are required".to_string()).into())
        }
    };

    let user = ctx.store.user_by_email(&email).await?;
    let hash = user.as_ref().map(|u| u.password_hash.clone());
    let verified = crypto::verify_password(password, hash).await?;
    let user = match user {
        Some(user) if verified => user,
        _ => {
            slog::info!(LOG, "failed login attempt");
            return Err(Error::Unauthenticated("Invalid credentials".to_string()).into());
        }
    };
    let token = ctx.codec.issue(&user.session_user(), session_ttl())?;
    slog::info!(LOG, "user logged in"; "user_id" => user.id);
    Ok(resp!(json => AuthResponse {
        user: user.public(),
        token,
    }))
}

/// Tokens are not revoked server side; this only records the logout.
async fn logout(req: Request<Context>) -> tide::Result {
    let user_id = guard::maybe_caller(&req).map(|u| u.id);
    slog::info!(LOG, "user logged out"; "user_id" => user_id);
    Ok(resp!(json => serde_json::json!({ "message": "Logged out" })))
}

async fn profile(req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let user = req
        .state()
        .store
        .user_by_id(caller.id)
        .await?
        .ok_or_else(|| Error::NotFound("User not found".to_string()))?;
    Ok(resp!(json => user.public()))
}

#[derive(serde::Deserialize)]
struct ProfileBody {
    name: Option<String>,
}

async fn update_profile(mut req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let body: ProfileBody = json_body(&mut req).await?;
    let store = &req.state().store;
    let user = match filled(body.name) {
        Some(name) => store.update_name(caller.id, &name).await?,
        None => store.user_by_id(caller.id).await?,
    }
    .ok_or_else(|| Error::NotFound("User not found".to_string()))?;
    Ok(resp!(json => user.public()))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRoleBody {
    user_id: Option<i64>,
    role: Option<String>,
}

async fn update_role(mut req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    require_admin(&caller)?;
    let body: UpdateRoleBody = json_body(&mut req).await?;
    let (user_id, role) = match (body.user_id, body.role) {
        (Some(user_id), Some(role)) => (user_id, role.parse::<Role>()?),
        _ => return Err(Error::Validation("userId and role are required".to_string()).into()),
    };
    let user = req
        .state()
        .store
        .set_role(user_id, role)
        .await?
        .ok_or_else(|| Error::NotFound("User not found".to_string()))?;
    slog::info!(
        LOG, "role updated";
        "admin_id" => caller.id, "user_id" => user.id, "role" => role.as_str(),
    );
    Ok(resp!(json => serde_json::json!({
        "message": "User role updated",
        "user": user.public(),
    })))
}

async fn spotify_connect(req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let url = req.state().spotify.authorization_url(caller.id)?;
    Ok(resp!(json => serde_json::json!({ "url": url })))
}

#[derive(serde::Deserialize)]
struct CallbackBody {
    code: Option<String>,
    state: Option<String>,
}

async fn spotify_callback(mut req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let body: CallbackBody = json_body(&mut req).await?;
    let (code, state) = match (filled(body.code), filled(body.state)) {
        (Some(code), Some(state)) => (code, state),
        _ => return Err(Error::Validation("code and state are required".to_string()).into()),
    };
    req.state()
        .spotify
        .exchange_code(&caller, &code, &state)
        .await?;
    Ok(resp!(json => serde_json::json!({ "success": true })))
}

async fn spotify_status(req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let status = req.state().spotify.status(caller.id).await?;
    Ok(resp!(json => status))
}

async fn spotify_disconnect(req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    req.state().spotify.disconnect(caller.id).await?;
    Ok(resp!(json => serde_json::json!({
        "success": true,
        "message": "Disconnected from Spotify",
    })))
}

async fn spotify_summary(req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let summary = stats::spotify_summary(&req.state().spotify, caller.id).await?;
    Ok(resp!(json => summary))
}

async fn listening_stats(req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let stats = stats::listening_stats(&req.state().spotify, caller.id).await?;
    Ok(resp!(json => stats))
}

async fn daily_mix(req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let today = Utc::now().date_naive();
    let mix = stats::daily_mix(&req.state().spotify, caller.id, today).await?;
    Ok(resp!(json => mix))
}

async fn apple_token(req: Request<Context>) -> tide::Result {
    let token = req.state().apple.issue_developer_token()?;
    Ok(resp!(json => serde_json::json!({
        "success": true,
        "data": { "token": token },
    })))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserTokenBody {
    music_user_token: Option<String>,
}

async fn apple_user_token(mut req: Request<Context>) -> tide::Result {
    let body: UserTokenBody = json_body(&mut req).await?;
    let caller = guard::maybe_caller(&req);
    let apple = req.state().apple.clone();
    let token = body.music_user_token.unwrap_or_default();
    let is_temporary = apple
        .save_user_token(caller.as_ref(), req.session_mut(), &token)
        .await?;
    Ok(resp!(json => serde_json::json!({
        "success": true,
        "message": "Apple Music connected",
        "data": { "isTemporary": is_temporary },
    })))
}

async fn apple_status(req: Request<Context>) -> tide::Result {
    let caller = guard::maybe_caller(&req);
    let status = req
        .state()
        .apple
        .status(caller.as_ref(), req.session())
        .await?;
    Ok(resp!(json => serde_json::json!({ "success": true, "data": status })))
}

async fn apple_disconnect(mut req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let apple = req.state().apple.clone();
    apple.disconnect(caller.id, req.session_mut()).await?;
    Ok(resp!(json => serde_json::json!({
        "success": true,
        "message": "Disconnected from Apple Music",
    })))
}

async fn weekly_current(req: Request<Context>) -> tide::Result {
    let playlist = req
        .state()
        .store
        .current_weekly_playlist()
        .await?
        .ok_or_else(|| Error::NotFound("No active playlist found".to_string()))?;
    Ok(resp!(json => playlist))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct WeeklyBody {
    spotify_playlist_id: Option<String>,
    embed_url: Option<String>,
    title: Option<String>,
    description: Option<String>,
}

async fn weekly_update(mut req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    require_admin(&caller)?;
    let body: WeeklyBody = json_body(&mut req).await?;
    let (spotify_playlist_id, embed_url, title) = match (
        filled(body.spotify_playlist_id),
        filled(body.embed_url),
        filled(body.title),
    ) {
        (Some(id), Some(url), Some(title)) => (id, url, title),
        _ => return Err(Error::Validation("Missing required fields".to_string()).into()),
    };
    let today = Utc::now().date_naive();
    let playlist = req
        .state()
        .store
        .activate_weekly_playlist(NewWeeklyPlaylist {
            spotify_playlist_id,
            embed_url,
            title,
            description: body.description.unwrap_or_default(),
            week_number: utils::week_number(today) as i32,
            year: today.year(),
        })
        .await?;
    slog::info!(
        LOG, "weekly playlist updated";
        "admin_id" => caller.id, "playlist_id" => playlist.id,
    );
    Ok(resp!(status => 201, json => playlist))
}

#[derive(serde::Deserialize)]
struct PageQuery {
    page: Option<i64>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct VinylPage {
    records: Vec<Vinyl>,
    current_page: i64,
    total_pages: i64,
    total_records: i64,
}

async fn vinyl_index(req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let page = query::<PageQuery>(&req)?.page.unwrap_or(1).max(1);
    let offset = (page - 1)
        .checked_mul(VINYL_PAGE_SIZE)
        .ok_or_else(|| Error::Validation("Invalid page".to_string()))?;
    let (records, total) = req
        .state()
        .store
        .vinyl_page(caller.id, offset, VINYL_PAGE_SIZE)
        .await?;
    Ok(resp!(json => VinylPage {
        records,
        current_page: page,
        total_pages: (total + VINYL_PAGE_SIZE - 1) / VINYL_PAGE_SIZE,
        total_records: total,
    }))
}

async fn vinyl_create(mut req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let record: NewVinyl = json_body(&mut req).await?;
    record.validate()?;
    let created = req.state().store.create_vinyl(caller.id, record).await?;
    slog::info!(LOG, "vinyl record added"; "user_id" => caller.id, "record_id" => created.id);
    Ok(resp!(status => 201, json => created))
}

async fn vinyl_stats(req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let stats = req.state().store.vinyl_stats(caller.id).await?;
    Ok(resp!(json => stats))
}

#[derive(serde::Deserialize)]
struct RecentQuery {
    limit: Option<i64>,
}

async fn vinyl_recent(req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let limit = query::<RecentQuery>(&req)?.limit.unwrap_or(3).clamp(1, 50);
    let (records, _) = req.state().store.vinyl_page(caller.id, 0, limit).await?;
    Ok(resp!(json => records))
}

fn path_id(req: &Request<Context>, name: &str, missing: &str) -> Result<i64> {
    req.param(name)
        .ok()
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| Error::NotFound(missing.to_string()))
}

async fn vinyl_show(req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let id = path_id(&req, "id", "Record not found")?;
    let record = req
        .state()
        .store
        .vinyl_by_id(caller.id, id)
        .await?
        .ok_or_else(|| Error::NotFound("Record not found".to_string()))?;
    Ok(resp!(json => record))
}

async fn vinyl_update(mut req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let id = path_id(&req, "id", "Record not found")?;
    let changes: NewVinyl = json_body(&mut req).await?;
    changes.validate_changes()?;
    let record = req
        .state()
        .store
        .update_vinyl(caller.id, id, changes)
        .await?
        .ok_or_else(|| Error::NotFound("Record not found".to_string()))?;
    Ok(resp!(json => record))
}

async fn vinyl_delete(req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let id = path_id(&req, "id", "Record not found")?;
    if !req.state().store.delete_vinyl(caller.id, id).await? {
        return Err(Error::NotFound("Record not found".to_string()).into());
    }
    slog::info!(LOG, "vinyl record deleted"; "user_id" => caller.id, "record_id" => id);
    Ok(resp!(json => serde_json::json!({ "message": "Record deleted successfully" })))
}

async fn post_index(req: Request<Context>) -> tide::Result {
    let posts = req.state().store.posts().await?;
    Ok(resp!(json => posts))
}

async fn post_create(mut req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let post: NewPost = json_body(&mut req).await?;
    let post = posts::create(req.state().store.as_ref(), caller.id, post).await?;
    Ok(resp!(status => 201, json => post))
}

async fn post_delete(req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let id = path_id(&req, "id", "Post not found")?;
    posts::delete(req.state().store.as_ref(), caller.id, id).await?;
    Ok(resp!(json => serde_json::json!({
        "message": "Post deleted successfully",
        "postId": id,
    })))
}

async fn post_like(req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let id = path_id(&req, "id", "Post not found")?;
    let outcome = posts::toggle_like(req.state().store.as_ref(), caller.id, id).await?;
    Ok(resp!(json => outcome))
}

async fn comment_create(mut req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let post_id = path_id(&req, "id", "Post not found")?;
    let body: NewComment = json_body(&mut req).await?;
    let comment =
        posts::add_comment(req.state().store.as_ref(), caller.id, post_id, &body).await?;
    Ok(resp!(status => 201, json => comment))
}

async fn comment_update(mut req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let post_id = path_id(&req, "id", "Post not found")?;
    let comment_id = path_id(&req, "comment_id", "Comment not found")?;
    let body: NewComment = json_body(&mut req).await?;
    let comment = posts::update_comment(
        req.state().store.as_ref(),
        caller.id,
        post_id,
        comment_id,
        &body,
    )
    .await?;
    Ok(resp!(json => comment))
}

async fn comment_delete(req: Request<Context>) -> tide::Result {
    let caller = guard::caller(&req)?;
    let post_id = path_id(&req, "id", "Post not found")?;
    let comment_id = path_id(&req, "comment_id", "Comment not found")?;
    posts::delete_comment(req.state().store.as_ref(), caller.id, post_id, comment_id).await?;
    Ok(resp!(json => serde_json::json!({ "message": "Comment deleted successfully" })))
}

#[derive(serde::Deserialize)]
struct NewsQuery {
    genre: Option<String>,
}

async fn news(req: Request<Context>) -> tide::Result {
    let genre = query::<NewsQuery>(&req)?.genre;
    let articles = req.state().news.articles(genre.as_deref()).await?;
    Ok(resp!(json => articles))
}
