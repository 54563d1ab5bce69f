/*!
Community feed: posts, likes, comments

Only a post's author may delete it. A comment may be edited by its
author, and removed by its author or by the author of the post it sits
under.
*/
use crate::models::{Comment, NewComment, NewPost, Post};
use crate::store::Store;
use crate::{Error, Result, LOG};

fn post_not_found() -> Error {
    Error::NotFound("Post not found".to_string())
}

fn comment_not_found() -> Error {
    Error::NotFound("Comment not found".to_string())
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeOutcome {
    pub is_liked: bool,
    pub like_count: usize,
    pub post: Post,
}

pub async fn create(store: &dyn Store, user_id: i64, post: NewPost) -> Result<Post> {
    post.validate()?;
    let post = store.create_post(user_id, post).await?;
    slog::info!(LOG, "post created"; "user_id" => user_id, "post_id" => post.id);
    Ok(post)
}

/// Deleting someone else's post looks the same as deleting a missing one.
pub async fn delete(store: &dyn Store, user_id: i64, id: i64) -> Result<()> {
    if !store.delete_post(user_id, id).await? {
        return Err(Error::NotFound("Post not found or unauthorized".to_string()));
    }
    slog::info!(LOG, "post deleted"; "user_id" => user_id, "post_id" => id);
    Ok(())
}

pub async fn toggle_like(store: &dyn Store, user_id: i64, id: i64) -> Result<LikeOutcome> {
    let is_liked = store
        .toggle_like(id, user_id)
        .await?
        .ok_or_else(post_not_found)?;
    let post = store.post_by_id(id).await?.ok_or_else(post_not_found)?;
    Ok(LikeOutcome {
        is_liked,
        like_count: post.likes.len(),
        post,
    })
}

pub async fn add_comment(
    store: &dyn Store,
    user_id: i64,
    post_id: i64,
    comment: &NewComment,
) -> Result<Comment> {
    let content = comment.content()?;
    store
        .add_comment(post_id, user_id, content)
        .await?
        .ok_or_else(post_not_found)
}

/// Find `comment_id` under `post_id`, returning the post too.
async fn locate(store: &dyn Store, post_id: i64, comment_id: i64) -> Result<(Post, Comment)> {
    let post = store.post_by_id(post_id).await?.ok_or_else(post_not_found)?;
    let comment = post
        .comment(comment_id)
        .cloned()
        .ok_or_else(comment_not_found)?;
    Ok((post, comment))
}

pub async fn update_comment(
    store: &dyn Store,
    user_id: i64,
    post_id: i64,
    comment_id: i64,
    changes: &NewComment,
) -> Result<Comment> {
    let content = changes.content()?;
    let (_, comment) = locate(store, post_id, comment_id).await?;
    if comment.user_id != user_id {
        return Err(Error::Unauthorized(
            "Not authorized to edit this comment".to_string(),
        ));
    }
    store
        .update_comment(comment_id, content)
        .await?
        .ok_or_else(comment_not_found)
}

pub async fn delete_comment(
    store: &dyn Store,
    user_id: i64,
    post_id: i64,
    comment_id: i64,
) -> Result<()> {
    let (post, comment) = locate(store, post_id, comment_id).await?;
    if comment.user_id != user_id && post.user_id != user_id {
        slog::warn!(
            LOG, "comment delete refused";
            "user_id" => user_id, "comment_id" => comment_id,
        );
        return Err(Error::Unauthorized(
            "Not authorized to delete this comment".to_string(),
        ));
    }
    if !store.delete_comment(comment_id).await? {
        return Err(comment_not_found());
    }
    Ok(())
}
