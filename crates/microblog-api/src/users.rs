use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use tracing::error;

use crate::AppState;

/// Plain-text profile: the user followed by their posts, newest first.
pub async fn user_page(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<String, StatusCode> {
    // Run blocking DB queries off the async runtime
    let db = state.clone();
    let (user, posts) = tokio::task::spawn_blocking(move || {
        let user = db
            .db
            .get_user_by_username(&username)
            .map_err(|e| {
                error!("Failed to load user {}: {}", username, e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .ok_or(StatusCode::NOT_FOUND)?;

        let posts = db.db.get_posts_by_user(user.id).map_err(|e| {
            error!("Failed to load posts for {}: {}", user, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

        Ok::<_, StatusCode>((user, posts))
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })??;

    let mut page = format!("User: {}\n", user.username);
    for post in posts {
        page.push_str(&format!(
            "\n{} {} says: {}",
            post.timestamp.format("%Y-%m-%d %H:%M UTC"),
            user.username,
            post.body
        ));
    }
    Ok(page)
}
