pub mod index;
pub mod login;
pub mod users;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use microblog_db::Database;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index::index))
        .route("/index", get(index::index))
        .route("/login", get(login::login_form).post(login::login))
        .route("/user/{username}", get(users::user_page))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
