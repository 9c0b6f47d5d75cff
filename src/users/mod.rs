use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod handlers;
pub mod repo_types;
pub mod services;
pub mod trial;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::user_routes())
}
