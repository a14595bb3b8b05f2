use crate::state::AppState;
use axum::Router;

pub mod catalog;
pub mod dto;
pub mod handlers;
pub mod services;

pub fn router() -> Router<AppState> {
    handlers::stt_routes()
}
