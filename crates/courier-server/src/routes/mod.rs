pub mod models;
pub mod reply;
pub mod session;

use crate::state::AppState;
use axum::Router;

pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(models::routes(state.clone()))
        .merge(session::routes(state.clone()))
        .merge(reply::routes(state))
}
