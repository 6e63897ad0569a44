//! HTTP API.
//!
//! - [`marketplace`]: endpoints called by the marketplace frontend and backend
//! - [`webhook`]: `POST /gateway/webhook`, called by the payment gateway

pub mod error;
pub mod extractors;
mod marketplace;
mod webhook;

#[cfg(test)]
mod tests;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(marketplace::router())
        .merge(webhook::router())
}
