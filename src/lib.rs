//! Sagasu
//!
//! Lightweight remote file system. This crate holds the one piece with real
//! protocol logic: verified chunked uploads over a WebSocket.
//!
//! # Modules
//!
//! - `upload`: client side (session state machine, integrity, transport)
//! - `receive`: server side (destination checks, tag verification, commit)
//! - `routes`: axum endpoints exposing the receiver

pub mod config;
pub mod error;
pub mod receive;
pub mod routes;
pub mod state;
pub mod upload;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::AppState;

/// Build the HTTP application
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/upload", routes::upload::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
