//! # CMEI Gateway
//!
//! Axum HTTP API over the waitlist workflow: data routes under `/api`,
//! serverless-style endpoints under `/functions`.

pub mod error;
pub mod functions;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use server::{AppState, Usuario, build_router, start};
