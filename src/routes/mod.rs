//! HTTP route handlers grouped by resource domain.
//!
//! Each submodule corresponds to a logical area of the API and exposes
//! typed Rocket handlers annotated with `#[openapi]` so `rocket_okapi` can
//! derive an OpenAPI document automatically.

pub mod accounts;
pub mod health;
pub mod subscriptions;

pub use crate::auth::routes as auth;
