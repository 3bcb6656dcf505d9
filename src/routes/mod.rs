//! HTTP route handlers.
//!
//! Each sub-module corresponds to an API endpoint group. All handlers except
//! [`health`] require authentication via the [`crate::auth::require_bearer_token`]
//! middleware.

pub mod adapters;
pub mod analysis;
pub mod engines;
pub mod fs;
pub mod health;
pub mod missions;
