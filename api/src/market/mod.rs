//! Marketplace operations.
//!
//! Each function takes the caller's identity explicitly and returns
//! [`AppError`](crate::error::AppError) kinds that the HTTP layer and the
//! screen state holders translate for the user. Nothing here retries.

pub mod chat;
pub mod listings;
pub mod users;
