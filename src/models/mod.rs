//! Request and response models for the HTTP surface

pub mod auth;
pub use auth::*;
