//! Engine HTTP API bodies

pub mod models;

pub use models::*;
