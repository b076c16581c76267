//! HTTP API of the engine

pub mod handlers;
pub mod serve;
pub mod state;
