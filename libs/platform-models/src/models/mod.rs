//! Platform models

pub mod application;
pub mod deployment;
pub mod environment;
