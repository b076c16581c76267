//! Compose file generation
//!
//! Single-container applications get a generated document, compose build
//! pack applications get their own file augmented with platform labels and
//! the destination network.

pub mod custom_options;
pub mod labels;
pub mod merge;
pub mod render;

pub use render::{augment_user_compose, render, ComposeDocument};
