//! HTTP client for the control plane API

pub mod client;
