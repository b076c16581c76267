//! Launchpad deployment engine
//!
//! Turns a queued deployment of an application into running containers on
//! a remote Docker host: fetch the source, build an image, push it, roll it
//! out behind the Traefik proxy and record every step in the deployment log.

pub mod app;
pub mod build;
pub mod compose;
pub mod context;
pub mod deploy;
pub mod env;
pub mod errors;
pub mod filesys;
pub mod git;
pub mod http;
pub mod logs;
pub mod notify;
pub mod registry;
pub mod remote;
pub mod rollout;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
pub mod workers;
