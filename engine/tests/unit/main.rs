//! Integration tests of the deployment engine

mod common;
mod test_api;
mod test_canary;
mod test_compose;
mod test_env;
mod test_pipeline;
mod test_rollout;
mod test_status;
