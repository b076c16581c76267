//! Environment variable composition

pub mod composer;
pub mod escape;
pub mod secrets;
pub mod set;

pub use composer::Scope;
pub use secrets::SECRETS_HASH_KEY;
pub use set::{EnvSet, EnvVar, Quoting};
