//! Background workers

pub mod canary;
pub mod deployer;
