//! Build secrets hash

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::env::set::EnvSet;
use crate::errors::EngineError;

type HmacSha256 = Hmac<Sha256>;

/// Variable and build secret id carrying the hash
pub const SECRETS_HASH_KEY: &str = "LAUNCHPAD_BUILD_SECRETS_HASH";

/// HMAC-SHA256 (hex) over the key-sorted `key=value\n` pairs of `env`.
///
/// The hash only changes when a value changes, so unchanged secrets keep
/// the docker build cache warm.
pub fn secrets_hash(env: &EnvSet, key: &[u8]) -> Result<String, EngineError> {
    let sorted: BTreeMap<String, String> = env
        .iter()
        .filter(|v| v.key != SECRETS_HASH_KEY)
        .map(|v| (v.key.clone(), v.value.clone()))
        .collect();

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| EngineError::Internal(format!("invalid secrets hash key: {e}")))?;
    for (k, v) in &sorted {
        mac.update(k.as_bytes());
        mac.update(b"=");
        mac.update(v.as_bytes());
        mac.update(b"\n");
    }
    Ok(hex::encode(mac.finalize().into_bytes()))
}
