//! Security module
//!
//! OS keyring integration for the realtime session's auth token.

pub mod keyring;

use anyhow::Result;

/// Set API key in secure keyring
pub fn set_api_key(key: &str) -> Result<()> {
    keyring::set_api_key(key)
}

/// Get API key from secure keyring
pub fn get_api_key() -> Result<String> {
    keyring::get_api_key()
}

/// Delete API key from keyring
pub fn delete_api_key() -> Result<()> {
    keyring::delete_api_key()
}

