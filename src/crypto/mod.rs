//! Cipher binding for the relay
//!
//! This module provides:
//! - The cipher method registry (`rc4`, `table`, `plain`)
//! - Password-to-key derivation (OpenSSL `EVP_BytesToKey` with MD5)
//! - Process-wide cipher configuration built once at startup
//! - Per-direction cipher contexts applied in place on the relay buffers
//!
//! Only `rc4` is stateful: each connection gets two fresh keystreams, one
//! per direction. `table` applies a fixed byte-substitution permutation and
//! `plain` is the identity; neither carries per-connection state.

mod kdf;
mod stream;

pub use kdf::bytes_to_key;
pub use stream::{CipherContext, TableCipher};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Length of a derived symmetric key in bytes
pub const KEY_LEN: usize = 16;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unknown cipher method: {0}")]
    UnknownMethod(String),

    #[error("password must not be empty")]
    EmptyPassword,
}

/// Recognized cipher methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// Byte-substitution table derived from the password (default)
    #[default]
    Table,
    /// RC4 stream cipher with a per-direction keystream per connection
    Rc4,
    /// Identity cipher, relays bytes unchanged
    Plain,
}

impl FromStr for Method {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(Method::Table),
            "rc4" => Ok(Method::Rc4),
            "plain" | "none" => Ok(Method::Plain),
            _ => Err(CryptoError::UnknownMethod(s.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Table => write!(f, "table"),
            Method::Rc4 => write!(f, "rc4"),
            Method::Plain => write!(f, "plain"),
        }
    }
}

/// Cipher direction relative to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Bytes travelling back to the client
    Encrypt,
    /// Bytes arriving from the client
    Decrypt,
}

/// Process-wide cipher configuration
///
/// Built once from `(password, method)` at startup and shared read-only
/// across all connections. Hands out per-direction [`CipherContext`]s.
#[derive(Clone)]
pub enum CipherConfig {
    Rc4 { key: [u8; KEY_LEN] },
    Table(Arc<TableCipher>),
    Plain,
}

impl CipherConfig {
    /// Derive the key schedule for `method` from `password`
    pub fn new(password: &str, method: Method) -> Result<Self, CryptoError> {
        if password.is_empty() {
            return Err(CryptoError::EmptyPassword);
        }

        match method {
            Method::Rc4 => {
                let mut key = [0u8; KEY_LEN];
                bytes_to_key(password.as_bytes(), &mut key);
                Ok(CipherConfig::Rc4 { key })
            }
            Method::Table => Ok(CipherConfig::Table(Arc::new(TableCipher::new(
                password.as_bytes(),
            )))),
            Method::Plain => Ok(CipherConfig::Plain),
        }
    }

    /// The configured method
    pub fn method(&self) -> Method {
        match self {
            CipherConfig::Rc4 { .. } => Method::Rc4,
            CipherConfig::Table(_) => Method::Table,
            CipherConfig::Plain => Method::Plain,
        }
    }

    /// Create a fresh context for one direction of one connection
    ///
    /// For `rc4` the context owns a new keystream; the caller must feed it
    /// every byte of its direction exactly once, in stream order.
    pub fn context(&self, direction: Direction) -> CipherContext {
        match self {
            CipherConfig::Rc4 { key } => CipherContext::rc4(key),
            CipherConfig::Table(table) => CipherContext::table(Arc::clone(table), direction),
            CipherConfig::Plain => CipherContext::plain(),
        }
    }
}
