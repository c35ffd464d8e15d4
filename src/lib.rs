//! # Umbra Relay
//!
//! Server side of a Shadowsocks-style encrypted TCP relay.
//!
//! A client connects, sends an encrypted request frame naming a destination
//! host and port, then streams encrypted payload bytes. The server decrypts,
//! connects to the destination, and splices traffic in both directions:
//! bytes headed upstream are decrypted, bytes headed back to the client are
//! encrypted.
//!
//! ## Architecture
//!
//! ```text
//!             ciphertext                              plaintext
//! ┌────────┐ ───────────▶ ┌───────────────────────┐ ───────────▶ ┌─────────────┐
//! │ client │              │      umbra-relay      │              │ destination │
//! └────────┘ ◀─────────── │ decrypt ⇄ ⇄ ⇄ encrypt │ ◀─────────── └─────────────┘
//!                         └───────────────────────┘
//! ```
//!
//! Each accepted connection runs as one task that drives the pair through
//! `Handshaking → Connecting → Streaming → Closed`. Per direction there is a
//! single fixed-size buffer; a direction never reads while it still has
//! unsent bytes, which bounds in-flight data and gives natural backpressure.

pub mod config;
pub mod crypto;
pub mod relay;

pub use config::Config;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Per-direction relay buffer size in bytes
pub const BUF_SIZE: usize = 4096;

/// Default upstream connect timeout in seconds
pub const DEFAULT_TIMEOUT: u64 = 60;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Relay error: {0}")]
    Relay(#[from] relay::RelayError),

    #[error("Configuration error: {0}")]
    Config(String),
}
