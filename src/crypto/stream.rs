//! In-place cipher contexts
//!
//! A [`CipherContext`] is the per-direction state handed to a relay
//! direction. `apply` mutates the buffer in place and never fails; for the
//! stateful `rc4` method the context advances its keystream, so every byte
//! of a direction must pass through its context exactly once, in order.

use super::{Direction, KEY_LEN};
use md5::{Digest, Md5};
use rc4::{consts::U16, KeyInit, Rc4, StreamCipher as _};
use std::sync::Arc;

/// Per-direction cipher state for one connection
pub enum CipherContext {
    /// RC4 keystream, unique to this connection and direction
    Rc4(Box<Rc4<U16>>),
    /// Shared substitution table plus the direction it is applied in
    Table {
        table: Arc<TableCipher>,
        direction: Direction,
    },
    /// Identity
    Plain,
}

impl CipherContext {
    pub(super) fn rc4(key: &[u8; KEY_LEN]) -> Self {
        CipherContext::Rc4(Box::new(Rc4::new(key.into())))
    }

    pub(super) fn table(table: Arc<TableCipher>, direction: Direction) -> Self {
        CipherContext::Table { table, direction }
    }

    pub(super) fn plain() -> Self {
        CipherContext::Plain
    }

    /// Transform `buf` in place
    pub fn apply(&mut self, buf: &mut [u8]) {
        match self {
            CipherContext::Rc4(state) => state.apply_keystream(buf),
            CipherContext::Table { table, direction } => match direction {
                Direction::Encrypt => table.encrypt(buf),
                Direction::Decrypt => table.decrypt(buf),
            },
            CipherContext::Plain => {}
        }
    }
}

/// The classic password-derived byte-substitution cipher
///
/// `a` is the little-endian u64 prefix of `MD5(password)`; the encrypt
/// permutation is `0..=255` stably sorted by `a % (x + i)` for
/// `i in 1..1024`, and the decrypt table is its inverse.
pub struct TableCipher {
    enc: [u8; 256],
    dec: [u8; 256],
}

impl TableCipher {
    pub fn new(password: &[u8]) -> Self {
        let digest = Md5::digest(password);
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest[..8]);
        let a = u64::from_le_bytes(seed);

        let mut table: Vec<u64> = (0..256).collect();
        for i in 1..1024u64 {
            table.sort_by_key(|&x| a % (x + i));
        }

        let mut enc = [0u8; 256];
        let mut dec = [0u8; 256];
        for (i, &x) in table.iter().enumerate() {
            enc[i] = x as u8;
            dec[x as usize] = i as u8;
        }

        TableCipher { enc, dec }
    }

    pub fn encrypt(&self, buf: &mut [u8]) {
        for b in buf {
            *b = self.enc[*b as usize];
        }
    }

    pub fn decrypt(&self, buf: &mut [u8]) {
        for b in buf {
            *b = self.dec[*b as usize];
        }
    }
}
