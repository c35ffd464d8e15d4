//! Password key schedule
//!
//! OpenSSL `EVP_BytesToKey` with MD5 and no salt: the digest chain
//! `D_1 = MD5(password)`, `D_n = MD5(D_{n-1} || password)` is concatenated
//! until the requested key length is filled. This is the derivation the
//! reference Shadowsocks servers use for password-based keys.

use md5::{Digest, Md5};

const MD5_LEN: usize = 16;

/// Fill `key` with material derived from `password`
pub fn bytes_to_key(password: &[u8], key: &mut [u8]) {
    let mut last = [0u8; MD5_LEN];
    let mut filled = 0;

    while filled < key.len() {
        let mut hasher = Md5::new();
        if filled > 0 {
            hasher.update(last);
        }
        hasher.update(password);
        let digest = hasher.finalize();

        let take = (key.len() - filled).min(MD5_LEN);
        key[filled..filled + take].copy_from_slice(&digest[..take]);
        last.copy_from_slice(&digest);
        filled += take;
    }
}
