//! OpenPGP String-to-Key derivation
//!
//! Turns a passphrase into a symmetric session key for protecting secret
//! key material at rest. Supports the simple, salted and iterated+salted
//! specifiers. When the key is longer than one digest, additional hash
//! contexts are preloaded with 1, 2, ... zero octets and their outputs
//! concatenated.

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use super::hash::{HashAlgorithm, HashContext};
use super::SecureBytes;
use crate::error::{PgpError, Result};

/// Salt length in bytes
pub const SALT_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S2kSpecifier {
    Simple,
    Salted,
    IteratedSalted,
}

impl S2kSpecifier {
    pub fn id(self) -> u8 {
        match self {
            Self::Simple => 0,
            Self::Salted => 1,
            Self::IteratedSalted => 3,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Self::Simple),
            1 => Ok(Self::Salted),
            3 => Ok(Self::IteratedSalted),
            other => Err(PgpError::UnsupportedAlgorithm(format!("S2K specifier {}", other))),
        }
    }
}

/// How the secret part of a key packet is protected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S2kUsage {
    None,
    EncryptedAndHashed,
    Encrypted,
}

impl S2kUsage {
    pub fn id(self) -> u8 {
        match self {
            Self::None => 0,
            Self::EncryptedAndHashed => 254,
            Self::Encrypted => 255,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Self::None),
            254 => Ok(Self::EncryptedAndHashed),
            255 => Ok(Self::Encrypted),
            other => Err(PgpError::UnsupportedAlgorithm(format!("S2K usage {}", other))),
        }
    }
}

/// Complete S2K parameters as stored in a secret key packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S2k {
    pub specifier: S2kSpecifier,
    pub hash: HashAlgorithm,
    pub salt: [u8; SALT_LEN],
    /// Coded count octet; only meaningful for `IteratedSalted`
    pub coded_count: u8,
}

impl S2k {
    pub fn salted(hash: HashAlgorithm, salt: [u8; SALT_LEN]) -> Self {
        Self {
            specifier: S2kSpecifier::Salted,
            hash,
            salt,
            coded_count: 0,
        }
    }

    pub fn iterated(hash: HashAlgorithm, salt: [u8; SALT_LEN], coded_count: u8) -> Self {
        Self {
            specifier: S2kSpecifier::IteratedSalted,
            hash,
            salt,
            coded_count,
        }
    }

    /// Derive `key_len` bytes of key material from `passphrase`
    pub fn derive_key(&self, passphrase: &[u8], key_len: usize) -> Result<SecureBytes> {
        match self.specifier {
            S2kSpecifier::Simple => derive(self.hash, key_len, passphrase, &[], 0),
            S2kSpecifier::Salted => derive(self.hash, key_len, passphrase, &self.salt, 0),
            S2kSpecifier::IteratedSalted => derive(
                self.hash,
                key_len,
                passphrase,
                &self.salt,
                decode_count(self.coded_count),
            ),
        }
    }
}

/// A derived session key with its associated salt
pub struct DerivedKey {
    pub key: SecureBytes,
    pub salt: [u8; SALT_LEN],
}

impl Zeroize for DerivedKey {
    fn zeroize(&mut self) {
        self.key.zeroize();
        self.salt.zeroize();
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// Salted S2K with a fresh salt when none is given
pub fn derive_salted(
    hash: HashAlgorithm,
    key_len: usize,
    passphrase: &[u8],
    salt: Option<&[u8; SALT_LEN]>,
) -> Result<DerivedKey> {
    let salt_bytes = match salt {
        Some(s) => *s,
        None => generate_salt(),
    };
    let key = derive(hash, key_len, passphrase, &salt_bytes, 0)?;
    Ok(DerivedKey {
        key,
        salt: salt_bytes,
    })
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Number of octets hashed for a coded count
pub fn decode_count(coded: u8) -> usize {
    (16usize + (coded as usize & 15)) << ((coded as usize >> 4) + 6)
}

fn derive(
    hash: HashAlgorithm,
    key_len: usize,
    passphrase: &[u8],
    salt: &[u8],
    count: usize,
) -> Result<SecureBytes> {
    let digest_len = hash.output_length();
    if digest_len == 0 {
        return Err(PgpError::UnsupportedAlgorithm(format!("S2K hash {}", hash)));
    }

    let mut input = SecureBytes::new([salt, passphrase].concat());
    let total = count.max(input.len());
    let mut key = SecureBytes::zeroed(key_len);

    for (preload, chunk) in key.chunks_mut(digest_len).enumerate() {
        let mut ctx = HashContext::create(hash)?;
        ctx.update(&vec![0u8; preload]);

        let mut remaining = total;
        while remaining > 0 && !input.is_empty() {
            let take = remaining.min(input.len());
            ctx.update(&input[..take]);
            remaining -= take;
        }

        let mut out = SecureBytes::new(ctx.finish());
        chunk.copy_from_slice(&out[..chunk.len()]);
        out.zeroize();
    }

    input.zeroize();
    Ok(key)
}
