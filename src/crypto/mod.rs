//! Cryptographic primitives for pgp-core
//!
//! This module provides:
//! - Message digests (MD5, SHA-1, SHA-2, SM3)
//! - Block ciphers in OpenPGP CFB mode
//! - String-to-Key passphrase derivation
//! - RSA, ElGamal and DSA over `BigNum`
//! - Secure memory handling with automatic zeroing

pub mod bn;
pub mod dsa;
pub mod elgamal;
pub mod hash;
pub mod rsa;
pub mod s2k;
mod secure_bytes;
pub mod symmetric;

pub use bn::BigNum;
pub use hash::{HashAlgorithm, HashContext};
pub use secure_bytes::SecureBytes;
pub use symmetric::{CipherAlgorithm, CipherContext, MAX_BLOCK_SIZE};
