//! pgp-core - OpenPGP-compatible cryptographic core
//!
//! This crate provides:
//! - Message digests, CFB block ciphers and string-to-key derivation
//! - RSA, ElGamal and DSA over arbitrary-precision integers
//! - An in-memory key store with a native keyring reader and writer
//! - An importer for OpenSSH public and private keys

pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keystore;

pub use error::{PgpError, Result};
