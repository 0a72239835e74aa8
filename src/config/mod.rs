//! Configuration management for pgp-core
//!
//! Handles:
//! - Runtime settings loaded from JSON
//! - Size-bounded file and stdin input
//! - Keyring and OpenSSH key file naming

mod settings;
pub mod storage;

pub use settings::{Settings, DEFAULT_MAX_MEM_ALLOC};
pub use storage::{
    local_hostname, read_bounded, read_stdin_bounded, write_private, KeyringPaths,
    SshKeyPaths,
};
