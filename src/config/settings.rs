//! Runtime settings

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::{CipherAlgorithm, HashAlgorithm};
use crate::error::{PgpError, Result};
use crate::keystore::KeyStoreFormat;

/// Default cap on any single input slurped into memory (4 MiB)
pub const DEFAULT_MAX_MEM_ALLOC: usize = 4 * 1024 * 1024;

const CONFIG_DIR: &str = "pgp-core";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding the keyring or the OpenSSH key pair
    pub homedir: PathBuf,
    pub keyring_format: KeyStoreFormat,
    /// Digest for signatures and key ids
    pub hash: HashAlgorithm,
    /// Cipher protecting secret keys at rest
    pub cipher: CipherAlgorithm,
    /// Largest file or stdin input read into memory
    pub max_mem_alloc: usize,
    /// OpenSSH key file; `<homedir>/id_rsa.pub` when unset
    pub ssh_key_file: Option<PathBuf>,
    pub user_id: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            homedir: dirs::home_dir()
                .map(|home| home.join(".ssh"))
                .unwrap_or_else(|| PathBuf::from(".ssh")),
            keyring_format: KeyStoreFormat::Gpg,
            hash: HashAlgorithm::Sha256,
            cipher: CipherAlgorithm::Cast5,
            max_mem_alloc: DEFAULT_MAX_MEM_ALLOC,
            ssh_key_file: None,
            user_id: None,
        }
    }
}

impl Settings {
    /// `<config dir>/pgp-core/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults; an explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(PgpError::InvalidConfig(format!(
                    "config file '{}' not found",
                    path.display()
                )));
            }
            return Ok(Self::default());
        }

        debug!(path = %path.display(), "loading settings");
        let data = fs::read(&path)?;
        let settings: Settings = serde_json::from_slice(&data)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_mem_alloc == 0 {
            return Err(PgpError::InvalidConfig("max_mem_alloc must be non-zero".into()));
        }
        if self.hash == HashAlgorithm::Unknown {
            return Err(PgpError::InvalidConfig("hash algorithm is not set".into()));
        }
        Ok(())
    }

    /// Hash used for OpenSSH key ids: MD5 unless MD5, SHA1 or SHA256 is configured
    pub fn ssh_hash(&self) -> HashAlgorithm {
        match self.hash {
            HashAlgorithm::Md5 | HashAlgorithm::Sha1 | HashAlgorithm::Sha256 => self.hash,
            _ => HashAlgorithm::Md5,
        }
    }
}
