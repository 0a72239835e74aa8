//! OpenSSH key import
//!
//! Public keys come from `authorized_keys`-style lines:
//! `<algorithm> <base64 blob> [comment]`
//! Secret keys come from `openssh-key-v1` PEM files and are paired with
//! the public key from the companion `.pub` file.

mod base64;
pub mod wire;

use std::path::{Path, PathBuf};

use ssh_key::private::KeypairData;
use ssh_key::PrivateKey;
use tracing::{debug, trace};

use crate::config::{self, Settings, SshKeyPaths};
use crate::crypto::dsa::DsaPublicKey;
use crate::crypto::rsa::{RsaPublicKey, RsaSecretKey};
use crate::crypto::{BigNum, CipherAlgorithm, HashAlgorithm};
use crate::error::{PgpError, Result};

use super::record::{KeyRecord, Protection, PublicKeyMaterial, SecretKeyMaterial, SecretState};
use super::KeyStore;

pub use self::base64::decode_base64;
pub use wire::{encode_public_blob, to_openssh_line, WireReader};

/// Payloads shorter than this cannot hold even the algorithm name
const MIN_PAYLOAD_LEN: usize = 10;

/// Protection applied to imported secret keys
const SECRET_CIPHER: CipherAlgorithm = CipherAlgorithm::Cast5;
const SECRET_S2K_HASH: HashAlgorithm = HashAlgorithm::Sha1;

/// Converts OpenSSH key files into key records
#[derive(Debug, Clone)]
pub struct SshImporter {
    /// Digest for key ids and fingerprints
    pub hash: HashAlgorithm,
    /// Host named in synthesized user ids
    pub hostname: String,
    /// Creation time given to imported keys
    pub birthtime: u32,
}

impl SshImporter {
    pub fn new(hash: HashAlgorithm) -> Self {
        Self {
            hash,
            hostname: config::local_hostname(),
            birthtime: 0,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Parse one public key line. `source_name` appears in the user id.
    pub fn parse_public(&self, data: &[u8], source_name: &str) -> Result<KeyRecord> {
        // Skip the ASCII algorithm token and the space after it
        let start = data
            .iter()
            .position(|&b| b == b' ')
            .map(|i| i + 1)
            .ok_or_else(|| PgpError::FormatError(format!("bad key file '{}'", source_name)))?;
        if data.len() - start < MIN_PAYLOAD_LEN {
            return Err(PgpError::FormatError(format!("bad key file '{}'", source_name)));
        }

        let rest = &data[start..];
        let end = rest
            .iter()
            .position(|&b| b == b' ' || b == b'\n' || b == b'\r')
            .unwrap_or(rest.len());
        let comment = match rest.get(end) {
            Some(b' ') => {
                let text = String::from_utf8_lossy(&rest[end + 1..]);
                Some(text.trim_end().to_string()).filter(|c| !c.is_empty())
            }
            _ => None,
        };

        let blob = decode_base64(&rest[..end]);
        trace!(blob = %hex::encode(&blob), "decoded base64");

        let material = parse_public_blob(&blob)?;
        let mut record = KeyRecord::public(material, self.birthtime, self.hash)?;

        let owner = comment.unwrap_or_else(|| format!("root@{}", self.hostname));
        record.add_user_id(format!("{} ({}) <{}>", self.hostname, source_name, owner));
        debug!(key_id = %record.key_id(), source = source_name, "imported ssh public key");
        Ok(record)
    }

    pub fn read_public_file(&self, path: &Path, limit: usize) -> Result<KeyRecord> {
        let data = config::read_bounded(path, limit)?;
        self.parse_public(&data, &path.display().to_string())
    }

    /// Read an unencrypted OpenSSH RSA private key belonging to `public`
    pub fn read_secret_file(
        &self,
        path: &Path,
        public: &KeyRecord,
        limit: usize,
    ) -> Result<KeyRecord> {
        let data = config::read_bounded(path, limit)?;
        let text = std::str::from_utf8(&data)
            .map_err(|_| PgpError::FormatError(format!("'{}' is not PEM text", path.display())))?;

        let key = PrivateKey::from_openssh(text)
            .map_err(|e| PgpError::FormatError(format!("'{}': {}", path.display(), e)))?;
        if key.is_encrypted() {
            return Err(PgpError::UnsupportedAlgorithm(
                "passphrase-protected OpenSSH keys".into(),
            ));
        }
        let KeypairData::Rsa(keypair) = key.key_data() else {
            return Err(PgpError::UnrecognizedKeyType(key.algorithm().to_string()));
        };

        let ssh_public = RsaPublicKey::new(
            BigNum::from_bytes_be(keypair.public.n.as_bytes()),
            BigNum::from_bytes_be(keypair.public.e.as_bytes()),
        )?;
        if public.public_material().rsa() != Some(&ssh_public) {
            return Err(PgpError::InvalidKey(format!(
                "'{}' does not match its public key",
                path.display()
            )));
        }

        let (p, q, u) = normalize_prime_order(
            BigNum::from_bytes_be(keypair.private.p.as_bytes()),
            BigNum::from_bytes_be(keypair.private.q.as_bytes()),
            BigNum::from_bytes_be(keypair.private.iqmp.as_bytes()),
        )?;
        let secret = RsaSecretKey {
            d: BigNum::from_bytes_be(keypair.private.d.as_bytes()),
            p,
            q,
            u,
        };

        let protection = Protection::with_passphrase(SECRET_CIPHER, SECRET_S2K_HASH, b"")?;
        let mut record = KeyRecord::secret(
            PublicKeyMaterial::Rsa(ssh_public),
            SecretState::Unlocked(SecretKeyMaterial::Rsa(secret)),
            Some(protection),
            public.created,
            self.hash,
        )?;
        record.user_ids = public.user_ids.clone();
        debug!(key_id = %record.key_id(), "imported ssh secret key");
        Ok(record)
    }

    /// Import `path` into `store`: as a public key if it parses as one,
    /// otherwise as a secret key paired with `<path>.pub`.
    pub fn import_file(&self, store: &mut KeyStore, path: &Path, limit: usize) -> Result<usize> {
        match self.read_public_file(path, limit) {
            Ok(record) => Ok(store.append(record)),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "not a public key, trying secret");
                let public = self.read_public_file(&companion_pub(path), limit)?;
                let secret = self.read_secret_file(path, &public, limit)?;
                Ok(store.append(secret))
            }
        }
    }
}

fn companion_pub(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".pub");
    PathBuf::from(name)
}

fn parse_public_blob(blob: &[u8]) -> Result<PublicKeyMaterial> {
    let mut reader = WireReader::new(blob);
    let name = reader.read_string()?;

    let material = match name {
        b"ssh-rsa" => {
            let e = reader.read_bignum()?;
            let n = reader.read_bignum()?;
            PublicKeyMaterial::Rsa(RsaPublicKey::new(n, e)?)
        }
        b"ssh-dss" | b"ssh-dsa" => {
            let p = reader.read_bignum()?;
            let q = reader.read_bignum()?;
            let g = reader.read_bignum()?;
            let y = reader.read_bignum()?;
            PublicKeyMaterial::Dsa(DsaPublicKey::new(p, q, g, y)?)
        }
        other => {
            return Err(PgpError::UnrecognizedKeyType(
                String::from_utf8_lossy(other).into_owned(),
            ))
        }
    };
    reader.finish()?;
    Ok(material)
}

/// Put OpenSSH's `(p, q, iqmp)` into OpenPGP order: `p < q`, `u = p^-1 mod q`.
///
/// OpenSSH keeps `p > q` with `iqmp = q^-1 mod p`, so a swap turns `iqmp`
/// into `u` directly. Primes already in OpenPGP order get `u` recomputed.
pub fn normalize_prime_order(
    p: BigNum,
    q: BigNum,
    iqmp: BigNum,
) -> Result<(BigNum, BigNum, BigNum)> {
    if p.is_zero() || q.is_zero() {
        return Err(PgpError::InvalidKey("RSA prime is zero".into()));
    }
    if p == q {
        return Err(PgpError::InvalidKey("RSA primes are equal".into()));
    }
    if p > q {
        return Ok((q, p, iqmp));
    }
    let u = p
        .mod_inverse(&q)
        .ok_or_else(|| PgpError::InvalidKey("RSA primes are not coprime".into()))?;
    Ok((p, q, u))
}

/// Load the configured OpenSSH key pair: a public store, plus a secret
/// store when `need_secret` is set.
pub fn load_ssh_keys(settings: &Settings, need_secret: bool) -> Result<(KeyStore, Option<KeyStore>)> {
    let paths = SshKeyPaths::resolve(settings);
    let hash = settings.ssh_hash();
    let importer = SshImporter::new(hash);
    debug!(public = %paths.public.display(), ?hash, "loading ssh keys");

    let public = importer.read_public_file(&paths.public, settings.max_mem_alloc)?;
    let secring = if need_secret {
        let secret = importer.read_secret_file(&paths.secret, &public, settings.max_mem_alloc)?;
        let mut secring = KeyStore::new(hash);
        secring.append(secret);
        Some(secring)
    } else {
        None
    };

    let mut pubring = KeyStore::new(hash);
    pubring.append(public);
    Ok((pubring, secring))
}
