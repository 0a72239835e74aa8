//! Key records held by a `KeyStore`

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::crypto::dsa::{DsaPublicKey, DsaSecretKey};
use crate::crypto::elgamal::{ElGamalPublicKey, ElGamalSecretKey};
use crate::crypto::rsa::{self, RsaPublicKey, RsaSecretKey};
use crate::crypto::s2k::{self, S2k, S2kUsage};
use crate::crypto::{hash, CipherAlgorithm, CipherContext, HashAlgorithm, SecureBytes};
use crate::error::{PgpError, Result};

use super::gpg;
use super::ssh::wire;

pub const KEY_ID_LEN: usize = 8;

/// Only version 4 keys are produced or accepted
pub const KEY_VERSION: u8 = 4;

/// Last eight bytes of a key's fingerprint
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId(pub [u8; KEY_ID_LEN]);

impl KeyId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Trailing four bytes, as shown by `--keyid-format short`
    pub fn short(&self) -> &[u8] {
        &self.0[4..]
    }
}

impl AsRef<[u8]> for KeyId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self)
    }
}

impl FromStr for KeyId {
    type Err = PgpError;

    /// Sixteen hex digits, optionally prefixed with `0x`
    fn from_str(s: &str) -> Result<Self> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(digits)
            .map_err(|_| PgpError::FormatError(format!("invalid key id '{}'", s)))?;
        let id: [u8; KEY_ID_LEN] = bytes
            .try_into()
            .map_err(|_| PgpError::FormatError(format!("key id '{}' must be 16 hex digits", s)))?;
        Ok(Self(id))
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn key_id(&self) -> KeyId {
        let mut id = [0u8; KEY_ID_LEN];
        let start = self.0.len().saturating_sub(KEY_ID_LEN);
        let tail = &self.0[start..];
        id[KEY_ID_LEN - tail.len()..].copy_from_slice(tail);
        KeyId(id)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Groups of four hex digits
        let hex = hex::encode_upper(&self.0);
        let groups: Vec<&str> = hex
            .as_bytes()
            .chunks(4)
            .filter_map(|c| std::str::from_utf8(c).ok())
            .collect();
        f.write_str(&groups.join(" "))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", hex::encode_upper(&self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKeyAlgorithm {
    Rsa,
    ElGamal,
    Dsa,
}

impl PublicKeyAlgorithm {
    pub fn id(self) -> u8 {
        match self {
            Self::Rsa => 1,
            Self::ElGamal => 16,
            Self::Dsa => 17,
        }
    }

    /// RSA encrypt-only (2) and sign-only (3) are read as plain RSA
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            1..=3 => Ok(Self::Rsa),
            16 => Ok(Self::ElGamal),
            17 => Ok(Self::Dsa),
            other => Err(PgpError::UnsupportedAlgorithm(format!(
                "public key algorithm {}",
                other
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rsa => "RSA",
            Self::ElGamal => "ElGamal",
            Self::Dsa => "DSA",
        }
    }
}

impl fmt::Display for PublicKeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKeyMaterial {
    Rsa(RsaPublicKey),
    Dsa(DsaPublicKey),
    ElGamal(ElGamalPublicKey),
}

impl PublicKeyMaterial {
    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        match self {
            Self::Rsa(_) => PublicKeyAlgorithm::Rsa,
            Self::Dsa(_) => PublicKeyAlgorithm::Dsa,
            Self::ElGamal(_) => PublicKeyAlgorithm::ElGamal,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Rsa(k) => k.validate(),
            Self::Dsa(k) => k.validate(),
            Self::ElGamal(k) => k.validate(),
        }
    }

    pub fn rsa(&self) -> Option<&RsaPublicKey> {
        match self {
            Self::Rsa(k) => Some(k),
            _ => None,
        }
    }

    pub fn dsa(&self) -> Option<&DsaPublicKey> {
        match self {
            Self::Dsa(k) => Some(k),
            _ => None,
        }
    }

    pub fn elgamal(&self) -> Option<&ElGamalPublicKey> {
        match self {
            Self::ElGamal(k) => Some(k),
            _ => None,
        }
    }

    /// Bit length of the modulus or prime
    pub fn bits(&self) -> usize {
        match self {
            Self::Rsa(k) => k.n.bits(),
            Self::Dsa(k) => k.p.bits(),
            Self::ElGamal(k) => k.p.bits(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretKeyMaterial {
    Rsa(RsaSecretKey),
    Dsa(DsaSecretKey),
    ElGamal(ElGamalSecretKey),
}

impl SecretKeyMaterial {
    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        match self {
            Self::Rsa(_) => PublicKeyAlgorithm::Rsa,
            Self::Dsa(_) => PublicKeyAlgorithm::Dsa,
            Self::ElGamal(_) => PublicKeyAlgorithm::ElGamal,
        }
    }

    /// Check the secret half against its public half
    pub fn validate(&self, public: &PublicKeyMaterial) -> Result<()> {
        match (self, public) {
            (Self::Rsa(s), PublicKeyMaterial::Rsa(p)) => s.validate(p),
            (Self::Dsa(s), PublicKeyMaterial::Dsa(p)) => s.validate(p),
            (Self::ElGamal(s), PublicKeyMaterial::ElGamal(p)) => s.validate(p),
            _ => Err(PgpError::InvalidKey(format!(
                "{} secret paired with {} public key",
                self.algorithm(),
                public.algorithm()
            ))),
        }
    }

    pub fn rsa(&self) -> Option<&RsaSecretKey> {
        match self {
            Self::Rsa(k) => Some(k),
            _ => None,
        }
    }

    pub fn dsa(&self) -> Option<&DsaSecretKey> {
        match self {
            Self::Dsa(k) => Some(k),
            _ => None,
        }
    }

    pub fn elgamal(&self) -> Option<&ElGamalSecretKey> {
        match self {
            Self::ElGamal(k) => Some(k),
            _ => None,
        }
    }
}

/// Secret fields are either usable or still encrypted at rest
#[derive(Debug, Clone)]
pub enum SecretState {
    Unlocked(SecretKeyMaterial),
    Locked(Vec<u8>),
}

/// At-rest protection parameters for a secret key
#[derive(Debug, Clone)]
pub struct Protection {
    pub usage: S2kUsage,
    pub cipher: CipherAlgorithm,
    pub s2k: S2k,
    pub iv: Vec<u8>,
    /// Key derived from the passphrase, kept once known so the key can be
    /// written back encrypted
    pub session_key: Option<SecureBytes>,
}

impl Protection {
    /// Salted S2K with a fresh salt and IV
    pub fn with_passphrase(
        cipher: CipherAlgorithm,
        hash: HashAlgorithm,
        passphrase: &[u8],
    ) -> Result<Self> {
        let derived = s2k::derive_salted(hash, cipher.key_size(), passphrase, None)?;
        let mut iv = vec![0u8; cipher.block_size()];
        OsRng.fill_bytes(&mut iv);

        Ok(Self {
            usage: S2kUsage::EncryptedAndHashed,
            cipher,
            s2k: S2k::salted(hash, derived.salt),
            iv,
            session_key: Some(derived.key.clone()),
        })
    }

    pub fn derive_session_key(&self, passphrase: &[u8]) -> Result<SecureBytes> {
        self.s2k.derive_key(passphrase, self.cipher.key_size())
    }

    pub(crate) fn cipher_context(&self, session_key: &[u8]) -> Result<CipherContext> {
        let mut ctx = CipherContext::create(self.cipher)?;
        ctx.set_key(session_key)?;
        ctx.set_iv(&self.iv)?;
        Ok(ctx)
    }
}

#[derive(Debug, Clone)]
pub enum KeyMaterial {
    Public(PublicKeyMaterial),
    Secret {
        public: PublicKeyMaterial,
        secret: SecretState,
        protection: Option<Protection>,
    },
}

/// One primary key or subkey plus its user ids
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub version: u8,
    /// Creation time, seconds since the Unix epoch
    pub created: u32,
    pub subkey: bool,
    material: KeyMaterial,
    key_id: KeyId,
    fingerprint: Fingerprint,
    pub user_ids: Vec<String>,
}

impl KeyRecord {
    /// Build a public record, computing its id with `hash`
    pub fn public(material: PublicKeyMaterial, created: u32, hash: HashAlgorithm) -> Result<Self> {
        material.validate()?;
        let fingerprint = compute_fingerprint(&material, created, hash)?;
        Ok(Self {
            version: KEY_VERSION,
            created,
            subkey: false,
            key_id: fingerprint.key_id(),
            fingerprint,
            material: KeyMaterial::Public(material),
            user_ids: Vec::new(),
        })
    }

    /// Build a secret record. Unlocked secrets are checked against the
    /// public half before the record exists.
    pub fn secret(
        public: PublicKeyMaterial,
        secret: SecretState,
        protection: Option<Protection>,
        created: u32,
        hash: HashAlgorithm,
    ) -> Result<Self> {
        public.validate()?;
        if let SecretState::Unlocked(material) = &secret {
            material.validate(&public)?;
        }
        if matches!(secret, SecretState::Locked(_)) && protection.is_none() {
            return Err(PgpError::InvalidKey("locked secret without protection".into()));
        }
        let fingerprint = compute_fingerprint(&public, created, hash)?;
        Ok(Self {
            version: KEY_VERSION,
            created,
            subkey: false,
            key_id: fingerprint.key_id(),
            fingerprint,
            material: KeyMaterial::Secret {
                public,
                secret,
                protection,
            },
            user_ids: Vec::new(),
        })
    }

    /// Fresh RSA key protected by `cipher` under an empty passphrase
    pub fn generate_rsa(
        bits: usize,
        e: u64,
        user_id: &str,
        cipher: CipherAlgorithm,
        hash: HashAlgorithm,
    ) -> Result<Self> {
        let (public, secret) = rsa::generate(bits, e)?;
        let protection = Protection::with_passphrase(cipher, hash, b"")?;
        let mut record = Self::secret(
            PublicKeyMaterial::Rsa(public),
            SecretState::Unlocked(SecretKeyMaterial::Rsa(secret)),
            Some(protection),
            now(),
            HashAlgorithm::Sha1,
        )?;
        record.add_user_id(user_id);
        debug!(key_id = %record.key_id, bits, "generated RSA key");
        Ok(record)
    }

    pub fn add_user_id(&mut self, user_id: impl Into<String>) {
        self.user_ids.push(user_id.into());
    }

    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    pub fn public_material(&self) -> &PublicKeyMaterial {
        match &self.material {
            KeyMaterial::Public(public) => public,
            KeyMaterial::Secret { public, .. } => public,
        }
    }

    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        self.public_material().algorithm()
    }

    pub fn is_secret(&self) -> bool {
        matches!(self.material, KeyMaterial::Secret { .. })
    }

    pub fn is_locked(&self) -> bool {
        matches!(
            self.material,
            KeyMaterial::Secret {
                secret: SecretState::Locked(_),
                ..
            }
        )
    }

    pub fn protection(&self) -> Option<&Protection> {
        match &self.material {
            KeyMaterial::Secret { protection, .. } => protection.as_ref(),
            KeyMaterial::Public(_) => None,
        }
    }

    /// Secret fields; fails on public records and locked secrets
    pub fn secret_material(&self) -> Result<&SecretKeyMaterial> {
        match &self.material {
            KeyMaterial::Secret {
                secret: SecretState::Unlocked(material),
                ..
            } => Ok(material),
            KeyMaterial::Secret { .. } => Err(PgpError::SecretKeyLocked),
            KeyMaterial::Public(_) => Err(PgpError::InvalidKey(format!(
                "{} is a public key",
                self.key_id
            ))),
        }
    }

    pub fn primary_user_id(&self) -> Option<&str> {
        self.user_ids.first().map(String::as_str)
    }

    /// Copy without any secret fields
    pub fn to_public(&self) -> KeyRecord {
        KeyRecord {
            version: self.version,
            created: self.created,
            subkey: self.subkey,
            material: KeyMaterial::Public(self.public_material().clone()),
            key_id: self.key_id,
            fingerprint: self.fingerprint.clone(),
            user_ids: self.user_ids.clone(),
        }
    }

    /// Replace the at-rest protection of an unlocked secret key
    pub fn protect(
        &mut self,
        cipher: CipherAlgorithm,
        hash: HashAlgorithm,
        passphrase: &SecretString,
    ) -> Result<()> {
        match &mut self.material {
            KeyMaterial::Secret {
                secret: SecretState::Unlocked(_),
                protection,
                ..
            } => {
                *protection = Some(Protection::with_passphrase(
                    cipher,
                    hash,
                    passphrase.expose_secret().as_bytes(),
                )?);
                Ok(())
            }
            KeyMaterial::Secret { .. } => Err(PgpError::SecretKeyLocked),
            KeyMaterial::Public(_) => Err(PgpError::InvalidKey(format!(
                "{} is a public key",
                self.key_id
            ))),
        }
    }

    /// Decrypt locked secret fields with `passphrase`.
    ///
    /// A no-op on unlocked records. A wrong passphrase leaves the record
    /// locked and returns `BadPassphrase`.
    pub fn unlock(&mut self, passphrase: &SecretString) -> Result<()> {
        let KeyMaterial::Secret {
            public,
            secret,
            protection,
        } = &mut self.material
        else {
            return Err(PgpError::InvalidKey(format!("{} is a public key", self.key_id)));
        };
        let SecretState::Locked(blob) = &*secret else {
            return Ok(());
        };
        let protection = protection.as_mut().ok_or(PgpError::SecretKeyLocked)?;

        let session_key =
            protection.derive_session_key(passphrase.expose_secret().as_bytes())?;
        let mut plaintext = SecureBytes::new(blob.clone());
        protection
            .cipher_context(&session_key)?
            .cfb_decrypt(&mut plaintext)?;

        let material = gpg::decode_secret_fields(public.algorithm(), &plaintext, protection.usage)
            .map_err(|_| PgpError::BadPassphrase)?;
        material
            .validate(public)
            .map_err(|_| PgpError::BadPassphrase)?;

        *secret = SecretState::Unlocked(material);
        protection.session_key = Some(session_key);
        debug!(key_id = %self.key_id, "unlocked secret key");
        Ok(())
    }
}

fn compute_fingerprint(
    material: &PublicKeyMaterial,
    created: u32,
    hash: HashAlgorithm,
) -> Result<Fingerprint> {
    if hash == HashAlgorithm::Md5 && wire::algorithm_name(material).is_some() {
        // OpenSSH-style MD5 fingerprint over the wire blob
        let blob = wire::encode_public_blob(material)?;
        return Ok(Fingerprint(hash::digest(hash, &blob)?));
    }

    let body = gpg::public_key_body(KEY_VERSION, created, material)?;
    let len = u16::try_from(body.len()).map_err(|_| {
        PgpError::FormatError(format!("{}-byte public key body is too long", body.len()))
    })?;
    let mut ctx = hash::HashContext::create(hash)?;
    ctx.update(&[0x99]);
    ctx.update(&len.to_be_bytes());
    ctx.update(&body);
    Ok(Fingerprint(ctx.finish()))
}

pub(crate) fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::BigNum;

    fn small_rsa() -> PublicKeyMaterial {
        // Toy modulus; only the encoding matters here
        let n = BigNum::from_bytes_be(&[0xB3, 0x4F, 0x21, 0x97, 0x05, 0x11, 0x2D, 0x8B]);
        PublicKeyMaterial::Rsa(RsaPublicKey::new(n, BigNum::from_u64(65537)).unwrap())
    }

    #[test]
    fn test_key_id_is_fingerprint_tail() {
        let record = KeyRecord::public(small_rsa(), 0, HashAlgorithm::Sha1).unwrap();
        assert_eq!(record.fingerprint().as_bytes().len(), 20);
        assert_eq!(record.key_id().as_bytes(), &record.fingerprint().as_bytes()[12..]);
    }

    #[test]
    fn test_v4_fingerprint_framing() {
        let material = small_rsa();
        let record = KeyRecord::public(material.clone(), 0x5A000000, HashAlgorithm::Sha1).unwrap();

        let body = gpg::public_key_body(4, 0x5A000000, &material).unwrap();
        let mut framed = vec![0x99];
        framed.extend_from_slice(&(body.len() as u16).to_be_bytes());
        framed.extend_from_slice(&body);
        let expected = hash::digest(HashAlgorithm::Sha1, &framed).unwrap();
        assert_eq!(record.fingerprint().as_bytes(), &expected[..]);
    }

    #[test]
    fn test_md5_uses_ssh_blob() {
        let material = small_rsa();
        let record = KeyRecord::public(material.clone(), 0, HashAlgorithm::Md5).unwrap();
        let blob = wire::encode_public_blob(&material).unwrap();
        assert_eq!(
            record.fingerprint().as_bytes(),
            &hash::digest(HashAlgorithm::Md5, &blob).unwrap()[..]
        );
    }

    #[test]
    fn test_key_id_parse_display() {
        let id: KeyId = "0x0123456789ABCDEF".parse().unwrap();
        assert_eq!(id.to_string(), "0123456789ABCDEF");
        assert_eq!(id.short(), &[0x89, 0xAB, 0xCD, 0xEF]);
        assert_eq!("0123456789abcdef".parse::<KeyId>().unwrap(), id);
        assert!("01234567".parse::<KeyId>().is_err());
        assert!("zz23456789abcdef".parse::<KeyId>().is_err());
    }

    #[test]
    fn test_algorithm_ids() {
        assert_eq!(PublicKeyAlgorithm::from_id(2).unwrap(), PublicKeyAlgorithm::Rsa);
        assert_eq!(PublicKeyAlgorithm::from_id(3).unwrap(), PublicKeyAlgorithm::Rsa);
        assert_eq!(PublicKeyAlgorithm::from_id(17).unwrap(), PublicKeyAlgorithm::Dsa);
        assert!(PublicKeyAlgorithm::from_id(22).is_err());
    }

    #[test]
    fn test_typed_accessors() {
        let material = small_rsa();
        assert!(material.rsa().is_some());
        assert!(material.dsa().is_none());
        assert!(material.elgamal().is_none());
    }

    #[test]
    fn test_public_record_has_no_secret() {
        let record = KeyRecord::public(small_rsa(), 0, HashAlgorithm::Sha1).unwrap();
        assert!(!record.is_secret());
        assert!(record.protection().is_none());
        assert!(matches!(record.secret_material(), Err(PgpError::InvalidKey(_))));
    }

    #[test]
    fn test_inconsistent_material_rejected() {
        let bad = PublicKeyMaterial::Rsa(RsaPublicKey {
            n: BigNum::zero(),
            e: BigNum::from_u64(3),
        });
        assert!(KeyRecord::public(bad, 0, HashAlgorithm::Sha1).is_err());
    }

    #[test]
    fn test_generate_rsa_record() {
        let record = KeyRecord::generate_rsa(
            1024,
            65537,
            "Alice <alice@example.org>",
            CipherAlgorithm::Cast5,
            HashAlgorithm::Sha1,
        )
        .unwrap();

        assert!(record.is_secret());
        assert!(!record.is_locked());
        assert_eq!(record.primary_user_id(), Some("Alice <alice@example.org>"));
        assert_eq!(record.public_material().bits(), 1024);

        let protection = record.protection().unwrap();
        assert_eq!(protection.cipher, CipherAlgorithm::Cast5);
        assert_eq!(protection.iv.len(), 8);
        let expected = protection.derive_session_key(b"").unwrap();
        assert_eq!(&**protection.session_key.as_ref().unwrap(), &*expected);

        let public = record.to_public();
        assert!(!public.is_secret());
        assert_eq!(public.key_id(), record.key_id());
    }

    #[test]
    fn test_protect_then_unlock() {
        let mut record = KeyRecord::generate_rsa(
            1024,
            65537,
            "Bob <bob@example.org>",
            CipherAlgorithm::Aes128,
            HashAlgorithm::Sha1,
        )
        .unwrap();
        let passphrase = SecretString::new("correct horse".to_string());
        record
            .protect(CipherAlgorithm::Aes128, HashAlgorithm::Sha256, &passphrase)
            .unwrap();

        let bytes = gpg::write_keyring([&record]).unwrap();
        let mut loaded = gpg::read_keyring(&bytes).unwrap().remove(0);
        assert!(loaded.is_locked());

        let wrong = SecretString::new("battery staple".to_string());
        assert!(matches!(loaded.unlock(&wrong), Err(PgpError::BadPassphrase)));
        assert!(loaded.is_locked());

        loaded.unlock(&passphrase).unwrap();
        assert!(!loaded.is_locked());
        assert_eq!(loaded.key_id(), record.key_id());

        let mut public = record.to_public();
        assert!(matches!(
            public.protect(CipherAlgorithm::Cast5, HashAlgorithm::Sha1, &passphrase),
            Err(PgpError::InvalidKey(_))
        ));
    }
}
