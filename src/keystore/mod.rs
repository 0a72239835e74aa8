//! Key store: an insertion-ordered collection of key records
//!
//! Lookups return the first match in insertion order. Duplicate key ids
//! are allowed. Records are dropped (and their secret integers wiped)
//! when removed or when the store goes away.

pub mod gpg;
pub mod record;
pub mod ssh;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config;
use crate::crypto::HashAlgorithm;
use crate::error::{PgpError, Result};

pub use record::{
    Fingerprint, KeyId, KeyMaterial, KeyRecord, Protection, PublicKeyAlgorithm,
    PublicKeyMaterial, SecretKeyMaterial, SecretState,
};
pub use ssh::SshImporter;

/// On-disk key formats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyStoreFormat {
    /// Native OpenPGP keyring
    #[default]
    Gpg,
    /// OpenSSH key files
    Ssh,
}

impl fmt::Display for KeyStoreFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpg => f.write_str("GPG"),
            Self::Ssh => f.write_str("SSH"),
        }
    }
}

impl FromStr for KeyStoreFormat {
    type Err = PgpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GPG" => Ok(Self::Gpg),
            "SSH" => Ok(Self::Ssh),
            _ => Err(PgpError::InvalidConfig(format!("unknown keyring format '{}'", s))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyStore {
    /// Digest used for key ids on SSH import
    hash: HashAlgorithm,
    records: Vec<KeyRecord>,
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new(gpg::FINGERPRINT_HASH)
    }
}

impl KeyStore {
    pub fn new(hash: HashAlgorithm) -> Self {
        Self {
            hash,
            records: Vec::new(),
        }
    }

    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyRecord> {
        self.records.iter()
    }

    pub fn get(&self, index: usize) -> Option<&KeyRecord> {
        self.records.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut KeyRecord> {
        self.records.get_mut(index)
    }

    /// Add a record at the end and return its index
    pub fn append(&mut self, record: KeyRecord) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    /// Remove the first record matching `id`
    pub fn remove_by_id(&mut self, id: &[u8]) -> bool {
        match self.position_by_id(id) {
            Some(index) => {
                let removed = self.records.remove(index);
                debug!(key_id = %removed.key_id(), "removed key");
                true
            }
            None => false,
        }
    }

    /// `id` may be a full key id (8 bytes), a short id (4 bytes) or a
    /// complete fingerprint
    pub fn find_by_id(&self, id: &[u8]) -> Option<&KeyRecord> {
        self.position_by_id(id).map(|index| &self.records[index])
    }

    fn position_by_id(&self, id: &[u8]) -> Option<usize> {
        self.records.iter().position(|record| match id.len() {
            8 => record.key_id().as_bytes() == id,
            4 => record.key_id().short() == id,
            _ => record.fingerprint().as_bytes() == id,
        })
    }

    /// Look up by hex key id first, then by case-insensitive user id substring
    pub fn find_by_name(&self, name: &str) -> Option<&KeyRecord> {
        self.position_by_name(name).map(|index| &self.records[index])
    }

    pub fn find_by_name_mut(&mut self, name: &str) -> Option<&mut KeyRecord> {
        let index = self.position_by_name(name)?;
        self.records.get_mut(index)
    }

    fn position_by_name(&self, name: &str) -> Option<usize> {
        if let Some(index) = parse_hex_id(name).and_then(|id| self.position_by_id(&id)) {
            return Some(index);
        }
        self.find_next_by_name(name, 0).map(|(index, _)| index)
    }

    /// First record at or after `from` with a user id containing `name`.
    /// Pass `index + 1` to continue from a previous match.
    pub fn find_next_by_name(&self, name: &str, from: usize) -> Option<(usize, &KeyRecord)> {
        let needle = name.to_lowercase();
        self.records
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, record)| {
                record
                    .user_ids
                    .iter()
                    .any(|uid| uid.to_lowercase().contains(&needle))
            })
    }

    /// Move every record of `other` to the end of this store
    pub fn merge(&mut self, other: KeyStore) {
        debug!(count = other.len(), "merging key stores");
        self.records.extend(other.records);
    }

    /// Primary user id of the first key that has one
    pub fn first_user_id(&self) -> Option<&str> {
        self.records.iter().find_map(KeyRecord::primary_user_id)
    }

    /// Parse an in-memory keyring. SSH keys need their companion `.pub`
    /// file and can only be loaded from disk.
    pub fn load_from_bytes(format: KeyStoreFormat, data: &[u8]) -> Result<KeyStore> {
        match format {
            KeyStoreFormat::Gpg => {
                let records = gpg::read_keyring(data)?;
                debug!(count = records.len(), "loaded keyring from memory");
                Ok(KeyStore {
                    hash: gpg::FINGERPRINT_HASH,
                    records,
                })
            }
            KeyStoreFormat::Ssh => Err(PgpError::FormatError(
                "SSH keys cannot be loaded from memory".into(),
            )),
        }
    }

    /// Load a keyring file. `hash` computes ids for SSH keys; native
    /// keyrings always use v4 fingerprints.
    pub fn load_from_file(
        format: KeyStoreFormat,
        path: &Path,
        hash: HashAlgorithm,
        limit: usize,
    ) -> Result<KeyStore> {
        match format {
            KeyStoreFormat::Gpg => {
                let data = config::read_bounded(path, limit)?;
                Self::load_from_bytes(format, &data)
            }
            KeyStoreFormat::Ssh => {
                let mut store = KeyStore::new(hash);
                SshImporter::new(hash).import_file(&mut store, path, limit)?;
                Ok(store)
            }
        }
    }

    /// Serialize in the native keyring format
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        gpg::write_keyring(&self.records)
    }
}

impl<'a> IntoIterator for &'a KeyStore {
    type Item = &'a KeyRecord;
    type IntoIter = std::slice::Iter<'a, KeyRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Hex id, short id or fingerprint, with optional `0x`
fn parse_hex_id(s: &str) -> Option<Vec<u8>> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let bytes = hex::decode(digits).ok()?;
    match bytes.len() {
        4 | 8 | 16 | 20 | 32 => Some(bytes),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rsa::RsaPublicKey;
    use crate::crypto::BigNum;
    use tempfile::tempdir;

    fn record(seed: u64, user_id: &str) -> KeyRecord {
        // Distinct odd moduli give distinct fingerprints
        let n = BigNum::from_u64(0xF000_0000_0000_0001 + seed * 2);
        let material = PublicKeyMaterial::Rsa(RsaPublicKey::new(n, BigNum::from_u64(17)).unwrap());
        let mut record = KeyRecord::public(material, 0, HashAlgorithm::Sha1).unwrap();
        record.add_user_id(user_id);
        record
    }

    fn store_of(n: u64) -> KeyStore {
        let mut store = KeyStore::default();
        for i in 0..n {
            store.append(record(i, &format!("User {} <u{}@example.org>", i, i)));
        }
        store
    }

    #[test]
    fn test_append_returns_index() {
        let mut store = KeyStore::default();
        assert_eq!(store.append(record(0, "a")), 0);
        assert_eq!(store.append(record(1, "b")), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut store = store_of(5);
        let ids: Vec<KeyId> = store.iter().map(|r| *r.key_id()).collect();

        assert!(store.remove_by_id(ids[2].as_bytes()));
        assert_eq!(store.len(), 4);
        assert!(store.find_by_id(ids[2].as_bytes()).is_none());
        assert!(!store.remove_by_id(ids[2].as_bytes()));

        let remaining: Vec<KeyId> = store.iter().map(|r| *r.key_id()).collect();
        assert_eq!(remaining, vec![ids[0], ids[1], ids[3], ids[4]]);
    }

    #[test]
    fn test_find_by_id_forms() {
        let store = store_of(3);
        let target = store.get(1).unwrap();

        let by_long = store.find_by_id(target.key_id().as_bytes()).unwrap();
        let by_short = store.find_by_id(target.key_id().short()).unwrap();
        let by_fpr = store.find_by_id(target.fingerprint().as_bytes()).unwrap();
        for found in [by_long, by_short, by_fpr] {
            assert_eq!(found.key_id(), target.key_id());
        }
    }

    #[test]
    fn test_duplicates_first_match() {
        let mut store = KeyStore::default();
        let mut first = record(7, "first");
        first.add_user_id("shared");
        let mut second = record(7, "second");
        second.add_user_id("shared");
        store.append(first);
        store.append(second);

        let id = *store.get(0).unwrap().key_id();
        assert_eq!(store.find_by_id(id.as_bytes()).unwrap().primary_user_id(), Some("first"));
        assert_eq!(store.find_by_name("SHARED").unwrap().primary_user_id(), Some("first"));
    }

    #[test]
    fn test_find_by_name() {
        let store = store_of(4);
        assert_eq!(
            store.find_by_name("u2@example").unwrap().primary_user_id(),
            Some("User 2 <u2@example.org>")
        );
        assert!(store.find_by_name("nobody").is_none());

        let hex_id = store.get(3).unwrap().key_id().to_string();
        assert_eq!(
            store.find_by_name(&format!("0x{}", hex_id)).unwrap().key_id(),
            store.get(3).unwrap().key_id()
        );
    }

    #[test]
    fn test_find_by_name_mut_accepts_key_id() {
        let mut store = store_of(3);
        let id = *store.get(1).unwrap().key_id();

        let record = store.find_by_name_mut(&id.to_string()).unwrap();
        assert_eq!(record.key_id(), &id);
        record.add_user_id("renamed");
        assert_eq!(store.get(1).unwrap().user_ids.len(), 2);

        // A hex-looking name that is no key id falls back to user ids
        store.get_mut(2).unwrap().add_user_id("DEADBEEF");
        let expected = *store.get(2).unwrap().key_id();
        assert_eq!(
            store.find_by_name_mut("deadbeef").unwrap().key_id(),
            &expected
        );
        assert!(store.find_by_name_mut("nobody").is_none());
    }

    #[test]
    fn test_find_next_by_name_iterates() {
        let store = store_of(4);
        let mut seen = Vec::new();
        let mut from = 0;
        while let Some((index, _)) = store.find_next_by_name("example.org", from) {
            seen.push(index);
            from = index + 1;
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(store.find_next_by_name("User", 4).is_none());
    }

    #[test]
    fn test_merge_preserves_order() {
        let mut a = store_of(2);
        let mut b = KeyStore::default();
        b.append(record(10, "b0"));
        b.append(record(11, "b1"));

        a.merge(b);
        let names: Vec<&str> = a.iter().filter_map(|r| r.primary_user_id()).collect();
        assert_eq!(
            names,
            vec!["User 0 <u0@example.org>", "User 1 <u1@example.org>", "b0", "b1"]
        );
        assert_eq!(a.first_user_id(), Some("User 0 <u0@example.org>"));
    }

    #[test]
    fn test_ssh_from_memory_unsupported() {
        assert!(matches!(
            KeyStore::load_from_bytes(KeyStoreFormat::Ssh, b"ssh-rsa AAAA"),
            Err(PgpError::FormatError(_))
        ));
    }

    #[test]
    fn test_native_roundtrip_through_file() {
        let store = store_of(3);
        let dir = tempdir().unwrap();
        let path = dir.path().join("pubring.gpg");
        config::write_private(&path, &store.to_bytes().unwrap()).unwrap();

        let loaded =
            KeyStore::load_from_file(KeyStoreFormat::Gpg, &path, HashAlgorithm::Sha1, 1 << 20)
                .unwrap();
        assert_eq!(loaded.len(), 3);
        for (a, b) in store.iter().zip(loaded.iter()) {
            assert_eq!(a.key_id(), b.key_id());
            assert_eq!(a.user_ids, b.user_ids);
        }
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("ssh".parse::<KeyStoreFormat>().unwrap(), KeyStoreFormat::Ssh);
        assert_eq!("GPG".parse::<KeyStoreFormat>().unwrap(), KeyStoreFormat::Gpg);
        assert!("kbx".parse::<KeyStoreFormat>().is_err());
    }

    #[test]
    fn test_parse_hex_id() {
        assert_eq!(parse_hex_id("0xDEADBEEF"), Some(vec![0xDE, 0xAD, 0xBE, 0xEF]));
        assert!(parse_hex_id("alice").is_none());
        assert!(parse_hex_id("abc").is_none());
    }
}
