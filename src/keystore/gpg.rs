//! Native OpenPGP keyring format
//!
//! Only the key-material packets of a transferable key are interpreted:
//! public key (6), public subkey (14), secret key (5), secret subkey (7)
//! and user id (13). Everything else, signatures included, is skipped.
//!
//! Packet layout:
//! [1 byte: tag octet][1-5 bytes: length][length bytes: body]
//! Key bodies (version 4 only):
//! [1: version][4: created (u32 BE)][1: algorithm][MPIs...]
//! Secret bodies continue with:
//! [1: S2K usage][protection parameters][secret MPIs + check]

use sha1::{Digest, Sha1};
use tracing::{debug, trace, warn};
use zeroize::Zeroizing;

use crate::crypto::dsa::{DsaPublicKey, DsaSecretKey};
use crate::crypto::elgamal::{ElGamalPublicKey, ElGamalSecretKey};
use crate::crypto::rsa::{RsaPublicKey, RsaSecretKey};
use crate::crypto::s2k::{S2k, S2kSpecifier, S2kUsage, SALT_LEN};
use crate::crypto::{BigNum, CipherAlgorithm, HashAlgorithm, SecureBytes};
use crate::error::{PgpError, Result};

use super::record::{
    KeyMaterial, KeyRecord, Protection, PublicKeyAlgorithm, PublicKeyMaterial, SecretKeyMaterial,
    SecretState, KEY_VERSION,
};

const TAG_SECRET_KEY: u8 = 5;
const TAG_SECRET_SUBKEY: u8 = 7;
const TAG_PUBLIC_KEY: u8 = 6;
const TAG_USER_ID: u8 = 13;
const TAG_PUBLIC_SUBKEY: u8 = 14;

const SHA1_LEN: usize = 20;

/// Fingerprints of native keys are always SHA-1 over the v4 framing
pub const FINGERPRINT_HASH: HashAlgorithm = HashAlgorithm::Sha1;

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8]> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(PgpError::TruncatedData { needed, remaining });
        }
        let out = &self.data[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(out)
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// [2 bytes: bit count][ceil(bits / 8) bytes: magnitude]
    fn mpi(&mut self) -> Result<BigNum> {
        let bits = self.u16()? as usize;
        Ok(BigNum::from_bytes_be(self.take((bits + 7) / 8)?))
    }
}

/// Two-byte bit count that prefixes every MPI
fn mpi_header(value: &BigNum) -> Result<[u8; 2]> {
    let bits = u16::try_from(value.bits()).map_err(|_| {
        PgpError::FormatError(format!("{}-bit integer does not fit an MPI", value.bits()))
    })?;
    Ok(bits.to_be_bytes())
}

fn write_mpi(out: &mut Vec<u8>, value: &BigNum) -> Result<()> {
    out.extend_from_slice(&mpi_header(value)?);
    out.extend_from_slice(&value.to_bytes(0));
    Ok(())
}

/// Read one packet header, returning (tag, body length)
fn read_header(cursor: &mut Cursor<'_>) -> Result<(u8, usize)> {
    let ctb = cursor.u8()?;
    if ctb & 0x80 == 0 {
        return Err(PgpError::FormatError(format!("invalid packet tag octet {:#04x}", ctb)));
    }

    if ctb & 0x40 != 0 {
        let tag = ctb & 0x3F;
        let first = cursor.u8()? as usize;
        let len = match first {
            0..=191 => first,
            192..=223 => ((first - 192) << 8) + cursor.u8()? as usize + 192,
            255 => cursor.u32()? as usize,
            _ => {
                return Err(PgpError::FormatError(
                    "partial body lengths are not supported".into(),
                ))
            }
        };
        Ok((tag, len))
    } else {
        let tag = (ctb >> 2) & 0x0F;
        let len = match ctb & 0x03 {
            0 => cursor.u8()? as usize,
            1 => cursor.u16()? as usize,
            2 => cursor.u32()? as usize,
            _ => cursor.remaining(),
        };
        Ok((tag, len))
    }
}

fn write_header(out: &mut Vec<u8>, tag: u8, len: usize) {
    out.push(0xC0 | tag);
    if len < 192 {
        out.push(len as u8);
    } else if len < 8384 {
        let adjusted = len - 192;
        out.push((adjusted >> 8) as u8 + 192);
        out.push(adjusted as u8);
    } else {
        out.push(0xFF);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

/// Public body bytes; also the input to v4 fingerprints
pub(crate) fn public_key_body(
    version: u8,
    created: u32,
    material: &PublicKeyMaterial,
) -> Result<Vec<u8>> {
    let mut out = vec![version];
    out.extend_from_slice(&created.to_be_bytes());
    out.push(material.algorithm().id());
    match material {
        PublicKeyMaterial::Rsa(k) => {
            write_mpi(&mut out, &k.n)?;
            write_mpi(&mut out, &k.e)?;
        }
        PublicKeyMaterial::Dsa(k) => {
            write_mpi(&mut out, &k.p)?;
            write_mpi(&mut out, &k.q)?;
            write_mpi(&mut out, &k.g)?;
            write_mpi(&mut out, &k.y)?;
        }
        PublicKeyMaterial::ElGamal(k) => {
            write_mpi(&mut out, &k.p)?;
            write_mpi(&mut out, &k.g)?;
            write_mpi(&mut out, &k.y)?;
        }
    }
    Ok(out)
}

fn read_public_fields(cursor: &mut Cursor<'_>) -> Result<(u32, PublicKeyMaterial)> {
    let version = cursor.u8()?;
    if version != KEY_VERSION {
        return Err(PgpError::UnsupportedAlgorithm(format!("key version {}", version)));
    }
    let created = cursor.u32()?;
    let material = match PublicKeyAlgorithm::from_id(cursor.u8()?)? {
        PublicKeyAlgorithm::Rsa => {
            let n = cursor.mpi()?;
            let e = cursor.mpi()?;
            PublicKeyMaterial::Rsa(RsaPublicKey::new(n, e)?)
        }
        PublicKeyAlgorithm::Dsa => {
            let p = cursor.mpi()?;
            let q = cursor.mpi()?;
            let g = cursor.mpi()?;
            let y = cursor.mpi()?;
            PublicKeyMaterial::Dsa(DsaPublicKey::new(p, q, g, y)?)
        }
        PublicKeyAlgorithm::ElGamal => {
            let p = cursor.mpi()?;
            let g = cursor.mpi()?;
            let y = cursor.mpi()?;
            PublicKeyMaterial::ElGamal(ElGamalPublicKey::new(p, g, y)?)
        }
    };
    Ok((created, material))
}

fn secret_mpis(material: &SecretKeyMaterial) -> Result<SecureBytes> {
    let values: Vec<&BigNum> = match material {
        SecretKeyMaterial::Rsa(k) => vec![&k.d, &k.p, &k.q, &k.u],
        SecretKeyMaterial::Dsa(k) => vec![&k.x],
        SecretKeyMaterial::ElGamal(k) => vec![&k.x],
    };
    let capacity = values.iter().map(|v| 2 + v.byte_length()).sum();
    let mut out = SecureBytes::new(Vec::with_capacity(capacity));
    for value in values {
        out.extend_from_slice(&mpi_header(value)?);
        out.extend_from_slice(&Zeroizing::new(value.to_bytes(0)));
    }
    Ok(out)
}

fn checksum(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |sum, b| sum.wrapping_add(*b as u16))
}

/// Serialize secret MPIs followed by the check value `usage` calls for
pub(crate) fn encode_secret_fields(
    material: &SecretKeyMaterial,
    usage: S2kUsage,
) -> Result<SecureBytes> {
    let mpis = secret_mpis(material)?;
    let mut out = Vec::with_capacity(mpis.len() + SHA1_LEN);
    out.extend_from_slice(&mpis);
    match usage {
        S2kUsage::EncryptedAndHashed => out.extend_from_slice(&Sha1::digest(&mpis[..])),
        S2kUsage::None | S2kUsage::Encrypted => {
            out.extend_from_slice(&checksum(&mpis).to_be_bytes())
        }
    }
    Ok(SecureBytes::new(out))
}

/// Parse plaintext secret MPIs and verify their check value
pub(crate) fn decode_secret_fields(
    algorithm: PublicKeyAlgorithm,
    data: &[u8],
    usage: S2kUsage,
) -> Result<SecretKeyMaterial> {
    let check_len = match usage {
        S2kUsage::EncryptedAndHashed => SHA1_LEN,
        S2kUsage::None | S2kUsage::Encrypted => 2,
    };
    if data.len() < check_len {
        return Err(PgpError::TruncatedData {
            needed: check_len,
            remaining: data.len(),
        });
    }
    let (mpis, check) = data.split_at(data.len() - check_len);

    let valid = match usage {
        S2kUsage::EncryptedAndHashed => Sha1::digest(mpis).as_slice() == check,
        _ => checksum(mpis).to_be_bytes() == check,
    };
    if !valid {
        return Err(PgpError::DecryptionFailure);
    }

    let mut cursor = Cursor::new(mpis);
    let material = match algorithm {
        PublicKeyAlgorithm::Rsa => SecretKeyMaterial::Rsa(RsaSecretKey {
            d: cursor.mpi()?,
            p: cursor.mpi()?,
            q: cursor.mpi()?,
            u: cursor.mpi()?,
        }),
        PublicKeyAlgorithm::Dsa => SecretKeyMaterial::Dsa(DsaSecretKey::new(cursor.mpi()?)),
        PublicKeyAlgorithm::ElGamal => {
            SecretKeyMaterial::ElGamal(ElGamalSecretKey::new(cursor.mpi()?))
        }
    };
    if cursor.remaining() != 0 {
        return Err(PgpError::FormatError("trailing bytes after secret MPIs".into()));
    }
    Ok(material)
}

fn read_protection(cursor: &mut Cursor<'_>, usage: S2kUsage) -> Result<Protection> {
    let cipher = CipherAlgorithm::from_id(cursor.u8()?)?;
    let specifier = S2kSpecifier::from_id(cursor.u8()?)?;
    let hash = HashAlgorithm::from_id(cursor.u8()?);
    if hash == HashAlgorithm::Unknown {
        return Err(PgpError::UnsupportedAlgorithm("S2K hash".into()));
    }

    let mut salt = [0u8; SALT_LEN];
    if specifier != S2kSpecifier::Simple {
        salt.copy_from_slice(cursor.take(SALT_LEN)?);
    }
    let coded_count = if specifier == S2kSpecifier::IteratedSalted {
        cursor.u8()?
    } else {
        0
    };
    let iv = cursor.take(cipher.block_size())?.to_vec();

    Ok(Protection {
        usage,
        cipher,
        s2k: S2k {
            specifier,
            hash,
            salt,
            coded_count,
        },
        iv,
        session_key: None,
    })
}

fn write_protection(out: &mut Vec<u8>, protection: &Protection, usage: S2kUsage) {
    out.push(usage.id());
    out.push(protection.cipher.id());
    out.push(protection.s2k.specifier.id());
    out.push(protection.s2k.hash.id());
    if protection.s2k.specifier != S2kSpecifier::Simple {
        out.extend_from_slice(&protection.s2k.salt);
    }
    if protection.s2k.specifier == S2kSpecifier::IteratedSalted {
        out.push(protection.s2k.coded_count);
    }
    out.extend_from_slice(&protection.iv);
}

fn read_key_packet(body: &[u8], tag: u8) -> Result<KeyRecord> {
    let mut cursor = Cursor::new(body);
    let (created, public) = read_public_fields(&mut cursor)?;

    let mut record = match tag {
        TAG_PUBLIC_KEY | TAG_PUBLIC_SUBKEY => {
            KeyRecord::public(public, created, FINGERPRINT_HASH)?
        }
        _ => {
            let usage = S2kUsage::from_id(cursor.u8()?)?;
            match usage {
                S2kUsage::None => {
                    let material =
                        decode_secret_fields(public.algorithm(), cursor.rest(), usage)?;
                    KeyRecord::secret(
                        public,
                        SecretState::Unlocked(material),
                        None,
                        created,
                        FINGERPRINT_HASH,
                    )?
                }
                _ => {
                    let protection = read_protection(&mut cursor, usage)?;
                    let blob = cursor.rest().to_vec();
                    KeyRecord::secret(
                        public,
                        SecretState::Locked(blob),
                        Some(protection),
                        created,
                        FINGERPRINT_HASH,
                    )?
                }
            }
        }
    };
    record.subkey = matches!(tag, TAG_PUBLIC_SUBKEY | TAG_SECRET_SUBKEY);
    Ok(record)
}

/// Parse every key packet in `data`, in order
///
/// A primary key with an unsupported version or algorithm is skipped together
/// with its user ids and subkeys; an unsupported subkey is skipped alone.
pub fn read_keyring(data: &[u8]) -> Result<Vec<KeyRecord>> {
    let mut cursor = Cursor::new(data);
    let mut records: Vec<KeyRecord> = Vec::new();
    let mut primary: Option<usize> = None;
    let mut skipping = false;

    while cursor.remaining() > 0 {
        let (tag, len) = read_header(&mut cursor)?;
        let body = cursor.take(len)?;
        trace!(tag, len, "packet");

        match tag {
            TAG_PUBLIC_KEY | TAG_SECRET_KEY | TAG_PUBLIC_SUBKEY | TAG_SECRET_SUBKEY => {
                let is_primary = matches!(tag, TAG_PUBLIC_KEY | TAG_SECRET_KEY);
                if is_primary {
                    skipping = false;
                } else if skipping {
                    continue;
                }

                let record = match read_key_packet(body, tag) {
                    Ok(record) => record,
                    Err(PgpError::UnsupportedAlgorithm(what)) => {
                        warn!(tag, "skipping key: unsupported {}", what);
                        if is_primary {
                            skipping = true;
                            primary = None;
                        }
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if is_primary {
                    primary = Some(records.len());
                }
                debug!(key_id = %record.key_id(), subkey = record.subkey, "read key packet");
                records.push(record);
            }
            TAG_USER_ID if skipping => {}
            TAG_USER_ID => match primary {
                Some(index) => {
                    let user_id = String::from_utf8_lossy(body).into_owned();
                    records[index].add_user_id(user_id);
                }
                None => warn!("user id packet before any primary key, skipped"),
            },
            _ => {}
        }
    }
    Ok(records)
}

fn write_secret_body(out: &mut Vec<u8>, record: &KeyRecord) -> Result<()> {
    let KeyMaterial::Secret {
        secret, protection, ..
    } = record.material()
    else {
        return Ok(());
    };

    match (secret, protection) {
        (SecretState::Locked(blob), Some(protection)) => {
            write_protection(out, protection, protection.usage);
            out.extend_from_slice(blob);
        }
        (SecretState::Locked(_), None) => return Err(PgpError::SecretKeyLocked),
        (SecretState::Unlocked(material), None) => {
            out.push(S2kUsage::None.id());
            out.extend_from_slice(&encode_secret_fields(material, S2kUsage::None)?);
        }
        (SecretState::Unlocked(material), Some(protection)) => {
            let session_key = protection.session_key.as_ref().ok_or_else(|| {
                PgpError::InvalidKey(format!("{} has no session key", record.key_id()))
            })?;
            let usage = S2kUsage::EncryptedAndHashed;
            write_protection(out, protection, usage);

            let mut fields = encode_secret_fields(material, usage)?;
            protection
                .cipher_context(session_key)?
                .cfb_encrypt(&mut fields)?;
            out.extend_from_slice(&fields);
        }
    }
    Ok(())
}

fn write_record(out: &mut Vec<u8>, record: &KeyRecord) -> Result<()> {
    let mut body = public_key_body(record.version, record.created, record.public_material())?;
    let tag = match (record.is_secret(), record.subkey) {
        (false, false) => TAG_PUBLIC_KEY,
        (false, true) => TAG_PUBLIC_SUBKEY,
        (true, false) => TAG_SECRET_KEY,
        (true, true) => TAG_SECRET_SUBKEY,
    };
    write_secret_body(&mut body, record)?;

    write_header(out, tag, body.len());
    out.extend_from_slice(&body);

    if !record.subkey {
        for user_id in &record.user_ids {
            write_header(out, TAG_USER_ID, user_id.len());
            out.extend_from_slice(user_id.as_bytes());
        }
    }
    Ok(())
}

/// Serialize records as a keyring, user ids following their primary key
pub fn write_keyring<'a>(records: impl IntoIterator<Item = &'a KeyRecord>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for record in records {
        write_record(&mut out, record)?;
    }
    Ok(out)
}
