//! SSH wire encoding of public keys
//!
//! A public key blob is a sequence of length-prefixed fields:
//! [4 bytes: length (u32 BE)][length bytes: value]
//! The first field names the algorithm, the rest are integers.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::crypto::BigNum;
use crate::error::{PgpError, Result};
use crate::keystore::record::PublicKeyMaterial;

pub const SSH_RSA: &str = "ssh-rsa";
pub const SSH_DSS: &str = "ssh-dss";
/// Non-standard spelling some tools emit for DSA keys
pub const SSH_DSA: &str = "ssh-dsa";

/// Cursor over a decoded blob. Every read checks the declared length
/// against the bytes that remain.
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
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

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_string(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Raw big-endian magnitude; a leading sign octet is just a zero byte
    pub fn read_bignum(&mut self) -> Result<BigNum> {
        Ok(BigNum::from_bytes_be(self.read_string()?))
    }

    /// Fail if anything is left after the last expected field
    pub fn finish(self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(PgpError::FormatError(format!(
                "{} unexpected trailing bytes in key blob",
                extra
            ))),
        }
    }
}

#[derive(Default)]
struct WireWriter(Vec<u8>);

impl WireWriter {
    fn write_string(&mut self, value: &[u8]) {
        self.0.extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.0.extend_from_slice(value);
    }

    /// mpint: positive values with the high bit set get a zero prefix
    fn write_mpint(&mut self, value: &BigNum) {
        let mut bytes = value.to_bytes(0);
        if bytes.first().map_or(false, |b| b & 0x80 != 0) {
            bytes.insert(0, 0);
        }
        self.write_string(&bytes);
    }
}

/// SSH algorithm name for a key, if SSH can represent it
pub fn algorithm_name(material: &PublicKeyMaterial) -> Option<&'static str> {
    match material {
        PublicKeyMaterial::Rsa(_) => Some(SSH_RSA),
        PublicKeyMaterial::Dsa(_) => Some(SSH_DSS),
        PublicKeyMaterial::ElGamal(_) => None,
    }
}

/// Encode a public key as an SSH wire blob
pub fn encode_public_blob(material: &PublicKeyMaterial) -> Result<Vec<u8>> {
    let mut writer = WireWriter::default();
    match material {
        PublicKeyMaterial::Rsa(key) => {
            writer.write_string(SSH_RSA.as_bytes());
            writer.write_mpint(&key.e);
            writer.write_mpint(&key.n);
        }
        PublicKeyMaterial::Dsa(key) => {
            writer.write_string(SSH_DSS.as_bytes());
            writer.write_mpint(&key.p);
            writer.write_mpint(&key.q);
            writer.write_mpint(&key.g);
            writer.write_mpint(&key.y);
        }
        PublicKeyMaterial::ElGamal(_) => {
            return Err(PgpError::UnsupportedAlgorithm(
                "ElGamal keys have no SSH encoding".into(),
            ))
        }
    }
    Ok(writer.0)
}

/// Format a public key as an OpenSSH `authorized_keys` line
/// Format: "<algorithm> <base64-blob> <comment>"
pub fn to_openssh_line(material: &PublicKeyMaterial, comment: &str) -> Result<String> {
    let blob = encode_public_blob(material)?;
    let name = algorithm_name(material).unwrap_or_default();
    let encoded = STANDARD.encode(&blob);
    if comment.is_empty() {
        Ok(format!("{} {}", name, encoded))
    } else {
        Ok(format!("{} {} {}", name, encoded, comment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rsa::RsaPublicKey;

    fn rsa_material() -> PublicKeyMaterial {
        let n = BigNum::from_bytes_be(&[0xC1, 0x02, 0x03, 0x05]);
        PublicKeyMaterial::Rsa(RsaPublicKey::new(n, BigNum::from_u64(65537)).unwrap())
    }

    #[test]
    fn test_reader_fields() {
        let data = [0, 0, 0, 3, b'a', b'b', b'c', 0, 0, 0, 2, 0x00, 0x81];
        let mut reader = WireReader::new(&data);
        assert_eq!(reader.read_string().unwrap(), b"abc");
        assert_eq!(reader.read_bignum().unwrap(), BigNum::from_u64(0x81));
        assert_eq!(reader.remaining(), 0);
        reader.finish().unwrap();
    }

    #[test]
    fn test_truncated_field() {
        let data = [0, 0, 0, 10, 1, 2, 3];
        let mut reader = WireReader::new(&data);
        match reader.read_string() {
            Err(PgpError::TruncatedData { needed, remaining }) => {
                assert_eq!(needed, 10);
                assert_eq!(remaining, 3);
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut short = WireReader::new(&[0, 0]);
        assert!(matches!(short.read_u32(), Err(PgpError::TruncatedData { .. })));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let data = [0, 0, 0, 1, 7, 0xFF];
        let mut reader = WireReader::new(&data);
        reader.read_string().unwrap();
        assert!(matches!(reader.finish(), Err(PgpError::FormatError(_))));
    }

    #[test]
    fn test_mpint_sign_prefix() {
        let blob = encode_public_blob(&rsa_material()).unwrap();
        let mut reader = WireReader::new(&blob);
        assert_eq!(reader.read_string().unwrap(), SSH_RSA.as_bytes());
        assert_eq!(reader.read_string().unwrap(), &[0x01, 0x00, 0x01]);
        // High bit set on n, so a zero octet is prepended
        assert_eq!(reader.read_string().unwrap(), &[0x00, 0xC1, 0x02, 0x03, 0x05]);
        reader.finish().unwrap();
    }

    #[test]
    fn test_openssh_line_format() {
        let line = to_openssh_line(&rsa_material(), "user@host").unwrap();
        assert!(line.starts_with("ssh-rsa AAAAB3NzaC1yc2E"));
        assert!(line.ends_with(" user@host"));

        let bare = to_openssh_line(&rsa_material(), "").unwrap();
        assert_eq!(bare.split(' ').count(), 2);
    }
}
