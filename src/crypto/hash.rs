//! Incremental message digests
//!
//! A `HashContext` wraps one of the RustCrypto hashers behind
//! `digest::DynDigest`. `finish` consumes the context, so a finalized
//! context cannot be fed again.

use std::fmt;
use std::str::FromStr;

use digest::DynDigest;
use serde::{Deserialize, Serialize};

use crate::error::{PgpError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Sm3,
    Unknown,
}

impl HashAlgorithm {
    /// Digest size in bytes; 0 for `Unknown`
    pub fn output_length(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
            Self::Sm3 => 32,
            Self::Unknown => 0,
        }
    }

    /// OpenPGP algorithm identifier
    pub fn id(self) -> u8 {
        match self {
            Self::Md5 => 1,
            Self::Sha1 => 2,
            Self::Sha256 => 8,
            Self::Sha384 => 9,
            Self::Sha512 => 10,
            Self::Sha224 => 11,
            Self::Sm3 => 105,
            Self::Unknown => 0,
        }
    }

    pub fn from_id(id: u8) -> Self {
        match id {
            1 => Self::Md5,
            2 => Self::Sha1,
            8 => Self::Sha256,
            9 => Self::Sha384,
            10 => Self::Sha512,
            11 => Self::Sha224,
            105 => Self::Sm3,
            _ => Self::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA1",
            Self::Sha224 => "SHA224",
            Self::Sha256 => "SHA256",
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
            Self::Sm3 => "SM3",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = PgpError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "MD5" => Ok(Self::Md5),
            "SHA1" => Ok(Self::Sha1),
            "SHA224" => Ok(Self::Sha224),
            "SHA256" => Ok(Self::Sha256),
            "SHA384" => Ok(Self::Sha384),
            "SHA512" => Ok(Self::Sha512),
            "SM3" => Ok(Self::Sm3),
            _ => Err(PgpError::UnsupportedAlgorithm(format!("hash '{}'", s))),
        }
    }
}

impl TryFrom<String> for HashAlgorithm {
    type Error = PgpError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<HashAlgorithm> for String {
    fn from(alg: HashAlgorithm) -> Self {
        alg.name().to_string()
    }
}

/// Running digest state for one algorithm
pub struct HashContext {
    algorithm: HashAlgorithm,
    inner: Box<dyn DynDigest + Send>,
}

impl HashContext {
    pub fn create(algorithm: HashAlgorithm) -> Result<Self> {
        let inner: Box<dyn DynDigest + Send> = match algorithm {
            HashAlgorithm::Md5 => Box::new(md5::Md5::default()),
            HashAlgorithm::Sha1 => Box::new(sha1::Sha1::default()),
            HashAlgorithm::Sha224 => Box::new(sha2::Sha224::default()),
            HashAlgorithm::Sha256 => Box::new(sha2::Sha256::default()),
            HashAlgorithm::Sha384 => Box::new(sha2::Sha384::default()),
            HashAlgorithm::Sha512 => Box::new(sha2::Sha512::default()),
            HashAlgorithm::Sm3 => Box::new(sm3::Sm3::default()),
            HashAlgorithm::Unknown => {
                return Err(PgpError::UnsupportedAlgorithm("hash 'Unknown'".into()))
            }
        };
        Ok(Self { algorithm, inner })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn output_length(&self) -> usize {
        self.algorithm.output_length()
    }

    /// Feed more input. Chunk boundaries do not affect the result.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finalize and return exactly `output_length()` bytes
    pub fn finish(self) -> Vec<u8> {
        self.inner.finalize().into_vec()
    }
}

impl fmt::Debug for HashContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashContext")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

/// Single-shot digest of `data`
pub fn digest(algorithm: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    let mut ctx = HashContext::create(algorithm)?;
    ctx.update(data);
    Ok(ctx.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABC_VECTORS: &[(HashAlgorithm, &str)] = &[
        (HashAlgorithm::Md5, "900150983CD24FB0D6963F7D28E17F72"),
        (HashAlgorithm::Sha1, "A9993E364706816ABA3E25717850C26C9CD0D89D"),
        (
            HashAlgorithm::Sha256,
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD",
        ),
        (
            HashAlgorithm::Sha384,
            "CB00753F45A35E8BB5A03D699AC65007272C32AB0EDED1631A8B605A43FF5BED\
             8086072BA1E7CC2358BAECA134C825A7",
        ),
        (
            HashAlgorithm::Sha512,
            "DDAF35A193617ABACC417349AE20413112E6FA4E89A97EA20A9EEEE64B55D39A\
             2192992A274FC1A836BA3C23A3FEEBBD454D4423643CE80E2A9AC94FA54CA49F",
        ),
        (
            HashAlgorithm::Sha224,
            "23097D223405D8228642A477BDA255B32AADBCE4BDA0B3F7E36C9DA7",
        ),
        (
            HashAlgorithm::Sm3,
            "66C7F0F462EEEDD9D1F2D46BDC10E4E24167C4875CF2F7A2297DA02B8F4BA8E0",
        ),
    ];

    #[test]
    fn test_abc_vectors_split_updates() {
        for (alg, expected) in ABC_VECTORS {
            let mut ctx = HashContext::create(*alg).unwrap();
            assert_eq!(ctx.output_length() * 2, expected.len(), "{}", alg);

            ctx.update(b"a");
            ctx.update(b"bc");
            let out = ctx.finish();

            assert_eq!(out.len(), alg.output_length());
            assert_eq!(hex::encode_upper(&out), *expected, "{}", alg);
        }
    }

    #[test]
    fn test_chunking_is_irrelevant() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 251) as u8).collect();
        for (alg, _) in ABC_VECTORS {
            let whole = digest(*alg, &data).unwrap();

            let mut ctx = HashContext::create(*alg).unwrap();
            for chunk in data.chunks(13) {
                ctx.update(chunk);
            }
            assert_eq!(ctx.finish(), whole, "{}", alg);
        }
    }

    #[test]
    fn test_unknown_is_unsupported() {
        assert!(matches!(
            HashContext::create(HashAlgorithm::Unknown),
            Err(PgpError::UnsupportedAlgorithm(_))
        ));
        assert_eq!(HashAlgorithm::Unknown.output_length(), 0);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("sha256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("SHA-1".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha1);
        assert_eq!("md5".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Md5);
        assert!("whirlpool".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn test_id_roundtrip() {
        for (alg, _) in ABC_VECTORS {
            assert_eq!(HashAlgorithm::from_id(alg.id()), *alg);
        }
        assert_eq!(HashAlgorithm::from_id(3), HashAlgorithm::Unknown);
    }
}
