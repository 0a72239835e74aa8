//! Block ciphers and OpenPGP CFB mode
//!
//! `CipherContext` exposes raw single-block transforms plus full-block CFB
//! built on top of the encrypt primitive. The CFB feedback register starts
//! at the IV and is replaced by each ciphertext block; a partially used
//! keystream block carries over to the next call, so splitting a stream
//! across calls gives the same output as one call.

use std::fmt;
use std::str::FromStr;

use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{PgpError, Result};

/// Largest block size of any supported cipher
pub const MAX_BLOCK_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CipherAlgorithm {
    TripleDes,
    Cast5,
    Blowfish,
    Aes128,
    Aes192,
    Aes256,
    Twofish,
    Camellia128,
    Camellia192,
    Camellia256,
}

impl CipherAlgorithm {
    pub fn key_size(self) -> usize {
        match self {
            Self::TripleDes => 24,
            Self::Cast5 | Self::Blowfish => 16,
            Self::Aes128 | Self::Camellia128 => 16,
            Self::Aes192 | Self::Camellia192 => 24,
            Self::Aes256 | Self::Camellia256 | Self::Twofish => 32,
        }
    }

    pub fn block_size(self) -> usize {
        match self {
            Self::TripleDes | Self::Cast5 | Self::Blowfish => 8,
            _ => 16,
        }
    }

    /// OpenPGP algorithm identifier
    pub fn id(self) -> u8 {
        match self {
            Self::TripleDes => 2,
            Self::Cast5 => 3,
            Self::Blowfish => 4,
            Self::Aes128 => 7,
            Self::Aes192 => 8,
            Self::Aes256 => 9,
            Self::Twofish => 10,
            Self::Camellia128 => 11,
            Self::Camellia192 => 12,
            Self::Camellia256 => 13,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        Ok(match id {
            2 => Self::TripleDes,
            3 => Self::Cast5,
            4 => Self::Blowfish,
            7 => Self::Aes128,
            8 => Self::Aes192,
            9 => Self::Aes256,
            10 => Self::Twofish,
            11 => Self::Camellia128,
            12 => Self::Camellia192,
            13 => Self::Camellia256,
            other => {
                return Err(PgpError::UnsupportedAlgorithm(format!(
                    "symmetric algorithm id {}",
                    other
                )))
            }
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::TripleDes => "TRIPLEDES",
            Self::Cast5 => "CAST5",
            Self::Blowfish => "BLOWFISH",
            Self::Aes128 => "AES128",
            Self::Aes192 => "AES192",
            Self::Aes256 => "AES256",
            Self::Twofish => "TWOFISH",
            Self::Camellia128 => "CAMELLIA128",
            Self::Camellia192 => "CAMELLIA192",
            Self::Camellia256 => "CAMELLIA256",
        }
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherAlgorithm {
    type Err = PgpError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "TRIPLEDES" | "3DES" => Ok(Self::TripleDes),
            "CAST5" => Ok(Self::Cast5),
            "BLOWFISH" => Ok(Self::Blowfish),
            "AES" | "AES128" => Ok(Self::Aes128),
            "AES192" => Ok(Self::Aes192),
            "AES256" => Ok(Self::Aes256),
            "TWOFISH" => Ok(Self::Twofish),
            "CAMELLIA128" => Ok(Self::Camellia128),
            "CAMELLIA192" => Ok(Self::Camellia192),
            "CAMELLIA256" => Ok(Self::Camellia256),
            _ => Err(PgpError::UnsupportedAlgorithm(format!("cipher '{}'", s))),
        }
    }
}

impl TryFrom<String> for CipherAlgorithm {
    type Error = PgpError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CipherAlgorithm> for String {
    fn from(alg: CipherAlgorithm) -> Self {
        alg.name().to_string()
    }
}

/// Keyed block cipher instance
enum BlockEngine {
    TripleDes(des::TdesEde3),
    Cast5(cast5::Cast5),
    Blowfish(blowfish::Blowfish),
    Aes128(aes::Aes128),
    Aes192(aes::Aes192),
    Aes256(aes::Aes256),
    Twofish(twofish::Twofish),
    Camellia128(camellia::Camellia128),
    Camellia192(camellia::Camellia192),
    Camellia256(camellia::Camellia256),
}

macro_rules! with_engine {
    ($engine:expr, $c:ident => $body:expr) => {
        match $engine {
            BlockEngine::TripleDes($c) => $body,
            BlockEngine::Cast5($c) => $body,
            BlockEngine::Blowfish($c) => $body,
            BlockEngine::Aes128($c) => $body,
            BlockEngine::Aes192($c) => $body,
            BlockEngine::Aes256($c) => $body,
            BlockEngine::Twofish($c) => $body,
            BlockEngine::Camellia128($c) => $body,
            BlockEngine::Camellia192($c) => $body,
            BlockEngine::Camellia256($c) => $body,
        }
    };
}

impl BlockEngine {
    fn new(algorithm: CipherAlgorithm, key: &[u8]) -> Result<Self> {
        let invalid = |_| PgpError::InvalidKey(format!("bad {} key", algorithm));
        Ok(match algorithm {
            CipherAlgorithm::TripleDes => {
                Self::TripleDes(des::TdesEde3::new_from_slice(key).map_err(invalid)?)
            }
            CipherAlgorithm::Cast5 => Self::Cast5(cast5::Cast5::new_from_slice(key).map_err(invalid)?),
            CipherAlgorithm::Blowfish => {
                Self::Blowfish(blowfish::Blowfish::new_from_slice(key).map_err(invalid)?)
            }
            CipherAlgorithm::Aes128 => Self::Aes128(aes::Aes128::new_from_slice(key).map_err(invalid)?),
            CipherAlgorithm::Aes192 => Self::Aes192(aes::Aes192::new_from_slice(key).map_err(invalid)?),
            CipherAlgorithm::Aes256 => Self::Aes256(aes::Aes256::new_from_slice(key).map_err(invalid)?),
            CipherAlgorithm::Twofish => {
                Self::Twofish(twofish::Twofish::new_from_slice(key).map_err(invalid)?)
            }
            CipherAlgorithm::Camellia128 => {
                Self::Camellia128(camellia::Camellia128::new_from_slice(key).map_err(invalid)?)
            }
            CipherAlgorithm::Camellia192 => {
                Self::Camellia192(camellia::Camellia192::new_from_slice(key).map_err(invalid)?)
            }
            CipherAlgorithm::Camellia256 => {
                Self::Camellia256(camellia::Camellia256::new_from_slice(key).map_err(invalid)?)
            }
        })
    }

    /// Caller guarantees `block.len()` equals the cipher's block size
    fn encrypt(&self, block: &mut [u8]) {
        with_engine!(self, c => c.encrypt_block(GenericArray::from_mut_slice(block)))
    }

    fn decrypt(&self, block: &mut [u8]) {
        with_engine!(self, c => c.decrypt_block(GenericArray::from_mut_slice(block)))
    }
}

/// Symmetric cipher state: key schedule plus CFB feedback register
pub struct CipherContext {
    algorithm: CipherAlgorithm,
    engine: Option<BlockEngine>,
    /// CFB feedback register (IV, then the last ciphertext block)
    feedback: [u8; MAX_BLOCK_SIZE],
    /// Encrypted feedback register, consumed byte by byte
    keystream: [u8; MAX_BLOCK_SIZE],
    /// Bytes of `keystream` already used; `block_size` means exhausted
    position: usize,
}

impl CipherContext {
    pub fn create(algorithm: CipherAlgorithm) -> Result<Self> {
        Ok(Self {
            algorithm,
            engine: None,
            feedback: [0u8; MAX_BLOCK_SIZE],
            keystream: [0u8; MAX_BLOCK_SIZE],
            position: algorithm.block_size(),
        })
    }

    pub fn algorithm(&self) -> CipherAlgorithm {
        self.algorithm
    }

    pub fn block_size(&self) -> usize {
        self.algorithm.block_size()
    }

    pub fn key_size(&self) -> usize {
        self.algorithm.key_size()
    }

    pub fn set_key(&mut self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_size() {
            return Err(PgpError::FormatError(format!(
                "{} key must be {} bytes, got {}",
                self.algorithm,
                self.key_size(),
                key.len()
            )));
        }
        self.engine = Some(BlockEngine::new(self.algorithm, key)?);
        Ok(())
    }

    /// Load the CFB feedback register and restart the keystream
    pub fn set_iv(&mut self, iv: &[u8]) -> Result<()> {
        let bs = self.block_size();
        if iv.len() != bs {
            return Err(PgpError::FormatError(format!(
                "{} IV must be {} bytes, got {}",
                self.algorithm,
                bs,
                iv.len()
            )));
        }
        self.feedback[..bs].copy_from_slice(iv);
        self.keystream.zeroize();
        self.position = bs;
        Ok(())
    }

    fn engine(&self) -> Result<&BlockEngine> {
        self.engine
            .as_ref()
            .ok_or_else(|| PgpError::InvalidKey("cipher key not set".into()))
    }

    fn check_block(&self, block: &[u8]) -> Result<()> {
        if block.len() != self.block_size() {
            return Err(PgpError::FormatError(format!(
                "{} block must be {} bytes, got {}",
                self.algorithm,
                self.block_size(),
                block.len()
            )));
        }
        Ok(())
    }

    /// Encrypt one block in place (ECB). Leaves the CFB state untouched.
    pub fn block_encrypt(&self, block: &mut [u8]) -> Result<()> {
        self.check_block(block)?;
        self.engine()?.encrypt(block);
        Ok(())
    }

    /// Decrypt one block in place (ECB). Leaves the CFB state untouched.
    pub fn block_decrypt(&self, block: &mut [u8]) -> Result<()> {
        self.check_block(block)?;
        self.engine()?.decrypt(block);
        Ok(())
    }

    /// Next keystream byte index, refilling from the feedback register
    /// once the current block is used up
    fn next_position(&mut self) -> Result<usize> {
        let bs = self.block_size();
        if self.position == bs {
            let engine = self
                .engine
                .as_ref()
                .ok_or_else(|| PgpError::InvalidKey("cipher key not set".into()))?;
            self.keystream[..bs].copy_from_slice(&self.feedback[..bs]);
            engine.encrypt(&mut self.keystream[..bs]);
            self.position = 0;
        }
        let pos = self.position;
        self.position += 1;
        Ok(pos)
    }

    /// CFB-encrypt `data` in place; any length is accepted
    pub fn cfb_encrypt(&mut self, data: &mut [u8]) -> Result<()> {
        self.engine()?;
        for byte in data.iter_mut() {
            let pos = self.next_position()?;
            *byte ^= self.keystream[pos];
            self.feedback[pos] = *byte;
        }
        Ok(())
    }

    /// CFB-decrypt `data` in place. Uses the encrypt primitive for the
    /// keystream, as CFB requires.
    pub fn cfb_decrypt(&mut self, data: &mut [u8]) -> Result<()> {
        self.engine()?;
        for byte in data.iter_mut() {
            let pos = self.next_position()?;
            let ciphertext = *byte;
            *byte ^= self.keystream[pos];
            self.feedback[pos] = ciphertext;
        }
        Ok(())
    }

    /// Release the key schedule and wipe the feedback state
    pub fn finish(self) {
        drop(self);
    }
}

impl Drop for CipherContext {
    fn drop(&mut self) {
        self.feedback.zeroize();
        self.keystream.zeroize();
        self.engine = None;
    }
}

impl fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherContext")
            .field("algorithm", &self.algorithm)
            .field("keyed", &self.engine.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[CipherAlgorithm] = &[
        CipherAlgorithm::TripleDes,
        CipherAlgorithm::Cast5,
        CipherAlgorithm::Blowfish,
        CipherAlgorithm::Aes128,
        CipherAlgorithm::Aes192,
        CipherAlgorithm::Aes256,
        CipherAlgorithm::Twofish,
        CipherAlgorithm::Camellia128,
        CipherAlgorithm::Camellia192,
        CipherAlgorithm::Camellia256,
    ];

    fn aes128_zero_key() -> CipherContext {
        let mut ctx = CipherContext::create(CipherAlgorithm::Aes128).unwrap();
        ctx.set_key(&[0u8; 16]).unwrap();
        ctx
    }

    #[test]
    fn test_aes128_ecb_vector() {
        let ctx = aes128_zero_key();
        let mut block = [0u8; 16];

        ctx.block_encrypt(&mut block).unwrap();
        assert_eq!(hex::encode_upper(block), "66E94BD4EF8A2C3B884CFA59CA342B2E");

        ctx.block_decrypt(&mut block).unwrap();
        assert_eq!(block, [0u8; 16]);
    }

    #[test]
    fn test_aes128_cfb_vector() {
        let mut ctx = aes128_zero_key();
        let iv = [0x42u8; 16];
        let mut data = [0u8; 20];

        ctx.set_iv(&iv).unwrap();
        ctx.cfb_encrypt(&mut data).unwrap();
        assert_eq!(
            hex::encode_upper(data),
            "BFDAA57CB812189713A950AD9947887983021617"
        );

        ctx.set_iv(&iv).unwrap();
        ctx.cfb_decrypt(&mut data).unwrap();
        assert_eq!(data, [0u8; 20]);
    }

    #[test]
    fn test_block_ops_do_not_touch_cfb_state() {
        let mut ctx = aes128_zero_key();
        ctx.set_iv(&[0x42u8; 16]).unwrap();

        let mut block = [0u8; 16];
        ctx.block_encrypt(&mut block).unwrap();

        let mut data = [0u8; 20];
        ctx.cfb_encrypt(&mut data).unwrap();
        assert_eq!(
            hex::encode_upper(data),
            "BFDAA57CB812189713A950AD9947887983021617"
        );
    }

    #[test]
    fn test_cfb_split_calls_match_single_call() {
        let plaintext: Vec<u8> = (0..77u8).collect();
        let iv = [7u8; 16];

        let mut single = aes128_zero_key();
        single.set_iv(&iv).unwrap();
        let mut expected = plaintext.clone();
        single.cfb_encrypt(&mut expected).unwrap();

        let mut split = aes128_zero_key();
        split.set_iv(&iv).unwrap();
        let mut actual = plaintext.clone();
        let (a, rest) = actual.split_at_mut(5);
        let (b, c) = rest.split_at_mut(30);
        split.cfb_encrypt(a).unwrap();
        split.cfb_encrypt(b).unwrap();
        split.cfb_encrypt(c).unwrap();

        assert_eq!(actual, expected);
    }

    #[test]
    fn test_cfb_roundtrip_all_algorithms() {
        for alg in ALL {
            let key: Vec<u8> = (0..alg.key_size() as u8).collect();
            let iv = vec![0xA5u8; alg.block_size()];
            let plaintext = b"not a multiple of any block size!".to_vec();

            let mut enc = CipherContext::create(*alg).unwrap();
            enc.set_key(&key).unwrap();
            enc.set_iv(&iv).unwrap();
            let mut data = plaintext.clone();
            enc.cfb_encrypt(&mut data).unwrap();
            assert_ne!(data, plaintext, "{}", alg);
            enc.finish();

            let mut dec = CipherContext::create(*alg).unwrap();
            dec.set_key(&key).unwrap();
            dec.set_iv(&iv).unwrap();
            dec.cfb_decrypt(&mut data).unwrap();
            assert_eq!(data, plaintext, "{}", alg);
        }
    }

    #[test]
    fn test_unkeyed_context_fails() {
        let mut ctx = CipherContext::create(CipherAlgorithm::Cast5).unwrap();
        let mut data = [0u8; 8];
        assert!(ctx.cfb_encrypt(&mut data).is_err());
        assert!(ctx.block_encrypt(&mut data).is_err());
    }

    #[test]
    fn test_length_checks() {
        let mut ctx = aes128_zero_key();
        assert!(ctx.set_key(&[0u8; 15]).is_err());
        assert!(ctx.set_iv(&[0u8; 8]).is_err());
        let mut short = [0u8; 8];
        assert!(ctx.block_encrypt(&mut short).is_err());
    }

    #[test]
    fn test_id_and_name_roundtrip() {
        for alg in ALL {
            assert_eq!(CipherAlgorithm::from_id(alg.id()).unwrap(), *alg);
            assert_eq!(alg.name().parse::<CipherAlgorithm>().unwrap(), *alg);
        }
        assert!(CipherAlgorithm::from_id(1).is_err());
    }
}
