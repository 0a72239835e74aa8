//! ElGamal encryption over a prime field
//!
//! A ciphertext has two parts, each `byte_length(p)` bytes:
//! the ephemeral value `g^k mod p` and the masked message `y^k * m mod p`.
//! `k` is drawn from the OS CSPRNG on every call.

use num_bigint_dig::{BigUint, RandBigInt};
use rand::rngs::OsRng;

use super::bn::BigNum;
use super::SecureBytes;
use crate::error::{PgpError, Result};

/// Public domain parameters and value `y = g^x mod p`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElGamalPublicKey {
    pub p: BigNum,
    pub g: BigNum,
    pub y: BigNum,
}

impl ElGamalPublicKey {
    pub fn new(p: BigNum, g: BigNum, y: BigNum) -> Result<Self> {
        let key = Self { p, g, y };
        key.validate()?;
        Ok(key)
    }

    /// Derive the public value for secret exponent `x`
    pub fn from_secret(p: BigNum, g: BigNum, secret: &ElGamalSecretKey) -> Result<Self> {
        let y = g.mod_exp(&secret.x, &p)?;
        Self::new(p, g, y)
    }

    pub fn validate(&self) -> Result<()> {
        // p must leave room for k in [2, p-2]
        if self.p <= BigNum::from_u64(4) {
            return Err(PgpError::InvalidKey("ElGamal prime too small".into()));
        }
        for (name, value) in [("g", &self.g), ("y", &self.y)] {
            if value.is_zero() || value >= &self.p {
                return Err(PgpError::InvalidKey(format!("ElGamal {} out of range", name)));
            }
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.p.byte_length()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElGamalSecretKey {
    pub x: BigNum,
}

impl ElGamalSecretKey {
    pub fn new(x: BigNum) -> Self {
        Self { x }
    }

    /// Check that `x` produces the paired public value
    pub fn validate(&self, public: &ElGamalPublicKey) -> Result<()> {
        if self.x.is_zero() {
            return Err(PgpError::InvalidKey("ElGamal secret exponent is zero".into()));
        }
        if public.g.mod_exp(&self.x, &public.p)? != public.y {
            return Err(PgpError::InvalidKey("ElGamal secret does not match y".into()));
        }
        Ok(())
    }
}

/// Encrypt `plaintext` (a big-endian integer below p).
///
/// Returns `(ephemeral, masked)`, both padded to `public.size()` bytes.
pub fn encrypt(plaintext: &[u8], public: &ElGamalPublicKey) -> Result<(Vec<u8>, Vec<u8>)> {
    let m = BigNum::from_bytes_be(plaintext);
    if m >= public.p {
        return Err(PgpError::InputTooLarge);
    }

    // k in [2, p-2]
    let low = BigUint::from(2u32);
    let high = public.p.as_biguint() - BigUint::from(1u32);
    let k = BigNum::from(OsRng.gen_biguint_range(&low, &high));

    let ephemeral = public.g.mod_exp(&k, &public.p)?;
    let shared = public.y.mod_exp(&k, &public.p)?;
    let product = BigNum::from(shared.as_biguint() * m.as_biguint());
    let masked = BigNum::from(product.as_biguint() % public.p.as_biguint());

    let size = public.size();
    Ok((ephemeral.to_bytes(size), masked.to_bytes(size)))
}

/// Recover the plaintext integer's unpadded encoding
pub fn decrypt(
    ephemeral: &[u8],
    masked: &[u8],
    secret: &ElGamalSecretKey,
    public: &ElGamalPublicKey,
) -> Result<SecureBytes> {
    let c1 = BigNum::from_bytes_be(ephemeral);
    let c2 = BigNum::from_bytes_be(masked);
    // g^k is never zero, but a zero c2 is just the encryption of zero
    if c1.is_zero() || c1 >= public.p || c2 >= public.p {
        return Err(PgpError::DecryptionFailure);
    }

    let shared = c1.mod_exp(&secret.x, &public.p)?;
    let inverse = shared
        .mod_inverse(&public.p)
        .ok_or(PgpError::DecryptionFailure)?;
    let product = BigNum::from(c2.as_biguint() * inverse.as_biguint());
    let m = BigNum::from(product.as_biguint() % public.p.as_biguint());

    Ok(SecureBytes::new(m.to_bytes(0)))
}
