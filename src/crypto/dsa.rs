//! DSA signatures over a prime-order subgroup
//!
//! Digests longer than the subgroup order are truncated to its leftmost
//! `bits(q)` bits before use.

use num_bigint_dig::{BigUint, RandBigInt};
use num_traits::Zero;
use rand::rngs::OsRng;

use super::bn::BigNum;
use crate::error::{PgpError, Result};

/// Fresh nonces tried before signing gives up
const MAX_SIGN_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsaPublicKey {
    pub p: BigNum,
    pub q: BigNum,
    pub g: BigNum,
    pub y: BigNum,
}

impl DsaPublicKey {
    pub fn new(p: BigNum, q: BigNum, g: BigNum, y: BigNum) -> Result<Self> {
        let key = Self { p, q, g, y };
        key.validate()?;
        Ok(key)
    }

    pub fn validate(&self) -> Result<()> {
        // q <= 1 leaves no room for a nonce in [1, q)
        if self.q <= BigNum::one() || self.q >= self.p {
            return Err(PgpError::InvalidKey("DSA q must lie in (1, p)".into()));
        }
        for (name, value) in [("g", &self.g), ("y", &self.y)] {
            if value.is_zero() || value >= &self.p {
                return Err(PgpError::InvalidKey(format!("DSA {} out of range", name)));
            }
        }
        Ok(())
    }

    /// Size in bytes of each signature component
    pub fn signature_size(&self) -> usize {
        self.q.byte_length()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsaSecretKey {
    pub x: BigNum,
}

impl DsaSecretKey {
    pub fn new(x: BigNum) -> Self {
        Self { x }
    }

    pub fn validate(&self, public: &DsaPublicKey) -> Result<()> {
        if self.x.is_zero() || self.x >= public.q {
            return Err(PgpError::InvalidKey("DSA secret out of range".into()));
        }
        if public.g.mod_exp(&self.x, &public.p)? != public.y {
            return Err(PgpError::InvalidKey("DSA secret does not match y".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsaSignature {
    pub r: BigNum,
    pub s: BigNum,
}

/// Leftmost `bits(q)` bits of the digest as an integer
fn digest_to_int(digest: &[u8], q: &BigNum) -> BigUint {
    let q_bits = q.bits();
    let max_bytes = (q_bits + 7) / 8;
    let take = digest.len().min(max_bytes);
    let mut z = BigUint::from_bytes_be(&digest[..take]);
    let z_bits = take * 8;
    if z_bits > q_bits {
        z >>= z_bits - q_bits;
    }
    z
}

pub fn sign(digest: &[u8], secret: &DsaSecretKey, public: &DsaPublicKey) -> Result<DsaSignature> {
    let q = public.q.as_biguint();
    let z = digest_to_int(digest, &public.q);
    let one = BigUint::from(1u32);

    for _ in 0..MAX_SIGN_ATTEMPTS {
        let k = BigNum::from(OsRng.gen_biguint_range(&one, q));
        let r = public.g.mod_exp(&k, &public.p)?.as_biguint() % q;
        if r.is_zero() {
            continue;
        }

        let k_inv = match k.mod_inverse(&public.q) {
            Some(inv) => inv,
            None => continue,
        };
        let xr = BigNum::from(secret.x.as_biguint() * &r);
        let xr = BigNum::from(xr.as_biguint() % q);
        let sum = BigNum::from(&z + xr.as_biguint());
        let sum = BigNum::from(sum.as_biguint() % q);
        let scaled = BigNum::from(k_inv.as_biguint() * sum.as_biguint());
        let s = scaled.as_biguint() % q;
        if s.is_zero() {
            continue;
        }

        return Ok(DsaSignature {
            r: BigNum::from(r),
            s: BigNum::from(s),
        });
    }

    Err(PgpError::InvalidKey("DSA signing produced degenerate values".into()))
}

pub fn verify(digest: &[u8], signature: &DsaSignature, public: &DsaPublicKey) -> bool {
    let q = &public.q;
    let (r, s) = (&signature.r, &signature.s);
    if r.is_zero() || s.is_zero() || r >= q || s >= q {
        return false;
    }

    let w = match s.mod_inverse(q) {
        Some(w) => w,
        None => return false,
    };
    let z = digest_to_int(digest, q);
    let u1 = BigNum::from((z * w.as_biguint()) % q.as_biguint());
    let u2 = BigNum::from((r.as_biguint() * w.as_biguint()) % q.as_biguint());

    let (gu1, yu2) = match (
        public.g.mod_exp(&u1, &public.p),
        public.y.mod_exp(&u2, &public.p),
    ) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return false,
    };
    let v = ((gu1.as_biguint() * yu2.as_biguint()) % public.p.as_biguint()) % q.as_biguint();
    v == *r.as_biguint()
}
