//! Arbitrary-precision integers for the public-key engines
//!
//! `BigNum` wraps `num_bigint_dig::BigUint` and wipes its limbs on drop, so
//! primes, private exponents and intermediate results never outlive their
//! owner in memory.

use std::fmt;

use num_bigint_dig::BigUint;
use num_traits::{One, Zero};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{PgpError, Result};

/// Non-negative integer with big-endian (de)serialization
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Zeroize, ZeroizeOnDrop)]
pub struct BigNum(BigUint);

impl BigNum {
    /// Parse a big-endian magnitude. Leading zero bytes do not change the value.
    pub fn from_bytes_be(bytes: &[u8]) -> Self {
        Self(BigUint::from_bytes_be(bytes))
    }

    pub fn from_u64(value: u64) -> Self {
        Self(BigUint::from(value))
    }

    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn one() -> Self {
        Self(BigUint::one())
    }

    /// Big-endian encoding, left-padded with zeros up to `min_length`.
    ///
    /// Zero encodes as an empty slice when `min_length` is 0. A value wider
    /// than `min_length` is returned in full, never truncated.
    pub fn to_bytes(&self, min_length: usize) -> Vec<u8> {
        let len = self.byte_length();
        let mut out = vec![0u8; len.max(min_length)];
        if len > 0 {
            let bytes = Zeroizing::new(self.0.to_bytes_be());
            let start = out.len() - len;
            out[start..].copy_from_slice(&bytes);
        }
        out
    }

    /// Number of bytes in the unpadded big-endian encoding
    pub fn byte_length(&self) -> usize {
        (self.bits() + 7) / 8
    }

    pub fn bits(&self) -> usize {
        self.0.bits()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// `self ^ exponent mod modulus`
    pub fn mod_exp(&self, exponent: &BigNum, modulus: &BigNum) -> Result<BigNum> {
        if modulus.is_zero() {
            return Err(PgpError::InvalidKey("zero modulus".into()));
        }
        Ok(Self(self.0.modpow(&exponent.0, &modulus.0)))
    }

    /// Multiplicative inverse of `self` modulo `modulus`, if one exists.
    ///
    /// Extended Euclid with the Bezout coefficient kept reduced mod
    /// `modulus`; every intermediate is a `BigNum` and is wiped on drop.
    pub fn mod_inverse(&self, modulus: &BigNum) -> Option<BigNum> {
        if modulus.is_zero() {
            return None;
        }
        let m = &modulus.0;

        let mut r0 = modulus.clone();
        let mut r1 = Self(&self.0 % m);
        let mut t0 = Self::zero();
        let mut t1 = Self::one();

        while !r1.is_zero() {
            let quotient = Self(&r0.0 / &r1.0);

            let product = Self(&quotient.0 * &r1.0);
            let r2 = Self(&r0.0 - &product.0);

            // t2 = (t0 - quotient * t1) mod m
            let scaled = Self(&quotient.0 * &t1.0);
            let reduced = Self(&scaled.0 % m);
            let lifted = Self(&t0.0 + m);
            let diff = Self(&lifted.0 - &reduced.0);
            let t2 = Self(&diff.0 % m);

            r0 = std::mem::replace(&mut r1, r2);
            t0 = std::mem::replace(&mut t1, t2);
        }

        if r0.0.is_one() {
            Some(t0)
        } else {
            None
        }
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }
}

impl From<BigUint> for BigNum {
    fn from(value: BigUint) -> Self {
        Self(value)
    }
}

impl From<u64> for BigNum {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

// Values may be secret; only the size is ever printed
impl fmt::Debug for BigNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BigNum({} bits)", self.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_zeros_ignored() {
        let a = BigNum::from_bytes_be(&[0x00, 0x00, 0x01, 0x02]);
        let b = BigNum::from_bytes_be(&[0x01, 0x02]);
        assert_eq!(a, b);
        assert_eq!(a.byte_length(), 2);
        assert_eq!(a.bits(), 9);
    }

    #[test]
    fn test_to_bytes_padding() {
        let n = BigNum::from_u64(0x616263);
        assert_eq!(n.to_bytes(0), vec![0x61, 0x62, 0x63]);
        assert_eq!(n.to_bytes(5), vec![0x00, 0x00, 0x61, 0x62, 0x63]);
        // Never truncates
        assert_eq!(n.to_bytes(2), vec![0x61, 0x62, 0x63]);
    }

    #[test]
    fn test_zero_encoding() {
        let zero = BigNum::zero();
        assert!(zero.is_zero());
        assert_eq!(zero.byte_length(), 0);
        assert!(zero.to_bytes(0).is_empty());
        assert_eq!(zero.to_bytes(3), vec![0, 0, 0]);
    }

    #[test]
    fn test_mod_exp() {
        let base = BigNum::from_u64(4);
        let exp = BigNum::from_u64(13);
        let modulus = BigNum::from_u64(497);
        assert_eq!(base.mod_exp(&exp, &modulus).unwrap(), BigNum::from_u64(445));
    }

    #[test]
    fn test_mod_exp_zero_modulus() {
        let base = BigNum::from_u64(4);
        assert!(base.mod_exp(&BigNum::one(), &BigNum::zero()).is_err());
    }

    #[test]
    fn test_mod_inverse() {
        let a = BigNum::from_u64(3);
        let m = BigNum::from_u64(11);
        assert_eq!(a.mod_inverse(&m), Some(BigNum::from_u64(4)));

        let not_coprime = BigNum::from_u64(6);
        assert_eq!(not_coprime.mod_inverse(&BigNum::from_u64(9)), None);
        assert_eq!(a.mod_inverse(&BigNum::zero()), None);
    }

    #[test]
    fn test_mod_inverse_large() {
        // Largest prime below 2^64
        let m = BigNum::from_u64(0xFFFF_FFFF_FFFF_FFC5);
        for value in [2u64, 65537, 0x1234_5678_9ABC_DEF0, 0xFFFF_FFFF_FFFF_FFC4] {
            let a = BigNum::from_u64(value);
            let inverse = a.mod_inverse(&m).unwrap();
            assert!(inverse < m);
            let product = BigNum::from(a.as_biguint() * inverse.as_biguint());
            assert_eq!(BigNum::from(product.as_biguint() % m.as_biguint()), BigNum::one());
        }

        // Operand larger than the modulus is reduced first
        let big = BigNum::from_u64(25);
        assert_eq!(big.mod_inverse(&BigNum::from_u64(7)), Some(BigNum::from_u64(2)));
    }

    #[test]
    fn test_to_bytes_wide_value() {
        let n = BigNum::from_bytes_be(&[0xAB; 40]);
        assert_eq!(n.to_bytes(0), vec![0xAB; 40]);
        assert_eq!(n.to_bytes(8).len(), 40);
    }

    #[test]
    fn test_debug_hides_value() {
        let n = BigNum::from_u64(0xDEADBEEF);
        assert_eq!(format!("{:?}", n), "BigNum(32 bits)");
    }
}
