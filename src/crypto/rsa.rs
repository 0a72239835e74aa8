//! RSA encryption, decryption, signing and key generation
//!
//! Encryption is the raw transform `c = m^e mod n` over the caller's bytes;
//! no PKCS#1 padding is inserted. Signatures wrap the digest in the
//! EMSA-PKCS1-v1_5 DigestInfo encoding for its hash algorithm.

use num_bigint_dig::{BigUint, RandPrime};
use num_traits::One;
use rand::rngs::OsRng;
use tracing::debug;

use super::bn::BigNum;
use super::hash::HashAlgorithm;
use super::SecureBytes;
use crate::error::{PgpError, Result};

/// Smallest modulus `generate` accepts
pub const MIN_KEY_BITS: usize = 512;

/// Prime pairs tried before key generation gives up
const MAX_KEYGEN_ATTEMPTS: usize = 64;

/// Components of an RSA public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicKey {
    pub n: BigNum,
    pub e: BigNum,
}

impl RsaPublicKey {
    pub fn new(n: BigNum, e: BigNum) -> Result<Self> {
        let key = Self { n, e };
        key.validate()?;
        Ok(key)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n.is_zero() || self.e.is_zero() {
            return Err(PgpError::InvalidKey("RSA n and e must be non-zero".into()));
        }
        if self.e >= self.n {
            return Err(PgpError::InvalidKey("RSA exponent exceeds modulus".into()));
        }
        Ok(())
    }

    /// Modulus size in bytes; ciphertexts and signatures have this length
    pub fn size(&self) -> usize {
        self.n.byte_length()
    }
}

/// Secret RSA components in OpenPGP order: p < q and `u = p^-1 mod q`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaSecretKey {
    pub d: BigNum,
    pub p: BigNum,
    pub q: BigNum,
    pub u: BigNum,
}

impl RsaSecretKey {
    /// Check the secret half against `public`: the primes reproduce n,
    /// `u = p^-1 mod q`, and d inverts e.
    pub fn validate(&self, public: &RsaPublicKey) -> Result<()> {
        if self.d.is_zero() {
            return Err(PgpError::InvalidKey("RSA private exponent is zero".into()));
        }
        if self.p.is_zero() || self.q.is_zero() {
            return Err(PgpError::InvalidKey("RSA prime is zero".into()));
        }
        let n = BigNum::from(self.p.as_biguint() * self.q.as_biguint());
        if n != public.n {
            return Err(PgpError::InvalidKey("RSA primes do not match modulus".into()));
        }

        let pu = BigNum::from(self.p.as_biguint() * self.u.as_biguint());
        let reduced = BigNum::from(pu.as_biguint() % self.q.as_biguint());
        if reduced != BigNum::one() {
            return Err(PgpError::InvalidKey("RSA coefficient u is not p^-1 mod q".into()));
        }

        let witness = BigNum::from_u64(2);
        let encrypted = witness.mod_exp(&public.e, &public.n)?;
        if encrypted.mod_exp(&self.d, &public.n)? != witness {
            return Err(PgpError::InvalidKey("RSA private exponent does not match e".into()));
        }
        Ok(())
    }

    fn has_crt(&self) -> bool {
        !self.p.is_zero() && !self.q.is_zero() && !self.u.is_zero()
    }
}

/// Encrypt `plaintext` (read as a big-endian integer) to `size()` bytes
pub fn encrypt(plaintext: &[u8], public: &RsaPublicKey) -> Result<Vec<u8>> {
    let m = BigNum::from_bytes_be(plaintext);
    if m >= public.n {
        return Err(PgpError::InputTooLarge);
    }
    let c = m.mod_exp(&public.e, &public.n)?;
    Ok(c.to_bytes(public.size()))
}

/// Decrypt into `out`, returning the length of the recovered integer's
/// unpadded encoding
pub fn decrypt(
    ciphertext: &[u8],
    secret: &RsaSecretKey,
    public: &RsaPublicKey,
    out: &mut [u8],
) -> Result<usize> {
    let m = private_transform(&BigNum::from_bytes_be(ciphertext), secret, public)?;
    let len = m.byte_length();
    if len > out.len() {
        return Err(PgpError::BufferTooSmall {
            needed: len,
            available: out.len(),
        });
    }
    let bytes = SecureBytes::new(m.to_bytes(0));
    out[..len].copy_from_slice(&bytes);
    Ok(len)
}

/// Decrypt into a freshly allocated secure buffer
pub fn decrypt_to_vec(
    ciphertext: &[u8],
    secret: &RsaSecretKey,
    public: &RsaPublicKey,
) -> Result<SecureBytes> {
    let mut out = SecureBytes::zeroed(public.size());
    let len = decrypt(ciphertext, secret, public, &mut out)?;
    out.truncate(len);
    Ok(out)
}

/// `c^d mod n`, through the CRT when the primes are available
fn private_transform(c: &BigNum, secret: &RsaSecretKey, public: &RsaPublicKey) -> Result<BigNum> {
    if c >= &public.n {
        return Err(PgpError::InputTooLarge);
    }
    if !secret.has_crt() {
        return c.mod_exp(&secret.d, &public.n);
    }

    let one = BigUint::one();
    let p = secret.p.as_biguint();
    let q = secret.q.as_biguint();
    let d = secret.d.as_biguint();

    let p_minus_1 = BigNum::from(p - &one);
    let q_minus_1 = BigNum::from(q - &one);
    let dp = BigNum::from(d % p_minus_1.as_biguint());
    let dq = BigNum::from(d % q_minus_1.as_biguint());
    let m1 = c.mod_exp(&dp, &secret.p)?;
    let m2 = c.mod_exp(&dq, &secret.q)?;

    // m = m1 + p * ((m2 - m1) * u mod q)
    let m1_mod_q = BigNum::from(m1.as_biguint() % q);
    let lifted = BigNum::from(m2.as_biguint() + q);
    let diff = BigNum::from(lifted.as_biguint() - m1_mod_q.as_biguint());
    let diff = BigNum::from(diff.as_biguint() % q);
    let scaled = BigNum::from(diff.as_biguint() * secret.u.as_biguint());
    let h = BigNum::from(scaled.as_biguint() % q);
    let hp = BigNum::from(h.as_biguint() * p);
    Ok(BigNum::from(m1.as_biguint() + hp.as_biguint()))
}

/// ASN.1 DigestInfo prefix for each supported hash
fn digest_info_prefix(hash: HashAlgorithm) -> Result<&'static [u8]> {
    Ok(match hash {
        HashAlgorithm::Md5 => &[
            0x30, 0x20, 0x30, 0x0c, 0x06, 0x08, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x02, 0x05,
            0x05, 0x00, 0x04, 0x10,
        ],
        HashAlgorithm::Sha1 => &[
            0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00, 0x04,
            0x14,
        ],
        HashAlgorithm::Sha224 => &[
            0x30, 0x2d, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
            0x04, 0x05, 0x00, 0x04, 0x1c,
        ],
        HashAlgorithm::Sha256 => &[
            0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
            0x01, 0x05, 0x00, 0x04, 0x20,
        ],
        HashAlgorithm::Sha384 => &[
            0x30, 0x41, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
            0x02, 0x05, 0x00, 0x04, 0x30,
        ],
        HashAlgorithm::Sha512 => &[
            0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
            0x03, 0x05, 0x00, 0x04, 0x40,
        ],
        HashAlgorithm::Sm3 => &[
            0x30, 0x30, 0x30, 0x0c, 0x06, 0x08, 0x2a, 0x81, 0x1c, 0xcf, 0x55, 0x01, 0x83, 0x11,
            0x05, 0x00, 0x04, 0x20,
        ],
        HashAlgorithm::Unknown => {
            return Err(PgpError::UnsupportedAlgorithm("hash 'Unknown'".into()))
        }
    })
}

/// EMSA-PKCS1-v1_5: 00 01 FF..FF 00 || DigestInfo || digest, `k` bytes long
fn emsa_pkcs1_v15(hash: HashAlgorithm, digest: &[u8], k: usize) -> Result<Vec<u8>> {
    if digest.len() != hash.output_length() {
        return Err(PgpError::FormatError(format!(
            "{} digest must be {} bytes, got {}",
            hash,
            hash.output_length(),
            digest.len()
        )));
    }
    let prefix = digest_info_prefix(hash)?;
    let t_len = prefix.len() + digest.len();
    if k < t_len + 11 {
        return Err(PgpError::InputTooLarge);
    }

    let mut em = vec![0xFFu8; k];
    em[0] = 0x00;
    em[1] = 0x01;
    em[k - t_len - 1] = 0x00;
    em[k - t_len..k - digest.len()].copy_from_slice(prefix);
    em[k - digest.len()..].copy_from_slice(digest);
    Ok(em)
}

/// Sign a precomputed digest, producing `public.size()` bytes
pub fn sign_hash(
    digest: &[u8],
    hash: HashAlgorithm,
    secret: &RsaSecretKey,
    public: &RsaPublicKey,
) -> Result<Vec<u8>> {
    let em = emsa_pkcs1_v15(hash, digest, public.size())?;
    let s = private_transform(&BigNum::from_bytes_be(&em), secret, public)?;
    Ok(s.to_bytes(public.size()))
}

/// Check `signature` over `digest`. Any malformed input is simply invalid.
pub fn verify_hash(
    signature: &[u8],
    hash: HashAlgorithm,
    digest: &[u8],
    public: &RsaPublicKey,
) -> bool {
    let k = public.size();
    if signature.len() > k {
        return false;
    }
    let expected = match emsa_pkcs1_v15(hash, digest, k) {
        Ok(em) => em,
        Err(_) => return false,
    };
    let s = BigNum::from_bytes_be(signature);
    if s >= public.n {
        return false;
    }
    match s.mod_exp(&public.e, &public.n) {
        Ok(m) => m.to_bytes(k) == expected,
        Err(_) => false,
    }
}

/// Generate a fresh key pair with a `bits`-bit modulus
pub fn generate(bits: usize, e: u64) -> Result<(RsaPublicKey, RsaSecretKey)> {
    if bits < MIN_KEY_BITS {
        return Err(PgpError::KeyGenerationFailure(format!(
            "{}-bit modulus is below the {}-bit minimum",
            bits, MIN_KEY_BITS
        )));
    }
    if e < 3 || e % 2 == 0 {
        return Err(PgpError::KeyGenerationFailure(format!(
            "public exponent {} must be odd and at least 3",
            e
        )));
    }

    let exponent = BigNum::from_u64(e);
    let one = BigUint::one();
    let p_bits = (bits + 1) / 2;
    let q_bits = bits - p_bits;
    let mut rng = OsRng;

    for attempt in 1..=MAX_KEYGEN_ATTEMPTS {
        let mut p = BigNum::from(rng.gen_prime(p_bits));
        let mut q = BigNum::from(rng.gen_prime(q_bits));
        if p == q {
            continue;
        }
        if p > q {
            std::mem::swap(&mut p, &mut q);
        }

        let n = BigNum::from(p.as_biguint() * q.as_biguint());
        if n.bits() != bits {
            continue;
        }

        let p_minus_1 = BigNum::from(p.as_biguint() - &one);
        let q_minus_1 = BigNum::from(q.as_biguint() - &one);
        let phi = BigNum::from(p_minus_1.as_biguint() * q_minus_1.as_biguint());
        let d = match exponent.mod_inverse(&phi) {
            Some(d) => d,
            None => continue,
        };
        let u = match p.mod_inverse(&q) {
            Some(u) => u,
            None => continue,
        };

        debug!(bits, attempt, "generated RSA key pair");
        let public = RsaPublicKey::new(n, exponent)?;
        let secret = RsaSecretKey { d, p, q, u };
        return Ok((public, secret));
    }

    Err(PgpError::KeyGenerationFailure(format!(
        "no suitable {}-bit prime pair after {} attempts",
        bits, MAX_KEYGEN_ATTEMPTS
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash;
    use std::sync::OnceLock;

    fn test_key() -> &'static (RsaPublicKey, RsaSecretKey) {
        static KEY: OnceLock<(RsaPublicKey, RsaSecretKey)> = OnceLock::new();
        KEY.get_or_init(|| generate(1024, 65537).unwrap())
    }

    #[test]
    fn test_generate_1024() {
        let (public, secret) = test_key();
        assert_eq!(public.n.bits(), 1024);
        assert_eq!(public.size(), 128);
        assert_eq!(public.e, BigNum::from_u64(65537));
        assert!(secret.p < secret.q);
        secret.validate(public).unwrap();
    }

    #[test]
    fn test_validate_rejects_tampered_components() {
        let (public, secret) = test_key();

        let mut bad_u = secret.clone();
        bad_u.u = BigNum::from(secret.u.as_biguint() + BigUint::one());
        assert!(matches!(bad_u.validate(public), Err(PgpError::InvalidKey(_))));

        let mut swapped = secret.clone();
        std::mem::swap(&mut swapped.p, &mut swapped.q);
        assert!(matches!(swapped.validate(public), Err(PgpError::InvalidKey(_))));

        let mut bad_d = secret.clone();
        bad_d.d = BigNum::from(secret.d.as_biguint() + BigUint::from(2u32));
        assert!(matches!(bad_d.validate(public), Err(PgpError::InvalidKey(_))));
    }

    #[test]
    fn test_encrypt_decrypt_abc() {
        let (public, secret) = test_key();
        let ciphertext = encrypt(&[0x61, 0x62, 0x63], public).unwrap();
        assert_eq!(ciphertext.len(), 128);

        let mut decrypted = [0u8; 128];
        let len = decrypt(&ciphertext, secret, public, &mut decrypted).unwrap();
        assert_eq!(len, 3);
        assert_eq!(&decrypted[..3], &[0x61, 0x62, 0x63]);
    }

    #[test]
    fn test_crt_matches_direct_exponentiation() {
        let (public, secret) = test_key();
        let message = b"chinese remainder theorem";
        let ciphertext = encrypt(message, public).unwrap();

        let direct = RsaSecretKey {
            d: secret.d.clone(),
            p: BigNum::zero(),
            q: BigNum::zero(),
            u: BigNum::zero(),
        };
        let via_crt = decrypt_to_vec(&ciphertext, secret, public).unwrap();
        let via_d = decrypt_to_vec(&ciphertext, &direct, public).unwrap();
        assert_eq!(&*via_crt, &*via_d);
        assert_eq!(&*via_crt, message);
    }

    #[test]
    fn test_plaintext_not_below_modulus() {
        let (public, _) = test_key();
        let too_big = public.n.to_bytes(0);
        assert!(matches!(encrypt(&too_big, public), Err(PgpError::InputTooLarge)));
    }

    #[test]
    fn test_decrypt_buffer_too_small() {
        let (public, secret) = test_key();
        let ciphertext = encrypt(b"abcdef", public).unwrap();
        let mut out = [0u8; 4];
        assert!(matches!(
            decrypt(&ciphertext, secret, public, &mut out),
            Err(PgpError::BufferTooSmall { needed: 6, available: 4 })
        ));
    }

    #[test]
    fn test_sign_verify() {
        let (public, secret) = test_key();
        for alg in [HashAlgorithm::Sha1, HashAlgorithm::Sha256, HashAlgorithm::Sha512] {
            let digest = hash::digest(alg, b"signed message").unwrap();
            let signature = sign_hash(&digest, alg, secret, public).unwrap();
            assert_eq!(signature.len(), public.size());
            assert!(verify_hash(&signature, alg, &digest, public));

            let other = hash::digest(alg, b"another message").unwrap();
            assert!(!verify_hash(&signature, alg, &other, public));
        }
    }

    #[test]
    fn test_verify_rejects_wrong_algorithm_tag() {
        let (public, secret) = test_key();
        let digest = hash::digest(HashAlgorithm::Sha256, b"tagged").unwrap();
        let signature = sign_hash(&digest, HashAlgorithm::Sha256, secret, public).unwrap();
        // Same length digest, different DigestInfo
        assert!(!verify_hash(&signature, HashAlgorithm::Sm3, &digest, public));
    }

    #[test]
    fn test_generate_rejects_bad_parameters() {
        assert!(matches!(
            generate(256, 65537),
            Err(PgpError::KeyGenerationFailure(_))
        ));
        assert!(matches!(
            generate(1024, 65536),
            Err(PgpError::KeyGenerationFailure(_))
        ));
    }

    #[test]
    fn test_identity_below_modulus() {
        let (public, secret) = test_key();
        for message in [&[0x01u8][..], &[0x7F; 64][..], &[0x01; 127][..]] {
            let ciphertext = encrypt(message, public).unwrap();
            let plain = decrypt_to_vec(&ciphertext, secret, public).unwrap();
            assert_eq!(&*plain, message);
        }
    }
}
