//! Additively homomorphic encryption with the Paillier cryptosystem.
//!
//! The arithmetic is done by the `kzen-paillier` crate. This module binds its
//! raw values to a key: plaintexts are range-checked against `N`, ciphertexts
//! against `N²`, and both have a fixed-width byte encoding.
//!
//! Ciphertexts can be combined without the secret key:
//! `add` multiplies two ciphertexts, giving an encryption of the plaintext sum,
//! and `scale` raises a ciphertext to a plaintext power, giving an encryption of
//! the plaintext product.
//!
//! All values are transported at a fixed width of `2·⌈bits/8⌉` bytes, big-endian,
//! since ciphertexts live modulo `N²`.

use std::{borrow::Borrow, fmt};

use curv::{arithmetic::Converter, BigInt};
use kzen_paillier::*;
use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::{rngs::OsRng, CryptoRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use thiserror::Error;

use crate::{
    algebra::matrix::{FixedWidth, MatrixError},
    config::check_modulus_bits,
};

#[derive(Error, Debug)]
pub enum PaillierError {
    #[error("Entropy source unavailable: {0}")]
    Entropy(#[from] rand::Error),
    #[error("Cannot generate a key with a {0}-bit modulus")]
    KeySize(u64),
    #[error("Value does not fit below the {bits}-bit modulus")]
    OutOfRange { bits: u64 },
    #[error("Ciphertext is not a residue modulo N²")]
    InvalidCiphertext,
    #[error("Secret key does not belong to this public key")]
    KeyMismatch,
    #[error("Malformed public key: {0}")]
    MalformedKey(String),
    #[error("Expected an element of {expected} bytes, got {got}")]
    WidthMismatch { expected: usize, got: usize },
}

/// Paillier public (encryption) key.
#[derive(Clone)]
pub struct PublicKey {
    n: BigUint,
    n_squared: BigUint,
    ek: EncryptionKey,
}

/// Paillier secret (decryption) key.
#[derive(Clone)]
pub struct SecretKey {
    /// `p·q`, to tell which public key we belong to
    n: BigUint,
    dk: DecryptionKey,
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.n == other.n
    }
}

impl Eq for PublicKey {}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("bits", &self.bits())
            .field("n", &self.to_hex())
            .finish()
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Plaintext value, always below the modulus of the key it belongs to.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Plaintext(BigUint);

/// Encrypted value, meaningful only to the key that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ciphertext(BigUint);

impl Plaintext {
    pub fn zero() -> Self {
        Plaintext(BigUint::zero())
    }

    pub fn value(&self) -> &BigUint {
        &self.0
    }

    pub fn into_inner(self) -> BigUint {
        self.0
    }
}

impl Borrow<BigUint> for Plaintext {
    fn borrow(&self) -> &BigUint {
        &self.0
    }
}

impl fmt::Display for Plaintext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Ciphertext {
    pub fn value(&self) -> &BigUint {
        &self.0
    }
}

fn to_bigint(v: &BigUint) -> BigInt {
    BigInt::from_bytes(&v.to_bytes_be())
}

fn to_biguint(v: &BigInt) -> BigUint {
    BigUint::from_bytes_be(&v.to_bytes())
}

/// A `ChaCha20Rng` seeded by the operating system.
pub fn os_rng() -> Result<ChaCha20Rng, PaillierError> {
    Ok(ChaCha20Rng::from_rng(OsRng)?)
}

/// Generate a key pair with a modulus of exactly `bits` bits.
///
/// * `bits`: modulus length, even and at least `MIN_MODULUS_BITS`
pub fn keygen(bits: u64) -> Result<(PublicKey, SecretKey), PaillierError> {
    if check_modulus_bits(bits).is_err() {
        return Err(PaillierError::KeySize(bits));
    }
    let size = usize::try_from(bits).map_err(|_| PaillierError::KeySize(bits))?;
    loop {
        let (ek, dk) = Paillier::keypair_with_modulus_size(size).keys();
        let n = to_biguint(&ek.n);
        // Both primes may come out one bit short of half the size
        if n.bits() != bits {
            continue;
        }
        let public = PublicKey {
            n_squared: &n * &n,
            n: n.clone(),
            ek,
        };
        return Ok((public, SecretKey { n, dk }));
    }
}

impl PublicKey {
    fn from_modulus(n: BigUint) -> Self {
        let n_squared = &n * &n;
        let ek = EncryptionKey {
            n: to_bigint(&n),
            nn: to_bigint(&n_squared),
        };
        Self { n, n_squared, ek }
    }

    /// The modulus `N`
    pub fn modulus(&self) -> &BigUint {
        &self.n
    }

    /// Bit length of the modulus
    pub fn bits(&self) -> u64 {
        self.n.bits()
    }

    /// Width in bytes of any encoded plaintext or ciphertext under this key.
    pub fn element_width(&self) -> usize {
        2 * self.bits().div_ceil(8) as usize
    }

    /// Bind `value` to this key, rejecting anything at or above the modulus.
    pub fn plaintext(&self, value: BigUint) -> Result<Plaintext, PaillierError> {
        if value < self.n {
            Ok(Plaintext(value))
        } else {
            Err(PaillierError::OutOfRange { bits: self.bits() })
        }
    }

    /// Sample a plaintext uniformly from `[0, N)`.
    pub fn sample(&self, rng: &mut impl RngCore) -> Plaintext {
        Plaintext(rng.gen_biguint_below(&self.n))
    }

    /// Additive inverse modulo `N`.
    pub fn negate(&self, m: &Plaintext) -> Plaintext {
        if m.0.is_zero() {
            Plaintext::zero()
        } else {
            Plaintext(&self.n - &m.0)
        }
    }

    /// Encrypt `m` with fresh randomness drawn from `rng`.
    pub fn encrypt(&self, m: &Plaintext, rng: &mut (impl RngCore + CryptoRng)) -> Ciphertext {
        let r = loop {
            let r = rng.gen_biguint_range(&BigUint::one(), &self.n);
            if r.gcd(&self.n).is_one() {
                break r;
            }
        };
        let c: RawCiphertext = Paillier::encrypt_with_chosen_randomness(
            &self.ek,
            RawPlaintext::from(to_bigint(&m.0)),
            &Randomness(to_bigint(&r)),
        );
        Ciphertext(to_biguint(&BigInt::from(c)))
    }

    /// Decrypt `c` with the matching secret key.
    ///
    /// Only a secret key from another key pair is detected, a ciphertext
    /// that was tampered with decrypts to garbage.
    pub fn decrypt(&self, sk: &SecretKey, c: &Ciphertext) -> Result<Plaintext, PaillierError> {
        if sk.n != self.n {
            return Err(PaillierError::KeyMismatch);
        }
        self.check_ciphertext(c)?;
        let m: RawPlaintext = Paillier::decrypt(&sk.dk, RawCiphertext::from(to_bigint(&c.0)));
        Ok(Plaintext(to_biguint(&BigInt::from(m)) % &self.n))
    }

    /// Encryption of the sum of the plaintexts of `c1` and `c2`.
    pub fn add(&self, c1: &Ciphertext, c2: &Ciphertext) -> Ciphertext {
        let c: RawCiphertext = Paillier::add(
            &self.ek,
            RawCiphertext::from(to_bigint(&c1.0)),
            RawCiphertext::from(to_bigint(&c2.0)),
        );
        Ciphertext(to_biguint(&BigInt::from(c)))
    }

    /// Encryption of the plaintext of `c` times `k`.
    pub fn scale(&self, c: &Ciphertext, k: &Plaintext) -> Ciphertext {
        let c: RawCiphertext = Paillier::mul(
            &self.ek,
            RawCiphertext::from(to_bigint(&c.0)),
            RawPlaintext::from(to_bigint(&k.0)),
        );
        Ciphertext(to_biguint(&BigInt::from(c)))
    }

    /// Ensure `c` is a residue modulo `N²`.
    pub fn check_ciphertext(&self, c: &Ciphertext) -> Result<(), PaillierError> {
        if c.0.is_zero() || c.0 >= self.n_squared {
            Err(PaillierError::InvalidCiphertext)
        } else {
            Ok(())
        }
    }

    /// Lowercase hexadecimal text of the modulus.
    pub fn to_hex(&self) -> String {
        self.n.to_str_radix(16)
    }

    pub fn from_hex(text: &str) -> Result<Self, PaillierError> {
        let text = text.trim_end_matches('\0');
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(PaillierError::MalformedKey(format!(
                "expected hexadecimal text, got {} bytes",
                text.len()
            )));
        }
        let n = BigUint::parse_bytes(text.as_bytes(), 16)
            .ok_or_else(|| PaillierError::MalformedKey("unparsable modulus".to_owned()))?;
        if n < BigUint::from(3u32) || n.is_even() {
            return Err(PaillierError::MalformedKey(
                "modulus must be odd and greater than two".to_owned(),
            ));
        }
        Ok(Self::from_modulus(n))
    }
}

impl FixedWidth for Plaintext {
    fn write_fixed(&self, out: &mut [u8]) -> Result<(), MatrixError> {
        self.0.write_fixed(out)
    }

    fn read_fixed(bytes: &[u8]) -> Self {
        Plaintext(BigUint::from_bytes_be(bytes))
    }
}

impl FixedWidth for Ciphertext {
    fn write_fixed(&self, out: &mut [u8]) -> Result<(), MatrixError> {
        self.0.write_fixed(out)
    }

    fn read_fixed(bytes: &[u8]) -> Self {
        Ciphertext(BigUint::from_bytes_be(bytes))
    }
}

impl Ciphertext {
    /// Decode a single ciphertext, checking its width and range against `key`.
    pub fn from_bytes(key: &PublicKey, bytes: &[u8]) -> Result<Self, PaillierError> {
        let expected = key.element_width();
        if bytes.len() != expected {
            return Err(PaillierError::WidthMismatch {
                expected,
                got: bytes.len(),
            });
        }
        let c = Ciphertext::read_fixed(bytes);
        key.check_ciphertext(&c)?;
        Ok(c)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{config::MIN_MODULUS_BITS, error::TripleError};

    const BITS: u64 = 256;

    fn keys(seed: u64) -> (PublicKey, SecretKey, ChaCha20Rng) {
        let (pk, sk) = keygen(BITS).unwrap();
        (pk, sk, ChaCha20Rng::seed_from_u64(seed))
    }

    #[test]
    fn modulus_has_requested_length() {
        let (pk, _, _) = keys(1);
        assert_eq!(pk.bits(), BITS);
        assert_eq!(pk.element_width(), 64);

        let (pk, _) = keygen(MIN_MODULUS_BITS).unwrap();
        assert_eq!(pk.bits(), MIN_MODULUS_BITS);
        assert!(pk.modulus().is_odd());
    }

    #[test]
    fn unusable_key_sizes() {
        for bits in [0, 12, MIN_MODULUS_BITS - 2, MIN_MODULUS_BITS + 1, 129] {
            let res = keygen(bits);
            assert!(
                matches!(res, Err(PaillierError::KeySize(b)) if b == bits),
                "{bits}-bit key: {res:?}"
            );
        }
        let err = keygen(12).unwrap_err();
        assert!(matches!(TripleError::from(err), TripleError::Keygen(_)));
    }

    #[test]
    fn os_rng_is_seeded() {
        let mut a = os_rng().unwrap();
        let mut b = os_rng().unwrap();
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn encrypt_decrypt() {
        let (pk, sk, mut rng) = keys(2);
        for _ in 0..10 {
            let m = pk.sample(&mut rng);
            let c = pk.encrypt(&m, &mut rng);
            assert_eq!(pk.decrypt(&sk, &c).unwrap(), m);
        }
        let top = pk.plaintext(pk.modulus() - 1u32).unwrap();
        let c = pk.encrypt(&top, &mut rng);
        assert_eq!(pk.decrypt(&sk, &c).unwrap(), top);
    }

    #[test]
    fn encryption_is_randomized() {
        let (pk, _, mut rng) = keys(3);
        let m = pk.plaintext(BigUint::from(42u32)).unwrap();
        let c1 = pk.encrypt(&m, &mut rng);
        let c2 = pk.encrypt(&m, &mut rng);
        assert_ne!(c1, c2);
    }

    #[test]
    fn homomorphic_add() {
        let (pk, sk, mut rng) = keys(4);
        for _ in 0..5 {
            let a = pk.sample(&mut rng);
            let b = pk.sample(&mut rng);
            let sum = pk.add(&pk.encrypt(&a, &mut rng), &pk.encrypt(&b, &mut rng));
            let expected = (a.value() + b.value()) % pk.modulus();
            assert_eq!(pk.decrypt(&sk, &sum).unwrap().into_inner(), expected);
        }
    }

    #[test]
    fn homomorphic_scale() {
        let (pk, sk, mut rng) = keys(5);
        for _ in 0..5 {
            let a = pk.sample(&mut rng);
            let k = pk.sample(&mut rng);
            let prod = pk.scale(&pk.encrypt(&a, &mut rng), &k);
            let expected = (a.value() * k.value()) % pk.modulus();
            assert_eq!(pk.decrypt(&sk, &prod).unwrap().into_inner(), expected);
        }
    }

    #[test]
    fn negate_cancels() {
        let (pk, sk, mut rng) = keys(6);
        let a = pk.sample(&mut rng);
        let neg = pk.negate(&a);
        assert_eq!((a.value() + neg.value()) % pk.modulus(), BigUint::zero());
        assert_eq!(pk.negate(&Plaintext::zero()), Plaintext::zero());

        let c = pk.add(&pk.encrypt(&a, &mut rng), &pk.encrypt(&neg, &mut rng));
        assert_eq!(pk.decrypt(&sk, &c).unwrap(), Plaintext::zero());
    }

    #[test]
    fn plaintext_range_is_enforced() {
        let (pk, _, _) = keys(7);
        assert!(pk.plaintext(pk.modulus() - 1u32).is_ok());
        assert!(matches!(
            pk.plaintext(pk.modulus().clone()),
            Err(PaillierError::OutOfRange { bits: BITS })
        ));
        assert!(pk.plaintext(pk.modulus() + 5u32).is_err());
    }

    #[test]
    fn hex_roundtrip() {
        let (pk, _, _) = keys(8);
        let text = pk.to_hex();
        assert_eq!(text, text.to_lowercase());
        let decoded = PublicKey::from_hex(&text).unwrap();
        assert_eq!(decoded, pk);
        assert_eq!(decoded.to_hex(), text);
    }

    #[test]
    fn malformed_hex_keys() {
        assert!(PublicKey::from_hex("").is_err());
        assert!(PublicKey::from_hex("xyz").is_err());
        assert!(PublicKey::from_hex("12 34").is_err());
        // even modulus
        assert!(PublicKey::from_hex("1234").is_err());
        assert!(PublicKey::from_hex("1").is_err());
        assert!(PublicKey::from_hex("1235").is_ok());
    }

    #[test]
    fn decrypting_with_other_key() {
        let (pk1, sk1, mut rng) = keys(9);
        let (pk2, sk2, _) = keys(10);
        let m = pk1.sample(&mut rng);
        let c = pk1.encrypt(&m, &mut rng);
        assert!(matches!(
            pk1.decrypt(&sk2, &c),
            Err(PaillierError::KeyMismatch)
        ));
        assert!(matches!(
            pk2.decrypt(&sk1, &c),
            Err(PaillierError::KeyMismatch)
        ));
        assert_eq!(pk1.decrypt(&sk1, &c).unwrap(), m);
    }

    #[test]
    fn parsed_key_encrypts_for_the_owner() {
        let (pk, sk, mut rng) = keys(12);
        let parsed = PublicKey::from_hex(&pk.to_hex()).unwrap();
        let m = pk.sample(&mut rng);
        let c = parsed.encrypt(&m, &mut rng);
        assert_eq!(pk.decrypt(&sk, &c).unwrap(), m);
    }

    #[test]
    fn ciphertext_bytes() {
        let (pk, sk, mut rng) = keys(11);
        let m = pk.sample(&mut rng);
        let c = pk.encrypt(&m, &mut rng);
        let mut buf = vec![0xffu8; pk.element_width()];
        c.write_fixed(&mut buf).unwrap();
        let decoded = Ciphertext::from_bytes(&pk, &buf).unwrap();
        assert_eq!(decoded, c);
        assert_eq!(pk.decrypt(&sk, &decoded).unwrap(), m);

        assert!(matches!(
            Ciphertext::from_bytes(&pk, &buf[1..]),
            Err(PaillierError::WidthMismatch { expected: 64, got: 63 })
        ));
        let too_big = vec![0xffu8; pk.element_width()];
        assert!(matches!(
            Ciphertext::from_bytes(&pk, &too_big),
            Err(PaillierError::InvalidCiphertext)
        ));
    }

    #[test]
    fn small_plaintexts_are_left_padded() {
        let m = Plaintext(BigUint::from(0x0102u32));
        let mut buf = [0xaau8; 6];
        m.write_fixed(&mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 0, 1, 2]);
        assert_eq!(Plaintext::read_fixed(&buf), m);

        let mut tiny = [0u8; 1];
        assert!(matches!(
            m.write_fixed(&mut tiny),
            Err(MatrixError::Overflow { needed: 2, width: 1 })
        ));
    }
}
