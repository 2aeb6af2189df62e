//! Offline generation of matrix-vector multiplication triples.
//!
//! The passive party holds `A` (n×d), the active party holds `B` (d×1) and the
//! only key pair. The protocol leaves the two with additive shares of `A·B`
//! modulo the active party's Paillier modulus `N`:
//!
//! 1. active → passive: the public key (see `key_exchange`)
//! 2. active → passive: `Enc(B)`
//! 3. passive → active: `Enc(A·B + R)`, computed homomorphically
//!
//! The active party decrypts its share `A·B + R`, the passive party keeps `-R`.
//! Neither learns the other's operand: the passive party only sees ciphertexts,
//! and the active party only sees values blinded by `R`.

use itertools::izip;
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;

use crate::{
    algebra::matrix::{Matrix, MatrixError},
    config::{check_modulus_bits, ConfigError, Dimensions, Role},
    error::TripleError,
    net::Channel,
    paillier::{self, Ciphertext, Plaintext, PublicKey, SecretKey},
    protocols::key_exchange,
};

/// One party's half of a triple.
///
/// * `operand`: `A` for the passive party, `B` for the active party
/// * `product`: this party's additive share of `A·B`
/// * `modulus`: the modulus `N` the shares live in
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TripleShare {
    pub role: Role,
    pub operand: Matrix<Plaintext>,
    pub product: Matrix<Plaintext>,
    pub modulus: BigUint,
}

impl TripleShare {
    /// Reconstruct `A·B mod N` from both product shares.
    pub fn combine(&self, other: &TripleShare) -> Result<Matrix<BigUint>, MatrixError> {
        debug_assert_eq!(self.modulus, other.modulus, "Shares from different runs");
        self.product.add_mod(&other.product, &self.modulus)
    }
}

/// Active party after key generation and key exchange.
pub struct ActiveParty {
    dims: Dimensions,
    public_key: PublicKey,
    secret_key: SecretKey,
    b: Matrix<Plaintext>,
}

/// Passive party after receiving the peer's key.
pub struct PassiveParty {
    dims: Dimensions,
    peer_key: PublicKey,
    a: Matrix<Plaintext>,
    r: Matrix<Plaintext>,
    r_enc: Matrix<Ciphertext>,
}

fn check_shape<T>(m: &Matrix<T>, expected: (usize, usize)) -> Result<(), ConfigError> {
    if m.shape() == expected {
        Ok(())
    } else {
        Err(ConfigError::OperandShape {
            expected,
            got: m.shape(),
        })
    }
}

impl ActiveParty {
    /// Generate a key pair, hand the public key to the peer and sample `B`.
    pub async fn setup(
        dims: Dimensions,
        modulus_bits: u64,
        channel: &mut impl Channel,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<Self, TripleError> {
        Self::setup_with(dims, modulus_bits, None, channel, rng).await
    }

    /// As `setup`, but with a caller-chosen `B` instead of a random one.
    ///
    /// Every entry of `b` must be below the generated modulus.
    pub async fn with_operand(
        dims: Dimensions,
        modulus_bits: u64,
        b: Matrix<BigUint>,
        channel: &mut impl Channel,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<Self, TripleError> {
        Self::setup_with(dims, modulus_bits, Some(b), channel, rng).await
    }

    #[tracing::instrument(skip_all, fields(role = "active", rows = dims.rows, cols = dims.cols))]
    async fn setup_with(
        dims: Dimensions,
        modulus_bits: u64,
        b: Option<Matrix<BigUint>>,
        channel: &mut impl Channel,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<Self, TripleError> {
        check_modulus_bits(modulus_bits)?;
        if let Some(b) = &b {
            check_shape(b, dims.b())?;
        }

        let (public_key, secret_key) = paillier::keygen(modulus_bits)?;
        tracing::debug!(bits = public_key.bits(), "Generated key pair");

        let b = match b {
            Some(b) => b.try_map(|v| public_key.plaintext(v.clone()))?,
            None => {
                let (rows, cols) = dims.b();
                Matrix::from_fn(rows, cols, |_, _| public_key.sample(rng))?
            }
        };

        key_exchange::send_public_key(channel, &public_key).await?;
        tracing::info!("Key exchange complete");
        Ok(Self {
            dims,
            public_key,
            secret_key,
            b,
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Send `Enc(B)` and decrypt the returned `Enc(A·B + R)` into our share.
    #[tracing::instrument(skip_all, fields(role = "active"))]
    pub async fn run(
        self,
        channel: &mut impl Channel,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<TripleShare, TripleError> {
        let Self {
            dims,
            public_key,
            secret_key,
            b,
        } = self;
        let width = public_key.element_width();

        let b_enc = b.map(|v| public_key.encrypt(v, rng));
        let bytes = b_enc.to_bytes(width)?;
        channel.send_bytes(&bytes).await?;
        tracing::debug!(bytes = bytes.len(), "Sent encrypted operand");

        let (rows, cols) = dims.c();
        let bytes = channel.recv_exact(rows * cols * width).await?;
        tracing::debug!(bytes = bytes.len(), "Received encrypted product");
        let c_enc = Matrix::<Ciphertext>::from_bytes(&bytes, rows, cols, width)?;
        let product = c_enc.try_map(|c| public_key.decrypt(&secret_key, c))?;

        tracing::info!("Generated share C1");
        Ok(TripleShare {
            role: Role::Active,
            operand: b,
            product,
            modulus: public_key.modulus().clone(),
        })
    }
}

impl PassiveParty {
    /// Receive the peer's public key, sample `A` and `R` and encrypt `R`.
    pub async fn setup(
        dims: Dimensions,
        modulus_bits: u64,
        channel: &mut impl Channel,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<Self, TripleError> {
        Self::setup_with(dims, modulus_bits, None, channel, rng).await
    }

    /// As `setup`, but with caller-chosen `A` and `R`.
    ///
    /// Every entry must be below the peer's modulus.
    pub async fn with_operands(
        dims: Dimensions,
        modulus_bits: u64,
        a: Matrix<BigUint>,
        r: Matrix<BigUint>,
        channel: &mut impl Channel,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<Self, TripleError> {
        Self::setup_with(dims, modulus_bits, Some((a, r)), channel, rng).await
    }

    #[tracing::instrument(skip_all, fields(role = "passive", rows = dims.rows, cols = dims.cols))]
    async fn setup_with(
        dims: Dimensions,
        modulus_bits: u64,
        operands: Option<(Matrix<BigUint>, Matrix<BigUint>)>,
        channel: &mut impl Channel,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<Self, TripleError> {
        check_modulus_bits(modulus_bits)?;
        if let Some((a, r)) = &operands {
            check_shape(a, dims.a())?;
            check_shape(r, dims.c())?;
        }

        let peer_key = key_exchange::recv_public_key(channel, modulus_bits).await?;
        tracing::info!("Key exchange complete");

        let (a, r) = match operands {
            Some((a, r)) => (
                a.try_map(|v| peer_key.plaintext(v.clone()))?,
                r.try_map(|v| peer_key.plaintext(v.clone()))?,
            ),
            None => {
                let (rows, cols) = dims.a();
                let a = Matrix::from_fn(rows, cols, |_, _| peer_key.sample(rng))?;
                let (rows, cols) = dims.c();
                let r = Matrix::from_fn(rows, cols, |_, _| peer_key.sample(rng))?;
                (a, r)
            }
        };
        let r_enc = r.map(|v| peer_key.encrypt(v, rng));

        Ok(Self {
            dims,
            peer_key,
            a,
            r,
            r_enc,
        })
    }

    pub fn peer_key(&self) -> &PublicKey {
        &self.peer_key
    }

    /// Receive `Enc(B)`, return `Enc(A·B + R)` and keep `-R` as our share.
    #[tracing::instrument(skip_all, fields(role = "passive"))]
    pub async fn run(
        self,
        channel: &mut impl Channel,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<TripleShare, TripleError> {
        let Self {
            dims,
            peer_key,
            a,
            r,
            r_enc,
        } = self;
        let width = peer_key.element_width();

        let (rows, cols) = dims.b();
        let bytes = channel.recv_exact(rows * cols * width).await?;
        tracing::debug!(bytes = bytes.len(), "Received encrypted operand");
        let b_enc = Matrix::<Ciphertext>::from_bytes(&bytes, rows, cols, width)?;
        for c in &b_enc {
            peer_key.check_ciphertext(c)?;
        }

        let c_enc = blinded_product(&peer_key, &a, &b_enc, &r_enc, rng)?;
        let bytes = c_enc.to_bytes(width)?;
        channel.send_bytes(&bytes).await?;
        tracing::debug!(bytes = bytes.len(), "Sent encrypted product");

        let product = r.map(|v| peer_key.negate(v));
        tracing::info!("Generated share C0");
        Ok(TripleShare {
            role: Role::Passive,
            operand: a,
            product,
            modulus: peer_key.modulus().clone(),
        })
    }
}

/// Compute `Enc(A·B + R)` row by row.
///
/// Entries of `A` are only ever used as exponents, they are never encrypted.
/// Each row starts from a fresh encryption of zero drawn from its own rng, so
/// rows are independent and may be evaluated in parallel.
fn blinded_product(
    key: &PublicKey,
    a: &Matrix<Plaintext>,
    b_enc: &Matrix<Ciphertext>,
    r_enc: &Matrix<Ciphertext>,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<Matrix<Ciphertext>, MatrixError> {
    let seeds: Vec<[u8; 32]> = (0..a.rows())
        .map(|_| {
            let mut seed = [0u8; 32];
            rng.fill_bytes(&mut seed);
            seed
        })
        .collect();
    blinded_rows(key, a, b_enc, r_enc, &seeds, cfg!(feature = "rayon"))
}

/// Evaluate one output row per seed, on the rayon pool if `parallel`.
fn blinded_rows(
    key: &PublicKey,
    a: &Matrix<Plaintext>,
    b_enc: &Matrix<Ciphertext>,
    r_enc: &Matrix<Ciphertext>,
    seeds: &[[u8; 32]],
    parallel: bool,
) -> Result<Matrix<Ciphertext>, MatrixError> {
    let row = |(i, seed): (usize, &[u8; 32])| {
        let mut rng = ChaCha20Rng::from_seed(*seed);
        let zero = key.encrypt(&Plaintext::zero(), &mut rng);
        let dot = izip!(a.row(i), b_enc.iter())
            .fold(zero, |acc, (a_ij, b_j)| key.add(&acc, &key.scale(b_j, a_ij)));
        key.add(&dot, &r_enc[(i, 0)])
    };
    let rows: Vec<Ciphertext> = if parallel {
        seeds.par_iter().enumerate().map(&row).collect()
    } else {
        seeds.iter().enumerate().map(&row).collect()
    };
    Matrix::column(rows)
}

/// A party, ready to run its side of the protocol.
pub enum PartyContext {
    Active(ActiveParty),
    Passive(PassiveParty),
}

impl PartyContext {
    /// Run the role's setup: key generation and exchange, operand sampling.
    pub async fn setup(
        role: Role,
        dims: Dimensions,
        modulus_bits: u64,
        channel: &mut impl Channel,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<Self, TripleError> {
        let party = match role {
            Role::Active => {
                PartyContext::Active(ActiveParty::setup(dims, modulus_bits, channel, rng).await?)
            }
            Role::Passive => {
                PartyContext::Passive(PassiveParty::setup(dims, modulus_bits, channel, rng).await?)
            }
        };
        Ok(party)
    }

    pub fn role(&self) -> Role {
        match self {
            PartyContext::Active(_) => Role::Active,
            PartyContext::Passive(_) => Role::Passive,
        }
    }

    /// Run the exchange for our role, producing our share of the triple.
    pub async fn generate_mts(
        self,
        channel: &mut impl Channel,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<TripleShare, TripleError> {
        match self {
            PartyContext::Active(party) => party.run(channel, rng).await,
            PartyContext::Passive(party) => party.run(channel, rng).await,
        }
    }
}
