//! Run parameters, shared out-of-band by both parties.
//!
//! Both parties must agree on the dimensions and the modulus length,
//! nothing on the wire describes them.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Modulus length used when nothing else is configured.
pub const DEFAULT_MODULUS_BITS: u64 = 1024;

/// Smallest modulus accepted, below this the primes are toys.
pub const MIN_MODULUS_BITS: u64 = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Matrix dimensions must be non-zero, got {rows}x{cols}")]
    EmptyMatrix { rows: usize, cols: usize },
    #[error("Modulus must have an even number of at least {} bits, got {0}", MIN_MODULUS_BITS)]
    ModulusBits(u64),
    #[error("Unknown role '{0}', expected 'active' or 'passive'")]
    Role(String),
    #[error("Operand must be {expected:?}, got {got:?}")]
    OperandShape {
        expected: (usize, usize),
        got: (usize, usize),
    },
}

/// Protocol role of this process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Connects to the peer, owns the key pair and `B`
    Active,
    /// Listens for the peer, owns `A` and the blinding `R`
    Passive,
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" | "1" => Ok(Role::Active),
            "passive" | "0" => Ok(Role::Passive),
            _ => Err(ConfigError::Role(s.to_owned())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Active => f.write_str("active"),
            Role::Passive => f.write_str("passive"),
        }
    }
}

/// Shape of the product: `A` is `rows×cols`, `B` is `cols×1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub rows: usize,
    pub cols: usize,
}

impl Dimensions {
    pub fn new(rows: usize, cols: usize) -> Result<Self, ConfigError> {
        if rows == 0 || cols == 0 {
            return Err(ConfigError::EmptyMatrix { rows, cols });
        }
        Ok(Self { rows, cols })
    }

    /// Shape of the passive party's operand
    pub fn a(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Shape of the active party's operand
    pub fn b(&self) -> (usize, usize) {
        (self.cols, 1)
    }

    /// Shape of the product and of the blinding
    pub fn c(&self) -> (usize, usize) {
        (self.rows, 1)
    }
}

pub fn check_modulus_bits(bits: u64) -> Result<(), ConfigError> {
    if bits < MIN_MODULUS_BITS || bits % 2 != 0 {
        Err(ConfigError::ModulusBits(bits))
    } else {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    pub rows: usize,
    pub cols: usize,
    pub role: Role,
    /// Address of the passive party, unused when passive
    #[serde(default = "default_peer")]
    pub peer: String,
    pub port: u16,
    #[serde(default = "default_modulus_bits")]
    pub modulus_bits: u64,
    /// Deadline for every receive, in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_peer() -> String {
    "127.0.0.1".to_owned()
}

fn default_modulus_bits() -> u64 {
    DEFAULT_MODULUS_BITS
}

impl Params {
    pub fn validate(&self) -> Result<(), ConfigError> {
        Dimensions::new(self.rows, self.cols)?;
        check_modulus_bits(self.modulus_bits)
    }

    pub fn dimensions(&self) -> Result<Dimensions, ConfigError> {
        Dimensions::new(self.rows, self.cols)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
