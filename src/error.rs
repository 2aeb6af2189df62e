use thiserror::Error;
use tokio::time::error::Elapsed;

use crate::{
    algebra::matrix::MatrixError, config::ConfigError, net::connection::ConnectionError,
    paillier::PaillierError,
};

/// Terminal failure of a run.
///
/// Nothing is retried: either both shares come out consistent or the run
/// aborts without output.
#[derive(Error, Debug)]
pub enum TripleError {
    #[error("Transport failure: {0}")]
    Transport(#[source] ConnectionError),
    #[error("Peer did not respond in time: {0}")]
    TransportTimeout(#[source] Elapsed),
    #[error("Malformed message from peer: {0}")]
    ProtocolDecode(String),
    #[error("Key generation failed: {0}")]
    Keygen(#[source] PaillierError),
    #[error("Value out of range: {0}")]
    CryptoRange(#[source] PaillierError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl From<ConnectionError> for TripleError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::TimeOut(elapsed) => TripleError::TransportTimeout(elapsed),
            e => TripleError::Transport(e),
        }
    }
}

impl From<PaillierError> for TripleError {
    fn from(e: PaillierError) -> Self {
        match e {
            PaillierError::Entropy(_) | PaillierError::KeySize(_) => TripleError::Keygen(e),
            PaillierError::OutOfRange { .. } => TripleError::CryptoRange(e),
            PaillierError::InvalidCiphertext
            | PaillierError::KeyMismatch
            | PaillierError::MalformedKey(_)
            | PaillierError::WidthMismatch { .. } => TripleError::ProtocolDecode(e.to_string()),
        }
    }
}

impl From<MatrixError> for TripleError {
    fn from(e: MatrixError) -> Self {
        TripleError::ProtocolDecode(e.to_string())
    }
}
