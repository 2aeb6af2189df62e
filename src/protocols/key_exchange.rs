//! Transfer of the active party's public key.
//!
//! This is the only length-prefixed message: an 8-byte little-endian length
//! followed by that many bytes of hexadecimal key text.

use crate::{
    error::TripleError,
    net::{connection::ConnectionError, Channel},
    paillier::PublicKey,
};

/// Upper bound on the key text, checked before allocating a buffer for it.
pub const MAX_KEY_TEXT_LEN: u64 = 1 << 16;

const LENGTH_PREFIX: usize = std::mem::size_of::<u64>();

pub async fn send_public_key(
    channel: &mut impl Channel,
    key: &PublicKey,
) -> Result<(), TripleError> {
    let text = key.to_hex();
    let len = text.len() as u64;
    channel.send_bytes(&len.to_le_bytes()).await?;
    channel.send_bytes(text.as_bytes()).await?;
    tracing::debug!(bytes = text.len(), "Sent public key");
    Ok(())
}

/// Receive the peer's public key and check it has the agreed modulus length.
///
/// * `channel`: channel to the active party
/// * `modulus_bits`: modulus length both parties agreed on
pub async fn recv_public_key(
    channel: &mut impl Channel,
    modulus_bits: u64,
) -> Result<PublicKey, TripleError> {
    let prefix = channel.recv_exact(LENGTH_PREFIX).await?;
    let prefix: [u8; LENGTH_PREFIX] = prefix
        .as_slice()
        .try_into()
        .map_err(|_| TripleError::ProtocolDecode("truncated length prefix".to_owned()))?;
    let len = u64::from_le_bytes(prefix);
    if len == 0 || len > MAX_KEY_TEXT_LEN {
        return Err(TripleError::ProtocolDecode(format!(
            "public key length {len} outside 1..={MAX_KEY_TEXT_LEN}"
        )));
    }

    // The peer hanging up inside the key text is a truncated key, not a lost run
    let text = channel
        .recv_exact(len as usize)
        .await
        .map_err(|e| match e {
            ConnectionError::Closed => {
                TripleError::ProtocolDecode(format!("public key truncated, expected {len} bytes"))
            }
            e => e.into(),
        })?;
    let text = String::from_utf8(text)
        .map_err(|_| TripleError::ProtocolDecode("public key is not text".to_owned()))?;
    let key = PublicKey::from_hex(&text)?;
    if key.bits() != modulus_bits {
        return Err(TripleError::ProtocolDecode(format!(
            "peer modulus has {} bits, expected {modulus_bits}",
            key.bits()
        )));
    }
    tracing::debug!(bytes = len, "Received public key");
    Ok(key)
}
