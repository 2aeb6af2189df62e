use futures::Future;

use crate::net::connection::ConnectionError;

pub mod connection;

/// Byte-exact, ordered channel to the other party.
///
/// Payload lengths are agreed out-of-band, so there is no framing:
/// what one side sends with `send_bytes` the other side reads with `recv_exact`.
pub trait Channel {
    /// Send all of `buf` over the channel
    ///
    /// * `buf`: bytes to send
    fn send_bytes(&mut self, buf: &[u8]) -> impl Future<Output = Result<(), ConnectionError>>;

    /// Receive exactly `len` bytes
    fn recv_exact(&mut self, len: usize)
        -> impl Future<Output = Result<Vec<u8>, ConnectionError>>;
}
