pub mod key_exchange;
pub mod triplets;

use crate::{
    config::{Params, Role},
    error::TripleError,
    net::connection::TcpConnection,
    paillier,
    protocols::triplets::{PartyContext, TripleShare},
};

/// Run one complete offline phase over TCP.
///
/// The active party connects to `params.peer`, the passive party listens on
/// `params.port`. Any failure aborts the run.
#[tracing::instrument(skip_all, fields(role = %params.role, rows = params.rows, cols = params.cols))]
pub async fn generate_triple(params: &Params) -> Result<TripleShare, TripleError> {
    params.validate()?;
    let dims = params.dimensions()?;
    let mut rng = paillier::os_rng()?;

    let channel = match params.role {
        Role::Active => TcpConnection::connect((params.peer.as_str(), params.port)).await?,
        Role::Passive => TcpConnection::listen(params.port).await?,
    };
    let mut channel = channel.with_timeout(params.timeout());

    let party =
        PartyContext::setup(params.role, dims, params.modulus_bits, &mut channel, &mut rng).await?;
    let share = party.generate_mts(&mut channel, &mut rng).await?;
    // Let the peer see a clean end of stream rather than a reset.
    if let Err(e) = channel.shutdown().await {
        tracing::debug!("Shutdown after run failed: {e}");
    }
    Ok(share)
}
