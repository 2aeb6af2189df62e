use std::process::ExitCode;

use clap::Parser;
use offline_mt::{
    config::{Params, Role, DEFAULT_MODULUS_BITS},
    generate_triple,
};
use tracing_subscriber::EnvFilter;

/// Generate one party's share of a matrix-vector multiplication triple.
///
/// Start the passive party first, then the active party pointing at it.
#[derive(Parser, Debug)]
#[command(name = "offline-mt", version)]
struct Options {
    /// Rows of `A` (and of the product)
    rows: usize,

    /// Columns of `A` (rows of `B`)
    cols: usize,

    /// `1`/`active` connects and owns the key pair and `B`,
    /// `0`/`passive` listens and owns `A`
    role: Role,

    /// Address of the passive party, ignored when passive
    peer: String,

    /// Port to connect to or listen on
    port: u16,

    /// Bit length of the Paillier modulus, must match the peer
    #[arg(long, env = "OFFLINE_MT_MODULUS_BITS", default_value_t = DEFAULT_MODULUS_BITS)]
    modulus_bits: u64,

    /// Give up on a silent peer after this many seconds
    #[arg(long, env = "OFFLINE_MT_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let options = Options::parse();
    let params = Params {
        rows: options.rows,
        cols: options.cols,
        role: options.role,
        peer: options.peer,
        port: options.port,
        modulus_bits: options.modulus_bits,
        timeout_secs: options.timeout_secs,
    };

    match generate_triple(&params).await {
        Ok(share) => {
            let name = match share.role {
                Role::Passive => "C0",
                Role::Active => "C1",
            };
            println!("Generated share {name}:");
            for value in share.product.iter() {
                println!("{value}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
