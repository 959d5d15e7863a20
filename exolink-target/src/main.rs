//! exolink target emulator: stands in for the bootstrap loader on the
//! other end of the debug link.
//!
//! Binds the named endpoint, accepts one connection at a time, and
//! answers the wire protocol from the receiving side. Useful for
//! end-to-end testing of the host tool when no real target hardware is
//! attached.

#![allow(clippy::print_stderr, clippy::missing_docs_in_private_items)]

mod serve;

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "exolink-target",
    version,
    about = "Fake bootstrap loader for the exolink debug link"
)]
struct Args {
    /// Unix socket path to listen on.
    endpoint: String,

    /// Exit after serving a single connection.
    #[arg(long)]
    once: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("EXOLINK_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = serve::run(&args.endpoint, args.once).await {
        eprintln!("exolink-target: {e}");
        std::process::exit(1);
    }
}
