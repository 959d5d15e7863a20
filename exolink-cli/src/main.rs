//! CLI for the exolink boot-image debug link.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use exolink::{ConnectOptions, Image, UnixEndpoint, UploadSession};
use exolink_proto::Header;

#[derive(Parser)]
#[command(
    name = "exolink",
    version,
    about = "Push boot images to a bootstrap loader over a debug pipe"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a boot image to the target loader.
    Upload(UploadArgs),

    /// Probe the target loader for liveness.
    Ping(PingArgs),

    /// Show what would be sent for an image file, without connecting.
    Inspect(InspectArgs),

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

#[derive(clap::Args)]
struct UploadArgs {
    /// Endpoint name of the target's debug pipe (Unix socket path).
    endpoint: String,

    /// Boot image file; its size must be a multiple of 4096 bytes.
    #[arg(long)]
    image: Option<PathBuf>,

    /// With no --image, push a synthetic test pattern of this many pages.
    #[arg(long, default_value_t = 2, conflicts_with = "image")]
    pages: u16,

    #[command(flatten)]
    connect: ConnectFlags,
}

#[derive(clap::Args)]
struct PingArgs {
    /// Endpoint name of the target's debug pipe (Unix socket path).
    endpoint: String,

    #[command(flatten)]
    connect: ConnectFlags,
}

#[derive(clap::Args)]
struct InspectArgs {
    /// Boot image file to describe.
    #[arg(long)]
    image: PathBuf,

    /// Output format.
    #[arg(long, default_value = "table")]
    format: OutputFormat,
}

/// Connection retry tuning shared by the connecting subcommands.
#[derive(clap::Args)]
struct ConnectFlags {
    /// Maximum connection attempts before giving up.
    #[arg(long, default_value_t = 32)]
    attempts: u32,

    /// Sleep between attempts after a generic open failure, in ms.
    #[arg(long = "wait-ms", default_value_t = 1000)]
    wait_ms: u64,

    /// How long to wait for a busy endpoint to free up, in ms.
    #[arg(long = "busy-wait-ms", default_value_t = 60_000)]
    busy_wait_ms: u64,
}

impl ConnectFlags {
    fn to_options(&self) -> ConnectOptions {
        ConnectOptions {
            max_attempts: self.attempts,
            per_attempt_wait: Duration::from_millis(self.wait_ms),
            busy_wait: Duration::from_millis(self.busy_wait_ms),
        }
    }
}

/// Output format for `inspect`.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    /// Human-readable table.
    #[default]
    Table,
    /// Machine-readable JSON.
    Json,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("EXOLINK_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = Cli::parse().dispatch().await {
        eprintln!("exolink: {e:#}");
        std::process::exit(1);
    }
}

impl Cli {
    async fn dispatch(self) -> Result<()> {
        match self.command {
            Command::Upload(args) => upload(args).await,
            Command::Ping(args) => ping(args).await,
            Command::Inspect(args) => inspect(args).await,
            Command::Completion { shell } => {
                clap_complete::generate(
                    shell,
                    &mut Self::command(),
                    "exolink",
                    &mut std::io::stdout(),
                );
                Ok(())
            }
        }
    }
}

async fn upload(args: UploadArgs) -> Result<()> {
    let image = match args.image {
        Some(ref path) => read_image(path).await?,
        None => Image::test_pattern(args.pages).context("building test pattern")?,
    };
    println!(
        "image: {} page(s), {} bytes, sha256 {}",
        image.page_count(),
        image.len(),
        image.digest_hex()
    );

    let mut session = UploadSession::new(UnixEndpoint, args.endpoint, image)
        .with_options(args.connect.to_options());
    let n = session.run().await?;
    println!("loader replied with {n} byte(s)");
    Ok(())
}

async fn ping(args: PingArgs) -> Result<()> {
    let options = args.connect.to_options();
    let mut conn = exolink::connect(&UnixEndpoint, &args.endpoint, &options)
        .await
        .with_context(|| format!("connecting to {}", args.endpoint))?;
    let n = conn.hello().await.context("hello exchange")?;
    println!("loader is alive ({n} reply byte(s))");
    conn.close().await?;
    Ok(())
}

async fn inspect(args: InspectArgs) -> Result<()> {
    let image = read_image(&args.image).await?;
    let header = Header::upload_begin(&image);

    if matches!(args.format, OutputFormat::Json) {
        let obj = serde_json::json!({
            "pages": image.page_count(),
            "bytes": image.len(),
            "sha256": image.digest_hex(),
            "header": header,
        });
        println!("{}", serde_json::to_string_pretty(&obj)?);
        return Ok(());
    }

    let wire: Vec<String> = header.encode().iter().map(|b| format!("{b:02x}")).collect();
    println!("pages:   {}", image.page_count());
    println!("bytes:   {}", image.len());
    println!("sha256:  {}", image.digest_hex());
    println!("header:  {}", wire.join(" "));
    Ok(())
}

/// Reads and validates a boot image file.
async fn read_image(path: &Path) -> Result<Image> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Image::new(data).with_context(|| format!("{} is not a valid boot image", path.display()))
}
