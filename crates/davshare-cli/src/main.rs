#![forbid(unsafe_code)]

//! davshare: share a directory over WebDAV.

use anyhow::{bail, Context, Result};
use clap::Parser;
use davshare_cli::{BasicAuth, Server, ServerConfig};
use davshare_dav::DavConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "davshare")]
#[command(author, version, about = "Small WebDAV file-sharing daemon")]
struct Cli {
    /// Directory to share
    #[arg(short, long, default_value = "./")]
    dir: PathBuf,

    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8061")]
    listen: SocketAddr,

    /// Username for Basic auth (unauthenticated when omitted)
    #[arg(short, long)]
    user: Option<String>,

    /// Password for Basic auth
    #[arg(short, long, env = "DAVSHARE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Reject all modifying methods
    #[arg(short = 'r', long)]
    read_only: bool,

    /// Refuse depth-infinity PROPFIND (large trees get expensive)
    #[arg(long)]
    no_propfind_infinity: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("davshare={default},davshare_dav={default}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let root = cli
        .dir
        .canonicalize()
        .with_context(|| format!("cannot resolve shared directory {}", cli.dir.display()))?;
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }

    let auth = match (cli.user, cli.password) {
        (Some(user), Some(password)) => Some(BasicAuth::new(user, password)),
        (None, None) => None,
        _ => bail!("--user and --password must be given together"),
    };

    let config = ServerConfig {
        root,
        addr: cli.listen,
        auth,
        dav: DavConfig {
            read_only: cli.read_only,
            allow_propfind_infinity: !cli.no_propfind_infinity,
            ..DavConfig::default()
        },
    };

    let server = Server::start(config).await.context("failed to start server")?;
    eprintln!("serving WebDAV on {}", server.url());

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    server.stop().await;
    Ok(())
}
