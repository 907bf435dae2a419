use std::fs::File;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use fileserver::{Credentials, FileServerApi, ServerSettings, DEFAULT_TEMP_LINK_HOURS};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "simplefileserver=info,fileserver=info,tower_http=info";

/// Serve a directory over HTTPS with zip folder downloads and temporary links
#[derive(Parser, Debug)]
#[command(name = "simplefileserver", version, about)]
struct Args {
    /// Directory to serve
    #[arg(long, env = "ROOT_DIR", default_value = "./temp")]
    root: PathBuf,

    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 8090)]
    port: u16,

    /// TLS certificate chain (PEM)
    #[arg(long, env = "CERT_FILE", default_value = "./localhost.crt")]
    cert: PathBuf,

    /// TLS private key (PEM)
    #[arg(long, env = "KEY_FILE", default_value = "./localhost.key")]
    key: PathBuf,

    /// Lifetime of temporary links, in hours
    #[arg(long, env = "TEMP_LINK_EXPIRE", default_value_t = DEFAULT_TEMP_LINK_HOURS)]
    expire: i64,

    /// Route prefix temporary links are served under
    #[arg(long, env = "TEMP_LINK_BASE", default_value = "/temp")]
    temp_link_base: String,

    /// Basic auth user; auth is on when both user and password are set
    #[arg(long, env = "BASIC_USER")]
    basic_user: Option<String>,

    #[arg(long, env = "BASIC_PASS", hide_env_values = true)]
    basic_pass: Option<String>,

    /// Base URL printed in temporary links, e.g. https://files.example.com
    #[arg(long, env = "PUBLIC_URL")]
    public_url: Option<String>,

    #[arg(long, env = "FAVICON", default_value = "./favicon.ico")]
    favicon: PathBuf,

    /// Seconds between sweeps of expired temporary links
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 3600)]
    sweep_interval: u64,
}

impl Args {
    fn into_settings(self) -> anyhow::Result<ServerSettings> {
        let mut settings = ServerSettings::new(self.root);
        settings.listen_addr = SocketAddr::new(self.host, self.port);
        settings.cert_file = self.cert;
        settings.key_file = self.key;
        settings.temp_link_hours = self.expire;
        settings.temp_link_base = self.temp_link_base;
        settings.credentials = Credentials::new(
            self.basic_user.unwrap_or_default(),
            self.basic_pass.unwrap_or_default(),
        );
        settings.public_url = self.public_url.filter(|url| !url.is_empty());
        settings.favicon = self.favicon;
        settings.sweep_interval = Duration::from_secs(self.sweep_interval);

        settings.validate().context("Invalid configuration")?;
        Ok(settings)
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Fail early on TLS material the listener could never load
fn check_readable(path: &Path, what: &str) -> anyhow::Result<()> {
    File::open(path)
        .map(drop)
        .with_context(|| format!("Unable to read {} {}", what, path.display()))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let settings = args.into_settings()?;
    check_readable(&settings.cert_file, "TLS certificate")?;
    check_readable(&settings.key_file, "TLS private key")?;

    let root = settings.root_dir.display().to_string();
    let api = FileServerApi::new(settings)
        .map_err(|e| anyhow!(e))
        .with_context(|| format!("Unable to open root directory {}", root))?;

    api.serve().await.map_err(|e| anyhow!(e))
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    let _ = dotenv::dotenv();
    init_tracing();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        tracing::error!(error = format!("{:#}", e), "File server failed to start");
        std::process::exit(1);
    }
}
