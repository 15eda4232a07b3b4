use anyhow::{Result, bail};
use clap::Parser;
use s5relay::Socks5Server;
use s5relay::config::{AuthMode, Settings, UserEntry, load_config};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "A SOCKS5 relay server", long_about = None)]
struct Args {
    /// Listener address [default: 127.0.0.1:1080]
    #[arg(short, long)]
    listen: Option<String>,

    /// Required authentication method
    #[arg(short, long, value_enum)]
    method: Option<AuthMode>,

    /// Username for SOCKS5 proxy
    #[arg(short, long)]
    username: Option<String>,

    /// Password for SOCKS5 proxy
    #[arg(short, long)]
    password: Option<String>,

    /// TOML config file, flags take precedence over it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Destination connect timeout in seconds [default: 5]
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber, RUST_LOG wins when set
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Check for auth and grab it if present
    let users = match (args.username, args.password) {
        (Some(username), Some(password)) => vec![UserEntry { username, password }],
        (None, None) => Vec::new(),
        _ => bail!("[ERR] must provide both username and password (or neither)"),
    };

    // A user on the command line implies password auth
    let method = match (args.method, users.is_empty()) {
        (None, false) => Some(AuthMode::Password),
        (method, _) => method,
    };

    let cli = Settings {
        listen: args.listen,
        method,
        connect_timeout_secs: args.connect_timeout,
        users,
    };

    let settings = match &args.config {
        Some(path) => {
            let file = load_config(path)?;
            info!("Configuration loaded from: {:?}", path);
            file.merge(cli)
        }
        None => cli,
    };

    let config = settings.server_config()?;
    if config.policy.method() == s5relay::AuthMethod::UserPass {
        info!("Authentication enabled");
    }

    // Instantiate server
    let mut server = Socks5Server::new(settings.listen_addr())
        .with_policy(config.policy)
        .with_connect_timeout(config.connect_timeout);

    // Run it
    info!("Starting SOCKS5 proxy: {}", server.listen_addr);
    server.run().await
}
