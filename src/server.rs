use crate::{
    auth::{self, AuthPolicy},
    commands,
    error::{ErrorClass, Socks5Error},
    relay,
};
use anyhow::{Context, Result};
use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};
use tracing::{debug, error, info, warn};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// ServerConfig is the immutable per-server setting shared by every
/// connection task
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub policy: AuthPolicy,
    pub connect_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            policy: AuthPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Socks5Server represents a SOCKS5 server and houses related
/// configuration data
pub struct Socks5Server {
    pub listen_addr: String,
    config: ServerConfig,
    listener: Option<TcpListener>,
}

/// Socks5Server implementation block
impl Socks5Server {
    /// new is a constructor for the Socks5Server type
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            config: ServerConfig::default(),
            listener: None,
        }
    }

    /// with_policy applies the desired authentication
    pub fn with_policy(mut self, policy: AuthPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    /// with_connect_timeout bounds how long a destination connect may take
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.config.connect_timeout = connect_timeout;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// bind validates the auth policy and binds the listen address.
    /// Calling it again after a successful bind is an error.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if self.listener.is_some() {
            anyhow::bail!("[ERR] server is already bound");
        }

        self.config
            .policy
            .validate()
            .context("[ERR] invalid authentication policy")?;

        // Instantiate tokio listener
        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .with_context(|| format!("[ERR] failed to bind {}", self.listen_addr))?;
        let addr = listener.local_addr()?;

        info!(
            "SOCKS5 proxy listening on {} (auth: {:?})",
            addr,
            self.config.policy.method()
        );

        self.listener = Some(listener);
        Ok(addr)
    }

    /// run serves until Ctrl-C or SIGTERM
    pub async fn run(&mut self) -> Result<()> {
        self.serve_with_shutdown(shutdown_signal()).await
    }

    /// serve_with_shutdown accepts connections until `shutdown` resolves. The
    /// listener is closed on shutdown; connections already accepted keep
    /// running until they finish on their own. Accept errors stop the server.
    pub async fn serve_with_shutdown<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if self.listener.is_none() {
            self.bind().await?;
        }
        let listener = self
            .listener
            .take()
            .context("[ERR] listener missing after bind")?;

        let config = Arc::new(self.config.clone());
        tokio::pin!(shutdown);

        // Listen for connections to proxy
        loop {
            let (inbound, peer_addr) = tokio::select! {
                accepted = listener.accept() => accepted.context("[ERR] accept failed")?,
                _ = &mut shutdown => {
                    info!("SOCKS5 server shutdown...");
                    break;
                }
            };

            // Clone for this connection
            let config = Arc::clone(&config);

            // Spawn async task
            tokio::spawn(async move {
                info!("new client: {}", peer_addr);

                if let Err(e) = handle_connection(inbound, &config).await {
                    log_connection_failure(peer_addr, &e);
                }
            });
        }

        Ok(())
    }
}

/// handle_connection handles the full client/server SOCKS5 protocol flow:
/// negotiation, request, then relay. The destination stream is owned here and
/// closed on every exit path.
pub async fn handle_connection<S>(mut stream: S, config: &ServerConfig) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // Negotiate authentication with client
    auth::negotiate(&mut stream, &config.policy)
        .await
        .context("negotiation failed")?;

    // Handle connection request from client
    let outbound = commands::handle_socks_request(&mut stream, config.connect_timeout)
        .await
        .context("request failed")?;

    let stats = relay::relay(stream, outbound)
        .await
        .context("relay failed")?;

    match stats.from_client {
        Some(from_client) => info!(
            "connection closed: {} bytes from client, {} bytes from server",
            from_client, stats.from_server
        ),
        None => info!(
            "connection closed by destination: {} bytes from server",
            stats.from_server
        ),
    }

    Ok(())
}

/// failure_class finds the error class behind a failed connection, looking
/// through the context layers added by `handle_connection`
fn failure_class(err: &anyhow::Error) -> Option<ErrorClass> {
    if let Some(e) = err.downcast_ref::<Socks5Error>() {
        return Some(e.class());
    }
    err.downcast_ref::<io::Error>().map(|_| ErrorClass::Transport)
}

fn log_connection_failure(peer_addr: SocketAddr, err: &anyhow::Error) {
    match failure_class(err) {
        Some(ErrorClass::Transport) => {
            debug!("connection from {} ended: {:#}", peer_addr, err)
        }
        Some(
            ErrorClass::ProtocolViolation
            | ErrorClass::UnsupportedCapability
            | ErrorClass::AuthenticationFailed,
        ) => warn!("client {} rejected: {:#}", peer_addr, err),
        Some(ErrorClass::Configuration) | None => {
            error!("handle connection failed from {}: {:#}", peer_addr, err)
        }
    }
}

/// shutdown_signal resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("received Ctrl+C"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl+C");
    }
}
