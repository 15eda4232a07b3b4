//! Basic SOCKS5 server example

use s5relay::Socks5Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut server = Socks5Server::new("127.0.0.1:1080");
    let addr = server.bind().await?;
    println!("Starting SOCKS5 server on {addr}");

    server.run().await
}
