//! SOCKS5 server with username/password authentication example

use s5relay::{AuthPolicy, CredentialTable, Socks5Server, UserPass};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let users: CredentialTable = [
        ("admin", "123456"),
        ("bryce", "111111"),
        ("shingo", "gnix.com"),
    ]
    .into_iter()
    .map(|(username, password)| UserPass {
        username: username.to_string(),
        password: password.to_string(),
    })
    .collect();

    let mut server = Socks5Server::new("127.0.0.1:1080")
        .with_policy(AuthPolicy::password(users))
        .with_connect_timeout(Duration::from_secs(10));

    server.run().await
}
