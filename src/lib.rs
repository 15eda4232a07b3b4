//! A SOCKS5 relay server library
//!
//! ## SOCKS5 Implementation
//!
//! - Features:
//!     - CONNECT
//!     - No Authentication
//!     - Username/Password Authentication, one required method per server
//!     - Async using tokio, one task per client connection
//!     - Bounded destination connect timeout
//!     - Half-close aware bidirectional relay
//! - Declined with a failure reply: BIND, UDP ASSOCIATE, IPv6 destinations
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//! - [Username/Password Authentication (RFC 1929)](https://datatracker.ietf.org/doc/html/rfc1929)
//!
//! # Example
//! ```no_run
//! use s5relay::{AuthPolicy, Socks5Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let policy = AuthPolicy::password(|user: &str, pass: &str| user == "admin" && pass == "123456");
//!     let mut server = Socks5Server::new("127.0.0.1:1080").with_policy(policy);
//!     server.run().await
//! }
//! ```

pub mod address;
pub mod auth;
pub mod codec;
pub mod commands;
pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod server;

// Re-export main types at crate root for convenience
pub use auth::{AuthPolicy, CredentialTable, PasswordVerifier, UserPass};
pub use error::{ErrorClass, Socks5Error};
pub use protocol::{AddressType, AuthMethod, Command, ReplyCode, Version};
pub use server::{ServerConfig, Socks5Server};
