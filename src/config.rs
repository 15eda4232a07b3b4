//! Configuration loading
//!
//! Settings come from an optional TOML file and are overridden by command
//! line flags. The result is turned into an immutable `ServerConfig` once,
//! before the server starts.

use crate::auth::{AuthPolicy, CredentialTable, UserPass};
use crate::server::{DEFAULT_CONNECT_TIMEOUT, ServerConfig};
use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:1080";

/// AuthMode is the authentication method named in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    #[value(name = "noauth")]
    NoAuth,
    Password,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserEntry {
    pub username: String,
    pub password: String,
}

/// Settings as read from the config file; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub listen: Option<String>,
    pub method: Option<AuthMode>,
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

/// Load settings from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse settings from a TOML string
pub fn parse_config(content: &str) -> Result<Settings> {
    toml::from_str(content).with_context(|| "Failed to parse configuration")
}

impl Settings {
    /// merge lays `overrides` on top of `self`. Users are added, not replaced,
    /// except that an explicit `noauth` override drops the users of `self`.
    pub fn merge(mut self, overrides: Settings) -> Settings {
        if overrides.listen.is_some() {
            self.listen = overrides.listen;
        }
        if overrides.method.is_some() {
            self.method = overrides.method;
        }
        if overrides.method == Some(AuthMode::NoAuth) {
            self.users.clear();
        }
        if overrides.connect_timeout_secs.is_some() {
            self.connect_timeout_secs = overrides.connect_timeout_secs;
        }
        self.users.extend(overrides.users);
        self
    }

    pub fn listen_addr(&self) -> String {
        self.listen
            .clone()
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string())
    }

    /// server_config builds the immutable server configuration. The password
    /// method needs at least one user.
    pub fn server_config(&self) -> Result<ServerConfig> {
        let policy = match self.method.unwrap_or_default() {
            AuthMode::NoAuth => {
                if !self.users.is_empty() {
                    bail!("[ERR] users are configured but the auth method is noauth");
                }
                AuthPolicy::no_auth()
            }
            AuthMode::Password => {
                let table: CredentialTable = self
                    .users
                    .iter()
                    .map(|u| UserPass {
                        username: u.username.clone(),
                        password: u.password.clone(),
                    })
                    .collect();
                if table.is_empty() {
                    bail!("[ERR] password auth requires at least one user");
                }
                AuthPolicy::password(table)
            }
        };

        let connect_timeout = match self.connect_timeout_secs {
            Some(0) => bail!("[ERR] connect timeout must be at least one second"),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_CONNECT_TIMEOUT,
        };

        Ok(ServerConfig {
            policy,
            connect_timeout,
        })
    }
}
