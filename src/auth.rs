use crate::codec::{
    decode_client_auth, decode_client_password, encode_server_auth, encode_server_password,
};
use crate::error::{Result, Socks5Error};
use crate::protocol::{AuthMethod, AuthStatus};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

/// PasswordVerifier decides whether a username/password pair is accepted
pub trait PasswordVerifier: Send + Sync {
    fn verify(&self, username: &str, password: &str) -> bool;
}

impl<F> PasswordVerifier for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn verify(&self, username: &str, password: &str) -> bool {
        self(username, password)
    }
}

/// UserPass holds username/password credentials as dictated
/// server-side
#[derive(Clone, PartialEq, Eq)]
pub struct UserPass {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for UserPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserPass")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// CredentialTable maps usernames to their expected passwords
#[derive(Debug, Clone, Default)]
pub struct CredentialTable {
    users: HashMap<String, String>,
}

impl CredentialTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, creds: UserPass) {
        self.users.insert(creds.username, creds.password);
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl FromIterator<UserPass> for CredentialTable {
    fn from_iter<I: IntoIterator<Item = UserPass>>(iter: I) -> Self {
        let mut table = CredentialTable::new();
        for creds in iter {
            table.insert(creds);
        }
        table
    }
}

impl PasswordVerifier for CredentialTable {
    fn verify(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|expected| expected == password)
    }
}

/// AuthPolicy is the server-wide authentication setting: the one method
/// clients must offer and, for the password method, the verifier
#[derive(Clone)]
pub struct AuthPolicy {
    method: AuthMethod,
    verifier: Option<Arc<dyn PasswordVerifier>>,
}

impl AuthPolicy {
    /// new builds a policy without checking it; call `validate` before serving
    pub fn new(method: AuthMethod, verifier: Option<Arc<dyn PasswordVerifier>>) -> Self {
        Self { method, verifier }
    }

    pub fn no_auth() -> Self {
        Self::new(AuthMethod::NoAuth, None)
    }

    pub fn password(verifier: impl PasswordVerifier + 'static) -> Self {
        Self::new(AuthMethod::UserPass, Some(Arc::new(verifier)))
    }

    pub fn method(&self) -> AuthMethod {
        self.method
    }

    /// validate checks that the method is one the server implements and
    /// that the password method comes with a verifier
    pub fn validate(&self) -> Result<()> {
        match self.method {
            AuthMethod::NoAuth => Ok(()),
            AuthMethod::UserPass if self.verifier.is_none() => {
                Err(Socks5Error::PasswordVerifierMissing)
            }
            AuthMethod::UserPass => Ok(()),
            method @ (AuthMethod::Gssapi | AuthMethod::NoAcceptable) => {
                Err(Socks5Error::AuthMethodUnsupported(method as u8))
            }
        }
    }
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self::no_auth()
    }
}

impl fmt::Debug for AuthPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthPolicy")
            .field("method", &self.method)
            .field("verifier", &self.verifier.is_some())
            .finish()
    }
}

/// negotiate handles authentication negotiation between the SOCKS server and client.
/// On `MethodNotAcceptable`, `AuthenticationFailed` or an invalid policy the
/// rejection has already been sent and the caller must close the connection.
pub async fn negotiate<S>(stream: &mut S, policy: &AuthPolicy) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let message = decode_client_auth(stream).await?;
    debug!("client auth message: {:?}", message);

    // Unsupported policies never get as far as advertising their method
    if let Err(e) = policy.validate() {
        let _ = encode_server_auth(stream, AuthMethod::NoAcceptable).await;
        return Err(e);
    }

    if !message.offers(policy.method) {
        // Best effort, the connection is dropped either way
        let _ = encode_server_auth(stream, AuthMethod::NoAcceptable).await;
        return Err(Socks5Error::MethodNotAcceptable);
    }

    encode_server_auth(stream, policy.method).await?;

    match policy.method {
        AuthMethod::NoAuth => (),
        AuthMethod::UserPass => {
            let verifier = policy
                .verifier
                .as_ref()
                .ok_or(Socks5Error::PasswordVerifierMissing)?;
            authenticate_userpass(stream, &**verifier).await?;
        }
        method @ (AuthMethod::Gssapi | AuthMethod::NoAcceptable) => {
            return Err(Socks5Error::AuthMethodUnsupported(method as u8));
        }
    }

    info!("negotiated auth method {:?}", policy.method);
    Ok(())
}

/// authenticate_userpass runs the RFC 1929 sub-negotiation. A single failed
/// attempt ends the exchange.
async fn authenticate_userpass<S>(stream: &mut S, verifier: &dyn PasswordVerifier) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let creds = decode_client_password(stream).await?;
    debug!("client password message: {:?}", creds);

    if !verifier.verify(&creds.username, &creds.password) {
        let _ = encode_server_password(stream, AuthStatus::Failure).await;
        return Err(Socks5Error::AuthenticationFailed);
    }

    encode_server_password(stream, AuthStatus::Success).await
}
