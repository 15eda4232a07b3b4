//! Wire codec for the SOCKS5 messages (RFC 1928) and the username/password
//! sub-negotiation (RFC 1929).
//!
//! Decoders read the fixed-size prefix of a message first, so the length of
//! every variable part is known before it is read, and fail on the first
//! invalid field. Encoders write each message with a single `write_all`.

use crate::address::resolve_address;
use crate::error::{Result, Socks5Error};
use crate::protocol::{
    AddressType, AuthMethod, AuthStatus, Command, LEN_IPV4, LEN_IPV6, LEN_PORT, RSV, ReplyCode,
    Version,
};
use std::fmt;
use std::net::IpAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// ClientAuthMessage is the client's method selection message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAuthMessage {
    pub version: u8,
    pub n_methods: u8,
    pub methods: Vec<u8>,
}

impl ClientAuthMessage {
    /// offers reports whether the client listed the given method
    pub fn offers(&self, method: AuthMethod) -> bool {
        self.methods.contains(&(method as u8))
    }
}

/// ClientPasswordMessage holds the credentials from the RFC 1929 request
#[derive(Clone, PartialEq, Eq)]
pub struct ClientPasswordMessage {
    pub username: String,
    pub password: String,
}

// Keep passwords out of the logs
impl fmt::Debug for ClientPasswordMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientPasswordMessage")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// ClientRequestMessage is a decoded client request with its destination
/// address already rendered as text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequestMessage {
    pub command: Command,
    pub address_type: AddressType,
    pub address: String,
    pub port: u16,
}

impl fmt::Display for ClientRequestMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address_type {
            AddressType::IPv6 => write!(f, "{:?} [{}]:{}", self.command, self.address, self.port),
            _ => write!(f, "{:?} {}:{}", self.command, self.address, self.port),
        }
    }
}

/// ServerReply is a decoded server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReply {
    pub reply: ReplyCode,
    pub address_type: AddressType,
    pub address: String,
    pub port: u16,
}

async fn read_exact<S>(source: &mut S, buf: &mut [u8]) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    source
        .read_exact(buf)
        .await
        .map(|_| ())
        .map_err(Socks5Error::read_error)
}

async fn read_u8<S>(source: &mut S) -> Result<u8>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 1];
    read_exact(source, &mut buf).await?;
    Ok(buf[0])
}

async fn read_port<S>(source: &mut S) -> Result<u16>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; LEN_PORT];
    read_exact(source, &mut buf).await?;
    Ok(u16::from_be_bytes(buf))
}

/// read_address reads the address payload for the given type and renders it.
/// Domain names are read into a buffer sized exactly to their length byte.
async fn read_address<S>(source: &mut S, addr_type: AddressType) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let len = match addr_type {
        AddressType::IPv4 => LEN_IPV4,
        AddressType::IPv6 => LEN_IPV6,
        AddressType::DomainName => read_u8(source).await? as usize,
    };

    let mut raw = vec![0u8; len];
    read_exact(source, &mut raw).await?;
    resolve_address(addr_type, &raw)
}

async fn read_length_prefixed<S>(source: &mut S, len: u8, field: &'static str) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; len as usize];
    read_exact(source, &mut buf).await?;
    String::from_utf8(buf).map_err(|_| Socks5Error::InvalidField(field))
}

async fn write_message<S>(sink: &mut S, message: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    sink.write_all(message).await?;
    sink.flush().await?;
    Ok(())
}

/// decode_client_auth reads the method selection message
///
/// ```text
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 1 to 255 |
/// +----+----------+----------+
/// ```
pub async fn decode_client_auth<S>(source: &mut S) -> Result<ClientAuthMessage>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 2];
    read_exact(source, &mut buf).await?;

    let (version, n_methods) = (buf[0], buf[1]);
    if version != Version::SOCKS5 as u8 {
        return Err(Socks5Error::VersionMismatch(version));
    }

    let mut methods = vec![0u8; n_methods as usize];
    read_exact(source, &mut methods).await?;

    Ok(ClientAuthMessage {
        version,
        n_methods,
        methods,
    })
}

/// encode_server_auth writes the server's method selection
///
/// ```text
/// +----+--------+
/// |VER | METHOD |
/// +----+--------+
/// | 1  |   1    |
/// +----+--------+
/// ```
pub async fn encode_server_auth<S>(sink: &mut S, method: AuthMethod) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    write_message(sink, &[Version::SOCKS5 as u8, method as u8]).await
}

/// decode_client_password reads the username/password request
///
/// ```text
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
/// +----+------+----------+------+----------+
/// ```
pub async fn decode_client_password<S>(source: &mut S) -> Result<ClientPasswordMessage>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 2];
    read_exact(source, &mut buf).await?;

    let (version, ulen) = (buf[0], buf[1]);
    if version != Version::UserPass as u8 {
        return Err(Socks5Error::SubVersionMismatch(version));
    }

    let username = read_length_prefixed(source, ulen, "username is not valid UTF-8").await?;
    let plen = read_u8(source).await?;
    let password = read_length_prefixed(source, plen, "password is not valid UTF-8").await?;

    Ok(ClientPasswordMessage { username, password })
}

/// encode_server_password writes the sub-negotiation status
pub async fn encode_server_password<S>(sink: &mut S, status: AuthStatus) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    write_message(sink, &[Version::UserPass as u8, status as u8]).await
}

/// decode_client_request reads a client request
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
pub async fn decode_client_request<S>(source: &mut S) -> Result<ClientRequestMessage>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    read_exact(source, &mut header).await?;

    let [version, cmd, rsv, atyp] = header;
    if version != Version::SOCKS5 as u8 {
        return Err(Socks5Error::VersionMismatch(version));
    }
    if rsv != RSV {
        return Err(Socks5Error::InvalidField("reserved byte must be zero"));
    }
    let command = Command::from_byte(cmd).ok_or(Socks5Error::CommandUnsupported(cmd))?;
    let address_type =
        AddressType::from_byte(atyp).ok_or(Socks5Error::AddressTypeUnsupported(atyp))?;

    let address = read_address(source, address_type).await?;
    let port = read_port(source).await?;

    Ok(ClientRequestMessage {
        command,
        address_type,
        address,
        port,
    })
}

/// encode_success_reply writes a success reply carrying the bound address.
/// IPv4-mapped IPv6 addresses are sent as plain IPv4.
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
pub async fn encode_success_reply<S>(sink: &mut S, bound_addr: IpAddr, bound_port: u16) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut reply = Vec::with_capacity(4 + LEN_IPV6 + LEN_PORT);
    reply.extend_from_slice(&[Version::SOCKS5 as u8, ReplyCode::Succeeded as u8, RSV]);

    match bound_addr.to_canonical() {
        IpAddr::V4(ip) => {
            reply.push(AddressType::IPv4 as u8);
            reply.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            reply.push(AddressType::IPv6 as u8);
            reply.extend_from_slice(&ip.octets());
        }
    }
    reply.extend_from_slice(&bound_port.to_be_bytes());

    write_message(sink, &reply).await
}

/// encode_failure_reply writes a fixed 10-byte failure reply with an
/// all-zero IPv4 bound address
pub async fn encode_failure_reply<S>(sink: &mut S, reply_code: ReplyCode) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let reply = [
        Version::SOCKS5 as u8,
        reply_code as u8,
        RSV,
        AddressType::IPv4 as u8,
        0,
        0,
        0,
        0,
        0,
        0,
    ];
    write_message(sink, &reply).await
}

/// decode_server_reply reads a server reply, the inverse of the reply encoders
pub async fn decode_server_reply<S>(source: &mut S) -> Result<ServerReply>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    read_exact(source, &mut header).await?;

    let [version, rep, rsv, atyp] = header;
    if version != Version::SOCKS5 as u8 {
        return Err(Socks5Error::VersionMismatch(version));
    }
    let reply = ReplyCode::from_byte(rep).ok_or(Socks5Error::InvalidField("unknown reply code"))?;
    if rsv != RSV {
        return Err(Socks5Error::InvalidField("reserved byte must be zero"));
    }
    let address_type =
        AddressType::from_byte(atyp).ok_or(Socks5Error::AddressTypeUnsupported(atyp))?;

    let address = read_address(source, address_type).await?;
    let port = read_port(source).await?;

    Ok(ServerReply {
        reply,
        address_type,
        address,
        port,
    })
}
