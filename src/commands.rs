use crate::codec::{
    ClientRequestMessage, decode_client_request, encode_failure_reply, encode_success_reply,
};
use crate::error::{Result, Socks5Error};
use crate::protocol::{AddressType, Command, ReplyCode};
use std::{future::Future, io, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    time::timeout,
};
use tracing::{error, info};

/// handle_socks_request reads the client request, opens the destination
/// connection for CONNECT and replies to the client. The returned stream is
/// ready to be relayed.
pub async fn handle_socks_request<S>(stream: &mut S, connect_timeout: Duration) -> Result<TcpStream>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = match decode_client_request(stream).await {
        Ok(request) => request,
        Err(e) => {
            // Unsupported values still get a reply before the close
            let reply_code = match e {
                Socks5Error::CommandUnsupported(_) => Some(ReplyCode::CommandNotSupported),
                Socks5Error::AddressTypeUnsupported(_) => Some(ReplyCode::AddrTypeUnsupported),
                _ => None,
            };
            if let Some(code) = reply_code {
                let _ = encode_failure_reply(stream, code).await;
            }
            return Err(e);
        }
    };
    info!("client request: {}", request);

    if request.address_type == AddressType::IPv6 {
        let _ = encode_failure_reply(stream, ReplyCode::AddrTypeUnsupported).await;
        return Err(Socks5Error::AddressTypeUnsupported(AddressType::IPv6 as u8));
    }

    match request.command {
        Command::Connect => handle_connect_cmd(stream, &request, connect_timeout).await,
        Command::Bind | Command::UdpAssociate => {
            let _ = encode_failure_reply(stream, ReplyCode::CommandNotSupported).await;
            Err(Socks5Error::CommandUnsupported(request.command as u8))
        }
    }
}

// ================
// CONNECT COMMAND
// ================

/// handle_connect_cmd opens the destination connection within the connect
/// timeout and reports the locally bound address of that connection
async fn handle_connect_cmd<S>(
    stream: &mut S,
    request: &ClientRequestMessage,
    connect_timeout: Duration,
) -> Result<TcpStream>
where
    S: AsyncWrite + Unpin,
{
    // Domain names are resolved by the OS resolver here
    let target = (request.address.as_str(), request.port);
    connect_within(stream, request, connect_timeout, TcpStream::connect(target)).await
}

/// connect_within drives `connect` for at most `connect_timeout` and writes
/// the reply for its outcome. Errors and timeouts both answer
/// `ConnectionRefused`.
async fn connect_within<S, F>(
    stream: &mut S,
    request: &ClientRequestMessage,
    connect_timeout: Duration,
    connect: F,
) -> Result<TcpStream>
where
    S: AsyncWrite + Unpin,
    F: Future<Output = io::Result<TcpStream>>,
{
    let outbound = match timeout(connect_timeout, connect).await {
        Ok(Ok(outbound)) => outbound,
        Ok(Err(e)) => {
            error!("failed to connect to {}:{}: {}", request.address, request.port, e);
            let _ = encode_failure_reply(stream, ReplyCode::ConnectionRefused).await;
            return Err(e.into());
        }
        Err(_) => {
            error!(
                "connect to {}:{} timed out after {:?}",
                request.address, request.port, connect_timeout
            );
            let _ = encode_failure_reply(stream, ReplyCode::ConnectionRefused).await;
            return Err(Socks5Error::ConnectTimeout);
        }
    };

    let bound = outbound.local_addr()?;
    encode_success_reply(stream, bound.ip(), bound.port()).await?;

    Ok(outbound)
}
