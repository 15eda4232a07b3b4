use s5relay::codec::decode_server_reply;
use s5relay::{AddressType, AuthPolicy, CredentialTable, ReplyCode, Socks5Server, UserPass};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(policy: AuthPolicy) -> Self {
        let mut server = Socks5Server::new("127.0.0.1:0")
            .with_policy(policy)
            .with_connect_timeout(Duration::from_secs(2));
        let addr = server.bind().await.unwrap();

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server
                .serve_with_shutdown(async {
                    let _ = rx.await;
                })
                .await
        });

        Self {
            addr,
            shutdown: Some(tx),
            handle,
        }
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        timeout(WAIT, self.handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

/// start_echo_server echoes every byte back until the peer closes
async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let (mut r, mut w) = sock.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });

    addr
}

fn users() -> CredentialTable {
    [("admin", "123456"), ("bryce", "111111")]
        .into_iter()
        .map(|(username, password)| UserPass {
            username: username.to_string(),
            password: password.to_string(),
        })
        .collect()
}

fn connect_request(dest: SocketAddr) -> Vec<u8> {
    let SocketAddr::V4(dest) = dest else {
        panic!("test destinations are IPv4");
    };
    let mut buf = vec![0x05, 0x01, 0x00, 0x01];
    buf.extend_from_slice(&dest.ip().octets());
    buf.extend_from_slice(&dest.port().to_be_bytes());
    buf
}

fn password_request(username: &str, password: &str) -> Vec<u8> {
    let mut buf = vec![0x01, username.len() as u8];
    buf.extend_from_slice(username.as_bytes());
    buf.push(password.len() as u8);
    buf.extend_from_slice(password.as_bytes());
    buf
}

async fn read_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    timeout(WAIT, stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    buf
}

async fn assert_closed(stream: &mut TcpStream) {
    let mut rest = Vec::new();
    let _ = timeout(WAIT, stream.read_to_end(&mut rest)).await.unwrap();
    assert!(rest.is_empty(), "unexpected trailing bytes {rest:?}");
}

/// open_tunnel performs a no-auth handshake and CONNECT, returning the
/// stream ready for relayed traffic
async fn open_tunnel(proxy: SocketAddr, dest: SocketAddr) -> TcpStream {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    assert_eq!(read_n(&mut client, 2).await, vec![0x05, 0x00]);

    client.write_all(&connect_request(dest)).await.unwrap();
    let reply = timeout(WAIT, decode_server_reply(&mut client))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.reply, ReplyCode::Succeeded);
    client
}

async fn echo_roundtrip(client: &mut TcpStream, payload: &[u8]) {
    client.write_all(payload).await.unwrap();
    assert_eq!(read_n(client, payload.len()).await, payload);
}

#[tokio::test]
async fn test_no_auth_connect_and_relay() {
    let echo = start_echo_server().await;
    let server = TestServer::start(AuthPolicy::no_auth()).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    assert_eq!(read_n(&mut client, 2).await, vec![0x05, 0x00]);

    client.write_all(&connect_request(echo)).await.unwrap();
    let reply = timeout(WAIT, decode_server_reply(&mut client))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.reply, ReplyCode::Succeeded);
    assert_eq!(reply.address_type, AddressType::IPv4);
    assert_eq!(reply.address, "127.0.0.1");
    assert_ne!(reply.port, 0);

    echo_roundtrip(&mut client, b"hello through the relay").await;
    echo_roundtrip(&mut client, &vec![0x5A; 32 * 1024]).await;

    // Half-close: the echo server answers and closes, the relay follows
    client.write_all(b"last").await.unwrap();
    client.shutdown().await.unwrap();
    let mut tail = Vec::new();
    timeout(WAIT, client.read_to_end(&mut tail))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tail, b"last");

    server.stop().await;
}

#[tokio::test]
async fn test_password_auth_success() {
    let echo = start_echo_server().await;
    let server = TestServer::start(AuthPolicy::password(users())).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client.write_all(&[0x05, 0x02, 0x00, 0x02]).await.unwrap();
    assert_eq!(read_n(&mut client, 2).await, vec![0x05, 0x02]);

    client
        .write_all(&password_request("admin", "123456"))
        .await
        .unwrap();
    assert_eq!(read_n(&mut client, 2).await, vec![0x01, 0x00]);

    client.write_all(&connect_request(echo)).await.unwrap();
    let reply = decode_server_reply(&mut client).await.unwrap();
    assert_eq!(reply.reply, ReplyCode::Succeeded);

    echo_roundtrip(&mut client, b"authenticated").await;

    server.stop().await;
}

#[tokio::test]
async fn test_password_auth_failure_closes_connection() {
    let server = TestServer::start(AuthPolicy::password(users())).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
    assert_eq!(read_n(&mut client, 2).await, vec![0x05, 0x02]);

    client
        .write_all(&password_request("admin", "wrong"))
        .await
        .unwrap();
    assert_eq!(read_n(&mut client, 2).await, vec![0x01, 0xFF]);
    assert_closed(&mut client).await;

    server.stop().await;
}

#[tokio::test]
async fn test_method_not_offered_is_rejected() {
    let server = TestServer::start(AuthPolicy::password(users())).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    assert_eq!(read_n(&mut client, 2).await, vec![0x05, 0xFF]);
    assert_closed(&mut client).await;

    server.stop().await;
}

#[tokio::test]
async fn test_connect_refused_reply() {
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let server = TestServer::start(AuthPolicy::no_auth()).await;

    let mut client = TcpStream::connect(server.addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    assert_eq!(read_n(&mut client, 2).await, vec![0x05, 0x00]);

    client.write_all(&connect_request(closed)).await.unwrap();
    assert_eq!(
        read_n(&mut client, 10).await,
        vec![0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
    );
    assert_closed(&mut client).await;

    server.stop().await;
}

#[tokio::test]
async fn test_faulty_client_does_not_affect_others() {
    let echo = start_echo_server().await;
    let server = TestServer::start(AuthPolicy::no_auth()).await;

    let mut good = open_tunnel(server.addr, echo).await;

    let mut bad = TcpStream::connect(server.addr).await.unwrap();
    bad.write_all(&[0x04, 0x01, 0x00, 0x50]).await.unwrap();
    assert_closed(&mut bad).await;

    let mut others = Vec::new();
    for i in 0..8u8 {
        let addr = server.addr;
        others.push(tokio::spawn(async move {
            let mut client = open_tunnel(addr, echo).await;
            echo_roundtrip(&mut client, &[i; 64]).await;
        }));
    }
    for handle in others {
        timeout(WAIT, handle).await.unwrap().unwrap();
    }

    echo_roundtrip(&mut good, b"still alive").await;

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_keeps_inflight_relays() {
    let echo = start_echo_server().await;
    let server = TestServer::start(AuthPolicy::no_auth()).await;
    let proxy = server.addr;

    let mut client = open_tunnel(proxy, echo).await;
    server.stop().await;

    // Listener is gone
    assert!(TcpStream::connect(proxy).await.is_err());

    // The accepted connection keeps relaying
    echo_roundtrip(&mut client, b"after shutdown").await;
}
