//! Sessions over real SSH: a russh client against `RusshTransport`

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::keys::key::{KeyPair, PublicKey};
use russh::keys::PublicKeyBase64;
use russh::{Channel, ChannelMsg, Sig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use gw_core::PublicKeyBytes;
use gw_server::transport::RusshTransport;
use gw_server::{
    options, AuthorizedKeys, Handler, Permissions, ServeError, Server, ServerConfig,
    ServerHandle, ServerOption, Session, Signal, Window,
};

use common::{eventually, STEP};

/// Client that trusts any host key
struct TrustingClient;

#[async_trait]
impl client::Handler for TrustingClient {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

struct RunningServer {
    addr: SocketAddr,
    handle: ServerHandle,
    task: JoinHandle<Result<(), ServeError>>,
}

impl RunningServer {
    async fn start(handler: Arc<dyn Handler>, options: Vec<ServerOption>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = ServerConfig {
            auth_rejection_time: Duration::from_millis(10),
            ..ServerConfig::default()
        };
        let host_key = KeyPair::generate_ed25519().unwrap();
        let transport = RusshTransport::new(host_key, &config);

        let server = Server::with_options(transport, Some(handler), options).unwrap();
        let handle = server.handle();
        let task = tokio::spawn(async move { server.serve(listener).await });

        Self { addr, handle, task }
    }

    async fn stop(self) {
        self.handle.close();
        let result = timeout(STEP, self.task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}

fn key_bytes(key: &KeyPair) -> PublicKeyBytes {
    PublicKeyBytes::from(key.clone_public_key().unwrap().public_key_bytes())
}

async fn connect(addr: SocketAddr) -> client::Handle<TrustingClient> {
    let config = Arc::new(client::Config::default());
    timeout(STEP, client::connect(config, addr, TrustingClient))
        .await
        .unwrap()
        .unwrap()
}

/// Wait for the answer to a `want_reply` request
async fn reply(channel: &mut Channel<client::Msg>) -> bool {
    loop {
        match timeout(STEP, channel.wait()).await.unwrap() {
            Some(ChannelMsg::Success) => return true,
            Some(ChannelMsg::Failure) => return false,
            Some(_) => continue,
            None => panic!("channel closed while waiting for a reply"),
        }
    }
}

#[derive(Debug, PartialEq)]
enum Observed {
    Started(Option<(String, Window)>),
    Resized(Window),
    Signal(Signal),
}

async fn observe(rx: &mut mpsc::UnboundedReceiver<Observed>) -> Observed {
    timeout(STEP, rx.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_ssh_session_end_to_end() {
    let trusted = KeyPair::generate_ed25519().unwrap();
    let stranger = KeyPair::generate_ed25519().unwrap();

    let mut keys = AuthorizedKeys::new();
    keys.add_key(key_bytes(&trusted), None);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler: Arc<dyn Handler> = Arc::new(move |session: Session| {
        let tx = tx.clone();
        async move {
            let mut windows = session.window_changes().unwrap();
            let mut signals = session.signals().unwrap();
            tx.send(Observed::Started(
                session.pty().map(|pty| (pty.term, pty.window)),
            ))
            .unwrap();

            windows.changed().await.unwrap();
            let window = *windows.borrow();
            tx.send(Observed::Resized(window)).unwrap();

            let signal = signals.recv().await.unwrap();
            tx.send(Observed::Signal(signal)).unwrap();

            session.write(b"bye").await.unwrap();
            session.set_exit_status(130).unwrap();
        }
    });

    let server = RunningServer::start(
        handler,
        vec![
            options::public_key_auth(keys),
            options::pty_callback(|_user: &str, _permissions: &Permissions| true),
        ],
    )
    .await;

    let mut denied = connect(server.addr).await;
    assert!(!denied
        .authenticate_publickey("mallory", Arc::new(stranger))
        .await
        .unwrap());

    let mut client = connect(server.addr).await;
    assert!(client
        .authenticate_publickey("alice", Arc::new(trusted))
        .await
        .unwrap());

    let mut channel = client.channel_open_session().await.unwrap();
    channel
        .request_pty(true, "xterm", 80, 24, 0, 0, &[])
        .await
        .unwrap();
    assert!(reply(&mut channel).await);
    channel.request_shell(true).await.unwrap();
    assert!(reply(&mut channel).await);

    assert_eq!(
        observe(&mut rx).await,
        Observed::Started(Some(("xterm".to_string(), Window::new(80, 24))))
    );

    channel.window_change(120, 30, 0, 0).await.unwrap();
    assert_eq!(observe(&mut rx).await, Observed::Resized(Window::new(120, 30)));

    channel.signal(Sig::INT).await.unwrap();
    assert_eq!(observe(&mut rx).await, Observed::Signal(Signal::Int));

    let mut output = Vec::new();
    let mut tail = Vec::new();
    while let Some(msg) = timeout(STEP, channel.wait()).await.unwrap() {
        match msg {
            ChannelMsg::Data { data } => output.extend_from_slice(&data),
            ChannelMsg::ExitStatus { exit_status } => tail.push(format!("exit {}", exit_status)),
            ChannelMsg::Eof => tail.push("eof".to_string()),
            ChannelMsg::Close => {
                tail.push("close".to_string());
                break;
            }
            _ => {}
        }
    }
    assert_eq!(output, b"bye");
    assert_eq!(tail, vec!["exit 130", "eof", "close"]);

    server.stop().await;
}

#[tokio::test]
async fn test_server_close_disconnects_clients() {
    let client_key = KeyPair::generate_ed25519().unwrap();
    let mut keys = AuthorizedKeys::new();
    keys.add_key(key_bytes(&client_key), None);

    let handler: Arc<dyn Handler> = Arc::new(|session: Session| async move {
        session.closed().await;
    });
    let server = RunningServer::start(handler, vec![options::public_key_auth(keys)]).await;

    let mut client = connect(server.addr).await;
    assert!(client
        .authenticate_publickey("alice", Arc::new(client_key))
        .await
        .unwrap());
    let mut channel = client.channel_open_session().await.unwrap();
    channel.request_shell(true).await.unwrap();
    assert!(reply(&mut channel).await);

    let connections = server.handle.clone();
    eventually(|| connections.connections().session_count() == 1).await;

    server.stop().await;

    eventually(|| client.is_closed()).await;
}

#[tokio::test]
async fn test_stalled_handshake_is_disconnected() {
    let handler: Arc<dyn Handler> = Arc::new(|_session: Session| async {});
    let server = RunningServer::start(
        handler,
        vec![options::handshake_timeout(Duration::from_millis(300))],
    )
    .await;

    // Version exchange only, then silence
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"SSH-2.0-stalled\r\n").await.unwrap();

    let closed = timeout(STEP, async {
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server kept the stalled connection open");

    server.stop().await;
}
