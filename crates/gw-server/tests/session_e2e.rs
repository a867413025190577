//! End-to-end session tests over the memory transport

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;

use gw_server::transport::memory::{ClientEvent, Credential};
use gw_server::{
    options, ChannelId, Handler, Launch, Permissions, Session, SessionState, Signal,
    TransportError, Window,
};

use common::{authorized, eventually, next_event, stranger_key, trusted_key, TestServer, STEP};

#[derive(Debug, Clone, PartialEq)]
enum Observed {
    Started {
        user: String,
        term: Option<String>,
        window: Option<Window>,
    },
    Resized(Window),
    Signal(Signal),
    Finished(SessionState),
}

fn allow_pty() -> gw_server::ServerOption {
    options::pty_callback(|_user: &str, _permissions: &Permissions| true)
}

/// Handler reporting what it sees on `tx`
fn observing(tx: mpsc::UnboundedSender<Observed>) -> Arc<dyn Handler> {
    Arc::new(move |session: Session| {
        let tx = tx.clone();
        async move {
            let mut windows = session.window_changes().unwrap();
            let mut signals = session.signals().unwrap();
            let pty = session.pty();

            tx.send(Observed::Started {
                user: session.user().to_string(),
                term: pty.as_ref().map(|p| p.term.clone()),
                window: pty.map(|p| p.window),
            })
            .unwrap();

            windows.changed().await.unwrap();
            let window = *windows.borrow();
            tx.send(Observed::Resized(window)).unwrap();

            let signal = signals.recv().await.unwrap();
            tx.send(Observed::Signal(signal)).unwrap();

            session.closed().await;
            tx.send(Observed::Finished(session.state())).unwrap();
        }
    })
}

async fn observe(rx: &mut mpsc::UnboundedReceiver<Observed>) -> Observed {
    timeout(STEP, rx.recv())
        .await
        .expect("handler went quiet")
        .expect("handler dropped its reporter")
}

#[tokio::test]
async fn test_interactive_session_lifecycle() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let server = TestServer::start(
        Some(observing(tx)),
        vec![options::public_key_auth(authorized()), allow_pty()],
    );

    // An untrusted key is refused without affecting the server
    let denied = server
        .connector
        .connect("mallory", vec![Credential::PublicKey(stranger_key())])
        .await;
    assert!(matches!(denied, Err(TransportError::AuthenticationFailed)));

    let client = server
        .connector
        .connect("alice", vec![Credential::PublicKey(trusted_key())])
        .await
        .unwrap();

    let channel = client.open_session().await.unwrap();
    assert!(channel.request_pty("xterm", Window::new(80, 24)).await.unwrap());
    assert!(channel.shell().await.unwrap());

    assert_eq!(
        observe(&mut rx).await,
        Observed::Started {
            user: "alice".to_string(),
            term: Some("xterm".to_string()),
            window: Some(Window::new(80, 24)),
        }
    );

    channel.window_change(Window::new(120, 30)).unwrap();
    assert_eq!(observe(&mut rx).await, Observed::Resized(Window::new(120, 30)));

    channel.signal(Signal::Int).unwrap();
    assert_eq!(observe(&mut rx).await, Observed::Signal(Signal::Int));

    assert_eq!(server.handle.connections().len(), 1);
    assert_eq!(server.handle.connections().session_count(), 1);

    channel.close().unwrap();
    assert_eq!(observe(&mut rx).await, Observed::Finished(SessionState::Closed));

    let handle = server.handle.clone();
    eventually(|| handle.connections().session_count() == 0).await;

    drop(client);
    eventually(|| handle.connections().is_empty()).await;

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_password_fallback_after_key_denied() {
    let server = TestServer::start(
        Some(Arc::new(|_session: Session| async {})),
        vec![
            options::public_key_auth(authorized()),
            options::password_auth(|_user: &str, password: &str| password == "swordfish"),
        ],
    );

    let wrong = server
        .connector
        .connect("bob", vec![Credential::Password("guess".to_string())])
        .await;
    assert!(matches!(wrong, Err(TransportError::AuthenticationFailed)));

    let client = server
        .connector
        .connect(
            "bob",
            vec![
                Credential::PublicKey(stranger_key()),
                Credential::Password("swordfish".to_string()),
            ],
        )
        .await
        .unwrap();

    let handle = server.handle.clone();
    eventually(|| handle.connections().len() == 1).await;
    let connection = handle.connections().list().pop().unwrap();
    assert_eq!(connection.identity.user, "bob");
    assert!(connection.identity.public_key.is_none());

    drop(client);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_no_methods_configured_denies_everyone() {
    let server = TestServer::start(Some(Arc::new(|_session: Session| async {})), vec![]);

    for credentials in [
        vec![],
        vec![Credential::PublicKey(trusted_key())],
        vec![Credential::Password("anything".to_string())],
    ] {
        let result = server.connector.connect("eve", credentials).await;
        assert!(matches!(result, Err(TransportError::AuthenticationFailed)));
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_exec_output_then_exit_status_eof_close() {
    let handler: Arc<dyn Handler> = Arc::new(|session: Session| async move {
        let command = session.command();
        session.write(command.join(",").as_bytes()).await.unwrap();
        session.write_stderr(b"warning").await.unwrap();
        session.set_exit_status(3).unwrap();
    });
    let server = TestServer::start(
        Some(handler),
        vec![options::public_key_auth(authorized())],
    );

    let mut client = server
        .connector
        .connect("alice", vec![Credential::PublicKey(trusted_key())])
        .await
        .unwrap();
    let channel = client.open_session().await.unwrap();
    let id = channel.id();
    assert!(channel.exec("ls -la  /tmp").await.unwrap());

    let mut events = Vec::new();
    for _ in 0..5 {
        events.push(next_event(&mut client).await.unwrap());
    }

    assert_eq!(
        events,
        vec![
            ClientEvent::Data {
                channel: id,
                data: Bytes::from_static(b"ls,-la,/tmp"),
            },
            ClientEvent::ExtendedData {
                channel: id,
                code: 1,
                data: Bytes::from_static(b"warning"),
            },
            ClientEvent::ExitStatus {
                channel: id,
                status: 3,
            },
            ClientEvent::Eof { channel: id },
            ClientEvent::Close { channel: id },
        ]
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_stdin_until_eof_and_default_exit_status() {
    let handler: Arc<dyn Handler> = Arc::new(|session: Session| async move {
        let mut received = Vec::new();
        while let Some(chunk) = session.read().await.unwrap() {
            received.extend_from_slice(&chunk);
        }
        session.write(&received).await.unwrap();
    });
    let server = TestServer::start(
        Some(handler),
        vec![options::public_key_auth(authorized())],
    );

    let mut client = server
        .connector
        .connect("alice", vec![Credential::PublicKey(trusted_key())])
        .await
        .unwrap();
    let channel = client.open_session().await.unwrap();
    assert!(channel.shell().await.unwrap());

    channel.data(b"hello ").unwrap();
    channel.data(b"world").unwrap();
    channel.eof().unwrap();
    // Ignored: stdin is already closed
    channel.data(b"late").unwrap();

    assert_eq!(
        next_event(&mut client).await,
        Some(ClientEvent::Data {
            channel: channel.id(),
            data: Bytes::from_static(b"hello world"),
        })
    );
    assert_eq!(
        next_event(&mut client).await,
        Some(ClientEvent::ExitStatus {
            channel: channel.id(),
            status: 0,
        })
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_panicking_handler_reports_failure_status() {
    let handler: Arc<dyn Handler> = Arc::new(|session: Session| async move {
        if session.raw_command().as_deref() == Some("boom") {
            panic!("handler exploded");
        }
    });
    let server = TestServer::start(
        Some(handler),
        vec![options::public_key_auth(authorized())],
    );

    let mut client = server
        .connector
        .connect("alice", vec![Credential::PublicKey(trusted_key())])
        .await
        .unwrap();

    let first = client.open_session().await.unwrap();
    assert!(first.exec("boom").await.unwrap());
    assert_eq!(
        next_event(&mut client).await,
        Some(ClientEvent::ExitStatus {
            channel: first.id(),
            status: gw_server::session::PANIC_EXIT_STATUS,
        })
    );
    assert_eq!(
        next_event(&mut client).await,
        Some(ClientEvent::Eof { channel: first.id() })
    );
    assert_eq!(
        next_event(&mut client).await,
        Some(ClientEvent::Close { channel: first.id() })
    );

    // The connection survives the panic
    let second = client.open_session().await.unwrap();
    assert!(second.exec("fine").await.unwrap());
    assert_eq!(
        next_event(&mut client).await,
        Some(ClientEvent::ExitStatus {
            channel: second.id(),
            status: 0,
        })
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_open_and_second_start_refused() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let handler: Arc<dyn Handler> = Arc::new(move |session: Session| {
        let counter = Arc::clone(&counter);
        let started_tx = started_tx.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = started_tx.send(session.clone());
            session.closed().await;
        }
    });
    let server = TestServer::start(
        Some(handler),
        vec![options::public_key_auth(authorized())],
    );

    let client = server
        .connector
        .connect("alice", vec![Credential::PublicKey(trusted_key())])
        .await
        .unwrap();

    let id = ChannelId::new(7);
    assert!(client.open_channel(id).await.unwrap());
    assert!(!client.open_channel(id).await.unwrap());

    let channel = client.channel(id);
    assert!(channel.shell().await.unwrap());
    let session = timeout(STEP, started_rx.recv()).await.unwrap().unwrap();
    assert!(!channel.exec("again").await.unwrap());
    assert!(!channel.shell().await.unwrap());
    // Refused starts leave the running session as it was
    assert_eq!(session.launch(), Some(Launch::Shell));
    assert_eq!(session.state(), SessionState::Active);

    // Requests on a channel that was never opened are refused
    assert!(!client.channel(ChannelId::new(99)).shell().await.unwrap());

    let handle = server.handle.clone();
    eventually(|| runs.load(Ordering::SeqCst) == 1).await;
    assert_eq!(handle.connections().session_count(), 1);

    server.stop().await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pty_refused_without_policy_or_when_oversized() {
    let server = TestServer::start(
        Some(Arc::new(|_session: Session| async {})),
        vec![options::public_key_auth(authorized())],
    );
    let client = server
        .connector
        .connect("alice", vec![Credential::PublicKey(trusted_key())])
        .await
        .unwrap();
    let channel = client.open_session().await.unwrap();
    assert!(!channel.request_pty("xterm", Window::new(80, 24)).await.unwrap());
    server.stop().await.unwrap();

    let server = TestServer::start(
        Some(Arc::new(|_session: Session| async {})),
        vec![options::public_key_auth(authorized()), allow_pty()],
    );
    let client = server
        .connector
        .connect("alice", vec![Credential::PublicKey(trusted_key())])
        .await
        .unwrap();
    let channel = client.open_session().await.unwrap();
    assert!(!channel
        .request_pty("xterm", Window::new(1_000_000, 24))
        .await
        .unwrap());
    assert!(channel.request_pty("xterm", Window::new(80, 24)).await.unwrap());
    assert!(!channel.request_pty("xterm", Window::new(80, 24)).await.unwrap());
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_env_only_before_start_and_unknown_signals_refused() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler: Arc<dyn Handler> = Arc::new(move |session: Session| {
        let tx = tx.clone();
        async move {
            tx.send(session.environ()).unwrap();
            session.closed().await;
        }
    });
    let server = TestServer::start(
        Some(handler),
        vec![options::public_key_auth(authorized())],
    );
    let client = server
        .connector
        .connect("alice", vec![Credential::PublicKey(trusted_key())])
        .await
        .unwrap();

    let channel = client.open_session().await.unwrap();
    assert!(channel.env("LANG", "C.UTF-8").await.unwrap());
    assert!(channel.env("TZ", "UTC").await.unwrap());
    assert!(channel.shell().await.unwrap());
    assert!(!channel.env("LATE", "1").await.unwrap());

    let environ = timeout(STEP, rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        environ,
        vec![
            ("LANG".to_string(), "C.UTF-8".to_string()),
            ("TZ".to_string(), "UTC".to_string()),
        ]
    );

    let accepted = client
        .request(gw_protocol::ChannelRequest::Signal {
            channel: channel.id(),
            name: "WINCH".to_string(),
        })
        .await
        .unwrap();
    assert!(!accepted);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_shell_refused_without_handler() {
    let server = TestServer::start(None, vec![options::public_key_auth(authorized())]);
    let client = server
        .connector
        .connect("alice", vec![Credential::PublicKey(trusted_key())])
        .await
        .unwrap();

    let channel = client.open_session().await.unwrap();
    assert!(!channel.shell().await.unwrap());

    server.stop().await.unwrap();
}
