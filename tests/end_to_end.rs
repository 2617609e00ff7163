//! Server and client driven together over real sockets

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use session_chat::{
    ChatClient, ChatServer, ClientConfig, ClientError, ClientEvent, Command, CommandError,
    DirectoryLimits, MessageType, SessionDirectory, Status, UserId,
};

async fn start_server(limits: DirectoryLimits) -> (SocketAddr, Arc<SessionDirectory>) {
    let server = ChatServer::bind("127.0.0.1:0", limits).await.unwrap();
    let addr = server.local_addr().unwrap();
    let directory = server.directory();
    tokio::spawn(server.run());
    (addr, directory)
}

async fn connect(addr: SocketAddr) -> (ChatClient, mpsc::UnboundedReceiver<ClientEvent>) {
    let mut config = ClientConfig::new("127.0.0.1", addr.port());
    config.timeout_secs = 5;
    ChatClient::connect(&config).await.unwrap()
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

fn user(name: &str) -> UserId {
    UserId::from(name)
}

#[tokio::test]
async fn test_register_login_send_logoff_relogin() {
    let (addr, directory) = start_server(DirectoryLimits::default()).await;
    let (mut alice, _alice_events) = connect(addr).await;
    let (mut bob, mut bob_events) = connect(addr).await;

    let reply = alice.execute(Command::Register(user("alice"))).await.unwrap();
    assert_eq!(reply.message_type, MessageType::RegistrationResponse);
    assert!(reply.is_ok());
    assert!(bob.execute(Command::Register(user("bob"))).await.unwrap().is_ok());

    assert!(alice.execute(Command::Login(user("alice"))).await.unwrap().is_ok());
    assert!(bob.execute(Command::Login(user("bob"))).await.unwrap().is_ok());
    assert!(alice.snapshot().logged_in());
    assert_eq!(alice.snapshot().user_id, Some(user("alice")));

    let reply = alice
        .execute(Command::Send {
            to: user("bob"),
            text: "hi".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(reply.message_type, MessageType::SendTextResponse);
    assert!(reply.is_ok());

    let event = tokio::time::timeout(Duration::from_secs(5), bob_events.recv())
        .await
        .unwrap();
    assert_eq!(
        event,
        Some(ClientEvent::Text {
            from: user("alice"),
            text: "hi".to_string()
        })
    );

    assert!(alice.execute(Command::Logoff).await.unwrap().is_ok());
    assert!(!alice.snapshot().logged_in());
    assert!(alice.execute(Command::Login(user("alice"))).await.unwrap().is_ok());
    assert_eq!(directory.active_logins().await, 2);

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn test_application_errors_keep_session() {
    let (addr, _directory) = start_server(DirectoryLimits::default()).await;
    let (mut alice, _events) = connect(addr).await;
    let (mut other, _other_events) = connect(addr).await;

    alice.execute(Command::Register(user("alice"))).await.unwrap();
    let reply = other.execute(Command::Register(user("alice"))).await.unwrap();
    assert_eq!(reply.status, Some(Status::InvalidRequest));

    alice.execute(Command::Login(user("alice"))).await.unwrap();
    let reply = alice
        .execute(Command::Send {
            to: user("nobody"),
            text: "hello?".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(reply.status, Some(Status::InvalidRequest));
    assert!(reply.text_or_empty().contains("nobody"));

    // Local guards never reach the server
    let err = other.execute(Command::Logoff).await.unwrap_err();
    assert!(matches!(err, ClientError::Command(CommandError::NotLoggedIn)));
    let err = alice.execute(Command::Login(user("alice"))).await.unwrap_err();
    assert!(matches!(err, ClientError::Command(CommandError::AlreadyLoggedIn)));

    assert!(alice.snapshot().connected);
    assert!(alice.snapshot().logged_in());
}

#[tokio::test]
async fn test_queued_login_is_promoted_on_logoff() {
    let (addr, directory) = start_server(DirectoryLimits::new(1)).await;
    let (mut alice, _alice_events) = connect(addr).await;
    let (mut bob, mut bob_events) = connect(addr).await;

    alice.execute(Command::Register(user("alice"))).await.unwrap();
    alice.execute(Command::Login(user("alice"))).await.unwrap();
    bob.execute(Command::Register(user("bob"))).await.unwrap();

    let reply = bob.execute(Command::Login(user("bob"))).await.unwrap();
    assert_eq!(reply.status, Some(Status::RequestQueued));
    let snapshot = bob.snapshot();
    assert!(snapshot.queued_for_login());
    assert!(!snapshot.logged_in());
    assert!(!snapshot.awaiting_response);

    let err = bob.execute(Command::Login(user("bob"))).await.unwrap_err();
    assert!(matches!(err, ClientError::Command(CommandError::InLoginQueue)));

    alice.execute(Command::Logoff).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), bob_events.recv())
        .await
        .unwrap();
    assert!(matches!(event, Some(ClientEvent::Promoted { .. })));
    assert!(bob.snapshot().logged_in());
    assert_eq!(directory.active_logins().await, 1);
    assert_eq!(directory.waiting_len().await, 0);
}

#[tokio::test]
async fn test_disconnected_queued_client_is_never_promoted() {
    let (addr, directory) = start_server(DirectoryLimits::new(1)).await;
    let (mut alice, _alice_events) = connect(addr).await;
    let (mut bob, _bob_events) = connect(addr).await;

    alice.execute(Command::Register(user("alice"))).await.unwrap();
    alice.execute(Command::Login(user("alice"))).await.unwrap();
    bob.execute(Command::Register(user("bob"))).await.unwrap();
    bob.execute(Command::Login(user("bob"))).await.unwrap();
    assert!(directory.is_waiting(&user("bob")).await);

    bob.shutdown().await;
    eventually(|| {
        let directory = Arc::clone(&directory);
        async move { directory.waiting_len().await == 0 }
    })
    .await;

    alice.execute(Command::Logoff).await.unwrap();
    assert_eq!(directory.active_logins().await, 0);
    assert!(!directory.is_registered(&user("bob")).await);
}

#[tokio::test]
async fn test_silent_server_times_out_and_close_aborts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Accepts and reads requests but never answers; drops the socket
    // after the second request.
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = ws.next().await;
        let _ = ws.next().await;
    });

    let mut config = ClientConfig::new("127.0.0.1", addr.port());
    config.timeout_secs = 1;
    let (mut client, _events) = ChatClient::connect(&config).await.unwrap();

    let err = client
        .execute(Command::Register(user("alice")))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NoResponse(_)));
    assert!(!client.snapshot().awaiting_response);

    let err = client
        .execute(Command::Register(user("alice")))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Aborted | ClientError::NoResponse(_)));

    eventually(|| {
        let connected = client.snapshot().connected;
        async move { !connected }
    })
    .await;
    assert!(matches!(
        client.execute(Command::Register(user("alice"))).await,
        Err(ClientError::Disconnected)
    ));
}
