//! Integration tests: channel and server lifecycle over a real local
//! endpoint, and framing error scenarios.

use std::time::Duration;

use bytes::Bytes;
use hostlink_core::{
    Channel, ChannelEvent, HostError, MAX_MESSAGE_SIZE, Message, PeerIdentity, Server, ServerEvent,
};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

// ── Helpers ──────────────────────────────────────────────────────

async fn next_event<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timeout")
        .expect("sender dropped")
}

/// Channel attached to an event queue and resumed.
fn listening(mut channel: Channel) -> (Channel, mpsc::UnboundedReceiver<ChannelEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    channel.set_listener(tx);
    channel.resume();
    (channel, rx)
}

fn duplex_pair() -> (Channel, Channel) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (
        Channel::from_stream(a, PeerIdentity::default()),
        Channel::from_stream(b, PeerIdentity::default()),
    )
}

// ── Server and connect ───────────────────────────────────────────

#[cfg(unix)]
#[tokio::test]
async fn test_server_accepts_and_messages_flow_both_ways() {
    let id = Server::create_unique_id();
    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    let mut server = Server::new();
    server.start(&id, server_tx).unwrap();

    let client = Channel::connect(&id).await.unwrap();
    assert_eq!(client.peer_process_id(), Some(std::process::id()));

    let accepted = match next_event(&mut server_rx).await {
        ServerEvent::Connection(channel) => channel,
        ServerEvent::Error => panic!("server failed"),
    };
    assert_eq!(accepted.peer_process_id(), Some(std::process::id()));

    let (client, mut client_rx) = listening(client);
    let (accepted, mut accepted_rx) = listening(accepted);

    client.send(Message::StartSession.to_bytes().unwrap()).unwrap();
    match next_event(&mut accepted_rx).await {
        ChannelEvent::Message(bytes) => {
            assert_eq!(Message::from_bytes(&bytes).unwrap(), Message::StartSession)
        }
        other => panic!("unexpected {other:?}"),
    }

    accepted.send(Message::EncodeFrameResult.to_bytes().unwrap()).unwrap();
    match next_event(&mut client_rx).await {
        ChannelEvent::Message(bytes) => {
            assert_eq!(Message::from_bytes(&bytes).unwrap(), Message::EncodeFrameResult)
        }
        other => panic!("unexpected {other:?}"),
    }

    server.stop();
}

#[cfg(unix)]
#[tokio::test]
async fn test_connect_to_missing_endpoint_fails() {
    let result = Channel::connect(&Server::create_unique_id()).await;
    assert!(matches!(result, Err(HostError::Connection(_))));
}

#[cfg(unix)]
#[tokio::test]
async fn test_stopped_server_refuses_connections() {
    let id = Server::create_unique_id();
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut server = Server::new();
    server.start(&id, tx).unwrap();
    server.stop();

    assert!(Channel::connect(&id).await.is_err());
}

#[cfg(unix)]
#[tokio::test]
async fn test_server_accepts_sequential_connections() {
    let id = Server::create_unique_id();
    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    let mut server = Server::new();
    server.start(&id, server_tx).unwrap();

    for _ in 0..2 {
        let client = Channel::connect(&id).await.unwrap();
        match next_event(&mut server_rx).await {
            ServerEvent::Connection(accepted) => drop(accepted),
            ServerEvent::Error => panic!("server failed"),
        }
        drop(client);
    }

    server.stop();
}

#[cfg(unix)]
#[tokio::test]
async fn test_stopped_server_releases_delegate_without_error() {
    let id = Server::create_unique_id();
    let (server_tx, mut server_rx) = mpsc::unbounded_channel();
    let mut server = Server::new();
    server.start(&id, server_tx).unwrap();
    server.stop();

    // The accept task exits and drops its delegate; nothing else arrives.
    let last = tokio::time::timeout(Duration::from_secs(5), server_rx.recv())
        .await
        .expect("accept task still running");
    assert!(last.is_none(), "unexpected {last:?}");
}

// ── Ordering and pause ───────────────────────────────────────────

#[tokio::test]
async fn test_messages_sent_before_resume_arrive_in_order() {
    let (mut sender, receiver) = duplex_pair();

    for i in 1..=100u32 {
        sender.send(Bytes::from(i.to_le_bytes().to_vec())).unwrap();
    }
    sender.resume();

    let (_receiver, mut rx) = listening(receiver);
    for i in 1..=100u32 {
        match next_event(&mut rx).await {
            ChannelEvent::Message(bytes) => assert_eq!(bytes.as_ref(), i.to_le_bytes()),
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_paused_channel_withholds_and_keeps_messages() {
    let (mut sender, receiver) = duplex_pair();
    sender.resume();
    let (receiver, mut rx) = listening(receiver);

    receiver.pause();
    sender.send(Bytes::from_static(b"one")).unwrap();
    sender.send(Bytes::from_static(b"two")).unwrap();

    let early = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(early.is_err(), "delivered while paused");

    let mut receiver = receiver;
    receiver.resume();
    assert_eq!(next_event(&mut rx).await, ChannelEvent::Message(Bytes::from_static(b"one")));
    assert_eq!(next_event(&mut rx).await, ChannelEvent::Message(Bytes::from_static(b"two")));
}

// ── Framing errors ───────────────────────────────────────────────

#[tokio::test]
async fn test_oversized_length_disconnects_once() {
    let (mut raw, stream) = tokio::io::duplex(1024);
    let (channel, mut rx) = listening(Channel::from_stream(stream, PeerIdentity::default()));

    let too_big = (MAX_MESSAGE_SIZE as u32) + 1;
    raw.write_all(&too_big.to_le_bytes()).await.unwrap();

    assert_eq!(next_event(&mut rx).await, ChannelEvent::Disconnected);
    assert!(!channel.is_connected());

    channel.disconnect();
    let again = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(!matches!(again, Ok(Some(_))), "second notification");
}

#[tokio::test]
async fn test_zero_length_frame_disconnects() {
    let (mut raw, stream) = tokio::io::duplex(1024);
    let (channel, mut rx) = listening(Channel::from_stream(stream, PeerIdentity::default()));

    raw.write_all(&0u32.to_le_bytes()).await.unwrap();

    assert_eq!(next_event(&mut rx).await, ChannelEvent::Disconnected);
    assert!(!channel.is_connected());
}

#[tokio::test]
async fn test_invalid_sends_are_rejected_without_disconnecting() {
    let (mut sender, receiver) = duplex_pair();
    sender.resume();
    let (_receiver, mut rx) = listening(receiver);

    assert!(matches!(sender.send(Bytes::new()), Err(HostError::EmptyFrame)));
    assert!(matches!(
        sender.send(Bytes::from(vec![0u8; MAX_MESSAGE_SIZE + 1])),
        Err(HostError::FrameTooLarge { .. })
    ));
    assert!(sender.is_connected());

    sender.send(Bytes::from_static(b"still here")).unwrap();
    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::Message(Bytes::from_static(b"still here"))
    );
}

#[tokio::test]
async fn test_peer_drop_is_reported_as_disconnect() {
    let (sender, receiver) = duplex_pair();
    let (receiver, mut rx) = listening(receiver);

    drop(sender);

    assert_eq!(next_event(&mut rx).await, ChannelEvent::Disconnected);
    assert!(matches!(
        receiver.send(Bytes::from_static(b"late")),
        Err(HostError::ChannelClosed)
    ));
}

#[tokio::test]
async fn test_proxy_sends_from_other_tasks() {
    let (mut sender, receiver) = duplex_pair();
    sender.resume();
    let (_receiver, mut rx) = listening(receiver);

    let proxy = sender.proxy();
    tokio::spawn(async move {
        proxy.send(Bytes::from_static(b"from task")).unwrap();
    })
    .await
    .unwrap();

    assert_eq!(
        next_event(&mut rx).await,
        ChannelEvent::Message(Bytes::from_static(b"from task"))
    );
}
