use futures::{SinkExt, Stream, StreamExt};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Message},
};

use p2p_file_share::config::RelayConfig;
use p2p_file_share::registry::PeerRegistry;
use p2p_file_share::relay::{ClientMessage, RelayClient, RelayServer, ServerMessage, SignalingRelay};

struct TestRelay {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Relay on an ephemeral port that hands out the given short IDs in order
async fn start_relay(ids: &[&str]) -> TestRelay {
    let queue = Mutex::new(ids.iter().map(|s| s.to_string()).collect::<Vec<_>>());
    let registry = PeerRegistry::new(&RelayConfig::default())
        .with_generator(Arc::new(move |_| queue.lock().unwrap().remove(0)));
    let relay = Arc::new(SignalingRelay::new(registry));

    let server = RelayServer::bind_with("127.0.0.1:0".parse().unwrap(), relay)
        .await
        .unwrap();
    let url = format!("ws://{}", server.local_addr().unwrap());

    let (tx, rx) = oneshot::channel();
    tokio::spawn(server.run(async {
        let _ = rx.await;
    }));

    TestRelay {
        url,
        shutdown: Some(tx),
    }
}

async fn next(client: &mut RelayClient) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(2), client.recv())
        .await
        .expect("timed out waiting for relay message")
        .expect("relay link closed")
}

/// Skip peer-list broadcasts until something else arrives
async fn next_non_list(client: &mut RelayClient) -> ServerMessage {
    loop {
        match next(client).await {
            ServerMessage::PeerList { .. } => continue,
            other => return other,
        }
    }
}

/// Next non-list message straight off a raw WebSocket
async fn next_raw<S>(stream: &mut S) -> ServerMessage
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("timed out waiting for relay frame")
            .expect("relay closed the socket")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            let msg: ServerMessage = serde_json::from_str(&text).unwrap();
            if !matches!(msg, ServerMessage::PeerList { .. }) {
                return msg;
            }
        }
    }
}

#[tokio::test]
async fn test_registration_and_peer_list() {
    let relay = start_relay(&["AB12CD", "EF34GH"]).await;

    let mut a = RelayClient::connect(&relay.url).await.unwrap();
    match next(&mut a).await {
        ServerMessage::PeerRegistered { short_id, display_name, .. } => {
            assert_eq!(short_id, "AB12CD");
            assert!(display_name.ends_with(" AB12CD"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(next(&mut a).await, ServerMessage::PeerList { peers } if peers.len() == 1));

    let mut b = RelayClient::connect(&relay.url).await.unwrap();
    assert!(matches!(next(&mut b).await, ServerMessage::PeerRegistered { short_id, .. } if short_id == "EF34GH"));
    match next(&mut a).await {
        ServerMessage::PeerList { peers } => {
            let ids: Vec<_> = peers.iter().map(|p| p.short_id.as_str()).collect();
            assert_eq!(ids, vec!["AB12CD", "EF34GH"]);
        }
        other => panic!("unexpected {:?}", other),
    }

    drop(b);
    match next(&mut a).await {
        ServerMessage::PeerList { peers } => {
            assert_eq!(peers.len(), 1);
            assert_eq!(peers[0].short_id, "AB12CD");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_connect_intent_and_offer_forwarding() {
    let relay = start_relay(&["AB12CD", "EF34GH"]).await;
    let mut a = RelayClient::connect(&relay.url).await.unwrap();
    let a_id = match next(&mut a).await {
        ServerMessage::PeerRegistered { connection_id, .. } => connection_id,
        other => panic!("unexpected {:?}", other),
    };
    let mut b = RelayClient::connect(&relay.url).await.unwrap();
    let b_id = match next(&mut b).await {
        ServerMessage::PeerRegistered { connection_id, .. } => connection_id,
        other => panic!("unexpected {:?}", other),
    };

    b.send(ClientMessage::ConnectIntent { target_short_id: "AB12CD".into() })
        .unwrap();
    assert_eq!(
        next_non_list(&mut a).await,
        ServerMessage::ConnectIntent {
            from_short_id: "EF34GH".into(),
            from_connection_id: b_id,
        }
    );

    let blob = json!({"sdp": "v=0", "opaque": [1, 2, 3]});
    b.send(ClientMessage::Offer { target_connection_id: a_id, blob: blob.clone() })
        .unwrap();
    assert_eq!(
        next_non_list(&mut a).await,
        ServerMessage::Offer {
            from_connection_id: b_id,
            from_short_id: "EF34GH".into(),
            blob,
        }
    );

    a.send(ClientMessage::Candidate { target_connection_id: b_id, blob: json!({"c": 1}) })
        .unwrap();
    assert_eq!(
        next_non_list(&mut b).await,
        ServerMessage::Candidate { from_connection_id: a_id, blob: json!({"c": 1}) }
    );
}

#[tokio::test]
async fn test_unknown_short_id_reports_not_found() {
    let relay = start_relay(&["AB12CD"]).await;
    let mut a = RelayClient::connect(&relay.url).await.unwrap();
    assert!(matches!(next(&mut a).await, ServerMessage::PeerRegistered { .. }));

    a.send(ClientMessage::ConnectIntent { target_short_id: "ZZZZZZ".into() })
        .unwrap();
    assert_eq!(
        next_non_list(&mut a).await,
        ServerMessage::PeerNotFound { short_id: "ZZZZZZ".into() }
    );
}

#[tokio::test]
async fn test_rename_and_malformed_messages() {
    let relay = start_relay(&["AB12CD"]).await;
    let (ws, _) = connect_async(relay.url.as_str()).await.unwrap();
    let (mut sink, mut stream) = ws.split();

    assert!(matches!(next_raw(&mut stream).await, ServerMessage::PeerRegistered { .. }));

    // Garbage and unknown types are ignored; the connection stays usable
    sink.send(Message::Text("{not json".into())).await.unwrap();
    sink.send(Message::Text(r#"{"type":"file-accept"}"#.into())).await.unwrap();
    sink.send(Message::Text(r#"{"type":"rename-request","name":"  Alice  "}"#.into()))
        .await
        .unwrap();

    assert_eq!(next_raw(&mut stream).await, ServerMessage::RenameAck { name: "Alice".into() });
}

#[tokio::test]
async fn test_handshake_headers_feed_metadata() {
    let relay = start_relay(&["AB12CD"]).await;

    let mut request = relay.url.as_str().into_client_request().unwrap();
    request.headers_mut().insert(
        "user-agent",
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)".parse().unwrap(),
    );
    request
        .headers_mut()
        .insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());

    let (ws, _) = connect_async(request).await.unwrap();
    let (_sink, mut stream) = ws.split();
    let frame = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let text = match frame {
        Message::Text(text) => text,
        other => panic!("unexpected frame {:?}", other),
    };
    match serde_json::from_str::<ServerMessage>(&text).unwrap() {
        ServerMessage::PeerRegistered { ip, device, .. } => {
            assert_eq!(ip, "203.0.113.7");
            assert_eq!(device, "iPhone");
        }
        other => panic!("unexpected {:?}", other),
    }
}
