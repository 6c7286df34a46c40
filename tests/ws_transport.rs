//! WebSocket transport against a local server.

use crossbeam_channel::{Receiver, unbounded};
use futures_util::{SinkExt, StreamExt};
use lumi::transport::{
    ClientMessage, ListenState, ReconnectPolicy, ServerMessage, Transport, TransportEvent,
    TtsState, WsTransport,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{Instant, sleep};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// What the server does with each accepted connection.
#[derive(Clone, Copy)]
enum Behavior {
    /// Record frames, answer the hello, push one audio frame.
    Converse,
    /// Close right after the hello with this code.
    CloseWith(u16),
}

#[derive(Default)]
struct Seen {
    paths: Vec<String>,
    texts: Vec<String>,
    binaries: Vec<Vec<u8>>,
}

async fn serve(behavior: Behavior) -> (String, Arc<Mutex<Seen>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/xiaozhi/v1/", listener.local_addr().unwrap());
    let seen = Arc::new(Mutex::new(Seen::default()));
    let shared = Arc::clone(&seen);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let seen = Arc::clone(&shared);
            tokio::spawn(async move {
                let path = Arc::new(Mutex::new(String::new()));
                let captured = Arc::clone(&path);
                let callback = move |req: &Request, resp: Response| {
                    *captured.lock().unwrap() = req.uri().to_string();
                    Ok::<Response, ErrorResponse>(resp)
                };
                let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
                    return;
                };
                seen.lock().unwrap().paths.push(path.lock().unwrap().clone());

                // The client speaks first.
                if let Some(Ok(Message::Text(hello))) = ws.next().await {
                    seen.lock().unwrap().texts.push(hello);
                }

                match behavior {
                    Behavior::CloseWith(code) => {
                        let _ = ws
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::from(code),
                                reason: "bye".into(),
                            })))
                            .await;
                        while let Some(Ok(_)) = ws.next().await {}
                    }
                    Behavior::Converse => {
                        let reply = r#"{"type":"hello","session_id":"s-42"}"#;
                        let _ = ws.send(Message::Text(reply.to_string())).await;
                        let _ = ws.send(Message::Text(r#"{"type":"iot"}"#.to_string())).await;
                        let _ = ws
                            .send(Message::Text(r#"{"type":"tts","state":"start"}"#.to_string()))
                            .await;
                        let _ = ws.send(Message::Binary(vec![1, 2, 3, 4])).await;
                        while let Some(Ok(message)) = ws.next().await {
                            let mut seen = seen.lock().unwrap();
                            match message {
                                Message::Text(text) => seen.texts.push(text),
                                Message::Binary(data) => seen.binaries.push(data),
                                Message::Close(_) => break,
                                _ => {}
                            }
                        }
                    }
                }
            });
        }
    });

    (url, seen)
}

/// Poll the event channel until `pred` matches or two seconds pass.
async fn wait_for(
    events: &Receiver<TransportEvent>,
    pred: impl Fn(&TransportEvent) -> bool,
) -> Option<TransportEvent> {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        while let Ok(event) = events.try_recv() {
            if pred(&event) {
                return Some(event);
            }
        }
        sleep(Duration::from_millis(10)).await;
    }
    None
}

async fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    cond()
}

fn connected(value: bool) -> impl Fn(&TransportEvent) -> bool {
    move |e| *e == TransportEvent::ConnectionChanged { connected: value }
}

fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        base: Duration::from_millis(20),
        max_delay: Duration::from_millis(50),
        max_attempts,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn handshake_messages_and_audio_flow_both_ways() {
    let (url, seen) = serve(Behavior::Converse).await;
    let (tx, events) = unbounded();
    let transport = WsTransport::new("Test Device", tx).unwrap();
    let device_id = transport.identity().device_id.clone();

    transport.connect(&url);
    assert!(wait_for(&events, connected(true)).await.is_some());

    let hello = wait_for(&events, |e| matches!(e, TransportEvent::Message(_))).await;
    assert_eq!(
        hello,
        Some(TransportEvent::Message(ServerMessage::Hello {
            session_id: Some("s-42".to_string())
        }))
    );
    // The unknown "iot" message is swallowed; the next one is the tts start.
    let next = wait_for(&events, |e| matches!(e, TransportEvent::Message(_))).await;
    assert_eq!(
        next,
        Some(TransportEvent::Message(ServerMessage::Tts {
            state: TtsState::Start,
            text: None
        }))
    );
    let audio = wait_for(&events, |e| matches!(e, TransportEvent::Audio(_))).await;
    assert_eq!(audio, Some(TransportEvent::Audio(vec![1, 2, 3, 4])));

    transport.send(&ClientMessage::listen(ListenState::Start));
    transport.send_audio(vec![9, 9]);
    transport.send_audio_end();
    assert!(wait_until(|| seen.lock().unwrap().binaries.len() == 2).await);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.paths, vec![format!("/xiaozhi/v1/?device-id={device_id}")]);

    let hello: serde_json::Value = serde_json::from_str(&seen.texts[0]).unwrap();
    assert_eq!(hello["type"], "hello");
    assert_eq!(hello["device_id"], device_id.as_str());
    assert_eq!(hello["device_name"], "Test Device");
    assert_eq!(hello["token"], "");

    let listen: serde_json::Value = serde_json::from_str(&seen.texts[1]).unwrap();
    assert_eq!(listen["type"], "listen");
    assert_eq!(listen["state"], "start");
    assert_eq!(seen.binaries, vec![vec![9, 9], Vec::new()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn abnormal_close_reconnects() {
    let (url, seen) = serve(Behavior::CloseWith(1011)).await;
    let (tx, events) = unbounded();
    let transport = WsTransport::with_policy("Test Device", fast_policy(10), tx).unwrap();

    transport.connect(&url);
    assert!(wait_for(&events, connected(true)).await.is_some());
    assert!(wait_for(&events, connected(false)).await.is_some());
    assert!(wait_for(&events, connected(true)).await.is_some());
    assert!(seen.lock().unwrap().paths.len() >= 2);

    transport.disconnect();
}

#[tokio::test(flavor = "multi_thread")]
async fn normal_close_does_not_reconnect() {
    let (url, seen) = serve(Behavior::CloseWith(1000)).await;
    let (tx, events) = unbounded();
    let transport = WsTransport::with_policy("Test Device", fast_policy(10), tx).unwrap();

    transport.connect(&url);
    assert!(wait_for(&events, connected(true)).await.is_some());
    assert!(wait_for(&events, connected(false)).await.is_some());

    sleep(Duration::from_millis(200)).await;
    assert_eq!(seen.lock().unwrap().paths.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnect_cancels_pending_reconnect() {
    let (url, seen) = serve(Behavior::CloseWith(1011)).await;
    let (tx, events) = unbounded();
    let policy = ReconnectPolicy {
        base: Duration::from_millis(300),
        max_delay: Duration::from_millis(300),
        max_attempts: 10,
    };
    let transport = WsTransport::with_policy("Test Device", policy, tx).unwrap();

    transport.connect(&url);
    assert!(wait_for(&events, connected(false)).await.is_some());
    transport.disconnect();

    sleep(Duration::from_millis(600)).await;
    assert_eq!(seen.lock().unwrap().paths.len(), 1);
    assert!(events.try_iter().all(|e| e != TransportEvent::ConnectionChanged { connected: true }));
}

#[tokio::test(flavor = "multi_thread")]
async fn gives_up_after_max_attempts() {
    // Reserve a port, then free it so nothing listens there.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());
    drop(listener);

    let (tx, events) = unbounded();
    let transport = WsTransport::with_policy("Test Device", fast_policy(2), tx).unwrap();
    transport.connect(&url);

    let mut seen = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && seen.last() != Some(&TransportEvent::ReconnectExhausted) {
        seen.extend(events.try_iter());
        sleep(Duration::from_millis(10)).await;
    }

    // One initial attempt plus two retries, each reported as disconnected.
    assert_eq!(
        seen,
        vec![
            TransportEvent::ConnectionChanged { connected: false },
            TransportEvent::ConnectionChanged { connected: false },
            TransportEvent::ConnectionChanged { connected: false },
            TransportEvent::ReconnectExhausted,
        ]
    );
}
