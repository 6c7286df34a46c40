//! Connection to the conversation server.
//!
//! [`Transport`] is the narrow interface the orchestrator talks to; its
//! inbound side arrives as [`TransportEvent`]s on a channel. Failures never
//! surface as errors here: they become connection-state events.

pub mod protocol;
pub mod reconnect;
pub mod ws;

pub use protocol::{ClientMessage, ListenState, ServerMessage, TtsState};
pub use reconnect::ReconnectPolicy;
pub use ws::WsTransport;

use std::sync::{Arc, Mutex, MutexGuard};

/// Everything the transport reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectionChanged { connected: bool },
    Message(ServerMessage),
    /// Binary frame, forwarded verbatim.
    Audio(Vec<u8>),
    /// The last allowed reconnect attempt failed.
    ReconnectExhausted,
}

pub trait Transport: Send {
    /// Connect to `url`, replacing any current connection or pending attempt,
    /// and re-enable automatic reconnection.
    fn connect(&self, url: &str);

    /// Close the connection and cancel every pending reconnect.
    fn disconnect(&self);

    /// Send a control message as a text frame. Dropped while disconnected.
    fn send(&self, message: &ClientMessage);

    /// Send compressed audio as a binary frame.
    fn send_audio(&self, data: Vec<u8>);

    /// Signal the end of the outgoing audio stream.
    fn send_audio_end(&self) {
        self.send_audio(Vec::new());
    }
}

/// One recorded call on a [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect(String),
    Disconnect,
    Send(ClientMessage),
    Audio(Vec<u8>),
}

/// Transport that records calls. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    calls: Arc<Mutex<Vec<TransportCall>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().clone()
    }

    /// Control messages sent so far, in order.
    pub fn sent_messages(&self) -> Vec<ClientMessage> {
        self.lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Send(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Binary frames sent so far, including empty end markers.
    pub fn audio_frames(&self) -> Vec<Vec<u8>> {
        self.lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Audio(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn record(&self, call: TransportCall) {
        self.lock().push(call);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TransportCall>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Transport for MockTransport {
    fn connect(&self, url: &str) {
        self.record(TransportCall::Connect(url.to_string()));
    }

    fn disconnect(&self) {
        self.record(TransportCall::Disconnect);
    }

    fn send(&self, message: &ClientMessage) {
        self.record(TransportCall::Send(message.clone()));
    }

    fn send_audio(&self, data: Vec<u8>) {
        self.record(TransportCall::Audio(data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_records_calls_in_order() {
        let transport = MockTransport::new();
        let observer = transport.clone();

        transport.connect("ws://localhost:8000/");
        transport.send(&ClientMessage::listen(ListenState::Start));
        transport.send_audio(vec![1, 2]);
        transport.send_audio_end();
        transport.disconnect();

        assert_eq!(
            observer.calls(),
            vec![
                TransportCall::Connect("ws://localhost:8000/".to_string()),
                TransportCall::Send(ClientMessage::listen(ListenState::Start)),
                TransportCall::Audio(vec![1, 2]),
                TransportCall::Audio(Vec::new()),
                TransportCall::Disconnect,
            ]
        );
        assert_eq!(observer.audio_frames(), vec![vec![1, 2], Vec::new()]);
        assert_eq!(observer.sent_messages().len(), 1);

        observer.clear();
        assert!(transport.calls().is_empty());
    }
}
