//! WebSocket transport.
//!
//! A dedicated thread runs a current-thread tokio runtime that owns the
//! socket. Callers talk to it through an unbounded command channel, so every
//! [`Transport`] method returns immediately; everything inbound, including
//! connection state, comes back as [`TransportEvent`]s.

use super::protocol::{ClientMessage, ServerMessage};
use super::reconnect::ReconnectPolicy;
use super::{Transport, TransportEvent};
use crate::error::{LumiError, Result};
use crossbeam_channel::Sender;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Close code of an orderly shutdown; any other code triggers a reconnect.
const NORMAL_CLOSE: u16 = 1000;

/// Identity announced in the handshake, fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub device_mac: String,
    pub device_name: String,
}

impl DeviceIdentity {
    /// Random 12-hex-digit id and a random colon-separated MAC.
    pub fn generate(device_name: &str) -> Self {
        let device_id: String = uuid::Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(12)
            .collect();
        let mut rng = rand::thread_rng();
        let device_mac = (0..6)
            .map(|_| format!("{:02X}", rng.r#gen::<u8>()))
            .collect::<Vec<_>>()
            .join(":");
        Self {
            device_id,
            device_mac,
            device_name: device_name.to_string(),
        }
    }

    /// Server URL with the device id appended as a query parameter.
    pub fn connection_url(&self, base: &str) -> String {
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{base}{separator}device-id={}", self.device_id)
    }

    fn hello(&self) -> ClientMessage {
        ClientMessage::hello(&self.device_id, &self.device_name, &self.device_mac)
    }
}

#[derive(Debug)]
enum WsCommand {
    Connect(String),
    Disconnect,
    Text(String),
    Binary(Vec<u8>),
    Shutdown,
}

pub struct WsTransport {
    identity: DeviceIdentity,
    commands: mpsc::UnboundedSender<WsCommand>,
    handle: Option<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new(device_name: &str, events: Sender<TransportEvent>) -> Result<Self> {
        Self::with_policy(device_name, ReconnectPolicy::default(), events)
    }

    pub fn with_policy(
        device_name: &str,
        policy: ReconnectPolicy,
        events: Sender<TransportEvent>,
    ) -> Result<Self> {
        let identity = DeviceIdentity::generate(device_name);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| LumiError::Transport {
                message: format!("failed to build transport runtime: {e}"),
            })?;

        let (commands, receiver) = mpsc::unbounded_channel();
        let worker = Worker {
            identity: identity.clone(),
            policy,
            events,
            url: None,
            attempts: 0,
        };
        let handle = thread::Builder::new()
            .name("lumi-transport".to_string())
            .spawn(move || runtime.block_on(worker.run(receiver)))?;

        tracing::debug!(device_id = %identity.device_id, mac = %identity.device_mac, "transport ready");
        Ok(Self {
            identity,
            commands,
            handle: Some(handle),
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn command(&self, command: WsCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("transport worker is gone, command dropped");
        }
    }
}

impl Transport for WsTransport {
    fn connect(&self, url: &str) {
        self.command(WsCommand::Connect(url.to_string()));
    }

    fn disconnect(&self) {
        self.command(WsCommand::Disconnect);
    }

    fn send(&self, message: &ClientMessage) {
        match message.to_json() {
            Ok(json) => self.command(WsCommand::Text(json)),
            Err(e) => tracing::warn!(error = %e, "failed to serialize control message"),
        }
    }

    fn send_audio(&self, data: Vec<u8>) {
        self.command(WsCommand::Binary(data));
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        let _ = self.commands.send(WsCommand::Shutdown);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("transport thread panicked");
        }
    }
}

/// What the worker does next.
enum Phase {
    Idle,
    Connecting,
    /// Waiting to reconnect until the deadline.
    Backoff(Instant),
    Exit,
}

/// How a live session ended.
enum SessionEnd {
    /// Local `disconnect()`.
    Disconnected,
    /// Local `connect()` to a (possibly different) address.
    Replaced(String),
    /// Close frame from the server.
    Closed(Option<u16>),
    /// Socket error or stream ended without a close frame.
    Failed,
    Shutdown,
}

struct Worker {
    identity: DeviceIdentity,
    policy: ReconnectPolicy,
    events: Sender<TransportEvent>,
    url: Option<String>,
    attempts: u32,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<WsCommand>) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => match commands.recv().await {
                    Some(command) => self.on_command_while_offline(command, Phase::Idle),
                    None => Phase::Exit,
                },
                Phase::Backoff(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => Phase::Connecting,
                        command = commands.recv() => match command {
                            Some(command) => self.on_command_while_offline(command, Phase::Backoff(deadline)),
                            None => Phase::Exit,
                        },
                    }
                }
                Phase::Connecting => self.connect(&mut commands).await,
                Phase::Exit => break,
            };
        }
        tracing::debug!("transport worker exited");
    }

    fn on_command_while_offline(&mut self, command: WsCommand, current: Phase) -> Phase {
        match command {
            WsCommand::Connect(url) => {
                self.url = Some(url);
                self.attempts = 0;
                Phase::Connecting
            }
            WsCommand::Disconnect => {
                if matches!(current, Phase::Backoff(_)) {
                    tracing::info!("pending reconnect cancelled");
                }
                self.url = None;
                self.attempts = 0;
                Phase::Idle
            }
            WsCommand::Text(_) | WsCommand::Binary(_) => {
                tracing::debug!("not connected, outgoing frame dropped");
                current
            }
            WsCommand::Shutdown => Phase::Exit,
        }
    }

    async fn connect(&mut self, commands: &mut mpsc::UnboundedReceiver<WsCommand>) -> Phase {
        let Some(base) = self.url.clone() else {
            return Phase::Idle;
        };
        let url = self.identity.connection_url(&base);
        tracing::info!(url = %url, attempt = self.attempts + 1, "connecting");

        let connecting = tokio_tungstenite::connect_async(url.as_str());
        tokio::pin!(connecting);
        let stream = loop {
            tokio::select! {
                result = &mut connecting => match result {
                    Ok((stream, _)) => break stream,
                    Err(e) => {
                        tracing::warn!(error = %e, "connection failed");
                        self.emit(TransportEvent::ConnectionChanged { connected: false });
                        return self.schedule_reconnect();
                    }
                },
                command = commands.recv() => match command {
                    // A new connect replaces the attempt in flight.
                    Some(WsCommand::Connect(url)) => {
                        self.url = Some(url);
                        self.attempts = 0;
                        return Phase::Connecting;
                    }
                    Some(WsCommand::Disconnect) => {
                        self.url = None;
                        self.attempts = 0;
                        return Phase::Idle;
                    }
                    Some(WsCommand::Text(_) | WsCommand::Binary(_)) => {
                        tracing::debug!("still connecting, outgoing frame dropped");
                    }
                    Some(WsCommand::Shutdown) | None => return Phase::Exit,
                },
            }
        };

        tracing::info!("connected");
        self.attempts = 0;
        self.emit(TransportEvent::ConnectionChanged { connected: true });

        let end = self.session(stream, commands).await;
        self.emit(TransportEvent::ConnectionChanged { connected: false });
        match end {
            SessionEnd::Disconnected => {
                tracing::info!("disconnected by user");
                self.url = None;
                Phase::Idle
            }
            SessionEnd::Replaced(url) => {
                self.url = Some(url);
                Phase::Connecting
            }
            SessionEnd::Closed(Some(NORMAL_CLOSE)) => {
                tracing::info!("server closed the connection");
                Phase::Idle
            }
            SessionEnd::Closed(code) => {
                tracing::warn!(?code, "connection closed abnormally");
                self.schedule_reconnect()
            }
            SessionEnd::Failed => self.schedule_reconnect(),
            SessionEnd::Shutdown => Phase::Exit,
        }
    }

    async fn session(
        &mut self,
        stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        commands: &mut mpsc::UnboundedReceiver<WsCommand>,
    ) -> SessionEnd {
        let (mut write, mut read) = stream.split();

        match self.identity.hello().to_json() {
            Ok(hello) => {
                if let Err(e) = write.send(WsMessage::Text(hello)).await {
                    tracing::warn!(error = %e, "failed to send hello");
                    return SessionEnd::Failed;
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize hello"),
        }

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let outgoing = match command {
                        Some(WsCommand::Text(text)) => WsMessage::Text(text),
                        Some(WsCommand::Binary(data)) => WsMessage::Binary(data),
                        Some(WsCommand::Connect(url)) => {
                            let _ = write.send(close_frame("reconnect")).await;
                            return SessionEnd::Replaced(url);
                        }
                        Some(WsCommand::Disconnect) => {
                            let _ = write.send(close_frame("User disconnect")).await;
                            return SessionEnd::Disconnected;
                        }
                        Some(WsCommand::Shutdown) | None => {
                            let _ = write.send(close_frame("shutdown")).await;
                            return SessionEnd::Shutdown;
                        }
                    };
                    if let Err(e) = write.send(outgoing).await {
                        tracing::warn!(error = %e, "send failed");
                        return SessionEnd::Failed;
                    }
                }
                message = read.next() => match message {
                    Some(Ok(WsMessage::Text(text))) => self.dispatch_text(&text),
                    Some(Ok(WsMessage::Binary(data))) => {
                        tracing::trace!(bytes = data.len(), "audio received");
                        self.emit(TransportEvent::Audio(data));
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = write.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code));
                        return SessionEnd::Closed(code);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "socket error");
                        return SessionEnd::Failed;
                    }
                    None => {
                        tracing::warn!("socket stream ended");
                        return SessionEnd::Failed;
                    }
                },
            }
        }
    }

    fn dispatch_text(&self, text: &str) {
        match ServerMessage::from_json(text) {
            Ok(ServerMessage::Unknown) => tracing::debug!(text, "ignoring unknown message type"),
            Ok(message) => {
                tracing::debug!(?message, "message received");
                self.emit(TransportEvent::Message(message));
            }
            Err(e) => tracing::warn!(error = %e, text, "malformed message ignored"),
        }
    }

    fn schedule_reconnect(&mut self) -> Phase {
        if self.url.is_none() {
            return Phase::Idle;
        }
        match self.policy.next(&mut self.attempts) {
            Some(delay) => {
                tracing::info!(
                    attempt = self.attempts,
                    max = self.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "reconnect scheduled"
                );
                Phase::Backoff(Instant::now() + delay)
            }
            None => {
                tracing::error!(attempts = self.attempts, "max reconnect attempts reached, giving up");
                self.emit(TransportEvent::ReconnectExhausted);
                Phase::Idle
            }
        }
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("transport listener gone");
        }
    }
}

fn close_frame(reason: &'static str) -> WsMessage {
    WsMessage::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: reason.into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ListenState;

    #[test]
    fn device_id_is_twelve_hex_digits() {
        let identity = DeviceIdentity::generate("Lumi Assistant");
        assert_eq!(identity.device_id.len(), 12);
        assert!(identity.device_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(identity.device_name, "Lumi Assistant");
    }

    #[test]
    fn mac_is_six_uppercase_octets() {
        let identity = DeviceIdentity::generate("x");
        let octets: Vec<&str> = identity.device_mac.split(':').collect();
        assert_eq!(octets.len(), 6);
        for octet in octets {
            assert_eq!(octet.len(), 2);
            assert!(octet.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
        }
    }

    #[test]
    fn identities_differ_between_generations() {
        let a = DeviceIdentity::generate("x");
        let b = DeviceIdentity::generate("x");
        assert_ne!(a.device_id, b.device_id);
    }

    #[test]
    fn connection_url_appends_device_id() {
        let identity = DeviceIdentity {
            device_id: "0123456789ab".to_string(),
            device_mac: String::new(),
            device_name: String::new(),
        };
        assert_eq!(
            identity.connection_url("ws://10.0.0.2:8000/xiaozhi/v1/"),
            "ws://10.0.0.2:8000/xiaozhi/v1/?device-id=0123456789ab"
        );
        assert_eq!(
            identity.connection_url("ws://host/ws?token=t"),
            "ws://host/ws?token=t&device-id=0123456789ab"
        );
    }

    #[test]
    fn commands_without_connection_are_harmless() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let transport = WsTransport::new(crate::defaults::DEVICE_NAME, tx).unwrap();

        transport.send(&ClientMessage::listen(ListenState::Start));
        transport.send_audio(vec![1, 2, 3]);
        transport.disconnect();
        drop(transport);

        assert!(rx.try_recv().is_err());
    }
}
