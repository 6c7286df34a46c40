//! Session orchestrator.
//!
//! [`Assistant`] owns every component and the [`SessionState`]. It is driven
//! from one thread: events arrive through [`Assistant::handle`] and deadlines
//! fire through [`Assistant::poll_timers`]. Nothing else mutates the session,
//! which is what makes each transition atomic.
//!
//! Transitions (anything not listed leaves the mode alone and touches no
//! device):
//!
//! | mode      | event                         | next               |
//! |-----------|-------------------------------|--------------------|
//! | Idle      | wake word, connected          | Recording          |
//! | Idle      | wake word, offline            | Idle (wake re-armed) |
//! | Recording | server audio                  | Recording (buffered) |
//! | Recording | silence, audio buffered       | Playing            |
//! | Recording | silence, nothing buffered     | Idle (wake re-armed) |
//! | Recording | manual stop                   | Idle               |
//! | Playing   | server audio                  | Playing            |
//! | Playing   | tts stop                      | Idle (wake re-armed after a delay) |
//! | any       | manual start, connected       | Recording          |

use super::events::{AssistantCommand, AssistantEvent, AssistantUpdate};
use super::state::{ChatMessage, Mode, SessionState};
use crate::capture::{CaptureEvent, MicrophoneCapture};
use crate::clock::Clock;
use crate::config::Config;
use crate::defaults;
use crate::playback::SpeakerPlayback;
use crate::settings::Settings;
use crate::transport::protocol::extract_emotion;
use crate::transport::{ClientMessage, ListenState, ServerMessage, Transport, TransportEvent, TtsState};
use crate::vad::{SilenceDetector, VadConfig};
use crate::wake::{WakeEvent, WakeGate};
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Timing and feature switches that are not runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantOptions {
    /// Connect on startup.
    pub auto_connect: bool,
    pub auto_connect_delay: Duration,
    /// Wait between dropping the old server and dialing a new address.
    pub address_change_delay: Duration,
    /// Period of the silence backstop check while recording.
    pub vad_check_interval: Duration,
    pub wake_enabled: bool,
    /// Wait after the server stops speaking before listening for the wake
    /// word again.
    pub rearm_delay: Duration,
}

impl Default for AssistantOptions {
    fn default() -> Self {
        Self {
            auto_connect: true,
            auto_connect_delay: Duration::from_millis(defaults::AUTO_CONNECT_DELAY_MS),
            address_change_delay: Duration::from_millis(defaults::ADDRESS_CHANGE_DELAY_MS),
            vad_check_interval: Duration::from_millis(defaults::VAD_CHECK_INTERVAL_MS),
            wake_enabled: true,
            rearm_delay: Duration::from_millis(defaults::WAKE_REARM_DELAY_MS),
        }
    }
}

impl AssistantOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            auto_connect: config.server.auto_connect,
            auto_connect_delay: Duration::from_millis(config.server.auto_connect_delay_ms),
            address_change_delay: Duration::from_millis(config.server.address_change_delay_ms),
            vad_check_interval: Duration::from_millis(config.vad.check_interval_ms.max(1)),
            wake_enabled: config.wake.enabled,
            rearm_delay: Duration::from_millis(config.wake.rearm_delay_ms),
        }
    }
}

/// Components the orchestrator takes ownership of.
pub struct AssistantParts {
    pub transport: Box<dyn Transport>,
    pub capture: MicrophoneCapture,
    pub playback: SpeakerPlayback,
    pub wake: Option<WakeGate>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Timers {
    vad_check: Option<Instant>,
    rearm_wake: Option<Instant>,
    reconnect: Option<Instant>,
    auto_connect: Option<Instant>,
}

impl Timers {
    fn next(&self) -> Option<Instant> {
        [self.vad_check, self.rearm_wake, self.reconnect, self.auto_connect]
            .into_iter()
            .flatten()
            .min()
    }
}

/// Clears the slot and returns true if its deadline has passed.
fn take_due(slot: &mut Option<Instant>, now: Instant) -> bool {
    if slot.is_some_and(|at| at <= now) {
        *slot = None;
        return true;
    }
    false
}

fn vad_config(settings: &Settings) -> VadConfig {
    VadConfig {
        volume_threshold: settings.volume_threshold,
        silence_threshold: Duration::from_millis(settings.silence_threshold_ms),
    }
}

pub struct Assistant {
    options: AssistantOptions,
    settings: Settings,
    state: SessionState,
    transport: Box<dyn Transport>,
    capture: MicrophoneCapture,
    playback: SpeakerPlayback,
    wake: Option<WakeGate>,
    vad: SilenceDetector,
    clock: Arc<dyn Clock>,
    timers: Timers,
    updates: Sender<AssistantUpdate>,
}

impl Assistant {
    pub fn new(
        parts: AssistantParts,
        options: AssistantOptions,
        settings: Settings,
        clock: Arc<dyn Clock>,
        updates: Sender<AssistantUpdate>,
    ) -> Self {
        Self {
            vad: SilenceDetector::new(vad_config(&settings)),
            options,
            settings,
            state: SessionState::default(),
            transport: parts.transport,
            capture: parts.capture,
            playback: parts.playback,
            wake: parts.wake,
            clock,
            timers: Timers::default(),
            updates,
        }
    }

    /// Kick off wake engine initialization and schedule the auto-connect.
    pub fn start(&mut self) {
        if self.options.wake_enabled
            && let Some(gate) = self.wake.as_mut()
        {
            gate.initialize();
            self.set_status("Initializing wake engine");
        }
        if self.options.auto_connect {
            self.timers.auto_connect = Some(self.clock.now() + self.options.auto_connect_delay);
        }
    }

    /// Apply one event. Returns false after a shutdown command.
    pub fn handle(&mut self, event: AssistantEvent) -> bool {
        match event {
            AssistantEvent::Transport(event) => self.on_transport(event),
            AssistantEvent::Wake(event) => self.on_wake(event),
            AssistantEvent::Capture(event) => self.on_capture(event),
            AssistantEvent::Settings(settings) => self.on_settings(settings),
            AssistantEvent::Command(AssistantCommand::Shutdown) => {
                self.shutdown();
                return false;
            }
            AssistantEvent::Command(command) => self.on_command(command),
        }
        true
    }

    /// Fire every deadline that has passed.
    pub fn poll_timers(&mut self) {
        let now = self.clock.now();
        if take_due(&mut self.timers.vad_check, now) {
            self.check_silence(now);
        }
        if take_due(&mut self.timers.rearm_wake, now) && self.state.mode == Mode::Idle {
            self.start_wake();
        }
        if take_due(&mut self.timers.reconnect, now) {
            self.connect();
        }
        if take_due(&mut self.timers.auto_connect, now) && !self.state.connected {
            self.connect();
        }
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next()
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Stop everything: capture, playback, connection, wake engine.
    pub fn shutdown(&mut self) {
        self.stop_recording(false);
        self.timers = Timers::default();
        self.playback.stop();
        self.transport.disconnect();
        if let Some(gate) = self.wake.as_mut() {
            gate.release();
        }
        self.state.wake_listening = false;
        tracing::info!("assistant shut down");
    }

    // --- transport ---

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ConnectionChanged { connected: true } => {
                self.state.connected = true;
                self.timers.auto_connect = None;
                match self.playback.start() {
                    Ok(()) => self.set_status("Connected"),
                    Err(e) => {
                        tracing::warn!(error = %e, "playback unavailable");
                        self.set_status(format!("Connected, but the speaker is unavailable: {e}"));
                    }
                }
                self.publish(AssistantUpdate::Connection(true));
            }
            TransportEvent::ConnectionChanged { connected: false } => {
                let was_connected = self.state.connected;
                self.state.connected = false;
                self.state.session_id = None;
                self.playback.stop();
                self.set_speaking(false);
                if was_connected {
                    self.set_status("Disconnected");
                    self.publish(AssistantUpdate::Connection(false));
                }
            }
            TransportEvent::ReconnectExhausted => {
                self.set_status("Disconnected: server unreachable");
                self.publish(AssistantUpdate::Connection(false));
            }
            TransportEvent::Message(message) => self.on_server_message(message),
            TransportEvent::Audio(data) => self.on_server_audio(data),
        }
    }

    fn on_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Hello { session_id } => {
                tracing::info!(?session_id, "session established");
                self.state.session_id = session_id.filter(|id| !id.is_empty());
            }
            ServerMessage::Stt { text } => {
                if !text.trim().is_empty() {
                    self.add_message(ChatMessage::user(text));
                }
            }
            ServerMessage::Llm { text } => {
                if let Some(emotion) = extract_emotion(&text) {
                    self.set_emotion(&emotion);
                }
                if !text.trim().is_empty() {
                    self.add_message(ChatMessage::assistant(text));
                }
            }
            ServerMessage::Tts {
                state: TtsState::Start,
                ..
            } => self.set_speaking(true),
            ServerMessage::Tts {
                state: TtsState::Stop,
                ..
            } => self.on_tts_stop(),
            ServerMessage::Tts {
                state: TtsState::SentenceStart,
                text,
            } => {
                if let Some(text) = text.filter(|t| !t.is_empty()) {
                    self.publish(AssistantUpdate::Sentence(text));
                }
            }
            ServerMessage::Tts {
                state: TtsState::Other,
                ..
            }
            | ServerMessage::Unknown => {}
        }
    }

    fn on_server_audio(&mut self, data: Vec<u8>) {
        if data.is_empty() {
            return;
        }
        match self.state.mode {
            Mode::Recording => {
                self.state.pending_server_audio.push(data);
                tracing::debug!(
                    buffered = self.state.pending_server_audio.len(),
                    "server audio held while recording"
                );
            }
            Mode::Playing | Mode::Idle => self.playback.enqueue(data),
        }
    }

    fn on_tts_stop(&mut self) {
        self.set_speaking(false);
        if self.state.mode != Mode::Playing {
            return;
        }
        self.playback.clear();
        self.set_mode(Mode::Idle);
        self.set_emotion(defaults::DEFAULT_EMOTION);
        if self.state.pending_server_audio.is_empty() {
            self.timers.rearm_wake = Some(self.clock.now() + self.options.rearm_delay);
        }
    }

    // --- wake gate ---

    fn on_wake(&mut self, event: WakeEvent) {
        match event {
            WakeEvent::Initialized(Ok(())) => {
                self.set_status("Wake engine ready");
                if self.state.mode == Mode::Idle {
                    self.start_wake();
                }
            }
            WakeEvent::Initialized(Err(message)) => {
                self.set_status(format!("Wake engine failed to initialize: {message}"));
            }
            WakeEvent::Detected { keyword, score } => self.on_wake_detected(&keyword, score),
            WakeEvent::PreWake => tracing::debug!("pre-wake hint"),
            WakeEvent::Error { code, message } => {
                self.state.wake_listening = self.wake.as_ref().is_some_and(WakeGate::is_listening);
                self.set_status(format!("Wake error {code}: {message}"));
            }
            WakeEvent::Audio(_) => {}
        }
    }

    fn on_wake_detected(&mut self, keyword: &str, score: i32) {
        if self.state.mode != Mode::Idle {
            tracing::debug!(mode = %self.state.mode, "wake detection ignored");
            return;
        }
        tracing::info!(keyword, score, "wake word detected");
        self.stop_wake();
        self.set_emotion(defaults::LISTENING_EMOTION);

        if !self.state.connected {
            self.set_status("Wake word heard, but not connected to the server");
            self.set_emotion(defaults::DEFAULT_EMOTION);
            self.start_wake();
            return;
        }

        self.state.pending_server_audio.clear();
        if self.begin_recording() {
            self.set_status("Listening...");
        } else {
            self.set_emotion(defaults::DEFAULT_EMOTION);
            self.start_wake();
        }
    }

    fn start_wake(&mut self) {
        self.timers.rearm_wake = None;
        if !self.options.wake_enabled {
            return;
        }
        let Some(gate) = self.wake.as_mut() else {
            return;
        };
        if gate.is_listening() {
            return;
        }
        match gate.start() {
            Ok(()) => {
                let keyword = gate.keyword().to_string();
                self.state.wake_listening = true;
                self.publish(AssistantUpdate::WakeListening(true));
                self.set_status(format!("Waiting for wake word '{keyword}'"));
            }
            // The gate reports the failure as an event as well.
            Err(e) => tracing::warn!(error = %e, "wake gate did not start"),
        }
    }

    /// Returns whether the gate was listening.
    fn stop_wake(&mut self) -> bool {
        let Some(gate) = self.wake.as_mut() else {
            return false;
        };
        let was_listening = gate.is_listening();
        gate.stop();
        if was_listening {
            self.state.wake_listening = false;
            self.publish(AssistantUpdate::WakeListening(false));
        }
        was_listening
    }

    // --- capture ---

    fn on_capture(&mut self, event: CaptureEvent) {
        if self.state.capture_session != Some(event.session()) {
            tracing::trace!(session = event.session(), "stale capture event dropped");
            return;
        }
        match event {
            CaptureEvent::Frame { data, .. } => self.transport.send_audio(data),
            CaptureEvent::Elapsed { elapsed, .. } => {
                self.state.recording_time = elapsed;
                self.publish(AssistantUpdate::RecordingTime(elapsed));
            }
            CaptureEvent::Volume { energy, .. } => self.on_volume(energy),
        }
    }

    fn on_volume(&mut self, energy: u32) {
        if self.state.mode != Mode::Recording {
            return;
        }
        self.state.waveform.push(energy);
        self.publish(AssistantUpdate::Waveform(self.state.waveform.bars()));

        let verdict = self.vad.observe(energy, self.clock.now());
        tracing::trace!(rms = energy, ?verdict, "vad");
        if verdict.is_silence_detected() {
            tracing::info!(?verdict, "silence detected");
            self.finish_turn();
        }
    }

    fn check_silence(&mut self, now: Instant) {
        if self.state.mode != Mode::Recording {
            return;
        }
        let verdict = self.vad.check(now);
        if verdict.is_silence_detected() {
            tracing::info!(?verdict, "silence detected by periodic check");
            self.finish_turn();
        } else {
            self.timers.vad_check = Some(now + self.options.vad_check_interval);
        }
    }

    /// Open the microphone and tell the server a turn begins.
    fn begin_recording(&mut self) -> bool {
        if self.state.speaking {
            self.interrupt_server();
        }
        self.state.pending_server_audio.clear();

        let session = match self.capture.start() {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "capture failed to start");
                self.set_status(format!("Microphone unavailable: {e}"));
                return false;
            }
        };

        self.state.capture_session = Some(session);
        self.state.recording_time = Duration::ZERO;
        self.transport.send(&ClientMessage::listen(ListenState::Start));

        let now = self.clock.now();
        self.vad.arm(now);
        self.timers.vad_check = Some(now + self.options.vad_check_interval);
        self.clear_waveform();
        self.set_mode(Mode::Recording);
        true
    }

    /// The single exit from recording; every path goes through it.
    ///
    /// Returns false, doing nothing, unless a recording was running, so a
    /// second trigger for the same recording is harmless.
    fn stop_capture(&mut self) -> bool {
        if self.state.mode != Mode::Recording {
            return false;
        }
        self.timers.vad_check = None;
        self.vad.disarm();
        self.capture.stop();
        self.state.capture_session = None;
        self.transport.send_audio_end();
        self.transport.send(&ClientMessage::listen(ListenState::Stop));
        self.clear_waveform();
        true
    }

    /// End of the user's turn, detected by silence.
    fn finish_turn(&mut self) {
        if !self.stop_capture() {
            return;
        }
        let buffered = self.state.pending_server_audio.drain();
        if buffered.is_empty() {
            self.set_mode(Mode::Idle);
            self.set_emotion(defaults::DEFAULT_EMOTION);
            self.start_wake();
            return;
        }
        tracing::info!(frames = buffered.len(), "playing buffered reply");
        self.playback.enqueue_all(buffered);
        self.set_speaking(true);
        self.set_mode(Mode::Playing);
        self.set_status("Replying...");
    }

    fn stop_recording(&mut self, rearm_wake: bool) {
        if !self.stop_capture() {
            return;
        }
        let buffered = self.state.pending_server_audio.drain();
        if !buffered.is_empty() {
            self.playback.enqueue_all(buffered);
        }
        self.set_mode(Mode::Idle);
        self.set_status("Recording stopped");
        if rearm_wake {
            self.start_wake();
        }
    }

    fn interrupt_server(&mut self) {
        if let Some(session_id) = &self.state.session_id {
            self.transport.send(&ClientMessage::abort(session_id));
        }
        self.playback.clear();
        self.set_speaking(false);
    }

    // --- commands ---

    fn on_command(&mut self, command: AssistantCommand) {
        match command {
            AssistantCommand::Connect => {
                self.timers.reconnect = None;
                self.connect();
            }
            AssistantCommand::Disconnect => {
                self.stop_recording(self.options.wake_enabled);
                self.timers.reconnect = None;
                self.timers.auto_connect = None;
                self.transport.disconnect();
                self.set_status("Disconnecting");
            }
            AssistantCommand::StartRecording => self.start_recording_manually(),
            AssistantCommand::StopRecording { rearm_wake } => self.stop_recording(rearm_wake),
            AssistantCommand::SendText(text) => self.send_text(&text),
            AssistantCommand::Shutdown => self.shutdown(),
        }
    }

    fn start_recording_manually(&mut self) {
        if !self.state.connected {
            self.set_status("Not connected to the server");
            return;
        }
        if self.state.mode == Mode::Recording {
            return;
        }
        let was_listening = self.stop_wake();
        if self.begin_recording() {
            self.set_status("Listening...");
        } else if was_listening {
            self.start_wake();
        }
    }

    fn connect(&mut self) {
        let url = self.settings.server_url.trim().to_string();
        if url.is_empty() {
            self.set_status("No server address configured");
            return;
        }
        self.set_status(format!("Connecting to {url}"));
        self.transport.connect(&url);
    }

    fn send_text(&mut self, text: &str) {
        let text = text.trim();
        if !self.state.connected || text.is_empty() {
            tracing::debug!(connected = self.state.connected, "text not sent");
            return;
        }
        self.transport.send(&ClientMessage::detect(text));
        self.add_message(ChatMessage::user(text));
    }

    // --- settings ---

    fn on_settings(&mut self, settings: Settings) {
        let previous = std::mem::replace(&mut self.settings, settings);
        self.vad.set_config(vad_config(&self.settings));

        if self.settings.server_url != previous.server_url && !previous.server_url.is_empty() {
            tracing::info!(old = %previous.server_url, new = %self.settings.server_url, "server address changed");
            if self.state.connected {
                self.transport.disconnect();
            }
            self.timers.reconnect = Some(self.clock.now() + self.options.address_change_delay);
        }

        if self.settings.wake_keyword != previous.wake_keyword {
            self.change_keyword();
        }
    }

    fn change_keyword(&mut self) {
        let keyword = self.settings.wake_keyword.clone();
        let Some(gate) = self.wake.as_mut() else {
            return;
        };
        let was_listening = gate.is_listening();
        match gate.update_keyword(&keyword) {
            Ok(true) if was_listening => {
                self.state.wake_listening = false;
                self.publish(AssistantUpdate::WakeListening(false));
                self.timers.rearm_wake = Some(self.clock.now() + self.options.rearm_delay);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "failed to update wake keyword");
                self.set_status(format!("Failed to update wake keyword: {e}"));
            }
        }
    }

    // --- state updates ---

    fn set_mode(&mut self, mode: Mode) {
        if self.state.mode == mode {
            return;
        }
        tracing::info!(from = %self.state.mode, to = %mode, "mode changed");
        self.state.mode = mode;
        self.publish(AssistantUpdate::Mode(mode));
    }

    fn set_speaking(&mut self, speaking: bool) {
        if self.state.speaking != speaking {
            self.state.speaking = speaking;
            self.publish(AssistantUpdate::Speaking(speaking));
        }
    }

    fn set_status(&mut self, status: impl Into<String>) {
        let status = status.into();
        tracing::info!(%status);
        self.state.status = status.clone();
        self.publish(AssistantUpdate::Status(status));
    }

    fn set_emotion(&mut self, emotion: &str) {
        if self.state.emotion != emotion {
            self.state.emotion = emotion.to_string();
            self.publish(AssistantUpdate::Emotion(emotion.to_string()));
        }
    }

    fn add_message(&mut self, message: ChatMessage) {
        self.state.messages.push(message.clone());
        self.publish(AssistantUpdate::Message(message));
    }

    fn clear_waveform(&mut self) {
        self.state.waveform.clear();
        self.publish(AssistantUpdate::Waveform(self.state.waveform.bars()));
    }

    fn publish(&self, update: AssistantUpdate) {
        let _ = self.updates.send(update);
    }
}
