//! Worker thread that serializes every input into the orchestrator.

use super::events::{AssistantCommand, AssistantEvent};
use super::orchestrator::Assistant;
use crate::capture::CaptureEvent;
use crate::error::Result;
use crate::settings::Settings;
use crate::transport::TransportEvent;
use crate::wake::WakeEvent;
use crossbeam_channel::{Receiver, RecvError, Sender, never, select, unbounded};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Longest sleep when no timer is pending.
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Receivers for the component event streams.
pub struct AssistantInputs {
    pub transport: Receiver<TransportEvent>,
    pub wake: Receiver<WakeEvent>,
    pub capture: Receiver<CaptureEvent>,
    pub settings: Receiver<Settings>,
}

pub struct AssistantRunner;

impl AssistantRunner {
    /// Start the orchestrator on its own thread.
    pub fn spawn(assistant: Assistant, inputs: AssistantInputs) -> Result<AssistantHandle> {
        let (commands, command_rx) = unbounded();
        let thread = thread::Builder::new()
            .name("lumi-assistant".to_string())
            .spawn(move || run(assistant, inputs, command_rx))?;
        Ok(AssistantHandle {
            commands,
            thread: Some(thread),
        })
    }
}

enum Next {
    Event(AssistantEvent),
    Closed(Input),
    Timeout,
}

#[derive(Debug, Clone, Copy)]
enum Input {
    Transport,
    Wake,
    Capture,
    Settings,
}

fn received<T: Into<AssistantEvent>>(msg: std::result::Result<T, RecvError>, input: Input) -> Next {
    match msg {
        Ok(value) => Next::Event(value.into()),
        Err(_) => Next::Closed(input),
    }
}

impl AssistantInputs {
    /// Replace a closed input with one that never fires.
    fn close(&mut self, input: Input) {
        tracing::debug!(?input, "input channel closed");
        match input {
            Input::Transport => self.transport = never(),
            Input::Wake => self.wake = never(),
            Input::Capture => self.capture = never(),
            Input::Settings => self.settings = never(),
        }
    }
}

fn run(mut assistant: Assistant, mut inputs: AssistantInputs, commands: Receiver<AssistantCommand>) {
    assistant.start();
    loop {
        let timeout = assistant
            .next_deadline()
            .map(|at| at.saturating_duration_since(assistant.now()))
            .unwrap_or(IDLE_WAIT)
            .min(IDLE_WAIT);

        let next = select! {
            recv(commands) -> msg => match msg {
                Ok(command) => Next::Event(command.into()),
                Err(_) => Next::Event(AssistantCommand::Shutdown.into()),
            },
            recv(inputs.transport) -> msg => received(msg, Input::Transport),
            recv(inputs.wake) -> msg => received(msg, Input::Wake),
            recv(inputs.capture) -> msg => received(msg, Input::Capture),
            recv(inputs.settings) -> msg => match msg {
                Ok(settings) => Next::Event(AssistantEvent::Settings(settings)),
                Err(_) => Next::Closed(Input::Settings),
            },
            default(timeout) => Next::Timeout,
        };

        match next {
            Next::Event(event) => {
                if !assistant.handle(event) {
                    break;
                }
            }
            Next::Closed(input) => inputs.close(input),
            Next::Timeout => {}
        }
        assistant.poll_timers();
    }
    tracing::debug!("assistant loop exited");
}

/// Control handle for a running assistant.
pub struct AssistantHandle {
    commands: Sender<AssistantCommand>,
    thread: Option<JoinHandle<()>>,
}

impl AssistantHandle {
    pub fn send(&self, command: AssistantCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("assistant is no longer running");
        }
    }

    pub fn connect(&self) {
        self.send(AssistantCommand::Connect);
    }

    pub fn disconnect(&self) {
        self.send(AssistantCommand::Disconnect);
    }

    pub fn start_recording(&self) {
        self.send(AssistantCommand::StartRecording);
    }

    pub fn stop_recording(&self, rearm_wake: bool) {
        self.send(AssistantCommand::StopRecording { rearm_wake });
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.send(AssistantCommand::SendText(text.into()));
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Shut the assistant down and wait for its thread.
    pub fn shutdown(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.commands.send(AssistantCommand::Shutdown);
        if thread.join().is_err() {
            tracing::error!("assistant thread panicked");
        }
    }
}

impl Drop for AssistantHandle {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::{AssistantOptions, AssistantParts, AssistantUpdate};
    use crate::audio::microphone::Microphone;
    use crate::audio::recorder::MockAudioSource;
    use crate::audio::speaker::MockPlaybackDevice;
    use crate::capture::MicrophoneCapture;
    use crate::clock::SystemClock;
    use crate::codec::PcmCodec;
    use crate::playback::SpeakerPlayback;
    use crate::transport::{MockTransport, TransportCall};
    use std::sync::Arc;
    use std::time::Instant;

    fn spawn_with(transport: MockTransport) -> (AssistantHandle, Sender<TransportEvent>, Receiver<AssistantUpdate>) {
        let codec = Arc::new(PcmCodec);
        let (capture_tx, capture_rx) = unbounded();
        let (transport_tx, transport_rx) = unbounded();
        let (updates_tx, updates_rx) = unbounded();
        let mic = Microphone::new(Box::new(MockAudioSource::new()));
        let parts = AssistantParts {
            transport: Box::new(transport),
            capture: MicrophoneCapture::new(mic, codec.clone(), capture_tx),
            playback: SpeakerPlayback::new(Box::new(MockPlaybackDevice::new()), codec),
            wake: None,
        };
        let options = AssistantOptions {
            auto_connect: false,
            wake_enabled: false,
            ..AssistantOptions::default()
        };
        let assistant = Assistant::new(
            parts,
            options,
            Settings::default(),
            Arc::new(SystemClock),
            updates_tx,
        );
        let inputs = AssistantInputs {
            transport: transport_rx,
            wake: never(),
            capture: capture_rx,
            settings: never(),
        };
        let handle = AssistantRunner::spawn(assistant, inputs).unwrap();
        (handle, transport_tx, updates_rx)
    }

    #[test]
    fn commands_reach_the_transport() {
        let transport = MockTransport::new();
        let (handle, _events, _updates) = spawn_with(transport.clone());

        handle.connect();
        let deadline = Instant::now() + Duration::from_secs(2);
        while transport.calls().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(transport.calls().first(), Some(TransportCall::Connect(_))));

        handle.shutdown();
        assert_eq!(transport.calls().last(), Some(&TransportCall::Disconnect));
    }

    #[test]
    fn transport_events_produce_updates() {
        let (handle, events, updates) = spawn_with(MockTransport::new());

        events
            .send(TransportEvent::ConnectionChanged { connected: true })
            .unwrap();
        let update = updates
            .iter()
            .find(|u| matches!(u, AssistantUpdate::Connection(_)));
        assert_eq!(update, Some(AssistantUpdate::Connection(true)));
        handle.shutdown();
    }

    #[test]
    fn closed_input_does_not_stop_the_loop() {
        let transport = MockTransport::new();
        let (handle, events, _updates) = spawn_with(transport.clone());
        drop(events);

        thread::sleep(Duration::from_millis(20));
        assert!(handle.is_running());
        handle.shutdown();
    }
}
