use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use crossbeam_channel::{Receiver, unbounded};
use lumi::assistant::{
    Assistant, AssistantHandle, AssistantInputs, AssistantOptions, AssistantParts,
    AssistantRunner, AssistantUpdate, Mode,
};
use lumi::audio::capture::{CpalAudioSource, CpalPlaybackDevice, DeviceKind, list_devices};
use lumi::audio::microphone::Microphone;
use lumi::capture::MicrophoneCapture;
use lumi::cli::{Cli, Commands, ConfigAction, spawn_line_reader};
use lumi::clock::SystemClock;
use lumi::codec::PcmCodec;
use lumi::config::Config;
use lumi::playback::SpeakerPlayback;
use lumi::settings::SettingsStore;
use lumi::transport::WsTransport;
use lumi::wake::{EnergySpikeEngine, KeywordFile, WakeGate};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        None => {
            let config = load_config(cli.config.as_deref())?;
            run_assistant(config).await?;
        }
        Some(Commands::Run {
            server,
            input_device,
            output_device,
            no_wake,
            no_auto_connect,
        }) => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(url) = server {
                config.server.url = url;
            }
            if input_device.is_some() {
                config.audio.input_device = input_device;
            }
            if output_device.is_some() {
                config.audio.output_device = output_device;
            }
            config.wake.enabled &= !no_wake;
            config.server.auto_connect &= !no_auto_connect;
            run_assistant(config).await?;
        }
        Some(Commands::Devices { output }) => {
            list_audio_devices(if output {
                DeviceKind::Output
            } else {
                DeviceKind::Input
            })?;
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "lumi", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over the verbosity flags.
fn init_logging(quiet: bool, verbose: u8) {
    let default = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "info,lumi=debug",
        (false, _) => "lumi=trace,debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/lumi/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(config.with_env_overrides())
}

fn list_audio_devices(kind: DeviceKind) -> Result<()> {
    let devices = list_devices(kind)?;
    if devices.is_empty() {
        eprintln!("No audio devices found");
        std::process::exit(1);
    }

    println!("Available audio {} devices:", match kind {
        DeviceKind::Input => "input",
        DeviceKind::Output => "output",
    });
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }
    Ok(())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Path => println!("{}", config_path.display()),
        ConfigAction::Show => {
            let config = Config::load_or_default(&config_path)?.with_env_overrides();
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Get { key } => {
            let config = Config::load_or_default(&config_path)?.with_env_overrides();
            match config.get_value_by_path(&key) {
                Ok(value) => println!("{}", value),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        ConfigAction::Set { key, value } => {
            Config::set_value_by_path(&config_path, &key, &value)?;
            println!("Set {} = {}", key, value);
        }
    }
    Ok(())
}

/// Wire the devices, transport and wake gate together and run until EOF,
/// `/quit` or Ctrl-C.
async fn run_assistant(config: Config) -> Result<()> {
    let codec = Arc::new(PcmCodec);
    let source = CpalAudioSource::new(config.audio.input_device.as_deref())?;
    let microphone = Microphone::new(Box::new(source));
    let speaker = CpalPlaybackDevice::new(config.audio.output_device.as_deref());

    let (transport_tx, transport_rx) = unbounded();
    let (wake_tx, wake_rx) = unbounded();
    let (capture_tx, capture_rx) = unbounded();

    let transport = WsTransport::new(&config.server.device_name, transport_tx)?;
    tracing::info!(
        device_id = %transport.identity().device_id,
        device_mac = %transport.identity().device_mac,
        "device identity"
    );

    let wake = config.wake.enabled.then(|| {
        WakeGate::new(
            Box::new(EnergySpikeEngine::new(config.wake.score_threshold)),
            microphone.clone(),
            KeywordFile::new(config.wake.keyword_path()),
            config.wake.keyword.clone(),
            wake_tx,
        )
    });

    let settings = SettingsStore::new(config.settings());
    let parts = AssistantParts {
        transport: Box::new(transport),
        capture: MicrophoneCapture::new(microphone, codec.clone(), capture_tx),
        playback: SpeakerPlayback::new(Box::new(speaker), codec),
        wake,
    };
    let (updates_tx, updates_rx) = unbounded();
    let assistant = Assistant::new(
        parts,
        AssistantOptions::from_config(&config),
        settings.current(),
        Arc::new(SystemClock),
        updates_tx,
    );
    let inputs = AssistantInputs {
        transport: transport_rx,
        wake: wake_rx,
        capture: capture_rx,
        settings: settings.subscribe(),
    };
    let handle = AssistantRunner::spawn(assistant, inputs)?;

    let printer = thread::Builder::new()
        .name("lumi-updates".to_string())
        .spawn(move || print_updates(updates_rx))?;

    eprintln!(
        "{}",
        "Commands: /start /stop /connect /disconnect /server <url> /keyword <word> /quit; anything else is sent as text"
            .dimmed()
    );

    let mut lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()))?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nReceived SIGINT, shutting down...");
                break;
            }
            line = lines.recv() => {
                match line {
                    Some(line) => {
                        if !dispatch_line(&handle, &settings, line.trim()) {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    tokio::task::spawn_blocking(move || handle.shutdown()).await?;
    if printer.join().is_err() {
        tracing::error!("update printer panicked");
    }
    Ok(())
}

/// Returns false on `/quit`.
fn dispatch_line(handle: &AssistantHandle, settings: &SettingsStore, line: &str) -> bool {
    let (command, arg) = line
        .split_once(' ')
        .map(|(c, a)| (c, a.trim()))
        .unwrap_or((line, ""));
    match command {
        "" => {}
        "/quit" | "/exit" => return false,
        "/start" => handle.start_recording(),
        "/stop" => handle.stop_recording(true),
        "/connect" => handle.connect(),
        "/disconnect" => handle.disconnect(),
        "/server" if !arg.is_empty() => {
            settings.update(|s| s.server_url = arg.to_string());
        }
        "/keyword" if !arg.is_empty() => {
            settings.update(|s| s.wake_keyword = arg.to_string());
        }
        _ if command.starts_with('/') => eprintln!("Unknown command: {}", line),
        _ => handle.send_text(line),
    }
    true
}

fn print_updates(updates: Receiver<AssistantUpdate>) {
    for update in updates {
        match update {
            AssistantUpdate::Mode(mode) => {
                let label = mode.to_string();
                match mode {
                    Mode::Recording => eprintln!("[{}]", label.red()),
                    Mode::Playing => eprintln!("[{}]", label.green()),
                    Mode::Idle => eprintln!("[{}]", label.dimmed()),
                }
            }
            AssistantUpdate::Status(status) => eprintln!("{}", status.dimmed()),
            AssistantUpdate::Emotion(emotion) => eprintln!("{}", emotion),
            AssistantUpdate::Message(message) if message.from_user => {
                println!("{} {}", "you:".cyan(), message.content);
            }
            AssistantUpdate::Message(message) => {
                println!("{} {}", "lumi:".magenta(), message.content);
            }
            AssistantUpdate::Sentence(text) => eprintln!("  {}", text.italic()),
            _ => {}
        }
    }
}
