use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{debug, error, info};
use tracing_subscriber::EnvFilter;

use mumble_relay::mumble::{
    ChannelRef, Event, EventBus, MumbleConfig, MumbleProtocol, NoopCommandRunner, OutboundRequest,
    SendKind, TargetRef,
};

#[derive(Debug, Parser)]
#[command(name = "mumble-relay", version, about = "Text relay client for Mumble servers")]
struct Cli {
    /// JSON configuration file.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
}

/// Logs every notification without altering it.
struct LoggingEventBus;

impl EventBus for LoggingEventBus {
    fn publish(&mut self, event: Event) -> Event {
        debug!("event: {}", event.name());
        event
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(mumble_relay::log_level().to_string())),
        )
        .init();
}

/// Maps a console line to an engine request: `/me <text>` sends an action,
/// `/join <channel>` moves us, `/quit [reason]` disconnects and anything
/// else is chat to our current channel.
#[cfg_attr(feature = "coverage", allow(dead_code))]
fn console_request(line: &str) -> Option<OutboundRequest> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }
    if let Some(text) = line.strip_prefix("/me ") {
        return Some(OutboundRequest::Send {
            target: TargetRef::CurrentChannel,
            text: text.to_string(),
            kind: SendKind::Action,
        });
    }
    if let Some(channel) = line.strip_prefix("/join ") {
        return Some(OutboundRequest::Join(ChannelRef::from(channel.trim())));
    }
    if line == "/quit" || line.starts_with("/quit ") {
        let reason = line["/quit".len()..].trim();
        let reason = if reason.is_empty() { "Quit" } else { reason };
        return Some(OutboundRequest::Disconnect(reason.to_string()));
    }
    Some(OutboundRequest::Send {
        target: TargetRef::CurrentChannel,
        text: line.to_string(),
        kind: SendKind::Message,
    })
}

#[cfg(not(feature = "coverage"))]
fn run(config: MumbleConfig) -> Result<(), mumble_relay::transport::TransportError> {
    use std::io::BufRead;
    use std::sync::mpsc;
    use std::thread;

    use mumble_relay::mumble::{apply_requests, tls_connect, BlockingSession};

    let stream = tls_connect(&config.network)?;
    let mut protocol = MumbleProtocol::new(
        config,
        Box::new(LoggingEventBus),
        Box::new(NoopCommandRunner),
    );

    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let Some(request) = console_request(&line) else {
                continue;
            };
            if sender.send(request).is_err() {
                break;
            }
        }
        debug!("console input closed");
    });

    BlockingSession::new(stream).run_with(&mut protocol, apply_requests(&receiver))
}

#[cfg(feature = "coverage")]
fn run(config: MumbleConfig) -> Result<(), mumble_relay::transport::TransportError> {
    let _ = MumbleProtocol::new(config, Box::new(LoggingEventBus), Box::new(NoopCommandRunner));
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let config = match MumbleConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!("{}: {err}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    info!(
        "connecting to {}:{} as {}",
        config.network.address, config.network.port, config.identity.username
    );
    match run(config) {
        Ok(()) => {
            info!("connection closed");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
