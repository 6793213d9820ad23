//! hostlink CLI - runs either end of the notification transport.
//!
//! `hostlink daemon` is the poller run loop a supervisor keeps alive.
//! `hostlink emit` plays the device side by hand, which is how the daemon is
//! exercised without loading the plugin into an audio host.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hostlink::connection::PollerConnection;
use hostlink::constants::EMIT_ATTACH_TIMEOUT;
use hostlink::{Config, Message, Poller, ProtocolVersion, SendOutcome, Transmitter, Xmitter};

/// Global flag for signal-triggered shutdown (as Arc for signal-hook compatibility)
static SHUTDOWN_FLAG: std::sync::LazyLock<Arc<AtomicBool>> =
    std::sync::LazyLock::new(|| Arc::new(AtomicBool::new(false)));

#[derive(Parser)]
#[command(name = "hostlink")]
#[command(about = "Loopback notification transport between an audio plugin and its daemon")]
#[command(long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the device and log its notifications until stopped
    Daemon {
        /// Port override (defaults to the protocol generation's port)
        #[arg(long)]
        port: Option<u16>,
        /// Protocol generation: legacy or current
        #[arg(long)]
        protocol: Option<ProtocolVersion>,
    },
    /// Listen like the device, wait for the daemon, then send events
    ///
    /// Events: ready, connect:CID:PID, disconnect:CID:PID, start-io:CID, stop-io:CID
    Emit {
        /// Port override (defaults to the protocol generation's port)
        #[arg(long)]
        port: Option<u16>,
        /// Protocol generation: legacy or current
        #[arg(long)]
        protocol: Option<ProtocolVersion>,
        /// Seconds to wait for the daemon to attach
        #[arg(long, default_value_t = EMIT_ATTACH_TIMEOUT.as_secs())]
        wait: u64,
        /// Events to send, in order
        #[arg(required = true, value_parser = parse_event)]
        events: Vec<Message>,
    },
    /// Print the effective configuration
    Config,
}

/// Daemon-side handler: every notification becomes a log line.
struct LoggingHandler;

impl Xmitter for LoggingHandler {
    fn device_ready(&mut self) {
        log::info!("device is ready");
    }

    fn client_connected(&mut self, client_id: u32, process_id: i32) {
        log::info!("client {client_id} (pid {process_id}) connected");
    }

    fn client_disconnected(&mut self, client_id: u32, process_id: i32) {
        log::info!("client {client_id} (pid {process_id}) disconnected");
    }

    fn client_started_io(&mut self, client_id: u32) {
        log::info!("client {client_id} started IO");
    }

    fn client_stopped_io(&mut self, client_id: u32) {
        log::info!("client {client_id} stopped IO");
    }
}

fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon { port, protocol } => {
            let config = effective_config(port, protocol)?;
            run_daemon(&config)?;
        }
        Commands::Emit {
            port,
            protocol,
            wait,
            events,
        } => {
            let config = effective_config(port, protocol)?;
            run_emit(&config, Duration::from_secs(wait), &events)?;
        }
        Commands::Config => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Log to `HOSTLINK_LOG_FILE` when set, stderr otherwise.
fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();

    if let Ok(path) = std::env::var("HOSTLINK_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }

    builder.init();
    Ok(())
}

/// Config file and env, then command-line flags on top.
fn effective_config(port: Option<u16>, protocol: Option<ProtocolVersion>) -> Result<Config> {
    let mut config = Config::load()?;
    if let Some(protocol) = protocol {
        config.protocol = protocol;
    }
    if port.is_some() {
        config.port = port;
    }
    Ok(config)
}

fn register_signals() -> Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;
    flag::register(SIGINT, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGTERM, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGHUP, Arc::clone(&SHUTDOWN_FLAG))?;
    Ok(())
}

fn run_daemon(config: &Config) -> Result<()> {
    register_signals()?;

    let endpoint = config.endpoint();
    let conn = PollerConnection::new(endpoint).with_connect_timeout(config.connect_timeout());
    let mut poller = Poller::with_connection(conn);
    poller.register(LoggingHandler);

    log::info!(
        "Daemon polling {} ({} protocol) every {:?}",
        endpoint.socket_addr(),
        endpoint.version,
        config.tick_interval()
    );

    while !SHUTDOWN_FLAG.load(Ordering::Relaxed) {
        if !poller.tick() {
            // Non-zero exit so the supervisor restarts us on a fresh connection.
            bail!("transport reported a fatal protocol error; stopping");
        }
        std::thread::sleep(config.tick_interval());
    }

    log::info!("Shutdown requested; daemon exiting");
    Ok(())
}

fn run_emit(config: &Config, wait: Duration, events: &[Message]) -> Result<()> {
    register_signals()?;

    let mut tx = Transmitter::new(config.endpoint());
    if !tx.listen() {
        bail!("could not listen on {}", config.endpoint().socket_addr());
    }
    if let Some(addr) = tx.local_addr() {
        println!("Listening on {addr}; waiting for the daemon...");
    }

    let deadline = Instant::now() + wait;
    while !tx.poll_accept() {
        if SHUTDOWN_FLAG.load(Ordering::Relaxed) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("no daemon attached within {wait:?}");
        }
        std::thread::sleep(config.tick_interval());
    }

    let mut failed = 0;
    for event in events {
        let outcome = tx.send(event);
        println!("{:<20} {outcome:?}", event.kind().to_string());
        if outcome != SendOutcome::Sent {
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{failed} of {} events were not sent", events.len());
    }
    Ok(())
}

/// Parse `kind[:arg...]` into a message.
fn parse_event(s: &str) -> Result<Message, String> {
    let mut parts = s.split(':');
    let kind = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    let id = |i: usize| -> Result<u32, String> {
        args.get(i)
            .ok_or_else(|| format!("{kind}: missing client id"))?
            .parse()
            .map_err(|e| format!("{kind}: bad client id: {e}"))
    };
    let pid = |i: usize| -> Result<i32, String> {
        args.get(i)
            .ok_or_else(|| format!("{kind}: missing process id"))?
            .parse()
            .map_err(|e| format!("{kind}: bad process id: {e}"))
    };
    let arity = |n: usize| -> Result<(), String> {
        if args.len() == n {
            Ok(())
        } else {
            Err(format!("{kind}: expected {n} argument(s), got {}", args.len()))
        }
    };

    match kind {
        "ready" => {
            arity(0)?;
            Ok(Message::Ready)
        }
        "connect" => {
            arity(2)?;
            Ok(Message::ClientConnected {
                client_id: id(0)?,
                process_id: pid(1)?,
            })
        }
        "disconnect" => {
            arity(2)?;
            Ok(Message::ClientDisconnected {
                client_id: id(0)?,
                process_id: pid(1)?,
            })
        }
        "start-io" => {
            arity(1)?;
            Ok(Message::ClientStartedIo { client_id: id(0)? })
        }
        "stop-io" => {
            arity(1)?;
            Ok(Message::ClientStoppedIo { client_id: id(0)? })
        }
        other => Err(format!("unknown event: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_events() {
        assert_eq!(parse_event("ready"), Ok(Message::Ready));
        assert_eq!(
            parse_event("connect:7:4242"),
            Ok(Message::ClientConnected {
                client_id: 7,
                process_id: 4242,
            })
        );
        assert_eq!(
            parse_event("disconnect:7:4242"),
            Ok(Message::ClientDisconnected {
                client_id: 7,
                process_id: 4242,
            })
        );
        assert_eq!(parse_event("start-io:3"), Ok(Message::ClientStartedIo { client_id: 3 }));
        assert_eq!(parse_event("stop-io:3"), Ok(Message::ClientStoppedIo { client_id: 3 }));
    }

    #[test]
    fn test_parse_event_rejects_bad_input() {
        assert!(parse_event("explode").is_err());
        assert!(parse_event("ready:1").is_err());
        assert!(parse_event("connect:7").is_err());
        assert!(parse_event("connect:x:1").is_err());
        assert!(parse_event("start-io").is_err());
    }

    #[test]
    fn test_cli_parses_emit() {
        let cli = Cli::try_parse_from(["hostlink", "emit", "--protocol", "legacy", "connect:0:99"])
            .unwrap();
        match cli.command {
            Commands::Emit { protocol, events, .. } => {
                assert_eq!(protocol, Some(ProtocolVersion::Legacy));
                let expected = Message::ClientConnected {
                    client_id: 0,
                    process_id: 99,
                };
                assert_eq!(events, vec![expected]);
            }
            _ => panic!("expected emit"),
        }
    }
}
