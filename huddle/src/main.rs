//! Huddle -- headless direct-messaging client.
//!
//! Connects a session to the router and bridges it to stdin/stdout:
//! typed lines go to the current peer, inbound messages and delivery
//! updates print as they arrive. Configuration via CLI flags,
//! environment variables, or config file (`~/.config/huddle/config.toml`).
//!
//! ```bash
//! cargo run --bin huddle -- --server-url ws://127.0.0.1:9400/ws \
//!     --user-id alice --token dev-token --peer bob
//!
//! # Or via environment variables
//! HUDDLE_SERVER_URL=ws://127.0.0.1:9400/ws HUDDLE_USER_ID=alice \
//!     HUDDLE_TOKEN=dev-token HUDDLE_PEER=bob cargo run --bin huddle
//! ```
//!
//! Commands: `/to <peer>` switches the conversation, `/quit` logs out.

use std::io;
use std::path::Path;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use huddle::config::{CliArgs, ClientConfig};
use huddle::notify::{Confirmation, ConsoleNotifier, Notice, Notifier};
use huddle::session::{SessionCommand, SessionEvent, spawn_session};
use huddle::thread::Delivery;
use huddle_proto::ident::UserId;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file: stdout is the conversation surface.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!("huddle client starting");

    let notifier = ConsoleNotifier;

    let Some(connector) = config.to_connector() else {
        eprintln!("A router URL is required (--server-url or HUDDLE_SERVER_URL).");
        std::process::exit(2);
    };
    let Some(session_config) = config.to_session_config() else {
        eprintln!("A user id and token are required (--user-id/--token).");
        std::process::exit(2);
    };

    let (cmd_tx, evt_rx) = match spawn_session(connector, session_config).await {
        Ok(handles) => handles,
        Err(e) => {
            notifier.notify(&Notice::error(format!("could not connect: {e}")));
            std::process::exit(1);
        }
    };

    let mut peer = config.default_peer.clone().map(UserId::new);
    if let Some(ref p) = peer {
        println!("Conversation with {p}. Type to send, /quit to exit.");
        let _ = cmd_tx
            .send(SessionCommand::OpenThread {
                peer: Some(p.clone()),
            })
            .await;
    } else {
        println!("No peer selected. Use /to <peer> to start a conversation.");
    }

    run_loop(&cmd_tx, evt_rx, &mut peer, &notifier).await;

    tracing::info!("huddle client exiting");
    Ok(())
}

/// Bridge stdin lines and session events until the session ends.
async fn run_loop(
    cmd_tx: &mpsc::Sender<SessionCommand>,
    mut evt_rx: mpsc::Receiver<SessionEvent>,
    peer: &mut Option<UserId>,
    notifier: &ConsoleNotifier,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    // Sends still awaiting a terminal delivery state; checked at /quit.
    let mut in_flight: usize = 0;

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    // On /quit a Logout is issued; SessionEnded arrives
                    // through the event stream below.
                    handle_input(cmd_tx, peer, notifier, in_flight, line.trim()).await;
                }
                Ok(None) | Err(_) => {
                    // stdin closed: log out and drain events until the
                    // session confirms the end.
                    let _ = cmd_tx.send(SessionCommand::Logout).await;
                    while let Some(event) = evt_rx.recv().await {
                        if render_event(notifier, &mut in_flight, &event) {
                            return;
                        }
                    }
                    return;
                }
            },
            event = evt_rx.recv() => match event {
                Some(event) => {
                    if render_event(notifier, &mut in_flight, &event) {
                        return;
                    }
                }
                None => return,
            },
        }
    }
}

/// Handle one line of user input. Returns `true` if a logout was issued.
async fn handle_input(
    cmd_tx: &mpsc::Sender<SessionCommand>,
    peer: &mut Option<UserId>,
    notifier: &ConsoleNotifier,
    in_flight: usize,
    line: &str,
) -> bool {
    if line.is_empty() {
        return false;
    }

    if line == "/quit" {
        if in_flight > 0 {
            let prompt = format!("{in_flight} message(s) still pending. Quit anyway?");
            if notifier.confirm(&prompt) == Confirmation::Dismissed {
                return false;
            }
        }
        let _ = cmd_tx.send(SessionCommand::Logout).await;
        return true;
    }

    if let Some(target) = line.strip_prefix("/to ") {
        let target = target.trim();
        if target.is_empty() {
            notifier.notify(&Notice::warning("usage: /to <peer>"));
            return false;
        }
        let new_peer = UserId::new(target);
        println!("Conversation with {new_peer}.");
        *peer = Some(new_peer.clone());
        let _ = cmd_tx
            .send(SessionCommand::OpenThread {
                peer: Some(new_peer),
            })
            .await;
        return false;
    }

    match peer {
        Some(to) => {
            let _ = cmd_tx
                .send(SessionCommand::SendMessage {
                    to: to.clone(),
                    text: line.to_string(),
                })
                .await;
        }
        None => notifier.notify(&Notice::warning("no peer selected; use /to <peer>")),
    }
    false
}

/// Print one session event. Returns `true` when the session has ended.
fn render_event(notifier: &ConsoleNotifier, in_flight: &mut usize, event: &SessionEvent) -> bool {
    match event {
        SessionEvent::MessageReceived {
            peer, sender_name, text, ..
        } => {
            let name = if sender_name.is_empty() {
                peer.as_str()
            } else {
                sender_name.as_str()
            };
            println!("{name}: {text}");
        }
        SessionEvent::MessageSent { text, .. } => {
            *in_flight += 1;
            println!("you: {text} [sending]");
        }
        SessionEvent::DeliveryUpdated { delivery, .. } => {
            *in_flight = in_flight.saturating_sub(1);
            match delivery {
                Delivery::Confirmed => {}
                Delivery::Failed => println!("  [not delivered]"),
                Delivery::Pending => {}
            }
        }
        SessionEvent::PeerReadMessages { by } => {
            println!("  [read by {by}]");
        }
        SessionEvent::LinkChanged { state } => {
            tracing::info!(%state, "link state changed");
        }
        SessionEvent::Reconnecting {
            attempt,
            max_attempts,
        } => {
            notifier.notify(&Notice::info(format!(
                "reconnecting... (attempt {attempt}/{max_attempts})"
            )));
        }
        SessionEvent::ScrollToLatest { .. } => {}
        SessionEvent::Notice(notice) => notifier.notify(notice),
        SessionEvent::SessionEnded { reason } => {
            notifier.notify(&Notice::info(format!("session ended: {reason:?}")));
            return true;
        }
    }
    false
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown so buffered
/// log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("huddle.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
