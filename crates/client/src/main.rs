//! raptor-realtime - watch a realtime session from the terminal
//!
//! Connects to the dispatch backend, subscribes to the given channels and
//! prints every push update and state change until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use raptor_client::{logging, RealtimeConfig, RealtimeSession, SessionState};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "raptor-realtime")]
#[command(about = "Connect to the raptor realtime channel and print live updates")]
#[command(version)]
struct Cli {
    /// WebSocket endpoint (overrides RAPTOR_WS_URL)
    #[arg(long)]
    url: Option<String>,

    /// User identifier sent as the `email` handshake parameter
    #[arg(long, short = 'u', env = "RAPTOR_USER")]
    user: Option<String>,

    /// Channel to subscribe to; repeat for several
    #[arg(long = "channel", short = 'c')]
    channels: Vec<String>,

    /// Fetch this customer's profile once connected
    #[arg(long, value_name = "EMAIL")]
    fetch_profile: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init()?;
    let cli = Cli::parse();

    let mut config = RealtimeConfig::from_env().context("Invalid RAPTOR_* environment")?;
    if let Some(url) = cli.url.as_deref() {
        config = config.with_endpoint(url)?;
    }

    let session = RealtimeSession::new(config);
    if !cli.channels.is_empty() {
        session.subscribe(cli.channels.clone());
    }
    session.connect(cli.user.clone());

    if let Some(email) = cli.fetch_profile.clone() {
        let session = session.clone();
        tokio::spawn(async move {
            let mut state = session.watch_state();
            if state.wait_for(SessionState::is_connected).await.is_err() {
                return;
            }
            match session.fetch_customer_profile(&email).await {
                Ok(profile) => println!("profile {}", serde_json::Value::Object(profile)),
                Err(e) => eprintln!("profile request failed: {}", e),
            }
        });
    }

    watch(&session).await?;

    session.disconnect().await;
    Ok(())
}

/// Print updates until Ctrl-C.
async fn watch(session: &RealtimeSession) -> Result<()> {
    let mut state = session.watch_state();
    let mut chat = session.chat_messages();
    let mut orders = session.order_updates();
    let mut locations = session.location_updates();
    let mut notices = session.server_notices();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                println!("disconnecting");
                return Ok(());
            }
            changed = state.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                println!("state {}", *state.borrow_and_update());
            }
            update = chat.recv() => print_update("chat", update),
            update = orders.recv() => print_update("order", update),
            update = locations.recv() => print_update("location", update),
            notice = notices.recv() => match notice {
                Ok(notice) => println!("server {}", notice),
                Err(RecvError::Lagged(n)) => eprintln!("missed {} server notices", n),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

fn print_update(label: &str, update: Result<raptor_shared::Payload, RecvError>) {
    match update {
        Ok(data) => println!("{} {}", label, serde_json::Value::Object(data)),
        Err(RecvError::Lagged(n)) => eprintln!("missed {} {} updates", n, label),
        // Outputs live as long as the session; nothing to do.
        Err(RecvError::Closed) => {}
    }
}
