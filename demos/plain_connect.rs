//! Connect, write a line, print every event, disconnect.
//!
//! Demonstrates:
//! - Registering a delegate
//! - Connecting with a timeout and optional fingerprint pin
//! - Writing and receiving bytes
//!
//! Usage:
//!   cargo run --example plain_connect -- tcp://127.0.0.1:7000
//!   cargo run --example plain_connect -- wss://example.com --debug
//!   cargo run --example plain_connect -- wss://example.com --pin sha256/<base64>

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use stream_transport::{
    ConnectOptions, ConnectionState, FingerprintPinning, Result, TcpTransport, Transport,
    TransportEventClient,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use url::Url;

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    url: String,
    pin: Option<String>,
    debug: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let pin = args
            .iter()
            .position(|a| a == "--pin")
            .and_then(|i| args.get(i + 1).cloned());

        Self {
            url: args
                .iter()
                .find(|a| !a.starts_with("--") && Some(*a) != pin.as_ref())
                .cloned()
                .unwrap_or_else(|| "tcp://127.0.0.1:7000".to_string()),
            pin,
            debug: args.iter().any(|a| a == "--debug"),
        }
    }
}

/// Forwards events to the main task.
struct Forwarder(mpsc::UnboundedSender<ConnectionState>);

impl TransportEventClient for Forwarder {
    fn connection_changed(&self, state: ConnectionState) {
        let _ = self.0.send(state);
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== Plain Connect: {} ===\n", args.url);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let forwarder = Arc::new(Forwarder(tx));

    let transport = TcpTransport::new()?;
    transport.register_delegate(&forwarder);

    let mut options = ConnectOptions::new().with_timeout(Duration::from_secs(5));
    if let Some(pin) = &args.pin {
        options = options.with_pinning(Arc::new(FingerprintPinning::new().with_pin(pin)?));
    }

    let url = Url::parse(&args.url)?;
    transport.connect(&url, options);

    while let Some(state) = rx.recv().await {
        match state {
            ConnectionState::Connected => {
                println!("[Connected] tls={}", transport.uses_tls());
                transport.write(b"hello\r\n".to_vec()).await?;
            }
            ConnectionState::Receive(bytes) => {
                println!("[Receive] {}", String::from_utf8_lossy(&bytes));
                transport.disconnect();
            }
            ConnectionState::Failed(err) => {
                println!("[Failed] {err}");
                break;
            }
            ConnectionState::Cancelled => {
                println!("[Cancelled]");
                break;
            }
            other => println!("[{}] {other:?}", other.name()),
        }
    }

    Ok(())
}

/// Initialize tracing/logging.
fn init_logging(debug: bool) {
    let filter = if debug {
        "stream_transport=trace"
    } else {
        "stream_transport=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}
