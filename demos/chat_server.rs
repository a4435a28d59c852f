//! Multiplexed chat server.
//!
//! Demonstrates:
//! - Binding a Server around a Multiplexer
//! - Registering an extension that runs for every new channel
//! - Broadcasting channel messages to every membership
//!
//! Usage:
//!   cargo run --example chat_server
//!   cargo run --example chat_server -- --port 8080
//!   cargo run --example chat_server -- --debug
//!
//! Peers send `[1, "x1", "chat", null]` to join and
//! `[0, "x1", "chat", "hello"]` to talk.

// ============================================================================
// Imports
// ============================================================================

use channel_multiplex::{Channel, ChannelEvent, MultiplexOptions, Multiplexer, Server};
use serde_json::json;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const ROOMS: &[&str] = &["chat", "news"];

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    port: u16,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let port = args
            .iter()
            .position(|a| a == "--port")
            .and_then(|i| args.get(i + 1))
            .and_then(|p| p.parse().ok())
            .unwrap_or(0);

        Self {
            debug: args.iter().any(|a| a == "--debug"),
            port,
        }
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
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    println!("=== Chat Server ===\n");

    let multiplexer = Multiplexer::builder()
        .extension(|channel: &Channel, _: &MultiplexOptions| {
            println!("[Channel] created {}", channel.name());
        })
        .build();

    let server = Server::with_port(multiplexer, args.port).await?;

    for room in ROOMS {
        let channel = server.channel(room);
        let broadcast = channel.clone();
        channel.set_event_handler(move |event| match event {
            ChannelEvent::Connection(member) => {
                println!("[{}] {} joined", broadcast.name(), member.id());
            }
            ChannelEvent::Data { connection, payload } => {
                let delivered = broadcast.write(json!({
                    "from": connection.id().as_str(),
                    "text": payload,
                }));
                println!("[{}] {} -> {delivered} members", broadcast.name(), connection.id());
            }
            ChannelEvent::Disconnection(member) => {
                println!("[{}] {} left", broadcast.name(), member.id());
            }
        });
    }

    println!("Listening on {}", server.ws_url());
    println!("Press Ctrl+C to exit...");
    tokio::signal::ctrl_c().await?;

    server.shutdown().await;
    println!("\n=== Done ===");
    Ok(())
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "channel_multiplex=debug"
    } else {
        "channel_multiplex=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}
