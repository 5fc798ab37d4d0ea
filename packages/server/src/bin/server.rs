//! Multi-room WebSocket chat server.
//!
//! Every connection joins the default room and can create, join and leave
//! further rooms. Messages are broadcast to the members of one room.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin rooms-server
//! cargo run --bin rooms-server -- --host 0.0.0.0 --port 3000
//! cargo run --bin rooms-server -- --pong-wait-secs 30 --max-message-size 1024
//! ```

use std::{sync::Arc, time::Duration};

use clap::Parser;

use rooms_server::{
    config::EngineConfig, engine::Manager,
    infrastructure::event_publisher::TracingEventPublisher, ui::Server,
};
use rooms_shared::{logger::setup_logger, time::SystemClock};

#[derive(Parser, Debug)]
#[command(name = "rooms-server")]
#[command(about = "Multi-room WebSocket chat server", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// Seconds without any frame from a peer before it is dropped
    /// (the ping period is 9/10 of this)
    #[arg(long)]
    pong_wait_secs: Option<u64>,

    /// Seconds allowed for one write to a peer
    #[arg(long)]
    write_wait_secs: Option<u64>,

    /// Maximum inbound frame size in bytes
    #[arg(long)]
    max_message_size: Option<usize>,

    /// Outbound frames buffered per connection before it is evicted
    #[arg(long)]
    outbound_capacity: Option<usize>,

    /// Name of the room every connection joins on connect
    #[arg(long)]
    default_room: Option<String>,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(secs) = self.pong_wait_secs {
            config = config.with_pong_wait(Duration::from_secs(secs));
        }
        if let Some(secs) = self.write_wait_secs {
            config.write_wait = Duration::from_secs(secs);
        }
        if let Some(size) = self.max_message_size {
            config.max_message_size = size;
        }
        if let Some(capacity) = self.outbound_capacity {
            config.outbound_capacity = capacity;
        }
        if let Some(name) = &self.default_room {
            config.default_room_name = name.clone();
        }
        config
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(&["rooms_server", env!("CARGO_BIN_NAME")], "debug");

    let args = Args::parse();
    let config = args.engine_config();

    // 1. Manager actor with its default room
    let manager = match Manager::spawn(
        &config,
        Arc::new(SystemClock),
        Arc::new(TracingEventPublisher),
    ) {
        Ok(manager) => manager,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!("Room '{}' created!", config.default_room_name);

    // 2. Server
    let server = Server::new(manager, config);
    if let Err(e) = server.run(args.host, args.port).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
