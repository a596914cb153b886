use clap::Parser;
use log::info;
use server::network::Server;
use shared::sim::PlayerInput;
use shared::{ImpairmentConfig, SessionConfig, SessionContext};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Lockstep relay server")]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Simulation ticks per second
    #[arg(short, long, default_value = "30")]
    tick_rate: u16,

    /// Ticks a client may run ahead of the last confirmed tick
    #[arg(short = 'l', long, default_value = "4")]
    forced_latency: u32,

    /// Roster size; the session starts once this many peers joined
    #[arg(short = 'n', long, default_value = "2")]
    max_connections: u16,

    /// Start with a partial roster after this many seconds in the lobby
    #[arg(long)]
    lobby_timeout: Option<f64>,

    /// Artificial delay on every outgoing frame
    #[arg(long, default_value = "0")]
    delay_ms: u64,

    /// Random extra delay per frame
    #[arg(long, default_value = "0")]
    jitter_ms: u64,

    /// Chance (0-100) that a frame is retransmitted late
    #[arg(long, default_value = "0")]
    drop_percent: u8,

    /// Chance (0-100) that a frame is sent twice
    #[arg(long, default_value = "0")]
    duplication_percent: u8,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            server_port: self.port,
            tick_rate: self.tick_rate,
            forced_latency_ticks: self.forced_latency,
            max_connections: self.max_connections,
            lobby_timeout: self
                .lobby_timeout
                .filter(|secs| *secs > 0.0)
                .map(Duration::from_secs_f64),
            impairment: ImpairmentConfig {
                delay_ms: self.delay_ms,
                jitter_ms: self.jitter_ms,
                drop_percent: self.drop_percent,
                duplication_percent: self.duplication_percent,
            },
            ..SessionConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let ctx = SessionContext::new(args.session_config(), "[server]")?;
    if ctx.config.impairment.is_enabled() {
        info!("[server] network impairment: {:?}", ctx.config.impairment);
    }

    let address = format!("{}:{}", args.host, ctx.config.server_port);
    let mut server = Server::<PlayerInput>::bind(ctx, &address).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("[server] received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
