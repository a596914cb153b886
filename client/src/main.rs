use clap::Parser;
use client::input::ScriptedInput;
use client::network::Client;
use client::session::ClientSession;
use log::info;
use shared::sim::PlatformerSim;
use shared::{ImpairmentConfig, SessionConfig, SessionContext, StartSession};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Host frames per second driving the tick clock
    #[arg(short = 'f', long, default_value = "60")]
    frame_rate: u32,

    /// Most ticks executed in a single frame while catching up
    #[arg(short = 'm', long, default_value = "10")]
    max_ticks_per_frame: u32,

    /// Seed for the scripted player input
    #[arg(long, default_value = "1")]
    input_seed: u64,

    /// Seed shared by the simulation; differing seeds force a desync
    #[arg(long, default_value = "0")]
    sim_seed: u64,

    /// Disconnect after this many confirmed ticks
    #[arg(short = 't', long)]
    ticks: Option<u32>,

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

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = SessionConfig {
        max_ticks_per_frame: args.max_ticks_per_frame,
        impairment: ImpairmentConfig {
            delay_ms: args.delay_ms,
            jitter_ms: args.jitter_ms,
            drop_percent: args.drop_percent,
            duplication_percent: args.duplication_percent,
        },
        ..SessionConfig::default()
    };
    let ctx = SessionContext::new(config, "[client]")?;

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    let sim_seed = args.sim_seed;
    let session = ClientSession::new(
        &ctx,
        Box::new(move |start: &StartSession| PlatformerSim::new(&start.roster, sim_seed)),
        ScriptedInput::new(args.input_seed),
    );

    let mut client = Client::connect(&ctx, &args.server, session, args.frame_rate).await?;
    client.run(args.ticks).await?;

    if let Some(sim) = client.session().simulation() {
        info!(
            "{} finished at tick {} with state hash {:016x}",
            client.session().label(),
            sim.tick,
            shared::Simulation::state_hash(sim)
        );
    }

    Ok(())
}
