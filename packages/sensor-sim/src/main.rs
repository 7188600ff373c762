//! Synthetic LiDAR packet generator: replays a named scenario at a fixed
//! packet rate against a UDP destination.

mod packet_gen;
mod scene;
mod scenarios;
mod udp_tx;

use std::time::Duration;

use clap::Parser;
use tokio::time::interval;
use tracing::{info, warn};

use packet_gen::PacketGenerator;
use sensor_types::NOMINAL_PACKET_AZIMUTH_SPAN_DEG;
use udp_tx::UdpTransmitter;

#[derive(Parser, Debug)]
#[command(name = "sensor-sim", about = "Synthetic LiDAR packet generator")]
struct Args {
    /// Named scenario to run.
    #[arg(long, default_value = "single-intruder")]
    scenario: String,
    /// Destination address for generated packets.
    #[arg(long, default_value = "127.0.0.1:2368")]
    target_addr: String,
    /// Packets per second; overrides the scenario's own rate when set.
    #[arg(long)]
    rate_hz: Option<f64>,
    /// Run duration in seconds; overrides the scenario's own duration when set.
    #[arg(long)]
    duration_s: Option<f64>,
    /// List available scenario names and exit.
    #[arg(long)]
    list_scenarios: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sensor_sim=info".into()),
        )
        .init();

    let args = Args::parse();

    if args.list_scenarios {
        for name in scenarios::names() {
            println!("{name}");
        }
        return;
    }

    let mut config = match scenarios::preset(&args.scenario) {
        Some(cfg) => cfg,
        None => {
            warn!(scenario = %args.scenario, "unknown scenario, use --list-scenarios");
            return;
        }
    };
    let rate_hz = args.rate_hz.unwrap_or(config.packet_rate_hz);
    let duration_s = args.duration_s.unwrap_or(config.duration_s);

    let transmitter = match UdpTransmitter::new(&args.target_addr) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "failed to bind UDP socket");
            return;
        }
    };

    info!(
        scenario = %args.scenario,
        target = %args.target_addr,
        rate_hz,
        duration_s,
        "starting packet generator"
    );

    let generator = PacketGenerator::new();
    let period = Duration::from_secs_f64(1.0 / rate_hz);
    let mut ticker = interval(period);
    let azimuth_step_deg = NOMINAL_PACKET_AZIMUTH_SPAN_DEG;
    let mut base_azimuth_deg = 0.0f64;
    let mut rng = rand::thread_rng();
    let deadline = tokio::time::Instant::now() + Duration::from_secs_f64(duration_s);

    let mut sent = 0u64;
    loop {
        ticker.tick().await;
        if tokio::time::Instant::now() >= deadline {
            break;
        }

        config.scene.tick(period.as_secs_f64());
        let now_ns = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let packet = generator.generate(&config.scene, base_azimuth_deg, now_ns, &mut rng);
        transmitter.send_packet(&packet);

        base_azimuth_deg = (base_azimuth_deg + azimuth_step_deg).rem_euclid(360.0);
        sent += 1;
    }

    info!(sent, "packet generator finished");
}
