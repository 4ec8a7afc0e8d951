use clap::Parser;
use garage_door_bridge::config::{Config, load_dotenv};
use garage_door_bridge::door::DoorSet;
use garage_door_bridge::error::Result;
use garage_door_bridge::input::gpio::GpioBackend;
use garage_door_bridge::input::mqtt::GarageBridge;
use garage_door_bridge::input::simulation::SimulatedDoor;
use garage_door_bridge::instance_lock::InstanceLock;
use log::{error, info};
use std::fs::OpenOptions;
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "garage-door-bridge")]
#[command(about = "Bridge garage door sensors and relays to an MQTT broker")]
struct Cli {
    /// Use simulated doors instead of GPIO
    #[arg(long, env = "SIMULATE")]
    simulate: bool,

    /// Seconds between door status polls (POLL_INTERVAL_SECS is read by the config)
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Do not publish the door states on startup
    #[arg(long, env = "NO_INITIAL_PUBLISH")]
    no_initial_publish: bool,

    /// Append log output to this file instead of stderr
    #[arg(long, env = "LOG_FILE")]
    log_file: Option<PathBuf>,
}

fn init_logger(log_file: Option<&PathBuf>) -> std::io::Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();

    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

/// Command-line flags take precedence over the environment.
fn apply_cli(config: &mut Config, cli: &Cli) {
    if let Some(interval) = cli.poll_interval {
        config.monitor.poll_interval_secs = interval;
    }
    if cli.no_initial_publish {
        config.monitor.publish_initial = false;
    }
}

fn build_doors(cli: &Cli, config: &Config) -> Result<DoorSet> {
    let pulse = config.monitor.relay_pulse();

    if cli.simulate {
        info!("Using simulated doors");
        let doors = config
            .doors
            .iter()
            .map(|door| SimulatedDoor::new(false).with_motion().door(&door.name, pulse))
            .collect();
        return Ok(DoorSet::new(doors));
    }

    let gpio = GpioBackend::new()?;
    Ok(DoorSet::new(gpio.doors(&config.doors, pulse)?))
}

async fn run(cli: Cli) -> Result<()> {
    let _lock = InstanceLock::acquire()?;

    let mut config = Config::from_env();
    apply_cli(&mut config, &cli);
    config.validate()?;

    info!("Configuration loaded:");
    info!(
        "  Broker: {}:{} (TLS: {})",
        config.mqtt.broker_host, config.mqtt.broker_port, config.mqtt.use_tls
    );
    info!("  Client ID: {}", config.mqtt.client_id);
    info!("  Command topic: {}", config.mqtt.command_topic);
    info!("  Poll interval: {:?}", config.monitor.poll_interval());
    for door in &config.doors {
        info!(
            "  {}: state pin {}, relay pin {}",
            door.name, door.state_pin, door.relay_pin
        );
    }

    let doors = build_doors(&cli, &config)?;
    let bridge = GarageBridge::new(config, doors);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal_token.cancel();
    });

    info!("Press Ctrl+C to exit");
    bridge.run(shutdown).await
}

fn main() {
    // Load .env file before the runtime spawns its worker threads
    load_dotenv();
    let cli = Cli::parse();

    if let Err(e) = init_logger(cli.log_file.as_ref()) {
        eprintln!("Failed to open log file: {}", e);
        std::process::exit(1);
    }

    info!("Starting Garage Door Bridge");

    if let Err(e) = start(cli) {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("Garage Door Bridge stopped");
}

#[tokio::main]
async fn start(cli: Cli) -> Result<()> {
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(cli: &Cli, lookup: impl Fn(&str) -> Option<String>) -> Config {
        let mut config = Config::from_lookup(lookup);
        apply_cli(&mut config, cli);
        config
    }

    #[test]
    fn test_poll_interval_env_is_left_to_config() {
        let cli = Cli::try_parse_from(["garage-door-bridge"]).unwrap();
        assert!(cli.poll_interval.is_none());

        let config = config_for(&cli, |key| {
            (key == "POLL_INTERVAL_SECS").then(|| "abc".to_string())
        });
        assert_eq!(config.monitor.poll_interval_secs, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::try_parse_from([
            "garage-door-bridge",
            "--poll-interval",
            "7",
            "--no-initial-publish",
        ])
        .unwrap();

        let config = config_for(&cli, |key| {
            (key == "POLL_INTERVAL_SECS").then(|| "30".to_string())
        });
        assert_eq!(config.monitor.poll_interval_secs, 7);
        assert!(!config.monitor.publish_initial);
    }

    #[test]
    fn test_invalid_poll_interval_flag_is_rejected() {
        assert!(Cli::try_parse_from(["garage-door-bridge", "--poll-interval", "abc"]).is_err());
    }
}
