//! Command-line tool for triggering a door through the broker.
//!
//! Usage:
//!   cargo run --bin door-cmd -- garage_door_1
//!   cargo run --bin door-cmd -- garage_door_2 --watch
//!
//! Publishes `{"door": "<name>"}` on the command topic and, with `--watch`,
//! logs the status topics until Ctrl+C.

use clap::Parser;
use garage_door_bridge::config::{Config, load_dotenv};
use garage_door_bridge::door::DoorCommand;
use garage_door_bridge::input::mqtt::MqttClient;
use log::{error, info, warn};
use rumqttc::QoS;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "door-cmd")]
#[command(about = "Send a toggle command to the garage door bridge")]
struct Cli {
    /// Door to toggle (e.g. garage_door_1)
    door: String,

    /// Keep running and log door status updates
    #[arg(long)]
    watch: bool,

    /// Client ID to connect with (must differ from the bridge's)
    #[arg(long, env = "DOOR_CMD_CLIENT_ID", default_value = "garagedoor-cmd")]
    client_id: String,
}

fn main() {
    // Load .env file before the runtime spawns its worker threads
    load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    run(Cli::parse());
}

#[tokio::main]
async fn run(cli: Cli) {
    let mut config = Config::from_env();
    config.mqtt.client_id = cli.client_id.clone();

    let payload = match DoorCommand::new(&cli.door).to_payload() {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to encode command: {}", e);
            std::process::exit(1);
        }
    };

    let mut mqtt_client = match MqttClient::new(&config.mqtt) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create MQTT client: {}", e);
            std::process::exit(1);
        }
    };
    if cli.watch {
        for door in &config.doors {
            mqtt_client =
                mqtt_client.with_subscription(format!("{}_status", door.name), QoS::AtLeastOnce);
        }
    }
    let client = mqtt_client.client();

    let (msg_tx, mut msg_rx) = mpsc::channel(16);
    let (connected_tx, connected_rx) = oneshot::channel();
    let cancel = CancellationToken::new();
    let mqtt_handle = tokio::spawn(mqtt_client.run(msg_tx, Some(connected_tx), cancel.clone()));

    info!(
        "Connecting to MQTT broker at {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    if !matches!(
        tokio::time::timeout(Duration::from_secs(10), connected_rx).await,
        Ok(Ok(()))
    ) {
        error!("Could not connect to the broker");
        cancel.cancel();
        std::process::exit(1);
    }

    if let Err(e) = client
        .publish(&config.mqtt.command_topic, QoS::AtLeastOnce, false, payload.clone())
        .await
    {
        error!("Failed to publish command: {}", e);
        std::process::exit(1);
    }
    info!("Sent {} to {}", payload, config.mqtt.command_topic);

    if cli.watch {
        info!("Watching door status... Press Ctrl+C to exit.");
        loop {
            tokio::select! {
                msg = msg_rx.recv() => match msg {
                    Some(msg) => info!(">>> {} = {}", msg.topic, msg.payload),
                    None => {
                        warn!("MQTT event loop ended");
                        break;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down...");
                    break;
                }
            }
        }
    } else {
        // Let the event loop deliver the QoS 1 publish before disconnecting
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    if let Err(e) = client.disconnect().await {
        warn!("Failed to disconnect: {}", e);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    let _ = mqtt_handle.await;
}
