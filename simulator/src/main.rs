mod telemetry;

use clap::{Parser, ValueEnum};
use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde_json::json;
use std::time::Duration;
use telemetry::{demo_script, Condition, Telemetry};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    /// Scripted walkthrough of every hazard, then exit
    Demo,
    /// Random mix of conditions until interrupted
    Random,
}

/// Publishes field-device telemetry to the MineSense MQTT ingestion topic.
#[derive(Debug, Parser)]
#[command(name = "minesense-simulator")]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Device ids to publish as; must already be registered. Random ids if omitted.
    #[arg(long, env = "DEVICES", value_delimiter = ',')]
    devices: Vec<Uuid>,

    /// Number of random devices when --devices is not given
    #[arg(long, default_value_t = 3)]
    device_count: usize,

    #[arg(long, value_enum, default_value_t = Scenario::Demo)]
    scenario: Scenario,

    /// Milliseconds between publishes per device
    #[arg(long, env = "INTERVAL_MS", default_value_t = 1000)]
    interval_ms: u64,

    /// Share of messages sent as a structured envelope instead of flat telemetry
    #[arg(long, default_value_t = 0.5)]
    envelope_ratio: f64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let devices = if args.devices.is_empty() {
        let generated: Vec<Uuid> = (0..args.device_count).map(|_| Uuid::new_v4()).collect();
        warn!("No --devices given, generated {} random ids (Postgres rejects them; pass ids returned by POST /api/v1/devices via --devices)", generated.len());
        generated
    } else {
        args.devices.clone()
    };

    info!("Starting MineSense simulator");
    info!(
        "Broker: {}:{}, Devices: {}, Scenario: {:?}",
        args.broker,
        args.port,
        devices.len(),
        args.scenario
    );

    let client_id = format!("sim-{}", rand::thread_rng().gen::<u32>());
    let mut mqtt_options = MqttOptions::new(&client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 20000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(2)).await;
    info!("Connected to MQTT broker, starting to publish telemetry");

    let interval = Duration::from_millis(args.interval_ms);
    let mut rng = rand::thread_rng();
    let mut published = 0u64;

    match args.scenario {
        Scenario::Demo => {
            for (label, condition, rounds) in demo_script() {
                info!("{} ({} rounds)", label, rounds);
                for _ in 0..rounds {
                    for device_id in &devices {
                        let sample = condition.sample(&mut rng);
                        published += publish(&client, *device_id, &sample, &args, &mut rng).await;
                    }
                    tokio::time::sleep(interval).await;
                }
            }
            // Let the event loop flush the last QoS 1 publishes.
            tokio::time::sleep(Duration::from_secs(1)).await;
            info!("Simulation complete, published {} messages", published);
        }
        Scenario::Random => loop {
            for device_id in &devices {
                let sample = Condition::random(&mut rng).sample(&mut rng);
                published += publish(&client, *device_id, &sample, &args, &mut rng).await;
            }
            if published % 100 < devices.len() as u64 {
                info!("Published {} messages", published);
            }
            tokio::time::sleep(interval).await;
        },
    }
}

async fn publish(
    client: &AsyncClient,
    device_id: Uuid,
    sample: &Telemetry,
    args: &Args,
    rng: &mut impl Rng,
) -> u64 {
    let body = if rng.gen_bool(args.envelope_ratio.clamp(0.0, 1.0)) {
        json!({
            "device_id": device_id.to_string(),
            "sensor_type": "telemetry",
            "payload": sample,
        })
    } else {
        json!(sample)
    };

    let topic = format!("telemetry/{}", device_id);
    match client
        .publish(&topic, QoS::AtLeastOnce, false, body.to_string())
        .await
    {
        Ok(_) => {
            debug!("Sent {:?} for {}", sample, device_id);
            1
        }
        Err(e) => {
            warn!("Failed to publish: {}", e);
            0
        }
    }
}
