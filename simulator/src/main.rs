mod reading;

use anyhow::{ensure, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use reading::Profile;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Publishes synthetic sensor readings to the monitor's MQTT topic.
#[derive(Debug, Parser)]
#[command(name = "simulator", version)]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Device ids to publish for, comma separated. They must exist in the monitor.
    #[arg(long, env = "SIM_DEVICES", value_delimiter = ',', default_value = "1")]
    devices: Vec<i64>,

    /// Delay between rounds; each round publishes one reading per device
    #[arg(long, env = "SIM_INTERVAL_MS", default_value_t = 1000)]
    interval_ms: u64,

    /// Stop after this many rounds
    #[arg(long, env = "SIM_ROUNDS")]
    rounds: Option<u64>,

    #[arg(long, default_value_t = 2.0, allow_negative_numbers = true)]
    temp_min: f64,

    #[arg(long, default_value_t = 8.0, allow_negative_numbers = true)]
    temp_max: f64,

    #[arg(long, default_value_t = 40.0)]
    humidity_min: f64,

    #[arg(long, default_value_t = 60.0)]
    humidity_max: f64,

    /// Share of values drawn from the full sensor range
    #[arg(long, env = "SIM_OUTLIER_RATE", default_value_t = 0.05)]
    outlier_rate: f64,

    /// Historical readings to publish per device before going live
    #[arg(long, default_value_t = 0)]
    backfill: u32,

    /// Spacing of backfilled readings
    #[arg(long, default_value_t = 15)]
    backfill_step_minutes: i64,
}

impl Args {
    fn profile(&self) -> Result<Profile> {
        ensure!(self.temp_min < self.temp_max, "--temp-min must be below --temp-max");
        ensure!(
            self.humidity_min < self.humidity_max,
            "--humidity-min must be below --humidity-max"
        );
        ensure!(
            (0.0..=1.0).contains(&self.outlier_rate),
            "--outlier-rate must be within [0, 1]"
        );
        ensure!(!self.devices.is_empty(), "at least one device id is required");
        ensure!(self.backfill_step_minutes >= 1, "--backfill-step-minutes must be at least 1");

        Ok(Profile {
            temperature: self.temp_min..self.temp_max,
            humidity: self.humidity_min..self.humidity_max,
            outlier_rate: self.outlier_rate,
        })
    }
}

async fn publish(client: &AsyncClient, reading: &reading::Reading) -> Result<()> {
    let topic = format!("readings/{}", reading.device_id);
    let payload = serde_json::to_string(reading).context("serialize reading")?;
    client
        .publish(topic, QoS::AtLeastOnce, false, payload)
        .await
        .context("publish reading")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let profile = args.profile()?;

    info!("Starting sensor simulator");
    info!(
        "Broker: {}:{}, devices: {:?}, interval: {}ms",
        args.broker, args.port, args.devices, args.interval_ms
    );

    let client_id = format!("sim-{}", uuid::Uuid::new_v4());
    let mut mqtt_options = MqttOptions::new(client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 1000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    let mut rng = rand::thread_rng();

    if args.backfill > 0 {
        let now = Utc::now();
        let step = ChronoDuration::minutes(args.backfill_step_minutes);
        for &device_id in &args.devices {
            for i in (1..=args.backfill).rev() {
                let reading = profile.generate(&mut rng, device_id, now - step * i as i32);
                publish(&client, &reading).await?;
            }
        }
        info!("Backfilled {} readings per device", args.backfill);
    }

    let interval = Duration::from_millis(args.interval_ms);
    let mut published = 0u64;
    let mut round = 0u64;

    loop {
        if args.rounds.is_some_and(|limit| round >= limit) {
            break;
        }
        round += 1;

        for &device_id in &args.devices {
            let reading = profile.generate(&mut rng, device_id, Utc::now());
            match publish(&client, &reading).await {
                Ok(()) => published += 1,
                Err(e) => warn!("Failed to publish for device {}: {:#}", device_id, e),
            }
        }

        if round % 60 == 0 {
            info!("Published {} readings", published);
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    info!("Simulator stopped after {} readings", published);
    // Let queued publishes reach the broker
    tokio::time::sleep(Duration::from_millis(500)).await;
    client.disconnect().await.ok();
    Ok(())
}
