use crate::errors::{Error, Result};
use crate::metrics::{CHANNEL_FULL_TOTAL, REJECTED_READINGS_TOTAL};
use crate::model::NewReading;
use crate::validate::validate_reading;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const READINGS_TOPIC: &str = "readings/#";

pub async fn run_mqtt(
    broker: String,
    port: u16,
    client_id: String,
    tx: mpsc::Sender<NewReading>,
) -> Result<()> {
    info!("Connecting to MQTT broker at {}:{}", broker, port);

    let mut mqtt_options = MqttOptions::new(client_id, broker, port);
    mqtt_options.set_keep_alive(std::time::Duration::from_secs(30));
    mqtt_options.set_clean_session(false);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10000);

    client
        .subscribe(READINGS_TOPIC, QoS::AtLeastOnce)
        .await
        .map_err(Error::Mqtt)?;

    info!("Subscribed to {} with QoS 1", READINGS_TOPIC);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    "Received reading on topic {}, size: {} bytes",
                    publish.topic,
                    publish.payload.len()
                );

                match process_message(&publish.payload, &tx).await {
                    Ok(()) => {}
                    // The worker is gone for good
                    Err(Error::ChannelSend) => return Err(Error::ChannelSend),
                    Err(e) => {
                        warn!("Dropping message from {}: {}", publish.topic, e);
                        REJECTED_READINGS_TOTAL.inc();
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc reconnects on the next poll
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// Parses and validates one message and hands it to the ingestion worker.
/// Malformed payloads are rejected outright; retrying them cannot help.
async fn process_message(payload: &[u8], tx: &mpsc::Sender<NewReading>) -> Result<()> {
    let reading = serde_json::from_slice::<NewReading>(payload)
        .map_err(|e| Error::Validation(format!("JSON parse error: {}", e)))?;

    validate_reading(&reading)?;

    match tx.try_send(reading) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(reading)) => {
            CHANNEL_FULL_TOTAL.inc();
            debug!("Channel full, using blocking send");
            tx.send(reading).await.map_err(|_| Error::ChannelSend)
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            error!("Channel closed, cannot forward reading");
            Err(Error::ChannelSend)
        }
    }
}
