use anyhow::{ensure, Context, Result};
use blebms_lib::driver::with_retries;
use blebms_lib::publish;
use blebms_lib::{BmsDriver, BmsSample, CellVoltages, Error};
use log::{error, info, warn};
use std::time::Duration;

use crate::{commandline, mqtt};

struct Reading {
    sample: BmsSample,
    cells: Option<CellVoltages>,
}

async fn read(bms: &mut dyn BmsDriver, retries: u8) -> Result<Reading, Error> {
    if bms.state() == blebms_lib::DriverState::Disconnected {
        bms.connect().await?;
    }
    let sample = with_retries(bms, retries, "sample", |bms| bms.fetch()).await?;
    let cells = match with_retries(bms, retries, "cell voltages", |bms| bms.fetch_voltages()).await
    {
        Ok(cells) => Some(cells),
        Err(e) => {
            error!("Error fetching cell voltages: {e}");
            None
        }
    };
    Ok(Reading { sample, cells })
}

fn print_reading(reading: &Reading) {
    println!("--- Data at {} ---", chrono::Local::now().to_rfc3339());
    println!("Sample: {:?}", reading.sample);
    if let Some(cells) = &reading.cells {
        for (index, volts) in cells.indexed() {
            println!("Cell {index}: {volts:.3} V");
        }
    }
    println!("--------------------------");
}

async fn publish_reading(
    publisher: &mqtt::MqttPublisher,
    format: commandline::MqttFormat,
    reading: &Reading,
) {
    let topic = publisher.topic();
    match format {
        commandline::MqttFormat::Json => {
            let mut document = publish::json_document(&reading.sample, reading.cells.as_ref());
            if let Some(map) = document.as_object_mut() {
                map.insert(
                    "timestamp".to_string(),
                    serde_json::json!(chrono::Utc::now().to_rfc3339()),
                );
            }
            match serde_json::to_string(&document) {
                Ok(json_payload) => {
                    info!("MQTT output: Attempting to publish data: {json_payload}");
                    if let Err(e) = publisher.publish(topic, &json_payload, false).await {
                        error!("Failed to publish data to MQTT: {e:?}");
                    } else {
                        info!("Successfully published data to MQTT.");
                    }
                }
                Err(e) => error!("Failed to serialize data to JSON string: {e}"),
            }
        }
        commandline::MqttFormat::Simple => {
            publisher
                .publish_all(&publish::sample_messages(topic, &reading.sample))
                .await;
            if let Some(cells) = &reading.cells {
                publisher
                    .publish_all(&publish::cell_voltage_messages(topic, cells))
                    .await;
            }
        }
    }
}

pub async fn run(
    bms: &mut dyn BmsDriver,
    output: commandline::DaemonOutput,
    interval: Duration,
    retries: u8,
) -> Result<()> {
    ensure!(!interval.is_zero(), "Interval must not be zero");
    info!(
        "Starting daemon mode: bms={}, output={output:?}, interval={interval:?}",
        bms.name()
    );

    let mut mqtt_publisher: Option<mqtt::MqttPublisher> = None;
    let mut discovery_pending = false;

    if let commandline::DaemonOutput::Mqtt {
        config_file,
        no_discovery,
        ..
    } = &output
    {
        let config = mqtt::MqttConfig::load(config_file)
            .with_context(|| format!("Failed to open MQTT config file at '{config_file}'"))?;
        info!("Successfully loaded MQTT config from {config_file}: {config:?}");
        let publisher =
            mqtt::MqttPublisher::new(config).with_context(|| "Failed to create MQTT publisher")?;
        info!("MQTT Publisher created successfully.");
        mqtt_publisher = Some(publisher);
        discovery_pending = !no_discovery;
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let reading = match read(bms, retries).await {
            Ok(reading) => reading,
            Err(e) => {
                error!("Error fetching sample: {e}");
                if let Err(e) = bms.disconnect().await {
                    warn!("Disconnect failed: {e}");
                }
                continue;
            }
        };

        match &output {
            commandline::DaemonOutput::Console => print_reading(&reading),
            commandline::DaemonOutput::Mqtt { format, .. } => {
                if let Some(publisher) = &mqtt_publisher {
                    if discovery_pending {
                        if let Some(cells) = &reading.cells {
                            info!("Publishing Home Assistant discovery for {} cells", cells.len());
                            publisher
                                .publish_all(&publish::hass_discovery(
                                    publisher.topic(),
                                    cells.len(),
                                    cells.base(),
                                ))
                                .await;
                            discovery_pending = false;
                        }
                    }
                    publish_reading(publisher, *format, &reading).await;
                } else {
                    warn!(
                        "MQTT output selected, but publisher is not initialized. Skipping publish."
                    );
                }
            }
        }
    }
}
