use anyhow::{bail, Context, Result};
use lifeblue_lib::transport::{NotifyHandle, Transport};
use lifeblue_lib::{BatteryCoordinator, BatteryRecord, FragmentOutcome, Telemetry};
use log::{debug, error, info, warn};
use serde_json::json;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::{commandline, mqtt};

fn telemetry_json(identity: &str, telemetry: &Telemetry) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(telemetry)?;
    if let serde_json::Value::Object(map) = &mut value {
        map.insert("address".to_string(), json!(identity));
        map.insert(
            "timestamp".to_string(),
            json!(chrono::Utc::now().to_rfc3339()),
        );
        map.insert("voltage".to_string(), json!(telemetry.voltage_v()));
        map.insert("current".to_string(), json!(telemetry.current_a()));
        map.insert("amp_hours".to_string(), json!(telemetry.amp_hours_ah()));
        map.insert("temperature_c".to_string(), json!(telemetry.temperature_c()));
        map.insert("temperature_f".to_string(), json!(telemetry.temperature_f()));
    }
    Ok(value)
}

fn publish_simple_format(
    publisher: &mqtt::MqttPublisher,
    base_topic: &str,
    value: &serde_json::Value,
) {
    fn publish_recursive(publisher: &mqtt::MqttPublisher, topic: &str, val: &serde_json::Value) {
        match val {
            serde_json::Value::Object(map) => {
                for (k, v) in map {
                    let sub_topic = format!("{topic}/{k}");
                    publish_recursive(publisher, &sub_topic, v);
                }
            }
            serde_json::Value::Array(arr) => {
                for (i, v) in arr.iter().enumerate() {
                    let sub_topic = format!("{topic}/{i}");
                    publish_recursive(publisher, &sub_topic, v);
                }
            }
            serde_json::Value::String(s) => {
                if let Err(e) = publisher.publish(topic, s) {
                    error!("Failed to publish message to topic {topic}: {e}");
                }
            }
            serde_json::Value::Number(n) => {
                if let Err(e) = publisher.publish(topic, &n.to_string()) {
                    error!("Failed to publish message to topic {topic}: {e}");
                }
            }
            serde_json::Value::Bool(b) => {
                if let Err(e) = publisher.publish(topic, &b.to_string()) {
                    error!("Failed to publish message to topic {topic}: {e}");
                }
            }
            serde_json::Value::Null => {}
        }
    }
    publish_recursive(publisher, base_topic, value);
}

/// Sends every freshly decoded battery to the selected destination.
struct Output {
    destination: commandline::DaemonOutput,
    publisher: Option<mqtt::MqttPublisher>,
}

impl Output {
    fn new(destination: commandline::DaemonOutput) -> Result<Self> {
        let mut publisher = None;
        if let commandline::DaemonOutput::Mqtt { config_file, .. } = &destination {
            let config = mqtt::MqttConfig::load(config_file)
                .with_context(|| format!("Failed to open MQTT config file at '{config_file}'"))?;
            info!("Successfully loaded MQTT config from {config_file}: {config:?}");
            publisher = Some(
                mqtt::MqttPublisher::new(config)
                    .with_context(|| "Failed to create MQTT publisher")?,
            );
            info!("MQTT Publisher created successfully.");
        }
        Ok(Self {
            destination,
            publisher,
        })
    }

    fn emit(&self, battery: &BatteryRecord) {
        let Some(telemetry) = battery.telemetry() else {
            return;
        };
        match &self.destination {
            commandline::DaemonOutput::Console => {
                println!("--- Data at {} ---", chrono::Local::now().to_rfc3339());
                println!("{battery}");
            }
            commandline::DaemonOutput::Mqtt { format, .. } => {
                let Some(publisher) = &self.publisher else {
                    warn!("MQTT output selected, but publisher is not initialized. Skipping publish.");
                    return;
                };
                let value = match telemetry_json(battery.identity(), telemetry) {
                    Ok(value) => value,
                    Err(e) => {
                        error!("Failed to serialize telemetry of {}: {e}", battery.identity());
                        return;
                    }
                };
                let topic = publisher.topic_for(battery.identity());
                match format {
                    commandline::MqttFormat::Json => {
                        let payload = value.to_string();
                        if let Err(e) = publisher.publish(&topic, &payload) {
                            error!("Failed to publish data to MQTT: {e:?}");
                        } else {
                            info!("Published telemetry of {} to {topic}", battery.identity());
                        }
                    }
                    commandline::MqttFormat::Simple => publish_simple_format(publisher, &topic, &value),
                }
            }
        }
    }
}

/// Drive `coordinator` forever: tick every `interval` and feed it the
/// notifications arriving on `notifications` in between.
pub fn run<T: Transport>(
    coordinator: BatteryCoordinator<T>,
    notifications: Receiver<(NotifyHandle, Vec<u8>)>,
    output: commandline::DaemonOutput,
    interval: Duration,
) -> Result<()> {
    info!(
        "Starting daemon mode: output={output:?}, interval={interval:?}, batteries={}",
        coordinator.batteries().len()
    );
    let output = Output::new(output)?;
    pump(coordinator, &notifications, interval, |battery| {
        output.emit(battery)
    })
}

/// Returns only once the notification channel is closed.
fn pump<T, F>(
    mut coordinator: BatteryCoordinator<T>,
    notifications: &Receiver<(NotifyHandle, Vec<u8>)>,
    interval: Duration,
    mut emit: F,
) -> Result<()>
where
    T: Transport,
    F: FnMut(&BatteryRecord),
{
    loop {
        coordinator.tick();
        let deadline = Instant::now() + interval;

        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            let (handle, bytes) = match notifications.recv_timeout(remaining) {
                Ok(notification) => notification,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("Notification channel closed")
                }
            };
            match coordinator.on_fragment(handle, &bytes) {
                FragmentOutcome::Decoded(index) => {
                    if let Some(battery) = coordinator.battery(index) {
                        emit(battery);
                    }
                }
                FragmentOutcome::Rejected(index, err) => {
                    warn!("Dropped malformed frame from battery #{index}: {err}")
                }
                FragmentOutcome::Overflow(index) => {
                    warn!("Receive buffer of battery #{index} overflowed")
                }
                FragmentOutcome::Stray => debug!("Ignoring notification on {handle}"),
                FragmentOutcome::Pending => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifeblue_lib::mock::MockTransport;
    use lifeblue_lib::PollerConfig;
    use std::sync::mpsc;

    // 13.284 V, -2.15 A, 103 Ah, 42 cycles, 87 %, 20.0 C, cells 3321/3320/3322/3321
    const FRAME: &[u8] =
        b"E43300009AF7FFFF589201002A005700730B00000000F90CF80CFA0CF90C\x87";

    fn coordinator() -> BatteryCoordinator<MockTransport> {
        let mut coordinator =
            BatteryCoordinator::new(MockTransport::new(), PollerConfig::default()).unwrap();
        coordinator.register_device("house").unwrap();
        coordinator
    }

    #[test]
    fn decoded_frame_is_emitted_once() {
        let (tx, rx) = mpsc::channel();
        let (first, rest) = FRAME.split_at(30);
        tx.send((NotifyHandle(1), first.to_vec())).unwrap();
        tx.send((NotifyHandle(1), rest.to_vec())).unwrap();
        // repeated frame after the session closed is stray
        tx.send((NotifyHandle(1), FRAME.to_vec())).unwrap();
        drop(tx);

        let mut emitted = Vec::new();
        let err = pump(coordinator(), &rx, Duration::from_secs(5), |battery| {
            emitted.push((
                battery.identity().to_string(),
                battery.telemetry().map(|t| t.voltage_mv),
            ))
        })
        .unwrap_err();

        assert_eq!(err.to_string(), "Notification channel closed");
        assert_eq!(emitted, vec![("house".to_string(), Some(13_284))]);
    }

    #[test]
    fn closed_channel_stops_the_daemon() {
        let (tx, rx) = mpsc::channel::<(NotifyHandle, Vec<u8>)>();
        drop(tx);
        let mut emitted = 0;
        assert!(pump(coordinator(), &rx, Duration::from_secs(5), |_| emitted += 1).is_err());
        assert_eq!(emitted, 0);
    }

    #[test]
    fn json_contains_identity_and_units() {
        let telemetry = Telemetry {
            voltage_mv: 13284,
            current_ma: -2150,
            temperature_dc: 200,
            cells_mv: vec![3321, 3320],
            ..Default::default()
        };
        let value = telemetry_json("A4:C1:38:00:00:01", &telemetry).unwrap();
        assert_eq!(value["address"], "A4:C1:38:00:00:01");
        assert_eq!(value["voltage_mv"], 13284);
        assert_eq!(value["current_ma"], -2150);
        assert_eq!(value["cells_mv"][1], 3320);
        assert!(value["timestamp"].is_string());
        assert!((value["temperature_c"].as_f64().unwrap() - 20.0).abs() < 1e-6);
    }
}
