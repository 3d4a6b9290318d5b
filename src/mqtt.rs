use anyhow::{Context, Result};
use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    host: String,
    #[serde(default = "MqttConfig::default_port")]
    port: u16,
    username: Option<String>,
    password: Option<String>,
    /// Topic per battery, `{address}` is replaced by the battery identity.
    #[serde(default = "MqttConfig::default_topic")]
    topic: String,
    #[serde(default = "MqttConfig::default_qos")]
    qos: u8,
    #[serde(default = "MqttConfig::default_client_id")]
    client_id: String,
    #[serde(
        default = "MqttConfig::default_keep_alive_interval",
        with = "humantime_serde"
    )]
    keep_alive_interval: Duration,
    #[serde(
        default = "MqttConfig::default_reconnect_delay",
        with = "humantime_serde"
    )]
    reconnect_delay: Duration,
}

impl MqttConfig {
    fn default_port() -> u16 {
        1883
    }

    fn default_topic() -> String {
        "rv/sensors/batteries/{address}".into()
    }

    fn default_qos() -> u8 {
        0
    }

    fn generate_random_string(len: usize) -> String {
        use rand::distributions::Alphanumeric;
        use rand::Rng;

        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    fn default_client_id() -> String {
        format!("lifeblue-{}", Self::generate_random_string(8))
    }

    fn default_keep_alive_interval() -> Duration {
        Duration::from_secs(30)
    }

    fn default_reconnect_delay() -> Duration {
        Duration::from_secs(5)
    }

    pub const DEFAULT_CONFIG_FILE: &str = "mqtt.yaml";

    pub fn load(config_file_path: &str) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open MQTT config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read MQTT config from file: {config_file_path:?}"))?;
        Ok(config)
    }

    fn quality_of_service(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }

    /// Topic for the battery `identity`. Colons of a MAC address are dropped.
    pub fn topic_for(&self, identity: &str) -> String {
        let address: String = identity.chars().filter(|c| *c != ':').collect();
        self.topic.replace("{address}", &address)
    }

    pub fn create_client(&self) -> Result<Client> {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options
            .set_keep_alive(self.keep_alive_interval)
            .set_clean_session(true);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }

        log::info!(
            "Attempting to connect to MQTT broker: {}:{} with client_id: {}",
            self.host,
            self.port,
            self.client_id
        );

        let (client, mut connection) = Client::new(options, 10);
        let reconnect_delay = self.reconnect_delay;
        std::thread::Builder::new()
            .name("mqtt".into())
            .spawn(move || {
                for notification in connection.iter() {
                    match notification {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            log::info!("Connected to MQTT broker.")
                        }
                        Ok(event) => log::trace!("MQTT event: {event:?}"),
                        Err(err) => {
                            log::warn!("MQTT connection error: {err}, retrying");
                            std::thread::sleep(reconnect_delay);
                        }
                    }
                }
            })
            .with_context(|| "Cannot start MQTT event loop")?;
        Ok(client)
    }
}

pub struct MqttPublisher {
    client: Client,
    config: MqttConfig,
}

impl MqttPublisher {
    pub fn new(config: MqttConfig) -> Result<Self> {
        let client = config.create_client()?;
        Ok(Self { client, config })
    }

    pub fn topic_for(&self, identity: &str) -> String {
        self.config.topic_for(identity)
    }

    pub fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        let qos = self.config.quality_of_service();
        log::debug!("Publishing to MQTT: Topic='{topic}', Payload='{payload}', QoS={qos:?}");

        // rumqttc 0.22's blocking `Client::publish` takes `&mut self`; `Client`
        // is a cheap `Clone` handle over the same request channel.
        self.client
            .clone()
            .publish(topic, qos, false, payload.as_bytes().to_vec())
            .with_context(|| format!("Failed to publish message to MQTT topic: {topic}"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_yaml(yaml: &str) -> Result<MqttConfig> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(yaml.as_bytes())?;
        MqttConfig::load(&file.path().to_string_lossy())
    }

    #[test]
    fn defaults_are_applied() {
        let config = load_yaml("host: broker.local\n").unwrap();
        assert_eq!(config.host, "broker.local");
        assert_eq!(config.port, 1883);
        assert_eq!(config.quality_of_service(), QoS::AtMostOnce);
        assert_eq!(config.keep_alive_interval, Duration::from_secs(30));
        assert!(config.client_id.starts_with("lifeblue-"));
        assert_eq!(config.client_id.len(), "lifeblue-".len() + 8);
    }

    #[test]
    fn explicit_values() {
        let config = load_yaml(
            "host: 10.0.0.2\nport: 8883\nusername: rv\npassword: secret\n\
             topic: home/{address}/battery\nqos: 1\nkeep_alive_interval: 1m\n",
        )
        .unwrap();
        assert_eq!(config.port, 8883);
        assert_eq!(config.username.as_deref(), Some("rv"));
        assert_eq!(config.quality_of_service(), QoS::AtLeastOnce);
        assert_eq!(config.keep_alive_interval, Duration::from_secs(60));
        assert_eq!(
            config.topic_for("A4:C1:38:00:00:01"),
            "home/A4C138000001/battery"
        );
    }

    #[test]
    fn default_topic_uses_identity() {
        let config = load_yaml("host: broker\n").unwrap();
        assert_eq!(config.topic_for("House"), "rv/sensors/batteries/House");
    }

    #[test]
    fn missing_host_is_an_error() {
        assert!(load_yaml("port: 1883\n").is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(MqttConfig::load("/nonexistent/mqtt.yaml").is_err());
    }
}
