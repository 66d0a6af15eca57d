use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{BoxConvention, BoxLayout};
use crate::ingest::V4l2Config;
use crate::pipeline::PublishSchedule;
use crate::preprocess::{ModelInput, TensorLayout};
use crate::transport::MqttEndpoint;

const DEFAULT_DB_PATH: &str = "detections.db";
const DEFAULT_LABELS_PATH: &str = "coco_labels.txt";
// Builds without a real inference backend default to the synthetic one.
#[cfg(feature = "backend-tract")]
pub const DEFAULT_MODEL_BACKEND: &str = "tract";
#[cfg(not(feature = "backend-tract"))]
pub const DEFAULT_MODEL_BACKEND: &str = "stub";
const DEFAULT_MODEL_PATH: &str = "model.onnx";
const DEFAULT_BROKER_ADDR: &str = "127.0.0.1:1883";
pub const DEFAULT_TOPIC: &str = "object/detections/json";
const DEFAULT_CLIENT_ID: &str = "detection_relay";
const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    db_path: Option<String>,
    labels_path: Option<PathBuf>,
    model: Option<ModelConfigFile>,
    camera: Option<CameraConfigFile>,
    mqtt: Option<MqttConfigFile>,
    schedule: Option<ScheduleConfigFile>,
    bbox: Option<BoxConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    layout: Option<TensorLayout>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    use_tls: Option<bool>,
    ca_path: Option<PathBuf>,
    client_cert_path: Option<PathBuf>,
    client_key_path: Option<PathBuf>,
    allow_remote: Option<bool>,
    keep_alive_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ScheduleConfigFile {
    count: Option<u32>,
    interval_secs: Option<u64>,
    settle_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct BoxConfigFile {
    layout: Option<BoxLayout>,
    scale_x: Option<f64>,
    scale_y: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub db_path: String,
    pub labels_path: PathBuf,
    pub model: ModelSettings,
    pub camera: V4l2Config,
    pub mqtt: MqttSettings,
    pub schedule: PublishSchedule,
    pub bbox: BoxConvention,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    /// Backend name: `tract` or `stub`.
    pub backend: String,
    pub path: PathBuf,
    pub input: ModelInput,
    pub layout: TensorLayout,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_MODEL_BACKEND.to_string(),
            path: PathBuf::from(DEFAULT_MODEL_PATH),
            input: ModelInput::default(),
            layout: TensorLayout::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    pub broker: String,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub ca_path: Option<PathBuf>,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
    /// Permit a non-loopback broker.
    pub allow_remote: bool,
    pub keep_alive: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker: DEFAULT_BROKER_ADDR.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            username: None,
            password: None,
            use_tls: false,
            ca_path: None,
            client_cert_path: None,
            client_key_path: None,
            allow_remote: false,
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS),
        }
    }
}

impl RelayConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RELAY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelayConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let labels_path = file
            .labels_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LABELS_PATH));

        let model_file = file.model.unwrap_or_default();
        let model_defaults = ModelSettings::default();
        let model = ModelSettings {
            backend: model_file.backend.unwrap_or(model_defaults.backend),
            path: model_file.path.unwrap_or(model_defaults.path),
            input: ModelInput {
                width: model_file
                    .input_width
                    .unwrap_or(model_defaults.input.width),
                height: model_file
                    .input_height
                    .unwrap_or(model_defaults.input.height),
            },
            layout: model_file.layout.unwrap_or(model_defaults.layout),
        };

        let camera_file = file.camera.unwrap_or_default();
        let camera_defaults = V4l2Config::default();
        let camera = V4l2Config {
            device: camera_file.device.unwrap_or(camera_defaults.device),
            width: camera_file.width.unwrap_or(camera_defaults.width),
            height: camera_file.height.unwrap_or(camera_defaults.height),
        };

        let mqtt_file = file.mqtt.unwrap_or_default();
        let mqtt_defaults = MqttSettings::default();
        let mqtt = MqttSettings {
            broker: mqtt_file.broker.unwrap_or(mqtt_defaults.broker),
            topic: mqtt_file.topic.unwrap_or(mqtt_defaults.topic),
            client_id: mqtt_file.client_id.unwrap_or(mqtt_defaults.client_id),
            username: mqtt_file.username,
            password: mqtt_file.password,
            use_tls: mqtt_file.use_tls.unwrap_or(false),
            ca_path: mqtt_file.ca_path,
            client_cert_path: mqtt_file.client_cert_path,
            client_key_path: mqtt_file.client_key_path,
            allow_remote: mqtt_file.allow_remote.unwrap_or(false),
            keep_alive: mqtt_file
                .keep_alive_secs
                .map(Duration::from_secs)
                .unwrap_or(mqtt_defaults.keep_alive),
        };

        let schedule_file = file.schedule.unwrap_or_default();
        let schedule_defaults = PublishSchedule::default();
        let schedule = PublishSchedule {
            count: match schedule_file.count {
                Some(0) => None,
                Some(n) => Some(n),
                None => schedule_defaults.count,
            },
            interval: schedule_file
                .interval_secs
                .map(Duration::from_secs)
                .unwrap_or(schedule_defaults.interval),
            settle: schedule_file
                .settle_secs
                .map(Duration::from_secs)
                .unwrap_or(schedule_defaults.settle),
        };

        let bbox_file = file.bbox.unwrap_or_default();
        let bbox = BoxConvention {
            layout: bbox_file.layout.unwrap_or_default(),
            scale_x: bbox_file.scale_x.unwrap_or(model.input.width as f64),
            scale_y: bbox_file.scale_y.unwrap_or(model.input.height as f64),
        };

        Ok(Self {
            db_path,
            labels_path,
            model,
            camera,
            mqtt,
            schedule,
            bbox,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("RELAY_DB_PATH") {
            self.db_path = path;
        }
        if let Some(path) = non_empty_env("RELAY_LABELS_PATH") {
            self.labels_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty_env("RELAY_MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(backend) = non_empty_env("RELAY_MODEL_BACKEND") {
            self.model.backend = backend;
        }
        if let Some(device) = non_empty_env("RELAY_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        if let Some(addr) = non_empty_env("MQTT_BROKER_ADDR") {
            self.mqtt.broker = addr;
        }
        if let Some(topic) = non_empty_env("MQTT_TOPIC") {
            self.mqtt.topic = topic;
        }
        if let Some(username) = non_empty_env("MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = non_empty_env("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        if let Some(allow) = non_empty_env("ALLOW_REMOTE_MQTT") {
            self.mqtt.allow_remote = parse_bool(&allow)
                .ok_or_else(|| anyhow!("ALLOW_REMOTE_MQTT must be true or false"))?;
        }
        if let Some(count) = non_empty_env("RELAY_PUBLISH_COUNT") {
            let count: u32 = count
                .parse()
                .map_err(|_| anyhow!("RELAY_PUBLISH_COUNT must be a non-negative integer"))?;
            self.schedule.count = (count > 0).then_some(count);
        }
        if let Some(interval) = non_empty_env("RELAY_PUBLISH_INTERVAL_SECS") {
            let seconds: u64 = interval.parse().map_err(|_| {
                anyhow!("RELAY_PUBLISH_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.schedule.interval = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if self.model.input.width == 0 || self.model.input.height == 0 {
            return Err(anyhow!("model input size must be non-zero"));
        }
        self.model.backend = self.model.backend.to_ascii_lowercase();

        validate_topic(&self.mqtt.topic)?;
        if self.mqtt.client_id.trim().is_empty() {
            return Err(anyhow!("mqtt client_id must not be empty"));
        }
        if self.mqtt.keep_alive.as_secs() < 5 {
            return Err(anyhow!("mqtt keep_alive_secs must be at least 5"));
        }
        let endpoint = MqttEndpoint::parse(&self.mqtt.broker, self.mqtt.use_tls)
            .with_context(|| format!("invalid MQTT broker address '{}'", self.mqtt.broker))?;
        if !self.mqtt.allow_remote {
            endpoint.require_loopback()?;
        }

        if self.schedule.interval.is_zero() {
            return Err(anyhow!("publish interval must be greater than zero"));
        }
        for (name, scale) in [("scale_x", self.bbox.scale_x), ("scale_y", self.bbox.scale_y)] {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(anyhow!("bbox {} must be a positive number", name));
            }
        }
        Ok(())
    }
}

/// Topics we publish on must be concrete: no wildcards.
fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(anyhow!("mqtt topic must not be empty"));
    }
    if topic.contains(['+', '#']) {
        return Err(anyhow!("mqtt topic '{}' must not contain wildcards", topic));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_demo_setup() {
        let cfg = RelayConfig::from_file(RelayConfigFile::default()).unwrap();
        assert_eq!(cfg.db_path, "detections.db");
        assert_eq!(cfg.labels_path, PathBuf::from("coco_labels.txt"));
        assert_eq!(cfg.mqtt.topic, "object/detections/json");
        assert_eq!(cfg.model.input, ModelInput::default());
        assert_eq!(cfg.schedule, PublishSchedule::default());
        assert_eq!(cfg.bbox, BoxConvention::default());
    }

    #[test]
    fn bbox_scale_follows_model_input() {
        let file: RelayConfigFile =
            serde_json::from_str(r#"{"model": {"input_width": 320, "input_height": 256}}"#)
                .unwrap();
        let cfg = RelayConfig::from_file(file).unwrap();
        assert_eq!(cfg.bbox.scale_x, 320.0);
        assert_eq!(cfg.bbox.scale_y, 256.0);
    }

    #[test]
    fn zero_count_means_unbounded() {
        let file: RelayConfigFile = serde_json::from_str(r#"{"schedule": {"count": 0}}"#).unwrap();
        let cfg = RelayConfig::from_file(file).unwrap();
        assert_eq!(cfg.schedule.count, None);
    }

    #[test]
    fn wildcard_topics_are_rejected() {
        assert!(validate_topic("object/#").is_err());
        assert!(validate_topic("object/+/json").is_err());
        assert!(validate_topic("").is_err());
        assert!(validate_topic(DEFAULT_TOPIC).is_ok());
    }

    #[test]
    fn remote_broker_requires_opt_in() {
        let mut cfg = RelayConfig::from_file(RelayConfigFile::default()).unwrap();
        cfg.mqtt.broker = "test.mosquitto.org:1883".to_string();
        assert!(cfg.validate().is_err());
        cfg.mqtt.allow_remote = true;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_boolean_flags() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
