use std::{fs, io::ErrorKind, path::PathBuf};
use anyhow::Context;
use log::{debug, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::error::WebhookError;

/// Version of the persisted settings document. There are no migrations yet.
pub const SETTINGS_VERSION: u64 = 1;

/// Rule used when the state query has none configured: on iff the device answered exactly 200.
pub const DEFAULT_RULE: &str = r#"state = if(status == 200, "on", "off")"#;

/// One configured HTTP call. `path` and `payload` start out empty; an explicit `null` is also accepted.
#[derive(Deserialize, Serialize)]
#[derive(Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CommandSpec {
    pub method: String,
    pub path: Option<String>,
    pub payload: Option<String>,
}

impl Default for CommandSpec {
    fn default() -> Self {
        Self {
            method: String::new(),
            path: Some(String::new()),
            payload: Some(String::new()),
        }
    }
}

/// The rule as it was found in the settings.
/// Anything that isn't a string is kept around so evaluation can refuse it.
#[derive(Deserialize, Serialize)]
#[derive(Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum EvaluationRule {
    Text(String),
    Invalid(Value),
}

#[derive(Deserialize, Serialize)]
#[derive(Clone, Debug, PartialEq)]
#[serde(default)]
pub struct StateQuerySpec {
    #[serde(flatten)]
    pub command: CommandSpec,
    /// Skip the rule and report "on" whenever the response is a success.
    pub on_if_ok: bool,
    #[serde(alias = "python_handler")]
    pub evaluation_rule: Option<EvaluationRule>,
}

impl Default for StateQuerySpec {
    fn default() -> Self {
        Self {
            command: CommandSpec::default(),
            on_if_ok: false,
            evaluation_rule: Some(EvaluationRule::Text(DEFAULT_RULE.to_string())),
        }
    }
}

/// Snapshot of the settings the controller works from.
/// Always fully populated; it is rebuilt from scratch on every reload.
#[derive(Deserialize, Serialize)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    pub address: String,
    pub turn_psu_on: CommandSpec,
    pub turn_psu_off: CommandSpec,
    pub get_psu_state: StateQuerySpec,
}

impl Config {
    /// Builds a fresh config from the given settings source.
    /// Keys that are missing or have the wrong shape fall back to their defaults.
    pub fn load(source: &dyn SettingsSource) -> anyhow::Result<Config> {
        let settings = source.read()?;

        match settings.get("version").and_then(Value::as_u64) {
            Some(SETTINGS_VERSION) | None => {},
            Some(version) => warn!("Settings version {} is not {}, reading them as-is", version, SETTINGS_VERSION),
        }

        let config = Config {
            address: field(&settings, "address"),
            turn_psu_on: field(&settings, "turn_psu_on"),
            turn_psu_off: field(&settings, "turn_psu_off"),
            get_psu_state: field(&settings, "get_psu_state"),
        };
        debug!("Loaded config {:?}", config);
        Ok(config)
    }

    /// The settings document as it is persisted, including its version.
    pub fn to_document(&self) -> anyhow::Result<Map<String, Value>> {
        let mut document = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            other => anyhow::bail!("config serialized to a non-object: {}", other),
        };
        document.insert("version".to_string(), SETTINGS_VERSION.into());
        Ok(document)
    }
}

fn field<T: DeserializeOwned + Default>(settings: &Map<String, Value>, key: &'static str) -> T {
    let Some(value) = settings.get(key) else {
        return T::default();
    };

    match T::deserialize(value) {
        Ok(v) => v,
        Err(source) => {
            warn!("{}", WebhookError::ConfigTypeMismatch { key, source });
            T::default()
        }
    }
}

/// Where the durable copy of the settings lives.
pub trait SettingsSource {
    fn read(&self) -> anyhow::Result<Map<String, Value>>;
}

impl SettingsSource for Map<String, Value> {
    fn read(&self) -> anyhow::Result<Map<String, Value>> {
        Ok(self.clone())
    }
}

/// Settings stored as a JSON document on disk. A missing file reads as empty.
pub struct JsonFileSettings {
    path: PathBuf,
}

impl JsonFileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Replaces the whole document on disk, stamping it with the current version.
    pub fn write(&self, settings: &Map<String, Value>) -> anyhow::Result<()> {
        let mut settings = settings.clone();
        settings.insert("version".to_string(), SETTINGS_VERSION.into());

        let contents = serde_json::to_string_pretty(&settings)?;
        fs::write(&self.path, contents)
            .with_context(|| format!("writing settings to {}", self.path.display()))
    }
}

impl SettingsSource for JsonFileSettings {
    fn read(&self) -> anyhow::Result<Map<String, Value>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e).with_context(|| format!("reading settings from {}", self.path.display())),
        };

        serde_json::from_str(&contents)
            .with_context(|| format!("parsing settings from {}", self.path.display()))
    }
}
