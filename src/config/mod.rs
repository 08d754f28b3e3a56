use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use toml::{Table, Value};

use crate::logging::LogLevel;
use crate::render::PixelOrder;

pub const DEFAULT_CONFIG_FILE: &str = "treelights.toml";

/// Built-in configuration document. User files and CLI overrides are layered on top of it,
/// so every key listed here can be overridden with `--section.key value`.
pub const DEFAULT_CONFIG_TOML: &str = r#"
[logging]
level = "info"
human_friendly = false
capture_bytes = 100000

[server]
host = "0.0.0.0"
port = 12345
poll_interval_ms = 10

[wire]
max_message_size_bytes = 16777216

[dispatcher]
poll_timeout_ms = 1000

[display]
light_count = 500
fps = 30.0
brightness = 1.0
pixel_order = "grb"
boot_color = [100, 0, 0]
sequence_dir = "sequences"
startup_file = ""
pause_poll_ms = 500

[sensors]
temperature_command = "vcgencmd"
temperature_args = ["measure_temp"]
"#;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub wire: WireConfig,
    pub dispatcher: DispatcherConfig,
    pub display: DisplayConfig,
    pub sensors: SensorsConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub human_friendly: bool,
    pub capture_bytes: usize,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub poll_interval_ms: u64,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct WireConfig {
    pub max_message_size_bytes: usize,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub poll_timeout_ms: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct DisplayConfig {
    pub light_count: usize,
    pub fps: f64,
    pub brightness: f64,
    pub pixel_order: String,
    pub boot_color: [u8; 3],
    pub sequence_dir: PathBuf,
    pub startup_file: String,
    pub pause_poll_ms: u64,
}

impl DisplayConfig {
    pub fn startup_file(&self) -> Option<&str> {
        let trimmed = self.startup_file.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct SensorsConfig {
    pub temperature_command: String,
    pub temperature_args: Vec<String>,
}

impl AppConfig {
    /// Resolves the config source from argv: `--config <path>` first, then
    /// `treelights.toml` in the working directory, then the built-in defaults.
    pub fn load_with_discovery(args: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        let mut args: Vec<String> = args.into_iter().collect();

        if args.first().map(String::as_str) == Some("--config") {
            if args.len() < 2 {
                return Err(ConfigError::MissingValueForArg {
                    key: "config".to_owned(),
                });
            }
            let path = args.remove(1);
            args.remove(0);
            return Self::load_from_toml_with_args(path, args);
        }

        if Path::new(DEFAULT_CONFIG_FILE).is_file() {
            return Self::load_from_toml_with_args(DEFAULT_CONFIG_FILE, args);
        }

        Self::load_defaults_with_args(args)
    }

    pub fn load_from_toml_with_args(
        path: impl AsRef<Path>,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        let path_label = path.as_ref().to_string_lossy().to_string();
        let toml_content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path_label.clone(),
            source,
        })?;

        let user_table: Table =
            toml::from_str(&toml_content).map_err(|source| ConfigError::TomlParse {
                path: path_label,
                source,
            })?;

        let mut root_value = default_document()?;
        merge_into(&mut root_value, Value::Table(user_table));
        Self::finish(root_value, args)
    }

    pub fn load_defaults_with_args(args: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        Self::finish(default_document()?, args)
    }

    fn finish(mut root_value: Value, args: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        let overrides = parse_cli_overrides(args)?;
        for (key_path, raw_value) in overrides {
            apply_override(&mut root_value, &key_path, &raw_value)?;
        }

        let config: Self = root_value.try_into().map_err(ConfigError::Deserialize)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if LogLevel::from_config_value(&self.logging.level).is_none() {
            return Err(ConfigError::InvalidSetting {
                key: "logging.level",
                reason: format!(
                    "'{}' is not one of error, warn, info, debug, verbose",
                    self.logging.level
                ),
            });
        }
        if self.wire.max_message_size_bytes == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "wire.max_message_size_bytes",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if self.display.light_count == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "display.light_count",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if !self.display.fps.is_finite() || self.display.fps < 0.0 {
            return Err(ConfigError::InvalidSetting {
                key: "display.fps",
                reason: format!("{} is not a non-negative frame rate", self.display.fps),
            });
        }
        if !(0.0..=1.0).contains(&self.display.brightness) {
            return Err(ConfigError::InvalidSetting {
                key: "display.brightness",
                reason: format!("{} is outside [0, 1]", self.display.brightness),
            });
        }
        if PixelOrder::from_config_value(&self.display.pixel_order).is_none() {
            return Err(ConfigError::InvalidSetting {
                key: "display.pixel_order",
                reason: format!("'{}' is not one of grb, rgb", self.display.pixel_order),
            });
        }
        if self.sensors.temperature_command.trim().is_empty() {
            return Err(ConfigError::InvalidSetting {
                key: "sensors.temperature_command",
                reason: "must not be empty".to_owned(),
            });
        }

        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        source: std::io::Error,
    },
    TomlParse {
        path: String,
        source: toml::de::Error,
    },
    Deserialize(toml::de::Error),
    MissingValueForArg {
        key: String,
    },
    InvalidArgFormat {
        arg: String,
    },
    InvalidPath {
        key: String,
    },
    UnknownPath {
        key: String,
    },
    UnsupportedOverrideType {
        key: String,
    },
    InvalidValueForType {
        key: String,
        expected: &'static str,
        value: String,
    },
    InvalidSetting {
        key: &'static str,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config file '{path}': {source}")
            }
            Self::TomlParse { path, source } => {
                write!(f, "failed to parse TOML config '{path}': {source}")
            }
            Self::Deserialize(source) => write!(f, "failed to deserialize config: {source}"),
            Self::MissingValueForArg { key } => {
                write!(f, "missing value for CLI override '--{key}'")
            }
            Self::InvalidArgFormat { arg } => write!(
                f,
                "invalid CLI argument format '{arg}', expected '--section.key value'"
            ),
            Self::InvalidPath { key } => write!(f, "invalid override key path '{key}'"),
            Self::UnknownPath { key } => write!(f, "unknown override key path '{key}'"),
            Self::UnsupportedOverrideType { key } => {
                write!(f, "override not supported for complex TOML type at '{key}'")
            }
            Self::InvalidValueForType {
                key,
                expected,
                value,
            } => write!(
                f,
                "invalid value '{value}' for '{key}', expected type {expected}"
            ),
            Self::InvalidSetting { key, reason } => write!(f, "invalid setting '{key}': {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn default_document() -> Result<Value, ConfigError> {
    let table: Table = toml::from_str(DEFAULT_CONFIG_TOML).map_err(|source| ConfigError::TomlParse {
        path: "<built-in defaults>".to_owned(),
        source,
    })?;
    Ok(Value::Table(table))
}

fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_table), Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_into(existing, overlay_value),
                    None => {
                        base_table.insert(key, overlay_value);
                    }
                }
            }
        }
        (slot, overlay) => *slot = overlay,
    }
}

fn parse_cli_overrides(args: impl IntoIterator<Item = String>) -> Result<Vec<(String, String)>, ConfigError> {
    let mut parsed = Vec::new();
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        let Some(stripped) = arg.strip_prefix("--") else {
            return Err(ConfigError::InvalidArgFormat { arg });
        };

        if stripped.is_empty() {
            return Err(ConfigError::InvalidArgFormat { arg });
        }

        let value = iter.next().ok_or_else(|| ConfigError::MissingValueForArg {
            key: stripped.to_owned(),
        })?;

        parsed.push((stripped.to_owned(), value));
    }

    Ok(parsed)
}

fn apply_override(root: &mut Value, key_path: &str, raw_value: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = key_path.split('.').collect();
    if parts.iter().any(|part| part.is_empty()) {
        return Err(ConfigError::InvalidPath {
            key: key_path.to_owned(),
        });
    }

    let unknown = || ConfigError::UnknownPath {
        key: key_path.to_owned(),
    };

    let (final_key, sections) = parts.split_last().ok_or_else(unknown)?;
    let mut current = root;
    for section in sections {
        current = current
            .as_table_mut()
            .ok_or_else(unknown)?
            .get_mut(*section)
            .ok_or_else(unknown)?;
    }

    let current_value = current
        .as_table_mut()
        .ok_or_else(unknown)?
        .get_mut(*final_key)
        .ok_or_else(unknown)?;

    *current_value = parse_value_using_current_type(key_path, raw_value, current_value)?;
    Ok(())
}

fn parse_value_using_current_type(
    key_path: &str,
    raw_value: &str,
    current_value: &Value,
) -> Result<Value, ConfigError> {
    let invalid = |expected: &'static str| ConfigError::InvalidValueForType {
        key: key_path.to_owned(),
        expected,
        value: raw_value.to_owned(),
    };

    match current_value {
        Value::String(_) => Ok(Value::String(raw_value.to_owned())),
        Value::Integer(_) => raw_value
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| invalid("integer")),
        Value::Float(_) => raw_value
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| invalid("float")),
        Value::Boolean(_) => raw_value
            .parse::<bool>()
            .map(Value::Boolean)
            .map_err(|_| invalid("boolean")),
        Value::Datetime(_) | Value::Array(_) | Value::Table(_) => {
            Err(ConfigError::UnsupportedOverrideType {
                key: key_path.to_owned(),
            })
        }
    }
}
