use std::fmt;
use std::process::Command;

use crate::config::SensorsConfig;

#[derive(Debug)]
pub enum SensorError {
    Spawn {
        program: String,
        source: std::io::Error,
    },
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { program, source } => {
                write!(f, "failed to run temperature probe '{program}': {source}")
            }
            Self::Failed {
                program,
                status,
                stderr,
            } => write!(
                f,
                "temperature probe '{program}' exited with {status}: {}",
                stderr.trim()
            ),
        }
    }
}

impl std::error::Error for SensorError {}

pub trait TemperatureSource: Send + Sync {
    /// Raw reading as reported by the sensor, e.g. `temp=48.3'C`.
    fn read(&self) -> Result<String, SensorError>;
}

/// Reads the board temperature by invoking an OS utility (`vcgencmd measure_temp` by default).
#[derive(Clone, Debug)]
pub struct CommandTemperatureSource {
    program: String,
    args: Vec<String>,
}

impl CommandTemperatureSource {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &SensorsConfig) -> Self {
        Self::new(config.temperature_command.clone(), config.temperature_args.clone())
    }
}

impl TemperatureSource for CommandTemperatureSource {
    fn read(&self) -> Result<String, SensorError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|source| SensorError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SensorError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
