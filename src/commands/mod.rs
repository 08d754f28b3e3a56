use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::logging::{LogCapture, LogLevel, Logger};
use crate::model::{Frame, Rgb, Sequence, SequenceError, CHANNELS_PER_LIGHT};
use crate::sensors::{SensorError, TemperatureSource};
use crate::sequences::{SequenceFileError, SequenceLibrary};
use crate::shutdown::StopSignal;
use crate::state::RenderState;
use crate::wire::envelope::json_kind;
use crate::wire::{ConnectionId, Reply};

const LOG_CONTEXT: &str = "commands";

/// Wire names of commands that answer the caller.
pub const REPLYING_COMMANDS: [&str; 4] = ["get_current_df", "get_list_of_files", "get_log", "temp"];

#[derive(Debug, PartialEq)]
pub enum ArgumentError {
    WrongType {
        command: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    WrongLength {
        command: &'static str,
        expected: usize,
        actual: usize,
    },
    NotAnInteger {
        command: &'static str,
        position: usize,
        value: String,
    },
    NotANumber {
        command: &'static str,
        value: String,
    },
    OutOfRange {
        command: &'static str,
        value: String,
        allowed: &'static str,
    },
}

impl fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongType {
                command,
                expected,
                found,
            } => write!(f, "'{command}' expects {expected}, got {found}"),
            Self::WrongLength {
                command,
                expected,
                actual,
            } => write!(f, "'{command}' expects {expected} values, got {actual}"),
            Self::NotAnInteger {
                command,
                position,
                value,
            } => write!(f, "'{command}' argument {position} is not an integer: {value}"),
            Self::NotANumber { command, value } => {
                write!(f, "'{command}' expects a number, got {value}")
            }
            Self::OutOfRange {
                command,
                value,
                allowed,
            } => write!(f, "'{command}' value {value} is outside {allowed}"),
        }
    }
}

impl std::error::Error for ArgumentError {}

#[derive(Debug)]
pub enum CommandError {
    Arguments(ArgumentError),
    LightIndexOutOfRange { index: usize, light_count: usize },
    LightCountMismatch { expected: usize, actual: usize },
    SequenceFile(SequenceFileError),
    Sequence(SequenceError),
    Temperature(SensorError),
    Encode(serde_json::Error),
    FrameQueueClosed,
    ReplyQueueClosed,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Arguments(source) => write!(f, "invalid arguments: {source}"),
            Self::LightIndexOutOfRange { index, light_count } => write!(
                f,
                "light index {index} is out of range for {light_count} lights"
            ),
            Self::LightCountMismatch { expected, actual } => write!(
                f,
                "sequence drives {actual} lights, display has {expected}"
            ),
            Self::SequenceFile(source) => write!(f, "{source}"),
            Self::Sequence(source) => write!(f, "{source}"),
            Self::Temperature(source) => write!(f, "{source}"),
            Self::Encode(source) => write!(f, "failed to encode reply: {source}"),
            Self::FrameQueueClosed => write!(f, "render loop is no longer accepting frames"),
            Self::ReplyQueueClosed => write!(f, "connection manager is no longer accepting replies"),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<ArgumentError> for CommandError {
    fn from(value: ArgumentError) -> Self {
        Self::Arguments(value)
    }
}

impl From<SequenceFileError> for CommandError {
    fn from(value: SequenceFileError) -> Self {
        Self::SequenceFile(value)
    }
}

impl From<SequenceError> for CommandError {
    fn from(value: SequenceError) -> Self {
        Self::Sequence(value)
    }
}

impl From<SensorError> for CommandError {
    fn from(value: SensorError) -> Self {
        Self::Temperature(value)
    }
}

/// The fixed command set, with arguments already shape-checked.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Fill(Rgb),
    SetOne { index: usize, color: Rgb },
    AddList(Vec<u8>),
    LoadFile(PathBuf),
    Fps(f64),
    Brightness(f64),
    GetCurrentSequence,
    GetListOfFiles,
    GetLog,
    Temperature,
    ToggleFps,
    Verbose,
    Stop,
    Unknown { name: String },
}

impl Command {
    /// Maps a wire name and its raw arguments to a command.
    ///
    /// Unrecognized names become [`Command::Unknown`]; commands without
    /// arguments ignore whatever was sent.
    pub fn parse(name: &str, args: &Value) -> Result<Self, ArgumentError> {
        let command = match name {
            "fill" => {
                let values = integer_list("fill", args, Some(3))?;
                Self::Fill(color_from("fill", &values, 0)?)
            }
            "set_one" => {
                let values = integer_list("set_one", args, Some(4))?;
                let index = usize::try_from(values[0]).map_err(|_| ArgumentError::OutOfRange {
                    command: "set_one",
                    value: values[0].to_string(),
                    allowed: "light indices (>= 0)",
                })?;
                Self::SetOne {
                    index,
                    color: color_from("set_one", &values, 1)?,
                }
            }
            "addlist" => {
                let values = integer_list("addlist", args, None)?;
                let channels = values
                    .iter()
                    .map(|value| channel("addlist", *value))
                    .collect::<Result<Vec<_>, _>>()?;
                Self::AddList(channels)
            }
            "loadfile" => match args {
                Value::String(path) => Self::LoadFile(PathBuf::from(path)),
                other => {
                    return Err(ArgumentError::WrongType {
                        command: "loadfile",
                        expected: "a file path string",
                        found: json_kind(other),
                    })
                }
            },
            "fps" => {
                let fps = number("fps", args)?;
                if fps < 0.0 {
                    return Err(ArgumentError::OutOfRange {
                        command: "fps",
                        value: fps.to_string(),
                        allowed: "[0, inf)",
                    });
                }
                Self::Fps(fps)
            }
            "brightness" => {
                let brightness = number("brightness", args)?;
                if !(0.0..=1.0).contains(&brightness) {
                    return Err(ArgumentError::OutOfRange {
                        command: "brightness",
                        value: brightness.to_string(),
                        allowed: "[0, 1]",
                    });
                }
                Self::Brightness(brightness)
            }
            "get_current_df" => Self::GetCurrentSequence,
            "get_list_of_files" => Self::GetListOfFiles,
            "get_log" => Self::GetLog,
            "temp" => Self::Temperature,
            "toggle_fps" => Self::ToggleFps,
            "verbose" => Self::Verbose,
            "stop" => Self::Stop,
            other => Self::Unknown {
                name: other.to_owned(),
            },
        };
        Ok(command)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Fill(_) => "fill",
            Self::SetOne { .. } => "set_one",
            Self::AddList(_) => "addlist",
            Self::LoadFile(_) => "loadfile",
            Self::Fps(_) => "fps",
            Self::Brightness(_) => "brightness",
            Self::GetCurrentSequence => "get_current_df",
            Self::GetListOfFiles => "get_list_of_files",
            Self::GetLog => "get_log",
            Self::Temperature => "temp",
            Self::ToggleFps => "toggle_fps",
            Self::Verbose => "verbose",
            Self::Stop => "stop",
            Self::Unknown { name } => name.as_str(),
        }
    }
}

fn integer_list(
    command: &'static str,
    args: &Value,
    expected_len: Option<usize>,
) -> Result<Vec<i64>, ArgumentError> {
    let Value::Array(items) = args else {
        return Err(ArgumentError::WrongType {
            command,
            expected: "a list of integers",
            found: json_kind(args),
        });
    };
    if let Some(expected) = expected_len {
        if items.len() != expected {
            return Err(ArgumentError::WrongLength {
                command,
                expected,
                actual: items.len(),
            });
        }
    }

    items
        .iter()
        .enumerate()
        .map(|(position, item)| integer(command, position, item))
        .collect()
}

/// Integers, integral floats and numeric strings are all accepted.
fn integer(command: &'static str, position: usize, value: &Value) -> Result<i64, ArgumentError> {
    let not_an_integer = || ArgumentError::NotAnInteger {
        command,
        position,
        value: value.to_string(),
    };
    let as_float = match value {
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                return Ok(integer);
            }
            number.as_f64()
        }
        Value::String(text) => {
            if let Ok(integer) = text.trim().parse::<i64>() {
                return Ok(integer);
            }
            text.trim().parse::<f64>().ok()
        }
        _ => None,
    }
    .ok_or_else(not_an_integer)?;

    if as_float.is_finite() && as_float.fract() == 0.0 && as_float.abs() <= i64::MAX as f64 {
        Ok(as_float as i64)
    } else {
        Err(not_an_integer())
    }
}

fn channel(command: &'static str, value: i64) -> Result<u8, ArgumentError> {
    u8::try_from(value).map_err(|_| ArgumentError::OutOfRange {
        command,
        value: value.to_string(),
        allowed: "[0, 255]",
    })
}

fn color_from(command: &'static str, values: &[i64], offset: usize) -> Result<Rgb, ArgumentError> {
    Ok(Rgb::new(
        channel(command, values[offset])?,
        channel(command, values[offset + 1])?,
        channel(command, values[offset + 2])?,
    ))
}

fn number(command: &'static str, args: &Value) -> Result<f64, ArgumentError> {
    let parsed = match args {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(value) if value.is_finite() => Ok(value),
        _ => Err(ArgumentError::NotANumber {
            command,
            value: args.to_string(),
        }),
    }
}

/// Everything a command may touch while it executes.
pub struct CommandContext {
    pub state: Arc<RenderState>,
    pub frames: Sender<Arc<Sequence>>,
    pub replies: Sender<Reply>,
    pub stop: StopSignal,
    pub library: SequenceLibrary,
    pub temperature: Arc<dyn TemperatureSource>,
    pub log_capture: Arc<LogCapture>,
    pub logger: Arc<Logger>,
}

impl CommandContext {
    /// Makes `sequence` the active one and hands it to the render loop.
    fn publish(&self, sequence: Sequence) -> Result<(), CommandError> {
        let sequence = Arc::new(sequence);
        self.state.replace_active(Arc::clone(&sequence));
        self.frames
            .send(sequence)
            .map_err(|_| CommandError::FrameQueueClosed)
    }

    fn reply(
        &self,
        command: &str,
        origin: Option<ConnectionId>,
        body: &Value,
    ) -> Result<(), CommandError> {
        let Some(connection_id) = origin else {
            self.logger.warn(
                Some(LOG_CONTEXT),
                &format!("reply to '{command}' has no origin connection; discarded"),
            );
            return Ok(());
        };

        let payload = serde_json::to_vec(body).map_err(CommandError::Encode)?;
        self.replies
            .send(Reply {
                connection_id,
                payload,
            })
            .map_err(|_| CommandError::ReplyQueueClosed)
    }
}

/// Applies one command. Runtime checks that depend on the display (light
/// count, file presence) happen here rather than at parse time.
pub fn execute(
    command: Command,
    origin: Option<ConnectionId>,
    ctx: &CommandContext,
) -> Result<(), CommandError> {
    let light_count = ctx.state.light_count();

    match command {
        Command::Fill(color) => ctx.publish(Sequence::single("fill", Frame::filled(color, light_count))),
        Command::SetOne { index, color } => {
            if index >= light_count {
                return Err(CommandError::LightIndexOutOfRange { index, light_count });
            }
            ctx.publish(Sequence::single(
                "set_one",
                Frame::single_lit(index, color, light_count),
            ))
        }
        Command::AddList(channels) => {
            let expected = light_count * CHANNELS_PER_LIGHT;
            if channels.len() != expected {
                return Err(ArgumentError::WrongLength {
                    command: "addlist",
                    expected,
                    actual: channels.len(),
                }
                .into());
            }
            let frame = Frame::from_channels(&channels)?;
            let extended = ctx.state.active_sequence().with_appended(frame)?;
            ctx.logger.debug(
                Some(LOG_CONTEXT),
                &format!("Appended frame; sequence now has {} frames", extended.frame_count()),
            );
            ctx.publish(extended)
        }
        Command::LoadFile(path) => {
            let sequence = ctx.library.load(&path)?;
            if sequence.light_count() != light_count {
                return Err(CommandError::LightCountMismatch {
                    expected: light_count,
                    actual: sequence.light_count(),
                });
            }
            ctx.logger.log(
                LogLevel::Info,
                Some(LOG_CONTEXT),
                "Loaded sequence file",
                Some(json!({
                    "path": sequence.source().unwrap_or(path.as_path()).display().to_string(),
                    "frames": sequence.frame_count()
                })),
            );
            ctx.publish(sequence)
        }
        Command::Fps(fps) => {
            ctx.state.set_fps(fps);
            ctx.logger.info(Some(LOG_CONTEXT), &format!("Target fps set to {fps}"));
            Ok(())
        }
        Command::Brightness(brightness) => {
            ctx.state.set_brightness(brightness);
            ctx.logger
                .info(Some(LOG_CONTEXT), &format!("Brightness set to {brightness}"));
            Ok(())
        }
        Command::GetCurrentSequence => {
            let body = ctx.state.active_sequence().to_indexed_json();
            ctx.reply("get_current_df", origin, &body)
        }
        Command::GetListOfFiles => {
            let files: Vec<String> = ctx
                .library
                .list_files()?
                .iter()
                .map(|path| path.to_string_lossy().to_string())
                .collect();
            ctx.reply("get_list_of_files", origin, &json!(files))
        }
        Command::GetLog => ctx.reply("get_log", origin, &Value::String(ctx.log_capture.contents())),
        Command::Temperature => {
            let reading = ctx.temperature.read()?;
            ctx.reply("temp", origin, &json!({ "temp": reading }))
        }
        Command::ToggleFps => {
            let enabled = ctx.state.toggle_show_fps();
            ctx.logger
                .info(Some(LOG_CONTEXT), &format!("Frame timing diagnostics: {enabled}"));
            Ok(())
        }
        Command::Verbose => {
            let enabled = ctx.state.toggle_verbose();
            ctx.logger
                .info(Some(LOG_CONTEXT), &format!("Transport diagnostics: {enabled}"));
            Ok(())
        }
        Command::Stop => {
            ctx.logger.warn(Some(LOG_CONTEXT), "Stop requested");
            ctx.stop.trigger();
            ctx.state.wake();
            Ok(())
        }
        Command::Unknown { name } => {
            ctx.logger
                .error(Some(LOG_CONTEXT), &format!("Unknown command '{name}'; ignored"));
            Ok(())
        }
    }
}
