use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

pub const CHANNELS_PER_LIGHT: usize = 3;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Self = Self::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self::new(r, g, b)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SequenceError {
    NoFrames,
    ChannelCountNotMultipleOfThree { channels: usize },
    LightCountMismatch {
        frame_index: usize,
        expected: usize,
        actual: usize,
    },
}

impl fmt::Display for SequenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFrames => write!(f, "sequence must contain at least one frame"),
            Self::ChannelCountNotMultipleOfThree { channels } => write!(
                f,
                "{channels} channel values do not form whole R,G,B triples"
            ),
            Self::LightCountMismatch {
                frame_index,
                expected,
                actual,
            } => write!(
                f,
                "frame {frame_index} has {actual} lights, expected {expected}"
            ),
        }
    }
}

impl std::error::Error for SequenceError {}

/// One time-step of color, one triple per addressable light.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    lights: Vec<Rgb>,
}

impl Frame {
    pub fn new(lights: Vec<Rgb>) -> Self {
        Self { lights }
    }

    pub fn filled(color: Rgb, light_count: usize) -> Self {
        Self::new(vec![color; light_count])
    }

    /// All lights black except `index`. The caller guarantees `index < light_count`.
    pub fn single_lit(index: usize, color: Rgb, light_count: usize) -> Self {
        let mut lights = vec![Rgb::BLACK; light_count];
        lights[index] = color;
        Self::new(lights)
    }

    /// Builds a frame from a flat `r0,g0,b0,r1,g1,b1,...` channel list.
    pub fn from_channels(channels: &[u8]) -> Result<Self, SequenceError> {
        if channels.len() % CHANNELS_PER_LIGHT != 0 {
            return Err(SequenceError::ChannelCountNotMultipleOfThree {
                channels: channels.len(),
            });
        }

        Ok(Self::new(
            channels
                .chunks_exact(CHANNELS_PER_LIGHT)
                .map(|triple| Rgb::new(triple[0], triple[1], triple[2]))
                .collect(),
        ))
    }

    pub fn lights(&self) -> &[Rgb] {
        &self.lights
    }

    pub fn light_count(&self) -> usize {
        self.lights.len()
    }
}

/// An ordered, non-empty list of frames that all share one light count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sequence {
    name: String,
    source: Option<PathBuf>,
    frames: Vec<Frame>,
}

impl Sequence {
    pub fn new(
        name: impl Into<String>,
        source: Option<PathBuf>,
        frames: Vec<Frame>,
    ) -> Result<Self, SequenceError> {
        let Some(first) = frames.first() else {
            return Err(SequenceError::NoFrames);
        };
        let expected = first.light_count();

        if let Some((frame_index, frame)) = frames
            .iter()
            .enumerate()
            .find(|(_, frame)| frame.light_count() != expected)
        {
            return Err(SequenceError::LightCountMismatch {
                frame_index,
                expected,
                actual: frame.light_count(),
            });
        }

        Ok(Self {
            name: name.into(),
            source,
            frames,
        })
    }

    pub fn single(name: impl Into<String>, frame: Frame) -> Self {
        Self {
            name: name.into(),
            source: None,
            frames: vec![frame],
        }
    }

    /// Copy of this sequence with `frame` added at the end.
    pub fn with_appended(&self, frame: Frame) -> Result<Self, SequenceError> {
        if frame.light_count() != self.light_count() {
            return Err(SequenceError::LightCountMismatch {
                frame_index: self.frames.len(),
                expected: self.light_count(),
                actual: frame.light_count(),
            });
        }

        let mut frames = Vec::with_capacity(self.frames.len() + 1);
        frames.extend_from_slice(&self.frames);
        frames.push(frame);
        Ok(Self {
            name: self.name.clone(),
            source: self.source.clone(),
            frames,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn light_count(&self) -> usize {
        self.frames.first().map_or(0, Frame::light_count)
    }

    /// Row-indexed table form: `{"0": {"R_0": r, "G_0": g, "B_0": b, ...}, ...}`.
    pub fn to_indexed_json(&self) -> Value {
        let mut rows = Map::with_capacity(self.frames.len());
        for (frame_index, frame) in self.frames.iter().enumerate() {
            let mut columns = Map::with_capacity(frame.light_count() * CHANNELS_PER_LIGHT);
            for (light, color) in frame.lights().iter().enumerate() {
                columns.insert(format!("R_{light}"), Value::from(color.r));
                columns.insert(format!("G_{light}"), Value::from(color.g));
                columns.insert(format!("B_{light}"), Value::from(color.b));
            }
            rows.insert(frame_index.to_string(), Value::Object(columns));
        }
        Value::Object(rows)
    }
}
