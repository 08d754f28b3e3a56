pub mod driver;

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use crate::logging::{LogLevel, Logger};
use crate::model::{Rgb, Sequence};
use crate::shutdown::StopSignal;
use crate::state::RenderState;
use crate::utils::timing::{achieved_rate, measure_execution, LapTimer};

pub use driver::{DriverError, HeadlessDriver, PixelDriver};

const LOG_CONTEXT: &str = "render";

/// Channel order of the packed 24-bit value the strip expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelOrder {
    Grb,
    Rgb,
}

impl PixelOrder {
    pub fn from_config_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "grb" => Some(Self::Grb),
            "rgb" => Some(Self::Rgb),
            _ => None,
        }
    }

    pub fn pack(self, color: Rgb) -> u32 {
        let (high, mid) = match self {
            Self::Grb => (color.g, color.r),
            Self::Rgb => (color.r, color.g),
        };
        (u32::from(high) << 16) | (u32::from(mid) << 8) | u32::from(color.b)
    }
}

/// Converts every frame of `sequence` into driver-ready packed values, once.
pub fn pack_sequence(sequence: &Sequence, order: PixelOrder) -> Vec<Vec<u32>> {
    sequence
        .frames()
        .iter()
        .map(|frame| frame.lights().iter().map(|color| order.pack(*color)).collect())
        .collect()
}

/// Scales each 8-bit lane of a packed value by `brightness`.
pub fn scale_packed(packed: u32, brightness: f64) -> u32 {
    if brightness >= 1.0 {
        return packed;
    }
    let brightness = brightness.max(0.0);
    let lane = |shift: u32| {
        let value = f64::from((packed >> shift) & 0xff);
        ((value * brightness).round() as u32) << shift
    };
    lane(16) | lane(8) | lane(0)
}

fn frame_period(fps: f64) -> Option<Duration> {
    if fps <= 0.0 || !fps.is_finite() {
        return None;
    }
    Some(Duration::try_from_secs_f64(1.0 / fps).unwrap_or(Duration::MAX))
}

#[derive(Clone, Copy, Debug)]
struct FrameTiming {
    write: Duration,
    push: Duration,
    sleep: Duration,
}

enum Interrupt {
    NewSequence(Arc<Sequence>),
    Stopped,
}

/// Continuously plays the active sequence on a [`PixelDriver`].
///
/// New sequences arrive on the frame queue. Waiting between frames is a bounded
/// receive on that queue, so fresh data preempts playback within one frame.
pub struct RenderLoop<D: PixelDriver> {
    driver: D,
    frames: Receiver<Arc<Sequence>>,
    state: Arc<RenderState>,
    stop: StopSignal,
    logger: Arc<Logger>,
    order: PixelOrder,
    max_wait_slice: Duration,
    current: Arc<Sequence>,
    packed: Vec<Vec<u32>>,
    applied_brightness: Option<f64>,
}

impl<D: PixelDriver> RenderLoop<D> {
    pub fn new(
        driver: D,
        frames: Receiver<Arc<Sequence>>,
        state: Arc<RenderState>,
        stop: StopSignal,
        logger: Arc<Logger>,
        order: PixelOrder,
        max_wait_slice: Duration,
    ) -> Self {
        let current = state.active_sequence();
        let packed = pack_sequence(&current, order);
        Self {
            driver,
            frames,
            state,
            stop,
            logger,
            order,
            max_wait_slice: max_wait_slice.max(Duration::from_millis(1)),
            current,
            packed,
            applied_brightness: None,
        }
    }

    pub fn run(mut self) -> D {
        self.logger.log(
            LogLevel::Info,
            Some(LOG_CONTEXT),
            "Render loop started",
            Some(json!({
                "sequence": self.current.name(),
                "frames": self.packed.len(),
                "light_count": self.current.light_count()
            })),
        );

        let mut pending = None;
        while !self.stop.is_triggered() {
            if let Some(sequence) = pending.take().or_else(|| self.take_latest()) {
                self.load(sequence);
            }
            match self.play_through() {
                Some(Interrupt::NewSequence(sequence)) => pending = Some(sequence),
                Some(Interrupt::Stopped) => break,
                None => {}
            }
        }

        self.logger.info(Some(LOG_CONTEXT), "Render loop stopped");
        self.driver
    }

    /// Newest queued sequence, discarding any older ones still waiting.
    fn take_latest(&mut self) -> Option<Arc<Sequence>> {
        let mut latest = None;
        loop {
            match self.frames.try_recv() {
                Ok(sequence) => latest = Some(sequence),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return latest,
            }
        }
    }

    fn load(&mut self, sequence: Arc<Sequence>) {
        let order = self.order;
        self.packed = measure_execution("render.pack_sequence", Some(LOG_CONTEXT), &self.logger, || {
            pack_sequence(&sequence, order)
        });
        self.logger.log(
            LogLevel::Info,
            Some(LOG_CONTEXT),
            "Switched to new sequence",
            Some(json!({
                "sequence": sequence.name(),
                "frames": self.packed.len(),
                "light_count": sequence.light_count()
            })),
        );
        self.current = sequence;
    }

    fn play_through(&mut self) -> Option<Interrupt> {
        for index in 0..self.packed.len() {
            if self.stop.is_triggered() {
                return Some(Interrupt::Stopped);
            }

            let settings = self.state.settings();
            self.sync_brightness(settings.brightness);

            let mut timer = LapTimer::start();
            if let Err(error) = self.driver.write(&self.packed[index]) {
                self.logger
                    .error(Some(LOG_CONTEXT), &format!("failed to load frame {index}: {error}"));
            }
            let write = timer.lap();
            if let Err(error) = self.driver.show() {
                self.logger
                    .error(Some(LOG_CONTEXT), &format!("failed to show frame {index}: {error}"));
            }
            let push = timer.lap();

            let interrupt = if settings.is_paused() {
                self.hold_while_paused()
            } else {
                self.wait_for_next_frame(timer.started_at())
            };
            let sleep = timer.lap();

            if self.state.settings().show_fps {
                self.log_frame_timing(index, FrameTiming { write, push, sleep }, timer.total());
            }

            if interrupt.is_some() {
                return interrupt;
            }
        }

        None
    }

    /// Sleeps out the rest of the frame period measured from `frame_started`.
    ///
    /// The period is re-read every slice so an fps change applies mid-wait.
    fn wait_for_next_frame(&mut self, frame_started: Instant) -> Option<Interrupt> {
        loop {
            if self.stop.is_triggered() {
                return Some(Interrupt::Stopped);
            }

            let settings = self.state.settings();
            let Some(period) = frame_period(settings.fps) else {
                return None;
            };
            let remaining = period.saturating_sub(frame_started.elapsed());
            if remaining.is_zero() {
                return None;
            }

            match self.frames.recv_timeout(remaining.min(self.max_wait_slice)) {
                Ok(sequence) => {
                    let newest = self.take_latest().unwrap_or(sequence);
                    return Some(Interrupt::NewSequence(newest));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(remaining.min(self.max_wait_slice));
                }
            }
        }
    }

    /// Keeps the last frame on display until fps turns positive, stop is signalled,
    /// or new data arrives.
    fn hold_while_paused(&mut self) -> Option<Interrupt> {
        self.logger.debug(Some(LOG_CONTEXT), "Playback paused");
        loop {
            if self.stop.is_triggered() {
                return Some(Interrupt::Stopped);
            }
            if let Some(sequence) = self.take_latest() {
                return Some(Interrupt::NewSequence(sequence));
            }

            let settings = self.state.wait_while_paused(self.max_wait_slice);
            if !settings.is_paused() {
                self.logger.debug(
                    Some(LOG_CONTEXT),
                    &format!("Playback resumed at {} fps", settings.fps),
                );
                return None;
            }
        }
    }

    fn sync_brightness(&mut self, brightness: f64) {
        if self.applied_brightness != Some(brightness) {
            self.driver.set_brightness(brightness);
            self.applied_brightness = Some(brightness);
        }
    }

    /// Per-frame breakdown. Logged at info since `show_fps` is already the opt-in.
    fn log_frame_timing(&self, index: usize, timing: FrameTiming, total: Duration) {
        self.logger.log(
            LogLevel::Info,
            Some(LOG_CONTEXT),
            &format!(
                "Loading Array:{:.3}s Pushing Pixels:{:.3}s sleeping:{:.3}s actual_FPS:{:.3}",
                timing.write.as_secs_f64(),
                timing.push.as_secs_f64(),
                timing.sleep.as_secs_f64(),
                achieved_rate(total)
            ),
            Some(json!({ "frame": index, "sequence": self.current.name() })),
        );
    }
}
