use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::config::DisplayConfig;
use crate::model::Sequence;

/// Runtime-tunable render parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderSettings {
    /// Target frames per second; 0 pauses playback.
    pub fps: f64,
    /// Global scalar in [0, 1] applied by the driver at show time.
    pub brightness: f64,
    /// Per-frame timing diagnostics from the render loop.
    pub show_fps: bool,
    /// Per-message transport diagnostics from the connection manager.
    pub verbose: bool,
}

impl RenderSettings {
    pub fn from_display_config(config: &DisplayConfig) -> Self {
        Self {
            fps: config.fps,
            brightness: config.brightness,
            show_fps: false,
            verbose: false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.fps <= 0.0
    }
}

/// State shared between command handlers and the render loop.
///
/// Settings live behind one mutex paired with a condition variable so a paused
/// render loop wakes as soon as they change. The active sequence is swapped
/// wholesale behind its own mutex and never mutated in place.
pub struct RenderState {
    light_count: usize,
    settings: Mutex<RenderSettings>,
    settings_changed: Condvar,
    active: Mutex<Arc<Sequence>>,
}

impl RenderState {
    pub fn new(light_count: usize, settings: RenderSettings, initial: Sequence) -> Self {
        Self {
            light_count,
            settings: Mutex::new(settings),
            settings_changed: Condvar::new(),
            active: Mutex::new(Arc::new(initial)),
        }
    }

    pub fn light_count(&self) -> usize {
        self.light_count
    }

    pub fn settings(&self) -> RenderSettings {
        *self.settings.lock().expect("render settings lock poisoned")
    }

    fn update<T>(&self, change: impl FnOnce(&mut RenderSettings) -> T) -> T {
        let mut settings = self.settings.lock().expect("render settings lock poisoned");
        let result = change(&mut settings);
        drop(settings);
        self.settings_changed.notify_all();
        result
    }

    pub fn set_fps(&self, fps: f64) {
        self.update(|settings| settings.fps = fps);
    }

    pub fn set_brightness(&self, brightness: f64) {
        self.update(|settings| settings.brightness = brightness);
    }

    /// Flips render timing diagnostics and returns the new value.
    pub fn toggle_show_fps(&self) -> bool {
        self.update(|settings| {
            settings.show_fps = !settings.show_fps;
            settings.show_fps
        })
    }

    /// Flips transport diagnostics and returns the new value.
    pub fn toggle_verbose(&self) -> bool {
        self.update(|settings| {
            settings.verbose = !settings.verbose;
            settings.verbose
        })
    }

    /// Wakes any thread blocked in [`RenderState::wait_while_paused`].
    pub fn wake(&self) {
        self.settings_changed.notify_all();
    }

    /// Blocks while playback is paused, for at most `timeout`, and returns the settings seen on exit.
    pub fn wait_while_paused(&self, timeout: Duration) -> RenderSettings {
        let settings = self.settings.lock().expect("render settings lock poisoned");
        if !settings.is_paused() {
            return *settings;
        }

        let (settings, _) = self
            .settings_changed
            .wait_timeout(settings, timeout)
            .expect("render settings lock poisoned");
        *settings
    }

    pub fn active_sequence(&self) -> Arc<Sequence> {
        Arc::clone(&self.active.lock().expect("active sequence lock poisoned"))
    }

    /// Installs `sequence` as the active one and wakes a paused render loop.
    pub fn replace_active(&self, sequence: Arc<Sequence>) {
        *self.active.lock().expect("active sequence lock poisoned") = sequence;
        self.wake();
    }
}
