use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(unix)]
use signal_hook::consts::signal::{SIGINT, SIGTERM};
#[cfg(unix)]
use signal_hook::flag;
#[cfg(unix)]
use signal_hook::low_level::unregister;
#[cfg(unix)]
use signal_hook::SigId;

/// Process-wide stop flag shared by every worker and by the `stop` command.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    triggered: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

/// Routes SIGINT/SIGTERM into a [`StopSignal`] for as long as the hooks are alive.
pub struct ShutdownHooks {
    #[cfg(unix)]
    sig_ids: Vec<SigId>,
}

impl ShutdownHooks {
    pub fn install(stop: &StopSignal) -> io::Result<Self> {
        #[cfg(unix)]
        {
            let id_int = flag::register(SIGINT, Arc::clone(&stop.triggered))?;
            let id_term = flag::register(SIGTERM, Arc::clone(&stop.triggered))?;
            Ok(Self {
                sig_ids: vec![id_int, id_term],
            })
        }

        #[cfg(not(unix))]
        {
            let _ = stop;
            Ok(Self {})
        }
    }
}

impl Drop for ShutdownHooks {
    fn drop(&mut self) {
        #[cfg(unix)]
        for id in self.sig_ids.drain(..) {
            unregister(id);
        }
    }
}
