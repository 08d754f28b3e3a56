use std::process;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::{json, Value};

use treelights::commands::CommandContext;
use treelights::config::AppConfig;
use treelights::dispatcher::Dispatcher;
use treelights::logging::{LogCapture, LogLevel, Logger, LoggerConfig};
use treelights::model::{Frame, Rgb, Sequence};
use treelights::render::{HeadlessDriver, PixelOrder, RenderLoop};
use treelights::sensors::CommandTemperatureSource;
use treelights::sequences::SequenceLibrary;
use treelights::server::{ConnectionManager, TcpServer};
use treelights::shutdown::{ShutdownHooks, StopSignal};
use treelights::state::{RenderSettings, RenderState};
use treelights::utils::startup_banner::print_startup_banner;
use treelights::wire::envelope::CommandEnvelope;
use treelights::wire::CommandRequest;

const SUPERVISE_INTERVAL: Duration = Duration::from_millis(100);

fn main() {
    ensure_posix_or_exit();
    print_startup_banner();

    let app_config = load_config_or_exit();
    // Level was checked by `AppConfig::validate`.
    let log_level = LogLevel::from_config_value(&app_config.logging.level).unwrap_or(LogLevel::Info);
    let log_capture = Arc::new(LogCapture::new(app_config.logging.capture_bytes));
    let logger = Arc::new(
        Logger::new(LoggerConfig {
            min_level: log_level,
            human_friendly: app_config.logging.human_friendly,
        })
        .with_capture(Arc::clone(&log_capture)),
    );

    let display = &app_config.display;
    let pixel_order = PixelOrder::from_config_value(&display.pixel_order).unwrap_or(PixelOrder::Grb);
    let boot = Sequence::single(
        "boot",
        Frame::filled(Rgb::from(display.boot_color), display.light_count),
    );
    let state = Arc::new(RenderState::new(
        display.light_count,
        RenderSettings::from_display_config(display),
        boot,
    ));
    let library = SequenceLibrary::new(&display.sequence_dir);
    logger.log(
        LogLevel::Info,
        Some("main"),
        "Display configured",
        Some(json!({
            "light_count": display.light_count,
            "fps": display.fps,
            "brightness": display.brightness,
            "pixel_order": display.pixel_order,
            "sequence_dir": library.directory().display().to_string(),
            "log_capture_bytes": log_capture.capacity_bytes()
        })),
    );

    let server = TcpServer::from_app_config(&app_config).unwrap_or_else(|error| {
        eprintln!("server startup error: {error}");
        process::exit(2);
    });

    let stop = StopSignal::new();
    let shutdown_hooks = ShutdownHooks::install(&stop).unwrap_or_else(|error| {
        eprintln!("failed to install shutdown hooks: {error}");
        process::exit(2);
    });

    let (inbound_tx, inbound_rx) = mpsc::channel::<CommandRequest>();
    let (replies_tx, replies_rx) = mpsc::channel();
    let (frames_tx, frames_rx) = mpsc::channel();

    if let Some(startup_file) = display.startup_file() {
        logger.info(
            Some("main"),
            &format!("Queueing startup sequence '{startup_file}'"),
        );
        let request = CommandRequest::local(CommandEnvelope::new(
            "loadfile",
            Value::String(startup_file.to_owned()),
        ));
        if inbound_tx.send(request).is_err() {
            logger.error(Some("main"), "Inbound queue closed before startup");
        }
    }

    let manager = ConnectionManager::new(
        server,
        inbound_tx,
        replies_rx,
        Arc::clone(&state),
        stop.clone(),
        Arc::clone(&logger),
        Duration::from_millis(app_config.server.poll_interval_ms),
    );
    let mut dispatcher = Dispatcher::new(
        inbound_rx,
        CommandContext {
            state: Arc::clone(&state),
            frames: frames_tx,
            replies: replies_tx,
            stop: stop.clone(),
            library,
            temperature: Arc::new(CommandTemperatureSource::from_config(&app_config.sensors)),
            log_capture,
            logger: Arc::clone(&logger),
        },
        Duration::from_millis(app_config.dispatcher.poll_timeout_ms),
    );
    let render_loop = RenderLoop::new(
        HeadlessDriver::new(display.light_count, display.brightness),
        frames_rx,
        Arc::clone(&state),
        stop.clone(),
        Arc::clone(&logger),
        pixel_order,
        Duration::from_millis(display.pause_poll_ms),
    );

    let workers = vec![
        spawn_worker("connection-manager", &logger, move || manager.run()),
        spawn_worker("dispatcher", &logger, move || dispatcher.run()),
        spawn_worker("render-loop", &logger, {
            let logger = Arc::clone(&logger);
            move || {
                let driver = render_loop.run();
                logger.debug(
                    Some("render"),
                    &format!("Headless driver showed {} frames", driver.show_count()),
                );
            }
        }),
    ];
    logger.info(Some("main"), "All workers started");

    while !stop.is_triggered() {
        thread::sleep(SUPERVISE_INTERVAL);
    }

    logger.info(
        Some("main::shutdown"),
        "Stop signal received, starting graceful shutdown",
    );
    state.wake();
    for (name, handle) in workers {
        if handle.join().is_err() {
            logger.error(Some("main::shutdown"), &format!("Worker '{name}' panicked"));
        }
    }
    drop(shutdown_hooks);
    logger.info(Some("main::shutdown"), "All workers stopped; shutdown complete");
}

fn spawn_worker(
    name: &'static str,
    logger: &Logger,
    work: impl FnOnce() + Send + 'static,
) -> (&'static str, JoinHandle<()>) {
    let handle = thread::Builder::new()
        .name(name.to_owned())
        .spawn(work)
        .unwrap_or_else(|error| {
            logger.error(Some("main"), &format!("failed to spawn worker '{name}': {error}"));
            process::exit(2);
        });
    (name, handle)
}

fn load_config_or_exit() -> AppConfig {
    match AppConfig::load_with_discovery(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            process::exit(2);
        }
    }
}

fn ensure_posix_or_exit() {
    if !cfg!(unix) {
        eprintln!("unsupported platform: treelights is intended for POSIX systems");
        process::exit(2);
    }
}
