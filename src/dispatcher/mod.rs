use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use serde_json::json;

use crate::commands::{execute, Command, CommandContext};
use crate::logging::LogLevel;
use crate::wire::CommandRequest;

const LOG_CONTEXT: &str = "dispatcher";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatcherState {
    Running,
    Stopping,
    Stopped,
}

/// Single consumer of the inbound queue; applies commands strictly in arrival order.
pub struct Dispatcher {
    inbound: Receiver<CommandRequest>,
    ctx: CommandContext,
    poll_timeout: Duration,
    state: DispatcherState,
}

impl Dispatcher {
    pub fn new(inbound: Receiver<CommandRequest>, ctx: CommandContext, poll_timeout: Duration) -> Self {
        Self {
            inbound,
            ctx,
            poll_timeout,
            state: DispatcherState::Running,
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn run(&mut self) {
        self.ctx.logger.info(Some(LOG_CONTEXT), "Dispatcher started");

        while self.state == DispatcherState::Running {
            match self.inbound.recv_timeout(self.poll_timeout) {
                Ok(request) => {
                    if self.ctx.stop.is_triggered() {
                        self.state = DispatcherState::Stopping;
                        break;
                    }
                    self.dispatch(request);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.ctx
                        .logger
                        .warn(Some(LOG_CONTEXT), "Inbound queue closed");
                    self.state = DispatcherState::Stopping;
                }
            }

            if self.ctx.stop.is_triggered() {
                self.state = DispatcherState::Stopping;
            }
        }

        self.state = DispatcherState::Stopped;
        self.ctx.logger.info(Some(LOG_CONTEXT), "Dispatcher stopped");
    }

    /// Parses and executes one request. Failures and panics are logged, never propagated.
    pub fn dispatch(&self, request: CommandRequest) {
        let CommandRequest { envelope, origin } = request;
        let logger = &self.ctx.logger;

        let command = match Command::parse(&envelope.command, &envelope.args) {
            Ok(command) => command,
            Err(error) => {
                logger.log(
                    LogLevel::Error,
                    Some(LOG_CONTEXT),
                    &format!("Rejected '{}': {error}", envelope.command),
                    Some(json!({ "args": envelope.args, "origin": origin })),
                );
                return;
            }
        };

        let name = command.name().to_owned();
        logger.verbose(Some(LOG_CONTEXT), &format!("Dispatching '{name}'"));

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| execute(command, origin, &self.ctx)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                logger.log(
                    LogLevel::Error,
                    Some(LOG_CONTEXT),
                    &format!("Command '{name}' failed: {error}"),
                    Some(json!({ "origin": origin })),
                );
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|reason| (*reason).to_owned())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_owned());
                logger.error(
                    Some(LOG_CONTEXT),
                    &format!("Command '{name}' panicked: {reason}"),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use serde_json::{json, Value};

    use crate::commands::tests::fixture;
    use crate::model::Rgb;
    use crate::wire::envelope::CommandEnvelope;
    use crate::wire::CommandRequest;

    use super::{Dispatcher, DispatcherState};

    fn request(command: &str, args: Value, origin: u64) -> CommandRequest {
        CommandRequest::from_connection(CommandEnvelope::new(command, args), origin)
    }

    #[test]
    fn applies_commands_in_arrival_order_across_connections() {
        let harness = fixture(1, std::env::temp_dir());
        let (inbound_tx, inbound_rx) = mpsc::channel();
        for (origin, value) in [(1, 10), (2, 20), (3, 30)] {
            inbound_tx
                .send(request("addlist", json!([value, value, value]), origin))
                .expect("queue open");
        }
        inbound_tx.send(request("stop", Value::Null, 1)).expect("queue open");

        let state = std::sync::Arc::clone(&harness.ctx.state);
        let mut dispatcher = Dispatcher::new(inbound_rx, harness.ctx, Duration::from_millis(20));
        dispatcher.run();

        let active = state.active_sequence();
        let firsts: Vec<Rgb> = active.frames().iter().map(|frame| frame.lights()[0]).collect();
        assert_eq!(
            firsts,
            vec![
                Rgb::new(100, 0, 0),
                Rgb::new(10, 10, 10),
                Rgb::new(20, 20, 20),
                Rgb::new(30, 30, 30)
            ]
        );
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    }

    #[test]
    fn bad_commands_are_logged_and_leave_state_alone() {
        let harness = fixture(5, std::env::temp_dir());
        let (_inbound_tx, inbound_rx) = mpsc::channel();
        let sink = std::sync::Arc::clone(&harness.sink);
        let state = std::sync::Arc::clone(&harness.ctx.state);
        let before = state.active_sequence();
        let dispatcher = Dispatcher::new(inbound_rx, harness.ctx, Duration::from_millis(20));

        dispatcher.dispatch(request("not_a_real_command", json!([]), 1));
        dispatcher.dispatch(request("fill", json!([1, 2]), 1));
        dispatcher.dispatch(request("loadfile", json!("/no/such/file.csv"), 1));

        assert!(std::sync::Arc::ptr_eq(&before, &state.active_sequence()));
        assert!(sink.contains("[ERROR] [commands] Unknown command 'not_a_real_command'"));
        assert!(sink.contains("Rejected 'fill'"));
        assert!(sink.contains("Command 'loadfile' failed"));
    }

    #[test]
    fn fill_on_five_lights_yields_one_uniform_frame() {
        let harness = fixture(5, std::env::temp_dir());
        let (_inbound_tx, inbound_rx) = mpsc::channel();
        let state = std::sync::Arc::clone(&harness.ctx.state);
        let dispatcher = Dispatcher::new(inbound_rx, harness.ctx, Duration::from_millis(20));

        dispatcher.dispatch(request("fill", json!([10, 20, 30]), 1));

        let active = state.active_sequence();
        assert_eq!(active.frame_count(), 1);
        assert_eq!(active.frames()[0].lights(), &[Rgb::new(10, 20, 30); 5]);
    }

    #[test]
    fn stops_when_stop_signal_is_set_while_idle() {
        let harness = fixture(1, std::env::temp_dir());
        let (_inbound_tx, inbound_rx) = mpsc::channel();
        harness.ctx.stop.trigger();
        let mut dispatcher = Dispatcher::new(inbound_rx, harness.ctx, Duration::from_millis(10));

        dispatcher.run();
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    }

    #[test]
    fn stops_when_inbound_queue_disconnects() {
        let harness = fixture(1, std::env::temp_dir());
        let (inbound_tx, inbound_rx) = mpsc::channel::<CommandRequest>();
        drop(inbound_tx);
        let mut dispatcher = Dispatcher::new(inbound_rx, harness.ctx, Duration::from_millis(10));

        dispatcher.run();
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    }
}
