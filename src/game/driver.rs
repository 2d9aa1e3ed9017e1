//! Fixed-period tick driver and the handle used to feed it

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::util::time::{tick_duration, Timer};
use crate::ws::protocol::ClientRole;

use super::catalog::LoadedMap;
use super::orchestrator::{ClientId, Outbound, RunOrchestrator, RunSummary};
use super::physics::Command;

/// Inbound queue depth shared by all connections
const INPUT_QUEUE: usize = 1024;

/// Control actions that reach the driver (already authorized and loaded)
#[derive(Debug)]
pub enum ControlRequest {
    Start,
    Reset,
    SetMap(Box<LoadedMap>),
}

/// Everything that can mutate the orchestrator between ticks
#[derive(Debug)]
pub enum RunInput {
    Join {
        role: ClientRole,
        name: String,
        outbound: Outbound,
        reply: oneshot::Sender<ClientId>,
    },
    Command {
        client_id: ClientId,
        command: Command,
    },
    Control {
        client_id: ClientId,
        request: ControlRequest,
    },
    Leave {
        client_id: ClientId,
    },
}

/// Handle to the running driver
#[derive(Clone)]
pub struct RunHandle {
    input_tx: mpsc::Sender<RunInput>,
    summary: Arc<RwLock<RunSummary>>,
}

impl RunHandle {
    /// Admit a connection; `None` if the driver has stopped
    pub async fn join(&self, role: ClientRole, name: String, outbound: Outbound) -> Option<ClientId> {
        let (reply, rx) = oneshot::channel();
        self.input_tx
            .send(RunInput::Join {
                role,
                name,
                outbound,
                reply,
            })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn command(&self, client_id: ClientId, command: Command) -> bool {
        self.send(RunInput::Command { client_id, command }).await
    }

    pub async fn control(&self, client_id: ClientId, request: ControlRequest) -> bool {
        self.send(RunInput::Control { client_id, request }).await
    }

    pub async fn leave(&self, client_id: ClientId) -> bool {
        self.send(RunInput::Leave { client_id }).await
    }

    /// Latest published run summary
    pub fn summary(&self) -> RunSummary {
        self.summary.read().clone()
    }

    async fn send(&self, input: RunInput) -> bool {
        self.input_tx.send(input).await.is_ok()
    }
}

/// Sole owner of the orchestrator; ticks and inputs run on this one task
pub struct RunDriver {
    orchestrator: RunOrchestrator,
    input_rx: mpsc::Receiver<RunInput>,
    shutdown: watch::Receiver<bool>,
}

impl RunDriver {
    pub fn new(orchestrator: RunOrchestrator, shutdown: watch::Receiver<bool>) -> (Self, RunHandle) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE);
        let handle = RunHandle {
            input_tx,
            summary: orchestrator.summary(),
        };

        let driver = Self {
            orchestrator,
            input_rx,
            shutdown,
        };
        (driver, handle)
    }

    /// Run the tick loop until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        let tick_duration = tick_duration(self.orchestrator.tick_rate());
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(tick_ms = tick_duration.as_millis() as u64, "Run driver started");

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    let timer = Timer::new();
                    self.orchestrator.on_tick();
                    let elapsed = timer.elapsed();
                    if elapsed > tick_duration {
                        warn!(elapsed_us = elapsed.as_micros() as u64, "Tick overran its period");
                    }
                }
                input = self.input_rx.recv() => match input {
                    Some(input) => self.apply(input),
                    None => {
                        debug!("All run handles dropped");
                        break;
                    }
                },
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.orchestrator.shutdown();
        info!("Run driver stopped");
    }

    fn apply(&mut self, input: RunInput) {
        match input {
            RunInput::Join {
                role,
                name,
                outbound,
                reply,
            } => {
                let id = self.orchestrator.add_client(role, name, outbound);
                if reply.send(id).is_err() {
                    // Connection vanished while joining
                    self.orchestrator.remove_client(id);
                }
            }
            RunInput::Command { client_id, command } => {
                self.orchestrator.handle_command(client_id, command);
            }
            RunInput::Control { client_id, request } => {
                debug!(client_id = %client_id, request = request_name(&request), "Control action");
                match request {
                    ControlRequest::Start => self.orchestrator.start_run(),
                    ControlRequest::Reset => self.orchestrator.reset_run(),
                    ControlRequest::SetMap(next) => self.orchestrator.set_map(*next),
                }
            }
            RunInput::Leave { client_id } => {
                self.orchestrator.remove_client(client_id);
            }
        }
    }
}

fn request_name(request: &ControlRequest) -> &'static str {
    match request {
        ControlRequest::Start => "start",
        ControlRequest::Reset => "reset",
        ControlRequest::SetMap(_) => "setMap",
    }
}
