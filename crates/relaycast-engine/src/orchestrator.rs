//! Main engine orchestrator.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use relaycast_ipc::{EngineCommand, EngineEvent, EngineSettings};
use tracing::{debug, error, info, instrument, warn};

use crate::context::{BroadcastContext, Services};
use crate::error::EngineError;
use crate::machine::StateMachine;
use crate::states::{global_registry, StateRegistry};
use crate::EngineResult;

/// Requests handled on a broadcast's worker thread.
enum WorkerRequest {
    Command(EngineCommand),
    Resume,
}

/// A broadcast's worker thread and the handles the engine keeps on it.
struct Worker {
    ctx: BroadcastContext,
    requests: Sender<WorkerRequest>,
    handle: JoinHandle<()>,
}

/// The broadcast engine.
///
/// Commands arrive on one channel and are routed to a worker thread per
/// broadcast, which owns that broadcast's state machine. Requests for one
/// broadcast are handled in order; different broadcasts proceed in
/// parallel.
pub struct Engine {
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    services: Services,
    settings: EngineSettings,
    registry: Arc<StateRegistry>,
    workers: HashMap<String, Worker>,
}

impl Engine {
    /// Create a new engine using the process-wide state registry.
    pub fn new(
        command_rx: Receiver<EngineCommand>,
        event_tx: Sender<EngineEvent>,
        services: Services,
        settings: EngineSettings,
    ) -> Self {
        Self {
            command_rx,
            event_tx,
            services,
            settings,
            registry: global_registry(),
            workers: HashMap::new(),
        }
    }

    /// Use `registry` to construct states.
    pub fn with_registry(mut self, registry: Arc<StateRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Run the engine (blocking).
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!("Engine starting");
        self.send_event(EngineEvent::Ready);
        self.resume_persisted();

        loop {
            match self.command_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => self.reap_workers(),
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    self.shutdown();
                    break;
                }
            }
        }

        info!("Engine stopped");
    }

    /// Handle a command. Returns false if engine should stop.
    fn handle_command(&mut self, command: EngineCommand) -> bool {
        debug!(?command, "Handling command");

        let broadcast = match command.broadcast() {
            Some(broadcast) => broadcast.to_string(),
            None => {
                self.shutdown();
                self.send_event(EngineEvent::Shutdown);
                return false;
            }
        };

        if let Err(e) = self.dispatch(&broadcast, command) {
            warn!(%broadcast, error = %e, "Command rejected");
            self.send_event(EngineEvent::Rejected {
                broadcast,
                reason: e.to_string(),
            });
        }

        true
    }

    fn dispatch(&mut self, broadcast: &str, command: EngineCommand) -> EngineResult<()> {
        let worker = self.worker(broadcast)?;

        match command {
            // Answered from persisted state so a busy worker does not delay it.
            EngineCommand::GetStatus { .. } => {
                let status = worker.ctx.status(worker.ctx.config().state);
                self.send_event(EngineEvent::Status(Box::new(status)));
                Ok(())
            }
            command => {
                if matches!(command, EngineCommand::Stop { .. }) {
                    worker.ctx.cancel_flag().store(true, Ordering::SeqCst);
                }
                worker
                    .requests
                    .send(WorkerRequest::Command(command))
                    .map_err(|_| EngineError::ChannelDisconnected)
            }
        }
    }

    /// Returns the broadcast's worker, starting it on first use.
    fn worker(&mut self, broadcast: &str) -> EngineResult<&Worker> {
        if !self.workers.contains_key(broadcast) {
            let worker = self.spawn_worker(broadcast)?;
            self.workers.insert(broadcast.to_string(), worker);
        }
        self.workers
            .get(broadcast)
            .ok_or_else(|| EngineError::UnknownBroadcast(broadcast.to_string()))
    }

    fn spawn_worker(&self, broadcast: &str) -> EngineResult<Worker> {
        let config = self.services.store.get(broadcast).map_err(|e| {
            if e.is_not_found() {
                EngineError::UnknownBroadcast(broadcast.to_string())
            } else {
                EngineError::Store(e)
            }
        })?;

        let ctx = BroadcastContext::new(config, self.services.clone(), self.settings.clone());
        let machine = StateMachine::new(ctx.clone(), Arc::clone(&self.registry))?
            .with_events(self.event_tx.clone());

        let (requests, request_rx) = crossbeam_channel::unbounded();
        let event_tx = self.event_tx.clone();
        let handle = thread::Builder::new()
            .name(format!("broadcast-{broadcast}"))
            .spawn(move || worker_loop(machine, request_rx, event_tx))?;

        debug!(%broadcast, "Started broadcast worker");
        Ok(Worker {
            ctx,
            requests,
            handle,
        })
    }

    /// Re-enters broadcasts a previous run left in a transient state.
    fn resume_persisted(&mut self) {
        let configs = match self.services.store.list() {
            Ok(configs) => configs,
            Err(e) => {
                error!(error = %e, "Could not list broadcasts to resume");
                return;
            }
        };

        for config in configs.into_iter().filter(|c| c.state.is_transient()) {
            info!(broadcast = %config.id, state = %config.state, "Resuming broadcast");
            let sent = self
                .worker(&config.id)
                .and_then(|w| {
                    w.requests
                        .send(WorkerRequest::Resume)
                        .map_err(|_| EngineError::ChannelDisconnected)
                });
            if let Err(e) = sent {
                error!(broadcast = %config.id, error = %e, "Could not resume broadcast");
            }
        }
    }

    /// Drops workers whose thread has ended.
    fn reap_workers(&mut self) {
        self.workers.retain(|broadcast, worker| {
            let alive = !worker.handle.is_finished();
            if !alive {
                error!(%broadcast, "Broadcast worker exited unexpectedly");
            }
            alive
        });
    }

    /// Cancels in-flight work and joins every worker.
    fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        info!(workers = self.workers.len(), "Stopping broadcast workers");

        for worker in self.workers.values() {
            worker.ctx.cancel_flag().store(true, Ordering::SeqCst);
        }
        for (broadcast, worker) in self.workers.drain() {
            drop(worker.requests);
            if worker.handle.join().is_err() {
                error!(%broadcast, "Broadcast worker panicked");
            }
        }
    }

    fn send_event(&self, event: EngineEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handles a broadcast's requests in order until the engine drops its sender.
fn worker_loop(
    mut machine: StateMachine,
    requests: Receiver<WorkerRequest>,
    event_tx: Sender<EngineEvent>,
) {
    let broadcast = machine.context().id().to_string();

    for request in requests {
        let result = match request {
            WorkerRequest::Resume => {
                machine.resume();
                Ok(())
            }
            WorkerRequest::Command(command) => handle_request(&mut machine, command),
        };

        if let Err(e) = result {
            warn!(%broadcast, error = %e, "Request rejected");
            if let Err(e) = event_tx.try_send(EngineEvent::Rejected {
                broadcast: broadcast.clone(),
                reason: e.to_string(),
            }) {
                warn!("Failed to send event: {}", e);
            }
        }
    }

    debug!(%broadcast, "Broadcast worker stopped");
}

fn handle_request(machine: &mut StateMachine, command: EngineCommand) -> EngineResult<()> {
    match command {
        EngineCommand::Start { .. } => machine.start(),
        EngineCommand::Stop { .. } => machine.stop(),
        EngineCommand::Slate { .. } => machine.slate(),
        EngineCommand::ReportHealth { healthy, .. } => machine.report_health(healthy),
        EngineCommand::ResetStates { .. } => machine.reset_states(),
        EngineCommand::UploadSlate { name, data, .. } => {
            machine.upload_slate(&name, Bytes::from(data))
        }
        EngineCommand::GetStatus { .. } | EngineCommand::Shutdown => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use relaycast_ipc::{BroadcastStore, StateId};
    use std::time::Instant;

    struct Harness {
        commands: Sender<EngineCommand>,
        events: Receiver<EngineEvent>,
        thread: Option<JoinHandle<()>>,
    }

    impl Harness {
        fn start(fixture: &Fixture) -> Self {
            let (commands, command_rx) = relaycast_ipc::command_channel();
            let (event_tx, events) = relaycast_ipc::event_channel();
            let mut engine = Engine::new(
                command_rx,
                event_tx,
                fixture.services(),
                fixture.settings.clone(),
            )
            .with_registry(Arc::clone(&fixture.registry));

            let thread = thread::spawn(move || engine.run());
            let harness = Self {
                commands,
                events,
                thread: Some(thread),
            };
            harness.wait_for(|e| matches!(e, EngineEvent::Ready));
            harness
        }

        fn send(&self, command: EngineCommand) {
            self.commands.send(command).unwrap();
        }

        fn wait_for(&self, mut want: impl FnMut(&EngineEvent) -> bool) -> EngineEvent {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                let left = deadline.saturating_duration_since(Instant::now());
                match self.events.recv_timeout(left) {
                    Ok(event) if want(&event) => return event,
                    Ok(_) => {}
                    Err(e) => panic!("expected event not received: {e}"),
                }
            }
        }

        fn wait_for_state(&self, broadcast: &str, state: StateId) {
            self.wait_for(|e| {
                matches!(e, EngineEvent::StateChanged { broadcast: b, current, .. }
                    if b == broadcast && *current == state)
            });
        }

        fn shutdown(mut self) {
            self.send(EngineCommand::Shutdown);
            self.wait_for(|e| matches!(e, EngineEvent::Shutdown));
            if let Some(thread) = self.thread.take() {
                thread.join().unwrap();
            }
        }
    }

    fn start(broadcast: &str) -> EngineCommand {
        EngineCommand::Start {
            broadcast: broadcast.to_string(),
        }
    }

    #[test]
    fn test_start_and_status() {
        let fixture = Fixture::new();
        let harness = Harness::start(&fixture);

        harness.send(start("p"));
        harness.wait_for_state("p", StateId::LivePrimary);

        harness.send(EngineCommand::GetStatus {
            broadcast: "p".to_string(),
        });
        let status = match harness.wait_for(|e| matches!(e, EngineEvent::Status(_))) {
            EngineEvent::Status(status) => status,
            _ => unreachable!(),
        };
        assert_eq!(status.id, "p");
        assert_eq!(status.state, StateId::LivePrimary);
        assert_eq!(status.retries, 0);

        harness.shutdown();
    }

    #[test]
    fn test_unknown_broadcast_rejected() {
        let fixture = Fixture::new();
        let harness = Harness::start(&fixture);

        harness.send(start("nope"));
        let event = harness.wait_for(|e| matches!(e, EngineEvent::Rejected { .. }));
        assert!(matches!(
            event,
            EngineEvent::Rejected { ref broadcast, ref reason }
                if broadcast == "nope" && reason.contains("Unknown broadcast")
        ));

        harness.shutdown();
    }

    #[test]
    fn test_start_refused_in_failure_mode() {
        let fixture = Fixture::new();
        fixture.forwarder.fail_next_streams(10);
        let harness = Harness::start(&fixture);

        harness.send(start("p"));
        harness.wait_for(|e| matches!(e, EngineEvent::FailureMode { retries: 3, .. }));
        harness.wait_for_state("p", StateId::Failed);

        harness.send(start("p"));
        let event = harness.wait_for(|e| matches!(e, EngineEvent::Rejected { .. }));
        assert!(matches!(
            event,
            EngineEvent::Rejected { ref reason, .. } if reason.contains("failure mode")
        ));

        harness.send(EngineCommand::ResetStates {
            broadcast: "p".to_string(),
        });
        harness.wait_for_state("p", StateId::Provisioning);
        assert!(!fixture.store.get("p").unwrap().failure_mode);

        harness.shutdown();
    }

    #[test]
    fn test_stop_cancels_hardware_wait() {
        let mut fixture = Fixture::new();
        fixture.settings.hardware_ready_timeout_ms = 30_000;
        fixture.devices.set_down("0A:1B:2C:3D:4E:5F");
        let harness = Harness::start(&fixture);

        harness.send(start("p"));
        harness.wait_for_state("p", StateId::Starting);
        thread::sleep(Duration::from_millis(50));

        let began = Instant::now();
        harness.send(EngineCommand::Stop {
            broadcast: "p".to_string(),
        });
        harness.wait_for_state("p", StateId::Stopped);

        assert!(began.elapsed() < Duration::from_secs(5));
        assert!(fixture.forwarder.calls().iter().all(|c| c.starts_with("slate")));
        assert_eq!(fixture.store.get("p").unwrap().state, StateId::Stopped);

        harness.shutdown();
    }

    #[test]
    fn test_broadcasts_run_independently() {
        let fixture = Fixture::new();
        let harness = Harness::start(&fixture);

        harness.send(start("p"));
        harness.send(start("s"));
        harness.wait_for_state("p", StateId::LivePrimary);
        harness.wait_for_state("s", StateId::LivePrimary);

        harness.send(EngineCommand::ReportHealth {
            broadcast: "p".to_string(),
            healthy: false,
        });
        harness.wait_for_state("p", StateId::LiveSecondary);
        assert_eq!(fixture.store.get("s").unwrap().state, StateId::LivePrimary);

        harness.shutdown();
    }

    #[test]
    fn test_resumes_interrupted_start() {
        let fixture = Fixture::new();
        let mut stored = fixture.store.get("p").unwrap();
        stored.state = StateId::Starting;
        fixture.store.put(&stored).unwrap();

        let harness = Harness::start(&fixture);
        harness.wait_for_state("p", StateId::LivePrimary);
        assert_eq!(fixture.forwarder.calls(), vec!["stream:Reef-Cam"]);

        harness.shutdown();
    }

    #[test]
    fn test_upload_slate() {
        let fixture = Fixture::new();
        let harness = Harness::start(&fixture);

        harness.send(EngineCommand::UploadSlate {
            broadcast: "p".to_string(),
            name: "night.png".to_string(),
            data: vec![1, 2, 3, 4],
        });
        harness.wait_for(|e| matches!(e, EngineEvent::SlateUploaded { .. }));
        assert_eq!(fixture.forwarder.calls(), vec!["upload:Reef-Cam:night.png:4"]);

        harness.shutdown();
    }
}
