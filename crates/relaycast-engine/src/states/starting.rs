//! Powering the hardware and asking the relay to go live.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Sender};
use relaycast_ipc::{mac_decode, BroadcastConfig, FailureKind, HardwarePhase, StateId};
use tracing::{debug, info, instrument, warn};

use super::BroadcastState;
use crate::bus::{Event, EventKind, Failure};
use crate::context::BroadcastContext;

/// Longest stretch the ready wait goes without checking for cancellation.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(50);

enum Readiness {
    Ready,
    Cancelled,
    TimedOut,
    Unknown(String),
}

/// Runs, in order: a controller status check, a power cycle when retrying,
/// the on actions, a bounded wait for the camera to report, and the relay's
/// go-live request. Ends by
/// publishing `Ready`, `Failed` or `InvalidConfiguration`, or nothing when
/// a stop request cancelled it.
pub struct Starting {
    ctx: BroadcastContext,
}

impl Starting {
    pub fn new(ctx: BroadcastContext) -> Self {
        Self { ctx }
    }

    fn power_cycle(&self, config: &BroadcastConfig) {
        info!("Power cycling hardware before retry");
        self.ctx.set_hardware(HardwarePhase::Stopping);
        for problem in self.ctx.sequencer().power_down(config).problems() {
            warn!(%problem, "Power cycle step failed");
        }
        self.ctx.set_hardware(HardwarePhase::Off);
    }

    /// Undoes the power on before reporting a configuration defect.
    fn abandon(&self, config: &BroadcastConfig, message: String) {
        for problem in self.ctx.sequencer().power_down(config).problems() {
            warn!(%problem, "Power down after invalid configuration incomplete");
        }
        self.ctx.set_hardware(HardwarePhase::Off);
        self.ctx.publish(Event::InvalidConfiguration(message));
    }

    fn await_hardware(&self, mac: String) -> Readiness {
        let ctx = &self.ctx;
        let (ready_tx, ready_rx) = crossbeam_channel::unbounded();
        let subscription = ctx.bus().forward_to(EventKind::HardwareReady, ready_tx);

        let (fault_tx, fault_rx) = crossbeam_channel::bounded(1);
        let done = Arc::new(AtomicBool::new(false));
        let _poller = spawn_poller(ctx.clone(), mac, Arc::clone(&done), fault_tx);

        let deadline = Instant::now() + ctx.settings().hardware_ready_timeout();
        let outcome = loop {
            if ctx.is_cancelled() {
                break Readiness::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                break Readiness::TimedOut;
            }

            select! {
                recv(ready_rx) -> _ => break Readiness::Ready,
                recv(fault_rx) -> fault => {
                    if let Ok(message) = fault {
                        break Readiness::Unknown(message);
                    }
                }
                default(CANCEL_CHECK_INTERVAL.min(deadline - now)) => {}
            }
        };

        done.store(true, Ordering::SeqCst);
        ctx.bus().unsubscribe(subscription);
        outcome
    }
}

named_state!(Starting, StateId::Starting);

impl BroadcastState for Starting {
    fn id(&self) -> StateId {
        StateId::Starting
    }

    #[instrument(name = "starting", skip(self), fields(broadcast = %self.ctx.id(), attempt = self.ctx.retries() + 1))]
    fn enter(&self) {
        let ctx = &self.ctx;
        let config = ctx.config();

        if ctx.is_cancelled() {
            info!("Start cancelled before powering hardware");
            return;
        }

        let mac = mac_decode(config.camera_mac);
        if mac.is_empty() {
            ctx.publish(Event::InvalidConfiguration("camera MAC is not set".to_string()));
            return;
        }

        let controller = mac_decode(config.controller_mac);
        if !controller.is_empty() {
            match ctx.devices().is_up(&controller) {
                Ok(true) => debug!(%controller, "Controller is reporting"),
                Ok(false) => {
                    ctx.fail(Failure::new(
                        FailureKind::Hardware,
                        format!("controller {controller} is not reporting"),
                    ));
                    return;
                }
                Err(e) => {
                    ctx.publish(Event::InvalidConfiguration(format!(
                        "could not get controller status: {e}"
                    )));
                    return;
                }
            }
        }

        if ctx.retries() > 0 {
            self.power_cycle(&config);
        }

        let rtmp_url = ctx.rtmp_url();
        match ctx.sequencer().power_on(&config, rtmp_url.as_deref()) {
            Ok(report) if !report.is_clean() => {
                warn!(failures = report.failures.len(), "Some power on actions failed");
            }
            Ok(_) => {}
            Err(e) => {
                ctx.publish(Event::InvalidConfiguration(format!("invalid on actions: {e}")));
                return;
            }
        }
        ctx.set_hardware(HardwarePhase::Starting);

        match self.await_hardware(mac.clone()) {
            Readiness::Ready => {
                info!(%mac, "Camera is reporting");
                ctx.set_hardware(HardwarePhase::On);
            }
            Readiness::Cancelled => {
                info!("Start cancelled while waiting for hardware");
                return;
            }
            Readiness::TimedOut => {
                ctx.fail(Failure::new(
                    FailureKind::Hardware,
                    format!(
                        "camera {mac} did not report within {:?}",
                        ctx.settings().hardware_ready_timeout()
                    ),
                ));
                return;
            }
            Readiness::Unknown(message) => {
                self.abandon(&config, format!("could not get camera status: {message}"));
                return;
            }
        }

        if ctx.is_cancelled() {
            info!("Start cancelled before going live");
            return;
        }

        match ctx.forwarder().stream(&config) {
            Ok(()) => {
                info!("Relay is forwarding the primary feed");
                ctx.publish(Event::Ready);
            }
            Err(e) if e.is_configuration() => self.abandon(&config, e.to_string()),
            Err(e) => ctx.fail(Failure::new(FailureKind::Forwarder, e.to_string())),
        }
    }
}

/// Polls the camera until it reports, then publishes `HardwareReady`.
/// Publishes nothing once `done` is set, so a poller left over from an
/// earlier attempt cannot satisfy a later wait.
fn spawn_poller(
    ctx: BroadcastContext,
    mac: String,
    done: Arc<AtomicBool>,
    fault: Sender<String>,
) -> thread::JoinHandle<()> {
    let interval = ctx.settings().hardware_poll_interval();
    thread::spawn(move || {
        while !done.load(Ordering::SeqCst) {
            match ctx.devices().is_up(&mac) {
                Ok(true) => {
                    if !done.load(Ordering::SeqCst) {
                        ctx.publish(Event::HardwareReady);
                    }
                    return;
                }
                Ok(false) => debug!(%mac, "Camera not reporting yet"),
                Err(e) => {
                    let _ = fault.send(e.to_string());
                    return;
                }
            }
            thread::sleep(interval);
        }
    })
}
