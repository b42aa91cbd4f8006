//! Userspace service driving one controller
//!
//! ```text
//!   IrqSource ──wait──► irq task ──┐
//!                                  ├──► ControllerHandle (lock) ──► hardware
//!   PollTimer deadline ─► timer task┘
//! ```
//!
//! Both tasks take the controller lock only for the synchronous dispatch or
//! poll step; nothing is awaited while it is held.

use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::controller::ControllerHandle;
use crate::uio::IrqSource;

pub struct OtgService {
    handle: ControllerHandle,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl OtgService {
    /// Spawn the poll timer task (and the interrupt task when a source is
    /// given), then unmask controller interrupts
    pub fn start(handle: ControllerHandle, irq: Option<Box<dyn IrqSource>>) -> Self {
        let cancel = CancellationToken::new();
        let mut tasks = vec![tokio::spawn(run_poll_timer(handle.clone(), cancel.clone()))];
        match irq {
            Some(irq) => tasks.push(tokio::spawn(run_irq_loop(
                handle.clone(),
                irq,
                cancel.clone(),
            ))),
            None => info!("No interrupt source, running on the poll timer only"),
        }

        handle.lock().enable_interrupts();
        info!("OTG service started");

        Self {
            handle,
            cancel,
            tasks,
        }
    }

    pub fn handle(&self) -> &ControllerHandle {
        &self.handle
    }

    /// Stop both tasks, then detach the controller
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("OTG service task failed: {}", e);
            }
        }
        self.handle.detach();
        info!("OTG service stopped");
    }
}

async fn run_poll_timer(handle: ControllerHandle, cancel: CancellationToken) {
    let wake = handle.poll_waker();
    loop {
        let deadline = handle.lock().timer().deadline();
        match deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = wake.notified() => continue,
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                        let fired = handle.lock().poll_timer_fired(Instant::now());
                        trace!("Poll timer expired (fired: {})", fired);
                    }
                }
            }
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = wake.notified() => continue,
                }
            }
        }
    }
    debug!("Poll timer task exiting");
}

async fn run_irq_loop(
    handle: ControllerHandle,
    mut irq: Box<dyn IrqSource>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = irq.wait() => match result {
                Ok(count) => {
                    let outcome = handle.lock().dispatch_interrupt(Instant::now());
                    trace!(count, ?outcome, "Interrupt dispatched");
                    if let Err(e) = irq.complete() {
                        error!("Interrupt source cannot be re-enabled: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    error!("Interrupt source failed: {}", e);
                    break;
                }
            }
        }
    }
    debug!("Interrupt task exiting");
}
