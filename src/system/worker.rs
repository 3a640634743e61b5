//! Fixed-rate integration worker.
//!
//! Calls [`ReconstructionController::tick`] once per period on its own
//! thread until stopped.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, select, tick};
use tracing::{debug, error};

use super::controller::ReconstructionController;

pub struct IntegrationWorker {
    /// Dropping the sender wakes the worker's `select!`.
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl IntegrationWorker {
    /// Spawn a worker ticking at the controller's configured rate.
    pub fn spawn(controller: Arc<ReconstructionController>) -> Self {
        let period = controller.config().tick_period();
        Self::spawn_with_period(controller, period)
    }

    pub fn spawn_with_period(controller: Arc<ReconstructionController>, period: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let handle = thread::spawn(move || run(&controller, period, shutdown_rx));
        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Stop ticking and wait for the thread to exit.
    pub fn stop(&mut self) {
        drop(self.shutdown_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Integration worker panicked");
            }
        }
    }
}

impl Drop for IntegrationWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(controller: &ReconstructionController, period: Duration, shutdown_rx: Receiver<()>) {
    debug!(?period, "Integration worker started");
    let ticker = tick(period);
    loop {
        select! {
            recv(ticker) -> _ => {
                controller.tick();
            }
            recv(shutdown_rx) -> _ => break,
        }
    }
    debug!("Integration worker stopped");
}
