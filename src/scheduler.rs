use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

#[derive(Debug, Default)]
struct StopSignal {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Repeating tick source. The next wait starts only after the previous
/// handler returns, so the real period drifts by the handler's run time.
#[derive(Debug)]
pub struct Scheduler {
    signal: Arc<StopSignal>,
    worker: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn start<F>(period: Duration, mut on_tick: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let signal = Arc::new(StopSignal::default());
        let worker = thread::Builder::new()
            .name("taskwatch-ticker".to_owned())
            .spawn({
                let signal = Arc::clone(&signal);
                move || {
                    while wait_for_next_tick(&signal, period) {
                        on_tick();
                    }
                    debug!("ticker stopped");
                }
            })?;

        Ok(Self {
            signal,
            worker: Some(worker),
        })
    }

    pub fn cancel(&self) {
        let mut cancelled = self.signal.cancelled.lock();
        *cancelled = true;
        self.signal.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.signal.cancelled.lock()
    }

    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("ticker thread panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// Returns false once cancelled, checked both before and after the wait.
fn wait_for_next_tick(signal: &StopSignal, period: Duration) -> bool {
    let mut cancelled = signal.cancelled.lock();
    if *cancelled {
        return false;
    }
    signal.wake.wait_for(&mut cancelled, period);
    !*cancelled
}
