use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Weak},
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};
use tracing::{trace, warn};

use super::pool::PoolInner;
use crate::error::Result;

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// The background thread that runs a pool's maintenance ticks.
///
/// The thread holds only a weak reference to the pool, so it never keeps a dropped pool
/// alive; it exits when stopped or when the pool is gone.
pub(super) struct MaintenanceWorker {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl MaintenanceWorker {
    pub(super) fn start(pool: &Arc<PoolInner>) -> Result<Self> {
        let signal = Arc::new(StopSignal::default());
        let interval = pool.settings.maintenance_interval;
        let weak = Arc::downgrade(pool);

        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name(format!("mongo-pool-maintenance-{}", pool.address))
            .spawn(move || run(weak, &thread_signal, interval))?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    pub(super) fn stop(mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("pool maintenance worker panicked");
            }
        }
    }
}

fn run(pool: Weak<PoolInner>, signal: &StopSignal, interval: Duration) {
    loop {
        {
            let Some(pool) = pool.upgrade() else {
                break;
            };
            // A failed tick must not end the worker; the next tick retries.
            if panic::catch_unwind(AssertUnwindSafe(|| pool.run_maintenance())).is_err() {
                warn!(address = %pool.address, "pool maintenance tick failed");
            }
        }

        let mut stopped = signal.stopped.lock();
        if !*stopped {
            signal.wake.wait_for(&mut stopped, interval);
        }
        if *stopped {
            break;
        }
    }
    trace!("pool maintenance worker stopped");
}
