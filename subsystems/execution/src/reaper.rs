//! # Reaper
//!
//! Background context that reclaims dead processes.
//!
//! `Process::exit` only flips the state and signals; joining threads and
//! tearing down address spaces happens here, away from the exiting thread.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use helix_hal::sched::{ContextHandle, ContextSpec};

use crate::config::RuntimeConfig;
use crate::event::Event;
use crate::registry::ProcessRegistry;
use crate::{ExecResult, Services};

/// Reaper metrics
#[derive(Debug, Default)]
pub struct ReaperMetrics {
    /// Wakeups handled
    passes: AtomicU64,
    /// Processes reclaimed
    reaped: AtomicU64,
}

impl ReaperMetrics {
    /// Create new metrics
    pub const fn new() -> Self {
        Self {
            passes: AtomicU64::new(0),
            reaped: AtomicU64::new(0),
        }
    }

    fn record_pass(&self, reaped: usize) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.reaped.fetch_add(reaped as u64, Ordering::Relaxed);
    }

    /// Get wakeups handled
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Get processes reclaimed
    pub fn reaped(&self) -> u64 {
        self.reaped.load(Ordering::Relaxed)
    }
}

/// Reclaim every dead process currently linked, returning how many.
///
/// The registry lock is only held while unlinking; `destroy` runs
/// without it.
pub fn reap_dead(registry: &ProcessRegistry) -> usize {
    let mut reaped = 0;
    while let Some(process) = registry.take_first_dead() {
        log::trace!("reaping {}", process.id());
        process.destroy();
        reaped += 1;
    }
    reaped
}

/// Handle on the running reaper context
#[derive(Debug)]
pub struct Reaper {
    context: ContextHandle,
    event: Event,
    stop: Arc<AtomicBool>,
    metrics: Arc<ReaperMetrics>,
    services: Services,
}

impl Reaper {
    /// Create and resume the reaper context, woken by `event`
    pub fn spawn(
        registry: Arc<ProcessRegistry>,
        services: &Services,
        config: &RuntimeConfig,
        event: Event,
    ) -> ExecResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let metrics = Arc::new(ReaperMetrics::new());

        let body = {
            let event = event.clone();
            let stop = stop.clone();
            let metrics = metrics.clone();
            move || -> i32 {
                loop {
                    if let Err(err) = event.wait() {
                        log::error!("reaper: wait failed: {}", err);
                        return err.code();
                    }

                    let reaped = reap_dead(&registry);
                    metrics.record_pass(reaped);
                    if reaped > 0 {
                        log::debug!("reaper: reclaimed {} process(es)", reaped);
                    }

                    if stop.load(Ordering::Acquire) {
                        return 0;
                    }
                }
            }
        };

        let spec = ContextSpec {
            name: "lkuser reaper",
            priority: config.reaper_priority,
            stack_size: config.kernel_stack_size,
        };
        let context = services.scheduler.create_context(spec, Box::new(body))?;
        services.scheduler.resume(context)?;

        log::info!("reaper started");

        Ok(Self {
            context,
            event,
            stop,
            metrics,
            services: services.clone(),
        })
    }

    /// Reaper statistics
    pub fn metrics(&self) -> Arc<ReaperMetrics> {
        self.metrics.clone()
    }

    /// Run one last pass, then stop and join the context
    pub fn stop(self) -> ExecResult<i32> {
        self.stop.store(true, Ordering::Release);
        self.event.signal();
        let code = self.services.scheduler.join(self.context)?;
        log::info!("reaper stopped after {} pass(es)", self.metrics.passes());
        Ok(code)
    }
}
