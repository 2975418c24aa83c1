//! # Execution Runtime
//!
//! Process-wide state made explicit: the registry, the reap event and the
//! reaper context. Built once by [`Runtime::init`] and torn down by
//! [`Runtime::shutdown`].

use alloc::sync::Arc;
use core::fmt;
use spin::Mutex;

use crate::config::RuntimeConfig;
use crate::event::Event;
use crate::process::Process;
use crate::reaper::{Reaper, ReaperMetrics};
use crate::registry::ProcessRegistry;
use crate::thread::{local_storage, Thread};
use crate::{ExecError, ExecResult, Services};

/// Execution runtime
pub struct Runtime {
    services: Services,
    config: RuntimeConfig,
    registry: Arc<ProcessRegistry>,
    reap_event: Event,
    reaper: Mutex<Option<Reaper>>,
    reaper_metrics: Arc<ReaperMetrics>,
}

impl Runtime {
    /// Create the registry and start the reaper
    pub fn init(services: Services, config: RuntimeConfig) -> ExecResult<Arc<Self>> {
        let registry = Arc::new(ProcessRegistry::new());
        let reap_event = Event::auto_unsignal(services.scheduler.clone())?;

        let reaper = match Reaper::spawn(registry.clone(), &services, &config, reap_event.clone()) {
            Ok(reaper) => reaper,
            Err(err) => {
                reap_event.destroy();
                return Err(err);
            }
        };

        let reaper_metrics = reaper.metrics();

        log::info!("execution runtime initialized");

        Ok(Arc::new(Self {
            services,
            config,
            registry,
            reap_event,
            reaper: Mutex::new(Some(reaper)),
            reaper_metrics,
        }))
    }

    /// Kernel collaborators
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Runtime configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Every live process
    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Create a process and link it into the registry
    pub fn create_process(&self, name: &str) -> ExecResult<Arc<Process>> {
        if self.reaper.lock().is_none() {
            return Err(ExecError::BadState);
        }

        let process = Process::create(name, &self.services, self.config, self.reap_event.clone())?;
        self.registry.link(process.clone())?;
        Ok(process)
    }

    /// The user thread running on the calling context
    ///
    /// Found through the context's TLS slot, so it keeps working after the
    /// reaper has unlinked the process.
    pub fn current_thread(&self) -> Option<Arc<Thread>> {
        local_storage::current(&*self.services.scheduler)
    }

    /// The process of the user thread running on the calling context
    pub fn current_process(&self) -> Option<Arc<Process>> {
        self.current_thread()?.process()
    }

    /// Processes reclaimed so far
    pub fn reaped(&self) -> u64 {
        self.reaper_metrics.reaped()
    }

    /// Drain dead processes, stop the reaper and release the reap event.
    ///
    /// Processes still alive stay linked; they are not forced down.
    pub fn shutdown(&self) -> ExecResult<()> {
        let reaper = self.reaper.lock().take().ok_or(ExecError::BadState)?;
        reaper.stop()?;
        self.reap_event.destroy();

        let remaining = self.registry.count();
        if remaining > 0 {
            log::warn!("execution runtime shut down with {} live process(es)", remaining);
        } else {
            log::info!("execution runtime shut down");
        }
        Ok(())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("processes", &self.registry.count())
            .finish()
    }
}
