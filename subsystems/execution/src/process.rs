//! # Process Management
//!
//! A process is one loaded program: an address space, its threads, a
//! handle table, the loader's view of the image and an exit status.
//!
//! Lifecycle is `Initial -> Running -> Dead`. A dead process is reclaimed
//! by the reaper, never by the thread that called [`Process::exit`].

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};

use helix_hal::mmu::{AddressSpaceId, MmuFlags, RegionRequest};
use helix_hal::VirtAddr;
use spin::Mutex;

use crate::config::RuntimeConfig;
use crate::event::Event;
use crate::handle::HandleTable;
use crate::heap::HeapCursor;
use crate::thread::Thread;
use crate::{ExecError, ExecResult, ProcessId, Services};

/// Descriptors per process
pub const FILE_TABLE_SIZE: usize = 64;

// stdin, stdout, stderr
static_assertions::const_assert!(FILE_TABLE_SIZE >= 3);

/// Per-process handle table
pub type FileTable = HandleTable<FILE_TABLE_SIZE>;

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessState {
    /// Created, nothing running yet
    Initial = 0,
    /// First thread started
    Running = 1,
    /// Exited, waiting for the reaper
    Dead = 2,
}

impl ProcessState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProcessState::Initial,
            1 => ProcessState::Running,
            _ => ProcessState::Dead,
        }
    }

    /// Check if the process has exited
    pub fn is_dead(self) -> bool {
        self == ProcessState::Dead
    }
}

/// What the loader left behind for the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoaderState {
    /// Program entry point
    pub entry: VirtAddr,
    /// An image has been bound into the address space
    pub loaded: bool,
}

/// Process structure
pub struct Process {
    /// Process ID
    id: ProcessId,
    /// Process name
    name: String,
    /// Exclusively owned address space
    space: AddressSpaceId,
    /// Current state
    state: AtomicU8,
    /// Valid once the state is `Dead`
    exit_code: AtomicI32,
    /// Set by the first `exit`
    exiting: AtomicBool,
    /// Single-shot, signaled by `exit`
    exit_event: Event,
    /// The reaper's wakeup, shared by all processes
    reap_event: Event,
    /// All threads
    threads: Mutex<Vec<Arc<Thread>>>,
    /// Open handles
    files: FileTable,
    loader: Mutex<LoaderState>,
    heap: HeapCursor,
    services: Services,
    config: RuntimeConfig,
}

impl Process {
    /// Create a process with a fresh, empty address space.
    ///
    /// On failure nothing is left allocated.
    pub fn create(
        name: &str,
        services: &Services,
        config: RuntimeConfig,
        reap_event: Event,
    ) -> ExecResult<Arc<Self>> {
        let space = services.aspaces.create(name)?;

        let exit_event = match Event::new(services.scheduler.clone()) {
            Ok(event) => event,
            Err(err) => {
                if let Err(destroy_err) = services.aspaces.destroy(space) {
                    log::warn!("leaking address space of {}: {}", name, destroy_err);
                }
                return Err(err);
            }
        };

        let process = Arc::new(Self {
            id: ProcessId::new(),
            name: String::from(name),
            space,
            state: AtomicU8::new(ProcessState::Initial as u8),
            exit_code: AtomicI32::new(0),
            exiting: AtomicBool::new(false),
            exit_event,
            reap_event,
            threads: Mutex::new(Vec::new()),
            files: FileTable::new(),
            loader: Mutex::new(LoaderState::default()),
            heap: HeapCursor::new(),
            services: services.clone(),
            config,
        });

        log::debug!("process {} ({}) created", process.id, process.name);
        Ok(process)
    }

    /// Get process ID
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Get process name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The process address space
    pub fn address_space(&self) -> AddressSpaceId {
        self.space
    }

    /// Get state
    pub fn state(&self) -> ProcessState {
        ProcessState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Exit code, once dead
    pub fn exit_code(&self) -> Option<i32> {
        self.state()
            .is_dead()
            .then(|| self.exit_code.load(Ordering::Acquire))
    }

    /// Open handles
    pub fn files(&self) -> &FileTable {
        &self.files
    }

    /// Kernel collaborators
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Runtime configuration the process was created with
    pub fn config(&self) -> RuntimeConfig {
        self.config
    }

    /// Heap frontier
    pub fn heap(&self) -> &HeapCursor {
        &self.heap
    }

    /// Loader state snapshot
    pub fn loader_state(&self) -> LoaderState {
        *self.loader.lock()
    }

    /// Record a successfully bound image
    pub fn set_loaded(&self, entry: VirtAddr) {
        *self.loader.lock() = LoaderState { entry, loaded: true };
    }

    /// Forget any bound image
    pub fn reset_loader(&self) {
        *self.loader.lock() = LoaderState::default();
    }

    /// Number of threads
    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    /// Snapshot of the thread list
    pub fn threads(&self) -> Vec<Arc<Thread>> {
        self.threads.lock().clone()
    }

    /// Create a suspended thread starting at `entry`
    pub fn create_thread(self: &Arc<Self>, entry: VirtAddr) -> ExecResult<Arc<Thread>> {
        Thread::create(self, entry)
    }

    pub(crate) fn attach_thread(&self, thread: Arc<Thread>) -> ExecResult<()> {
        let mut threads = self.threads.lock();
        // checked under the lock so `destroy` cannot miss the thread
        if self.state().is_dead() {
            return Err(ExecError::BadState);
        }
        threads.try_reserve(1).map_err(|_| ExecError::NoMemory)?;
        threads.push(thread);
        Ok(())
    }

    /// Mark the process running. Only valid from `Initial`.
    pub fn start(&self) -> ExecResult<()> {
        self.state
            .compare_exchange(
                ProcessState::Initial as u8,
                ProcessState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| ExecError::BadState)?;

        log::debug!("process {} running", self.id);
        Ok(())
    }

    /// Terminate the process with `code`.
    ///
    /// Called by one of the process's own threads. Other threads are not
    /// checked for: any sibling still running is torn down by the reaper.
    /// Only the first call counts; later ones leave the code as it was.
    pub fn exit(&self, code: i32) {
        if self.exiting.swap(true, Ordering::AcqRel) {
            log::debug!("process {} already exiting, exit({}) ignored", self.id, code);
            return;
        }
        log::debug!("process {} exit({})", self.id, code);

        self.exit_code.store(code, Ordering::Release);
        self.state.store(ProcessState::Dead as u8, Ordering::Release);

        self.exit_event.signal();
        self.reap_event.signal();
    }

    /// Block until the process is dead and return its exit code
    pub fn wait(&self) -> ExecResult<i32> {
        if let Some(code) = self.exit_code() {
            return Ok(code);
        }

        // the event may be destroyed by the reaper under us; the state
        // is authoritative
        if let Err(err) = self.exit_event.wait() {
            if !self.state().is_dead() {
                return Err(err);
            }
        }

        self.exit_code().ok_or(ExecError::BadState)
    }

    /// Grow the heap by `increment` bytes, returning the old frontier
    pub fn grow_heap(&self, increment: isize) -> ExecResult<VirtAddr> {
        self.heap.grow(increment, self.config.heap_chunk_size, |size| {
            let request = RegionRequest::anywhere("heap", size, MmuFlags::user_data());
            self.services.aspaces.allocate(self.space, request)
        })
    }

    /// Reclaim everything the process owns. Reaper only.
    pub(crate) fn destroy(&self) {
        assert!(
            self.state().is_dead(),
            "destroying process {} in state {:?}",
            self.id,
            self.state()
        );

        let threads = core::mem::take(&mut *self.threads.lock());
        for thread in threads {
            if let Err(err) = thread.join() {
                log::warn!("process {}: join of thread {} failed: {}", self.id, thread.id(), err);
            }
        }

        self.files.close_all();

        if let Err(err) = self.services.aspaces.destroy(self.space) {
            log::warn!("process {}: address space teardown failed: {}", self.id, err);
        }

        self.exit_event.destroy();
        self.reset_loader();

        log::debug!("process {} reclaimed", self.id);
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("threads", &self.thread_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::testing::{services, wait_until};
    use crate::thread::local_storage;
    use core::sync::atomic::AtomicUsize;
    use helix_hal::sched::{KernelScheduler, Priority, TlsSlot};
    use helix_hal::PAGE_SIZE;
    use helix_hal_mock::MockKernel;
    use std::time::Duration;

    fn create(kernel: &MockKernel) -> Arc<Process> {
        let services = services(kernel);
        let reap = Event::auto_unsignal(services.scheduler.clone()).unwrap();
        Process::create("test", &services, RuntimeConfig::default(), reap).unwrap()
    }

    #[test]
    fn test_create_and_start() {
        let kernel = MockKernel::new();
        let process = create(&kernel);

        assert_eq!(process.state(), ProcessState::Initial);
        assert_eq!(process.exit_code(), None);
        assert!(kernel.aspaces.exists(process.address_space()));
        assert_eq!(kernel.aspaces.name_of(process.address_space()).as_deref(), Some("test"));

        assert_eq!(process.start(), Ok(()));
        assert_eq!(process.state(), ProcessState::Running);
        assert_eq!(process.start(), Err(ExecError::BadState));
    }

    #[test]
    fn test_create_failure_leaves_nothing() {
        let kernel = MockKernel::new();
        let services = services(&kernel);
        let reap = Event::auto_unsignal(services.scheduler.clone()).unwrap();
        kernel.aspaces.fail_create(true);

        let result = Process::create("test", &services, RuntimeConfig::default(), reap);
        assert_eq!(result.err(), Some(ExecError::NoMemory));
        assert_eq!(kernel.aspaces.live_spaces(), 0);
        // only the reap event
        assert_eq!(kernel.scheduler.live_events(), 1);
    }

    #[test]
    fn test_exit_then_wait() {
        let kernel = MockKernel::new();
        let process = create(&kernel);
        process.start().unwrap();

        process.exit(7);
        assert_eq!(process.state(), ProcessState::Dead);
        assert_eq!(process.wait(), Ok(7));
        assert_eq!(process.wait(), Ok(7));
        assert_eq!(process.exit_code(), Some(7));
    }

    #[test]
    fn test_wait_blocks_until_exit() {
        let kernel = MockKernel::new();
        let process = create(&kernel);
        process.start().unwrap();

        let exiting = process.clone();
        let exiter = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            exiting.exit(-3);
        });

        assert_eq!(process.wait(), Ok(-3));
        exiter.join().unwrap();
    }

    #[test]
    fn test_thread_runs_in_process_space() {
        let kernel = MockKernel::new();
        let process = create(&kernel);
        let entry = VirtAddr::new(0x1000);

        let scheduler = kernel.scheduler.clone();
        let seen_tls = Arc::new(AtomicUsize::new(0));
        let seen = seen_tls.clone();
        kernel.user.register(entry, move |_| {
            seen.store(scheduler.tls_get(TlsSlot::Lkuser), Ordering::SeqCst);
        });

        let thread = process.create_thread(entry).unwrap();
        assert_eq!(process.thread_count(), 1);
        let context = thread.context().unwrap();
        assert_eq!(kernel.scheduler.bound_space(context), Some(process.address_space()));
        assert_eq!(kernel.scheduler.priority_of(context), Some(Priority::LOW));

        process.start().unwrap();
        thread.resume().unwrap();
        wait_until("user entry", || !kernel.user.entries().is_empty());

        let record = kernel.user.entries()[0];
        assert_eq!(record.entry, entry);
        wait_until("user stack", || thread.user_stack().is_some());
        let stack = thread.user_stack().unwrap();
        assert_eq!(record.stack_top, stack.add(PAGE_SIZE));
        wait_until("tls", || seen_tls.load(Ordering::SeqCst) != 0);
        assert_eq!(seen_tls.load(Ordering::SeqCst), Arc::as_ptr(&thread) as usize);

        let regions = kernel.aspaces.regions(process.address_space());
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].flags, MmuFlags::user_data());

        process.exit(0);
        process.destroy();
        assert!(thread.state().is_terminated());
    }

    #[test]
    fn test_destroy_reclaims_everything() {
        let kernel = MockKernel::new();
        let process = create(&kernel);
        let entry = VirtAddr::new(0x2000);
        kernel.user.register(entry, |_| {});

        let thread = process.create_thread(entry).unwrap();
        process.start().unwrap();
        thread.resume().unwrap();
        process.set_loaded(entry);

        process.exit(1);
        process.destroy();

        assert_eq!(process.thread_count(), 0);
        assert_eq!(kernel.scheduler.live_contexts(), 0);
        assert!(!kernel.aspaces.exists(process.address_space()));
        assert_eq!(process.loader_state(), LoaderState::default());
        assert_eq!(thread.join(), Err(ExecError::BadState));

        // the exit event is gone, the state still answers
        assert_eq!(process.wait(), Ok(1));
    }

    #[test]
    #[should_panic(expected = "destroying process")]
    fn test_destroy_requires_dead() {
        let kernel = MockKernel::new();
        let process = create(&kernel);
        process.destroy();
    }

    #[test]
    fn test_no_threads_after_death() {
        let kernel = MockKernel::new();
        let process = create(&kernel);
        process.exit(0);
        assert_eq!(process.create_thread(VirtAddr::new(0x1000)).err(), Some(ExecError::BadState));
        assert_eq!(process.thread_count(), 0);
        // the refused thread's context was released, not leaked
        assert_eq!(kernel.scheduler.live_contexts(), 0);
        assert_eq!(kernel.scheduler.joined_contexts(), 1);
    }

    #[test]
    fn test_first_exit_code_wins() {
        let kernel = MockKernel::new();
        let process = create(&kernel);
        process.start().unwrap();

        process.exit(1);
        process.exit(5);
        assert_eq!(process.wait(), Ok(1));
        assert_eq!(process.exit_code(), Some(1));
    }

    #[test]
    fn test_destroy_joins_running_sibling() {
        let kernel = MockKernel::new();
        let process = create(&kernel);
        let first = VirtAddr::new(0x3000);
        let second = VirtAddr::new(0x4000);

        let scheduler = kernel.scheduler.clone();
        kernel.user.register(first, move |_| {
            if let Some(process) = local_storage::current(&*scheduler).and_then(|t| t.process()) {
                process.exit(1);
            }
        });

        let release = Arc::new(AtomicBool::new(false));
        let sibling_saw = Arc::new(AtomicI32::new(0));
        let scheduler = kernel.scheduler.clone();
        let (gate, saw) = (release.clone(), sibling_saw.clone());
        kernel.user.register(second, move |_| {
            while !gate.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            // still resolvable while the process is being torn down
            if let Some(process) = local_storage::current(&*scheduler).and_then(|t| t.process()) {
                saw.store(process.exit_code().unwrap_or(0), Ordering::SeqCst);
                process.exit(5);
            }
        });

        let sibling = process.create_thread(second).unwrap();
        let exiting = process.create_thread(first).unwrap();
        assert_eq!(process.thread_count(), 2);
        process.start().unwrap();
        sibling.resume().unwrap();
        wait_until("sibling in user mode", || kernel.user.entries().len() == 1);
        exiting.resume().unwrap();

        assert_eq!(process.wait(), Ok(1));

        let destroyed = Arc::new(AtomicBool::new(false));
        let reaper = {
            let (process, destroyed) = (process.clone(), destroyed.clone());
            std::thread::spawn(move || {
                process.destroy();
                destroyed.store(true, Ordering::SeqCst);
            })
        };

        // blocked joining the sibling; nothing is freed yet
        std::thread::sleep(Duration::from_millis(50));
        assert!(!destroyed.load(Ordering::SeqCst));
        assert!(kernel.aspaces.exists(process.address_space()));
        assert!(!sibling.state().is_terminated());

        release.store(true, Ordering::SeqCst);
        reaper.join().unwrap();

        assert!(sibling.state().is_terminated());
        assert!(exiting.state().is_terminated());
        assert_eq!(kernel.scheduler.joined_contexts(), 2);
        assert_eq!(kernel.scheduler.live_contexts(), 0);
        assert!(!kernel.aspaces.exists(process.address_space()));
        assert_eq!(sibling_saw.load(Ordering::SeqCst), 1);
        assert_eq!(process.exit_code(), Some(1));
    }

    #[test]
    fn test_heap_growth() {
        let kernel = MockKernel::new();
        let process = create(&kernel);
        let chunk = process.config().heap_chunk_size;

        assert_eq!(process.grow_heap(0), Ok(VirtAddr::NULL));
        assert_eq!(kernel.aspaces.allocation_count(), 0);

        let a = process.grow_heap(64).unwrap();
        let b = process.grow_heap(32).unwrap();
        assert_eq!(b.offset_from(a), 64);
        assert_eq!(process.grow_heap(0), Ok(a.add(96)));
        assert_eq!(kernel.aspaces.allocation_count(), 1);

        let regions = kernel.aspaces.regions(process.address_space());
        assert_eq!(regions[0].size, chunk);
        assert_eq!(regions[0].flags, MmuFlags::user_data());

        assert_eq!(process.grow_heap(-4), Err(ExecError::InvalidArgs));
    }
}
