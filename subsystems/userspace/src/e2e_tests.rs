//! End-to-end runs on the mock kernel: a real ELF image is loaded from the
//! mock filesystem and "executed" by a host closure registered at its entry
//! point, which talks to the kernel only through syscall trap frames.

extern crate std;

use alloc::format;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;
use std::time::Duration;

use helix_hal::arch::{ArmFaultFrame, RiscvShortFrame};
use helix_hal::trap::SyscallArgs;
use helix_hal::VirtAddr;
use helix_hal_mock::MockKernel;

use crate::elf::testing::{image, image32};
use crate::loader::{self, ImageSource};
use crate::shell::{CommandResult, Shell};
use crate::syscalls::{handle_trap, Syscall};
use crate::userland::testing::userland;
use crate::userland::Userland;
use crate::UserError;

const ENTRY: u64 = 0x10078;
const HELLO: &str = "/lku/bin/hello";

fn syscall(userland: &Userland, number: Syscall, args: SyscallArgs) -> i64 {
    let mut frame = RiscvShortFrame::for_syscall(number as usize, args);
    handle_trap(userland, &mut frame);
    frame.return_value() as i64
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {}", what);
}

/// Install `program` at the image entry point. It receives the userland
/// weakly so the program table does not keep the runtime alive.
fn install_program<F>(kernel: &MockKernel, userland: &Arc<Userland>, program: F)
where
    F: Fn(&Userland) + Send + Sync + 'static,
{
    kernel.fs.add_file(HELLO, &image(ENTRY, b"\x73\x00\x00\x00", 64));

    let weak: Weak<Userland> = Arc::downgrade(userland);
    kernel.user.register(VirtAddr::new(ENTRY as usize), move |_stack_top| {
        if let Some(userland) = weak.upgrade() {
            program(&userland);
        }
    });
}

/// `exit(7)` after greeting on stdout
fn hello(userland: &Userland) {
    let msg = b"hello\n";
    syscall(userland, Syscall::Write, [1, msg.as_ptr() as usize, msg.len(), 0]);
    syscall(userland, Syscall::Exit, [7, 0, 0, 0]);
}

#[test]
fn test_exit_code_and_reclaim() {
    let kernel = MockKernel::new();
    let userland = userland(&kernel);
    install_program(&kernel, &userland, hello);

    let process = userland.create_process("hello").unwrap();
    loader::load(&userland, &process, ImageSource::Path(HELLO)).unwrap();
    let space = process.address_space();

    assert_eq!(loader::start_binary(&process, true), Ok(Some(7)));
    assert_eq!(process.wait(), Ok(7));
    assert_eq!(kernel.console.output_string(), "hello\n");

    let entries = kernel.user.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry, VirtAddr::new(ENTRY as usize));

    drop(process);
    wait_until("the reaper", || userland.runtime().reaped() == 1);
    assert_eq!(userland.runtime().registry().count(), 0);
    assert!(!kernel.aspaces.exists(space));
    assert_eq!(kernel.fs.open_count(), 0);
    // only the reaper is left
    assert_eq!(kernel.scheduler.live_contexts(), 1);

    userland.runtime().shutdown().unwrap();
    assert_eq!(kernel.scheduler.live_contexts(), 0);
    assert_eq!(kernel.scheduler.live_events(), 0);
}

#[test]
fn test_arm_image_exits_through_arm_frame() {
    let kernel = MockKernel::new();
    let userland = userland(&kernel);
    install_program(&kernel, &userland, |userland| {
        let mut frame = ArmFaultFrame::for_syscall(Syscall::Exit as u32, [(-3i32) as u32, 0, 0, 0]);
        handle_trap(userland, &mut frame);
    });
    // a 32-bit ARM build of the same program
    kernel.fs.add_file(HELLO, &image32(ENTRY as u32, b"\x00\x00\x00\xef", 16));

    let process = userland.create_process("arm").unwrap();
    loader::load(&userland, &process, ImageSource::Path(HELLO)).unwrap();
    assert_eq!(loader::start_binary(&process, true), Ok(Some(-3)));

    drop(process);
    userland.runtime().shutdown().unwrap();
    assert_eq!(kernel.aspaces.live_spaces(), 0);
}

#[test]
fn test_open_handles_closed_on_reap() {
    let kernel = MockKernel::new();
    let userland = userland(&kernel);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let record = seen.clone();
    install_program(&kernel, &userland, move |userland| {
        let data = b"/data\0";
        let console = b"/dev/console\0";
        let mut results = Vec::new();
        results.push(syscall(userland, Syscall::Open, [data.as_ptr() as usize, 0, 0, 0]));
        results.push(syscall(userland, Syscall::Open, [console.as_ptr() as usize, 0, 0, 0]));
        results.push(syscall(userland, Syscall::Open, [data.as_ptr() as usize, 0, 0, 0]));
        *record.lock() = results;
        // exit without closing anything
        syscall(userland, Syscall::Exit, [0, 0, 0, 0]);
    });
    kernel.fs.add_file("/data", b"hello world");

    let process = userland.create_process("files").unwrap();
    loader::load(&userland, &process, ImageSource::Path(HELLO)).unwrap();
    assert_eq!(loader::start_binary(&process, true), Ok(Some(0)));

    // lowest free descriptor first
    assert_eq!(*seen.lock(), [0, 1, 2]);

    drop(process);
    userland.runtime().shutdown().unwrap();
    assert_eq!(userland.runtime().reaped(), 1);
    assert_eq!(kernel.fs.open_count(), 0);
}

#[test]
fn test_file_io_through_descriptors() {
    let kernel = MockKernel::new();
    let userland = userland(&kernel);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let record = seen.clone();
    install_program(&kernel, &userland, move |userland| {
        let console = b"/dev/console\0";
        let path = b"/data\0";
        let mut buf = [0u8; 4];
        let buf_addr = buf.as_mut_ptr() as usize;
        let mut results = Vec::new();

        // stdio first, as a C runtime would
        for _ in 0..3 {
            syscall(userland, Syscall::Open, [console.as_ptr() as usize, 0, 0, 0]);
        }
        let fd = syscall(userland, Syscall::Open, [path.as_ptr() as usize, 0, 0, 0]);
        results.push(fd);
        results.push(syscall(userland, Syscall::Read, [fd as usize, buf_addr, 4, 0]));
        results.push(syscall(userland, Syscall::Read, [fd as usize, buf_addr, 4, 0]));
        results.push(i64::from(u32::from_le_bytes(buf)));
        results.push(syscall(userland, Syscall::Lseek, [fd as usize, 0, 0, 0]));
        results.push(syscall(userland, Syscall::Close, [fd as usize, 0, 0, 0]));
        results.push(syscall(userland, Syscall::Close, [fd as usize, 0, 0, 0]));
        results.push(syscall(userland, Syscall::Read, [9, buf_addr, 4, 0]));
        results.push(syscall(userland, Syscall::Close, [usize::MAX, 0, 0, 0]));
        *record.lock() = results;

        syscall(userland, Syscall::Exit, [0, 0, 0, 0]);
    });
    kernel.fs.add_file("/data", b"hello world");

    let process = userland.create_process("io").unwrap();
    loader::load(&userland, &process, ImageSource::Path(HELLO)).unwrap();
    assert_eq!(loader::start_binary(&process, true), Ok(Some(0)));

    let results = seen.lock().clone();
    assert_eq!(results[0], 3);
    assert_eq!(results[1], 4);
    assert_eq!(results[2], 4);
    assert_eq!(results[3], i64::from(u32::from_le_bytes(*b"o wo")));
    assert_eq!(results[4], UserError::NotImplemented.code() as i64);
    assert_eq!(results[5], 0);
    assert_eq!(results[6], UserError::NotFound.code() as i64);
    assert_eq!(results[7], UserError::InvalidArgs.code() as i64);
    assert_eq!(results[8], UserError::InvalidArgs.code() as i64);

    drop(process);
    userland.runtime().shutdown().unwrap();
}

#[test]
fn test_sbrk_frontier() {
    let kernel = MockKernel::new();
    let userland = userland(&kernel);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let record = seen.clone();
    install_program(&kernel, &userland, move |userland| {
        let mut results = Vec::new();
        results.push(syscall(userland, Syscall::Sbrk, [16, 0, 0, 0]));
        results.push(syscall(userland, Syscall::Sbrk, [0, 0, 0, 0]));
        results.push(syscall(userland, Syscall::Sbrk, [32, 0, 0, 0]));
        results.push(syscall(userland, Syscall::Sbrk, [100, 0, 0, 0]));
        results.push(syscall(userland, Syscall::Sbrk, [0, 0, 0, 0]));
        results.push(syscall(userland, Syscall::Sbrk, [(-1isize) as usize, 0, 0, 0]));
        *record.lock() = results;

        syscall(userland, Syscall::Exit, [0, 0, 0, 0]);
    });

    let process = userland.create_process("heap").unwrap();
    loader::load(&userland, &process, ImageSource::Path(HELLO)).unwrap();
    let allocations_before = kernel.aspaces.allocation_count();
    assert_eq!(loader::start_binary(&process, true), Ok(Some(0)));

    let results = seen.lock().clone();
    let base = results[0];
    assert!(base > 0);
    assert_eq!(results[1], base + 16);
    assert_eq!(results[2], base + 16);
    assert_eq!(results[3], base + 48);
    assert_eq!(results[4], base + 148);
    assert_eq!(results[5], UserError::InvalidArgs.code() as i64);

    // one stack and one heap chunk
    assert_eq!(kernel.aspaces.allocation_count() - allocations_before, 2);

    drop(process);
    userland.runtime().shutdown().unwrap();
}

#[test]
fn test_shell_lkuser_test() {
    let kernel = MockKernel::new();
    let userland = userland(&kernel);
    install_program(&kernel, &userland, hello);
    let shell = Shell::new(userland.clone());

    let result = shell.execute_line("lkuser test");
    match result {
        CommandResult::Success(Some(msg)) => assert!(msg.ends_with("exited with 7"), "{}", msg),
        other => panic!("unexpected result {:?}", other),
    }
    assert!(shell.pending_process().is_none());
    assert_eq!(kernel.fs.mounts().len(), 1);

    userland.runtime().shutdown().unwrap();
    assert_eq!(userland.runtime().reaped(), 1);
}

#[test]
fn test_shell_background_run_from_block_device() {
    let kernel = MockKernel::new();
    let userland = userland(&kernel);
    install_program(&kernel, &userland, hello);
    kernel.blocks.add_device("virtio0", &image(ENTRY, b"\x73\x00\x00\x00", 0));
    let shell = Shell::new(userland.clone());

    assert!(!shell.execute_line("lkuser load -b virtio0").is_error());
    let process = shell.pending_process().unwrap();
    assert!(!shell.execute_line("lkuser run &").is_error());

    assert_eq!(process.wait(), Ok(7));
    assert_eq!(kernel.blocks.open_count(), 0);

    drop(process);
    wait_until("the reaper", || userland.runtime().reaped() == 1);
    userland.runtime().shutdown().unwrap();
}

#[test]
fn test_failed_run_hands_process_to_reaper() {
    let kernel = MockKernel::new();
    let userland = userland(&kernel);
    let shell = Shell::new(userland.clone());

    assert!(shell.execute_line("lkuser load /missing").is_error());
    let process = shell.pending_process().unwrap();

    assert_eq!(
        shell.execute_line("lkuser run"),
        CommandResult::error(format!("start returns {}", UserError::NotReady))
    );
    assert!(shell.pending_process().is_none());
    assert_eq!(process.wait(), Ok(UserError::NotReady.code()));

    drop(process);
    wait_until("the reaper", || userland.runtime().reaped() == 1);
    userland.runtime().shutdown().unwrap();
    assert_eq!(kernel.aspaces.live_spaces(), 0);
}

#[test]
fn test_sibling_exit_during_reap_never_returns() {
    const SIBLING: usize = 0x20000;
    let kernel = MockKernel::new();
    let userland = userland(&kernel);
    let sibling_running = Arc::new(AtomicBool::new(false));
    let returned = Arc::new(AtomicBool::new(false));

    let running = sibling_running.clone();
    install_program(&kernel, &userland, move |userland| {
        wait_until("the sibling", || running.load(Ordering::SeqCst));
        syscall(userland, Syscall::Exit, [1, 0, 0, 0]);
    });

    let weak: Weak<Userland> = Arc::downgrade(&userland);
    let (running, after_exit) = (sibling_running.clone(), returned.clone());
    kernel.user.register(VirtAddr::new(SIBLING), move |_stack_top| {
        let Some(userland) = weak.upgrade() else {
            return;
        };
        running.store(true, Ordering::SeqCst);
        // the reaper has unlinked the process and is joining this thread
        wait_until("the unlink", || userland.runtime().registry().count() == 0);
        syscall(&userland, Syscall::Exit, [5, 0, 0, 0]);
        after_exit.store(true, Ordering::SeqCst);
    });

    let process = userland.create_process("siblings").unwrap();
    loader::load(&userland, &process, ImageSource::Path(HELLO)).unwrap();
    let space = process.address_space();
    assert_eq!(loader::start_binary(&process, false), Ok(None));
    let sibling = process.create_thread(VirtAddr::new(SIBLING)).unwrap();
    sibling.resume().unwrap();

    assert_eq!(process.wait(), Ok(1));
    wait_until("the reaper", || userland.runtime().reaped() == 1);

    assert!(!returned.load(Ordering::SeqCst));
    assert!(sibling.state().is_terminated());
    assert_eq!(process.exit_code(), Some(1));
    assert!(!kernel.aspaces.exists(space));

    drop(sibling);
    drop(process);
    userland.runtime().shutdown().unwrap();
    assert_eq!(kernel.scheduler.live_contexts(), 0);
}
