//! Trap entry points.
//!
//! The architecture exception code saves a frame and calls one of the C
//! entry points below. They reach the environment installed with
//! [`install`].

use alloc::sync::Arc;
use spin::Once;

use crate::userland::Userland;
use crate::{UserError, UserResult};

static USERLAND: Once<Arc<Userland>> = Once::new();

/// Make `userland` the target of trap entry. Only one may be installed.
pub fn install(userland: Arc<Userland>) -> UserResult<()> {
    let mut fresh = false;
    USERLAND.call_once(|| {
        fresh = true;
        userland
    });
    if fresh {
        log::info!("lkuser syscall entry installed");
        Ok(())
    } else {
        Err(UserError::AlreadyExists)
    }
}

/// The installed environment, if any
pub fn installed() -> Option<&'static Arc<Userland>> {
    USERLAND.get()
}

#[cfg_attr(not(any(feature = "arm", feature = "riscv")), allow(dead_code))]
fn dispatch(frame: &mut dyn helix_hal::trap::TrapFrame) {
    match installed() {
        Some(userland) => super::handle_trap(userland, frame),
        None => {
            log::error!("syscall {} with no userland installed", frame.syscall_number());
            frame.set_return(super::encode_result(Err(UserError::NotReady)));
            frame.advance();
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "arm")] {
        use helix_hal::arch::ArmFaultFrame;

        /// ARM syscall exception entry
        ///
        /// # Safety
        ///
        /// `frame` must point to the frame saved by the exception vector.
        #[no_mangle]
        pub unsafe extern "C" fn arm_syscall_handler(frame: *mut ArmFaultFrame) {
            // SAFETY: guaranteed by the exception vector
            if let Some(frame) = unsafe { frame.as_mut() } {
                dispatch(frame);
            }
        }
    } else if #[cfg(feature = "riscv")] {
        use helix_hal::arch::RiscvShortFrame;

        /// RISC-V `ecall` entry
        ///
        /// # Safety
        ///
        /// `frame` must point to the frame saved by the trap vector.
        #[no_mangle]
        pub unsafe extern "C" fn riscv_syscall_handler(frame: *mut RiscvShortFrame) {
            // SAFETY: guaranteed by the trap vector
            if let Some(frame) = unsafe { frame.as_mut() } {
                dispatch(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helix_hal::arch::RiscvShortFrame;

    #[test]
    fn test_dispatch_before_install() {
        // nothing in this test binary installs a userland
        let mut frame = RiscvShortFrame::for_syscall(4, [0, 0, 1, 0]);
        dispatch(&mut frame);
        assert_eq!(frame.return_value() as i64, UserError::NotReady.code() as i64);
        assert_eq!(frame.epc, 4);
    }
}
