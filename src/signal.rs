//! Unix signal handling (SIGINT).
//!
//! The first SIGINT reaches child processes too, which ought to fail their
//! builds.  We only note it; the worker checks the flag between steps and
//! stops cleanly, which still lets us write out pending debug traces.  The
//! handler restores the default action, so a second SIGINT kills us outright.

use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

fn sigint_action(handler: libc::sighandler_t) {
    // Safety: registering a signal handler is libc unsafe code.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handler;
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
    }
}

extern "C" fn sigint_handler(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
    sigint_action(libc::SIG_DFL);
}

pub fn register_sigint() {
    sigint_action(sigint_handler as libc::sighandler_t);
}

/// Whether a SIGINT arrived since startup.
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}
