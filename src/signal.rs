//! Deferred reload requests
//!
//! A SIGHUP only sets a flag. The cycle controller consumes it at the top
//! of the next cycle and rebuilds its settings there; nothing is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::{TierError, TierResult};

/// Shared "reload requested" flag
#[derive(Debug, Clone, Default)]
pub struct ReloadFlag(Arc<AtomicBool>);

impl ReloadFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Clear the flag, returning whether it was set
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::Relaxed)
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

static SIGHUP_FLAG: OnceLock<ReloadFlag> = OnceLock::new();

extern "C" fn on_sighup(_: libc::c_int) {
    if let Some(flag) = SIGHUP_FLAG.get() {
        flag.request();
    }
}

/// Route SIGHUP to `flag`. Only the first installed flag receives signals.
pub fn install_sighup(flag: &ReloadFlag) -> TierResult<()> {
    if SIGHUP_FLAG.set(flag.clone()).is_err() {
        return Err(TierError::Config("SIGHUP handler already installed".into()));
    }

    let handler = on_sighup as extern "C" fn(libc::c_int);
    // SAFETY: the handler only performs a relaxed atomic store
    let previous = unsafe { libc::signal(libc::SIGHUP, handler as libc::sighandler_t) };
    if previous == libc::SIG_ERR {
        return Err(TierError::Io(std::io::Error::last_os_error()));
    }
    log::debug!("[Cycle] SIGHUP triggers config reload");
    Ok(())
}
