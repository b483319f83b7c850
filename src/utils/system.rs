//! System utility functions

use anyhow::{anyhow, Result};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Get current UTC timestamp in RFC3339 format
pub fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Short host name of this node, as used for `/etc/pve/nodes/<host>`.
pub fn local_hostname() -> Result<String> {
    let name = nix::unistd::gethostname()?;
    let name = name
        .into_string()
        .map_err(|raw| anyhow!("host name {:?} is not valid UTF-8", raw))?;
    Ok(name.split('.').next().unwrap_or_default().to_string())
}

/// Resolve a tool through PATH, falling back to the bare name.
pub fn resolve_tool(program: &str) -> PathBuf {
    if program.contains('/') {
        PathBuf::from(program)
    } else {
        which::which(program).unwrap_or_else(|_| PathBuf::from(program))
    }
}

/// Exit status of a process ended by SIGINT.
pub const INTERRUPT_EXIT_CODE: i32 = 130;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static EXIT_ON_INTERRUPT: AtomicBool = AtomicBool::new(false);

extern "C" fn on_interrupt(_: nix::libc::c_int) {
    if EXIT_ON_INTERRUPT.load(Ordering::SeqCst) {
        // SAFETY: _exit is async-signal-safe.
        unsafe { nix::libc::_exit(INTERRUPT_EXIT_CODE) };
    }
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// While held, SIGINT ends the process at once instead of tripping tokens.
///
/// Blocking terminal reads retry on `EINTR`, so a flag alone would leave an
/// operator stuck at a prompt until Enter is pressed.
#[derive(Debug)]
pub struct ExitOnInterrupt {
    previous: Option<bool>,
}

impl Drop for ExitOnInterrupt {
    fn drop(&mut self) {
        if let Some(previous) = self.previous {
            EXIT_ON_INTERRUPT.store(previous, Ordering::SeqCst);
        }
    }
}

/// Cooperative cancellation, tripped explicitly or by SIGINT once
/// [`CancellationToken::with_interrupt_handler`] has been called.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    watch_signal: bool,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the SIGINT handler and return a token observing it.
    pub fn with_interrupt_handler() -> Result<Self> {
        let action = SigAction::new(
            SigHandler::Handler(on_interrupt),
            SaFlags::empty(),
            SigSet::empty(),
        );
        // SAFETY: the handler only touches atomics and calls _exit.
        unsafe { sigaction(Signal::SIGINT, &action) }?;
        Ok(Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            watch_signal: true,
        })
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || (self.watch_signal && INTERRUPTED.load(Ordering::SeqCst))
    }

    /// Make SIGINT exit immediately until the guard is dropped. Only for
    /// waits during which nothing has been changed yet.
    pub fn exit_on_interrupt(&self) -> ExitOnInterrupt {
        let previous = self
            .watch_signal
            .then(|| EXIT_ON_INTERRUPT.swap(true, Ordering::SeqCst));
        ExitOnInterrupt { previous }
    }
}
