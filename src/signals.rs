//! Termination signals caught by the CLI and forwarded to the sandboxed
//! command, so the session is still released when the user hits Ctrl-C.
//!
//! Spawned commands lead their own process group, so a terminal's SIGINT
//! only reaches this process. The handler records the signal; the
//! supervising loop passes it on to the child and keeps waiting.

use std::ffi::c_int;
use std::io;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use tracing::{debug, info};

use crate::process::SandboxProcess;

/// Signals that would otherwise kill the process before the session drops.
pub const FORWARDED: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP];

const POLL: Duration = Duration::from_millis(50);

static PENDING: AtomicI32 = AtomicI32::new(0);

extern "C" fn record(signal: c_int) {
    PENDING.store(signal, Ordering::SeqCst);
}

/// Process-wide handler for [`FORWARDED`] signals.
///
/// Installing it replaces the default disposition; the process no longer
/// dies on SIGINT/SIGTERM/SIGHUP and must act on [`SignalForwarder::take`].
#[derive(Debug)]
pub struct SignalForwarder(());

impl SignalForwarder {
    pub fn install() -> io::Result<Self> {
        let action = SigAction::new(
            SigHandler::Handler(record),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        for signal in FORWARDED {
            // SAFETY: the handler only stores into an atomic, which is
            // async-signal-safe.
            unsafe { sigaction(signal, &action) }.map_err(io::Error::from)?;
        }
        Ok(Self(()))
    }

    /// The most recent signal received since the last call, if any.
    pub fn take(&self) -> Option<Signal> {
        match PENDING.swap(0, Ordering::SeqCst) {
            0 => None,
            raw => Signal::try_from(raw).ok(),
        }
    }

    /// Wait for `process` to exit, forwarding every caught signal to its
    /// process group in the meantime.
    pub fn supervise(&self, process: &mut SandboxProcess) -> io::Result<ExitStatus> {
        loop {
            if let Some(signal) = self.take() {
                info!(%signal, label = process.label(), "forwarding signal");
                if let Err(error) = process.signal(signal) {
                    debug!(%signal, %error, "signal not delivered, process likely gone");
                }
            }
            if let Some(status) = process.wait_timeout(POLL)? {
                return Ok(status);
            }
        }
    }
}
