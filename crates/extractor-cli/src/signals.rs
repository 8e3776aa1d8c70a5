//! Forwards termination signals to the run's cancellation token.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use etcd_extractor::{Cancellation, Telemetry};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use tracing::{info, warn};

use crate::AppError;

const SIGNALS_TARGET: &str = "etcd_extractor::cli::signals";

/// Cancels a token when SIGINT or SIGTERM arrives.
///
/// Dropping the guard stops the listener thread.
pub(crate) struct SignalGuard {
    handle: Handle,
    listener: Option<JoinHandle<()>>,
}

impl SignalGuard {
    pub(crate) fn install(cancel: &Cancellation, telemetry: &Telemetry) -> Result<Self, AppError> {
        let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(signal_error)?;
        let handle = signals.handle();
        let cancel = cancel.clone();
        let telemetry = telemetry.clone();
        let listener = thread::Builder::new()
            .name(String::from("signal-listener"))
            .spawn(move || {
                telemetry.in_scope(|| {
                    for signal in signals.forever() {
                        info!(target: SIGNALS_TARGET, signal, "signal received; cancelling");
                        cancel.cancel();
                    }
                });
            })
            .map_err(signal_error)?;
        Ok(Self {
            handle,
            listener: Some(listener),
        })
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(listener) = self.listener.take()
            && listener.join().is_err()
        {
            warn!(target: SIGNALS_TARGET, "signal listener panicked");
        }
    }
}

fn signal_error(error: io::Error) -> AppError {
    AppError::Signals(Arc::new(error))
}
