//! Graceful shutdown: a process-wide flag polled by the consume loop

use std::sync::atomic::{AtomicBool, Ordering};

/// Global shutdown flag, set from the SIGTERM/SIGINT handler
pub fn shutdown_flag() -> &'static AtomicBool {
    static FLAG: AtomicBool = AtomicBool::new(false);
    &FLAG
}

/// Check whether the consumer should stop pulling records
pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

/// Ask the consume loop to stop after the current record.
///
/// Returns `true` if a shutdown had already been requested.
pub fn request_shutdown() -> bool {
    shutdown_flag().swap(true, Ordering::Relaxed)
}
