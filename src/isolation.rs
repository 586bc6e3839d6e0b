//! Failure barrier used at every callback boundary.
//!
//! Scheduled tasks, animation callbacks, event handlers and resource disposal
//! all run foreign code. A failing callback (returned error or panic) is logged
//! and reported, and the caller moves on to the next one.

use log::{error, warn};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Runs `f`, containing both `Err` returns and panics. Returns `true` on success.
pub(crate) fn isolate<F>(context: &str, f: F) -> bool
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("⚠️ {} failed: {:#}", context, e);
            false
        }
        Err(payload) => {
            error!("💥 {} panicked: {}", context, panic_message(&payload));
            false
        }
    }
}

/// Same barrier for callbacks that cannot fail except by panicking.
pub(crate) fn isolate_unit<F>(context: &str, f: F) -> bool
where
    F: FnOnce(),
{
    isolate(context, || {
        f();
        Ok(())
    })
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
