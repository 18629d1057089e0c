//! Containment for panics raised inside model code.

use anyhow::{anyhow, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Run `f`, turning a panic into an error naming `what`.
///
/// Only for closures over state owned by the calling thread; that state is
/// reused after the panic.
pub(crate) fn catch_panic<T>(what: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("{} panicked: {}", what, panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
