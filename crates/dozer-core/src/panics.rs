//! Backtraces for command bodies that panic.
//!
//! The join handle only hands back the panic payload, so the stack is taken
//! in a panic hook while the panicking task is still on the stack. The hook
//! only records panics raised inside [`traced`]; every other panic goes to
//! the previously installed hook.

use std::{
    backtrace::Backtrace,
    future::Future,
    panic,
    sync::{Arc, Mutex, Once},
};

tokio::task_local! {
    static SLOT: PanicTrace;
}

static HOOK: Once = Once::new();

/// Filled with the location and backtrace of a panic in the traced future.
#[derive(Clone, Default)]
pub struct PanicTrace(Arc<Mutex<Option<String>>>);

impl PanicTrace {
    pub fn take(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn record(&self, trace: String) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = Some(trace);
    }
}

/// A command body that panicked.
#[derive(Debug, thiserror::Error)]
#[error("command panicked: {message}")]
pub struct CommandPanic {
    pub message: String,
    /// Location and stack of the panic, when the hook saw it.
    pub backtrace: Option<String>,
}

/// Run `fut` with panics recorded into `trace`.
pub fn traced<F: Future>(trace: PanicTrace, fut: F) -> impl Future<Output = F::Output> {
    install_hook();
    SLOT.scope(trace, fut)
}

fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let recorded = SLOT.try_with(|slot| {
                let location = info
                    .location()
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| "unknown location".to_string());
                slot.record(format!(
                    "panicked at {location}\n{}",
                    Backtrace::force_capture()
                ));
            });
            if recorded.is_err() {
                previous(info);
            }
        }));
    });
}
