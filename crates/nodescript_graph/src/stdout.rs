// SPDX-License-Identifier: MIT OR Apache-2.0
//! Engine stdout with scoped replacement.
//!
//! Node callables write through [`write`]. By default text goes to the
//! process stdout; while a [`StdoutGuard`] is alive it is captured instead,
//! and the previous sink is restored when the guard drops.

use parking_lot::Mutex;
use std::io::Write;

static SINK: Mutex<Option<String>> = parking_lot::const_mutex(None);

/// Write text to the current engine stdout
pub fn write(text: &str) {
    let mut sink = SINK.lock();
    match sink.as_mut() {
        Some(buffer) => buffer.push_str(text),
        None => {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = stdout.write_all(text.as_bytes()).and_then(|()| stdout.flush()) {
                tracing::warn!("Failed to write to stdout: {}", e);
            }
        }
    }
}

/// Install a capture buffer until the returned guard drops
pub fn redirect() -> StdoutGuard {
    let previous = SINK.lock().replace(String::new());
    StdoutGuard {
        previous: Some(previous),
    }
}

/// Restores the previous engine stdout when dropped
#[must_use = "stdout is restored as soon as the guard is dropped"]
pub struct StdoutGuard {
    previous: Option<Option<String>>,
}

impl StdoutGuard {
    /// Text captured so far
    pub fn captured(&self) -> String {
        SINK.lock().clone().unwrap_or_default()
    }

    /// Restore the previous sink and return everything captured
    pub fn finish(mut self) -> String {
        self.restore()
    }

    fn restore(&mut self) -> String {
        let Some(previous) = self.previous.take() else {
            return String::new();
        };
        let mut sink = SINK.lock();
        std::mem::replace(&mut *sink, previous).unwrap_or_default()
    }
}

impl Drop for StdoutGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

#[cfg(test)]
pub(crate) static TEST_LOCK: Mutex<()> = parking_lot::const_mutex(());
