use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receives coarse progress milestones. Implementations may ignore either
/// field; percentages are monotonic over a run.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, percent: u8, message: &str);
}

/// Sink that drops everything.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn on_progress(&self, _percent: u8, _message: &str) {}
}

impl<F> ProgressSink for F
where
    F: Fn(u8, &str) + Send + Sync,
{
    fn on_progress(&self, percent: u8, message: &str) {
        self(percent, message)
    }
}

/// Cooperative cancellation flag. Clones share the flag; workers check it
/// at least once per row and the run ends with `Cancelled` without
/// writing output.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn cancel_token_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn closures_are_sinks() {
        let seen: Mutex<Vec<(u8, String)>> = Mutex::new(Vec::new());
        let sink = |pct: u8, msg: &str| {
            seen.lock().unwrap().push((pct, msg.to_string()));
        };
        sink.on_progress(5, "template loaded");
        sink.on_progress(100, "saved");
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, 5);
        assert_eq!(seen[1].1, "saved");
    }
}
