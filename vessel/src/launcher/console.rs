use std::fmt;
use std::sync::Arc;

/// Receives console lines produced by worker processes.
///
/// A single sink may be shared by several concurrent launches, so
/// implementations must tolerate concurrent calls. Lines of one launch are
/// always delivered in the order the worker wrote them.
pub trait ConsoleSink: Send + Sync {
    fn line(&self, line: &str);
}

impl<F> ConsoleSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn line(&self, line: &str) {
        self(line)
    }
}

/// Forwards console lines to `tracing` at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingConsole;

impl ConsoleSink for TracingConsole {
    fn line(&self, line: &str) {
        tracing::info!(target: "vessel::console", "{line}");
    }
}

/// Discards console lines. The transcript is still captured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullConsole;

impl ConsoleSink for NullConsole {
    fn line(&self, _line: &str) {}
}

/// Renders each line as `[prefix] line` before handing it on.
#[derive(Clone)]
pub struct PrefixedConsole {
    prefix: String,
    inner: Arc<dyn ConsoleSink>,
}

impl PrefixedConsole {
    pub fn new(prefix: impl Into<String>, inner: Arc<dyn ConsoleSink>) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl fmt::Debug for PrefixedConsole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefixedConsole")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ConsoleSink for PrefixedConsole {
    fn line(&self, line: &str) {
        self.inner.line(&format!("[{}] {}", self.prefix, line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_prefixed_console_wraps_lines() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |line: &str| seen.lock().push(line.to_string())
        };
        let console = PrefixedConsole::new("job_a", Arc::new(sink));

        console.line("job start");
        console.line("done");

        assert_eq!(
            *seen.lock(),
            vec!["[job_a] job start".to_string(), "[job_a] done".to_string()]
        );
    }
}
