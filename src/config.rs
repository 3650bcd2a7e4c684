//! Explicit, caller-constructed configuration, replacing the original
//! library's process-wide mutable `atsha_set_verbose`/`atsha_set_log_callback`
//! globals (see REDESIGN FLAGS).

use std::sync::Arc;

/// Attached to a [`Handle`](crate::handle::Handle) at open time.
#[derive(Clone, Default)]
pub struct Config {
    pub verbose: bool,
    /// Receives the same diagnostic lines as the `log` facade, for hosts
    /// that cannot or do not want to install a `log` backend.
    pub log_sink: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl Config {
    pub fn new(verbose: bool) -> Self {
        Config { verbose, log_sink: None }
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn Fn(&str) + Send + Sync>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Forwards a diagnostic line to both the `log` facade and, if present,
    /// the caller-registered sink. Only emitted at all when `verbose` is set
    /// or the message is a warning-level condition the caller should always see.
    pub fn log(&self, message: &str) {
        log::debug!("{message}");
        if self.verbose {
            if let Some(sink) = &self.log_sink {
                sink(message);
            }
        }
    }

    pub fn warn(&self, message: &str) {
        log::warn!("{message}");
        if let Some(sink) = &self.log_sink {
            sink(message);
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("verbose", &self.verbose)
            .field("log_sink", &self.log_sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn warn_reaches_registered_sink() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink_captured = captured.clone();
        let config = Config::new(false).with_log_sink(Arc::new(move |msg: &str| {
            sink_captured.lock().unwrap().push(msg.to_string());
        }));
        config.warn("idle not confirmed");
        assert_eq!(captured.lock().unwrap().as_slice(), ["idle not confirmed"]);
    }
}
