//! Status reporting and cooperative cancellation.
//!
//! A [`StatusSink`] is owned by whoever starts a flash session and handed to the pipeline at
//! construction; nothing here is process-global, so several sessions can run side by side.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};

use uniflash_error::FlashError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub text: String,
    pub severity: Severity,
}

/// Receives every message reported to the sink it is attached to.
pub trait StatusObserver: Send + Sync {
    fn on_message(&self, message: &StatusMessage);
}

/// Forwards messages over a channel, typically to a UI thread.
#[derive(Debug)]
pub struct ChannelObserver {
    tx: SyncSender<StatusMessage>,
}

impl ChannelObserver {
    pub fn new(tx: SyncSender<StatusMessage>) -> Self {
        Self { tx }
    }
}

impl StatusObserver for ChannelObserver {
    fn on_message(&self, message: &StatusMessage) {
        // A hung-up receiver only means nobody is listening anymore.
        let _ = self.tx.send(message.clone());
    }
}

/// Shared cancellation flag. Setting it is the only thing an outside actor may do to a running
/// session.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous request so the token can guard another session.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Single point for status, warnings and fatal errors, plus the poll-able cancel flag.
pub struct StatusSink {
    observers: Mutex<Vec<Arc<dyn StatusObserver>>>,
    cancel: CancelToken,
}

impl Default for StatusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StatusSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusSink")
            .field("observers", &self.observer_count())
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl StatusSink {
    pub fn new() -> Self {
        Self::with_cancel_token(CancelToken::new())
    }

    pub fn with_cancel_token(cancel: CancelToken) -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
            cancel,
        }
    }

    pub fn attach(&self, observer: Arc<dyn StatusObserver>) {
        match self.observers.lock() {
            Ok(mut observers) => observers.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    pub fn observer_count(&self) -> usize {
        match self.observers.lock() {
            Ok(observers) => observers.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Log `text` and deliver it to every attached observer.
    pub fn report(&self, text: impl Into<String>, severity: Severity) {
        let message = StatusMessage {
            text: text.into(),
            severity,
        };
        match severity {
            Severity::Info => log::info!("{}", message.text),
            Severity::Warning => log::warn!("{}", message.text),
            Severity::Fatal => log::error!("{}", message.text),
        }

        // Snapshot so observers may call back into the sink (e.g. to cancel).
        let observers = match self.observers.lock() {
            Ok(observers) => observers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for observer in observers {
            observer.on_message(&message);
        }
    }

    pub fn info(&self, text: impl Into<String>) {
        self.report(text, Severity::Info);
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.report(text, Severity::Warning);
    }

    /// Report `err` as fatal and hand it back for propagation.
    pub fn fatal(&self, err: FlashError) -> FlashError {
        self.report(err.to_string(), Severity::Fatal);
        err
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[derive(Default)]
    struct Collect(Mutex<Vec<StatusMessage>>);

    impl StatusObserver for Collect {
        fn on_message(&self, message: &StatusMessage) {
            self.0.lock().unwrap().push(message.clone());
        }
    }

    #[test]
    fn every_observer_receives_every_message() {
        let sink = StatusSink::new();
        let a = Arc::new(Collect::default());
        let b = Arc::new(Collect::default());
        sink.attach(a.clone());
        sink.attach(b.clone());

        sink.info("Mounting source");
        sink.warning("UEFI:NTFS support not installed");

        for observer in [&a, &b] {
            let seen = observer.0.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[1].severity, Severity::Warning);
        }
    }

    #[test]
    fn fatal_reports_and_returns_the_error() {
        let sink = StatusSink::new();
        let collect = Arc::new(Collect::default());
        sink.attach(collect.clone());

        let err = sink.fatal(FlashError::InvalidInput("bad target".into()));

        assert!(matches!(err, FlashError::InvalidInput(_)));
        let seen = collect.0.lock().unwrap();
        assert_eq!(seen[0].severity, Severity::Fatal);
        assert!(seen[0].text.contains("bad target"));
    }

    #[test]
    fn channel_observer_forwards_and_tolerates_hangup() {
        let (tx, rx) = mpsc::sync_channel(4);
        let sink = StatusSink::new();
        sink.attach(Arc::new(ChannelObserver::new(tx)));

        sink.info("hello");
        assert_eq!(rx.recv().unwrap().text, "hello");

        drop(rx);
        sink.info("nobody listening");
    }

    #[test]
    fn observers_can_cancel_through_the_sink_token() {
        struct CancelOn(CancelToken);
        impl StatusObserver for CancelOn {
            fn on_message(&self, message: &StatusMessage) {
                if message.text == "stop" {
                    self.0.cancel();
                }
            }
        }

        let sink = StatusSink::new();
        sink.attach(Arc::new(CancelOn(sink.cancel_token())));
        assert!(!sink.cancel_requested());

        sink.info("stop");

        assert!(sink.cancel_requested());
        sink.cancel_token().reset();
        assert!(!sink.cancel_requested());
    }
}
