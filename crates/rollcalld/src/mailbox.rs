//! Single-slot hand-off between the live recognition loop and the polling
//! endpoint.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Capacity-1 mailbox.
///
/// A publish against a full slot waits until the pending value is polled:
/// recognition backpressures the frame loop instead of dropping or
/// overwriting names, which couples frame latency to poll frequency.
pub struct Mailbox {
    tx: mpsc::Sender<String>,
    rx: Mutex<mpsc::Receiver<String>>,
}

impl Mailbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self { tx, rx: Mutex::new(rx) }
    }

    /// Block the calling thread until the slot is free, then deposit `name`.
    /// Callable only from plain threads, not async tasks.
    pub fn publish_blocking(&self, name: String) {
        if self.tx.blocking_send(name).is_err() {
            // Receiver half only drops at process teardown.
            tracing::debug!("mailbox closed; dropping recognized name");
        }
    }

    /// Drain the slot. `None` is the nothing-recognized-yet outcome.
    pub fn poll(&self) -> Option<String> {
        self.rx.lock().try_recv().ok()
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_poll_empty() {
        let mailbox = Mailbox::new();
        assert_eq!(mailbox.poll(), None);
    }

    #[test]
    fn test_publish_then_poll_drains() {
        let mailbox = Mailbox::new();
        mailbox.publish_blocking("ana".into());
        assert_eq!(mailbox.poll().as_deref(), Some("ana"));
        assert_eq!(mailbox.poll(), None);
    }

    #[test]
    fn test_second_publish_waits_for_drain() {
        let mailbox = Arc::new(Mailbox::new());
        mailbox.publish_blocking("ana".into());

        let delivered = Arc::new(AtomicBool::new(false));
        let publisher = {
            let mailbox = Arc::clone(&mailbox);
            let delivered = Arc::clone(&delivered);
            std::thread::spawn(move || {
                mailbox.publish_blocking("bruno".into());
                delivered.store(true, Ordering::SeqCst);
            })
        };

        // The slot is full, so the second publish must still be parked.
        std::thread::sleep(Duration::from_millis(100));
        assert!(!delivered.load(Ordering::SeqCst));

        // Draining the first value releases the publisher.
        assert_eq!(mailbox.poll().as_deref(), Some("ana"));
        publisher.join().unwrap();
        assert!(delivered.load(Ordering::SeqCst));
        assert_eq!(mailbox.poll().as_deref(), Some("bruno"));
    }
}
