//! Scoped release of resources owned by one discovery or run invocation.
//!
//! The coordinator registers everything it acquires with a
//! [`DisposalTracker`] and calls [`dispose_all`](DisposalTracker::dispose_all)
//! on every exit path. Release failures are logged and swallowed so one
//! failing resource never prevents the others from being released.

use tracing::warn;

use crate::framework::AsyncDispose;

/// Owns resources until they are released in reverse order of registration.
#[derive(Default)]
pub struct DisposalTracker {
    items: Vec<Box<dyn AsyncDispose>>,
}

impl DisposalTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<D: AsyncDispose + 'static>(&mut self, item: D) {
        self.items.push(Box::new(item));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Releases every tracked resource, newest first.
    ///
    /// Returns the number of resources whose release failed.
    pub async fn dispose_all(&mut self) -> usize {
        let mut failures = 0;
        while let Some(item) = self.items.pop() {
            if let Err(e) = item.dispose().await {
                warn!("Failed to dispose resource: {:#}", e);
                failures += 1;
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl AsyncDispose for Recorder {
        async fn dispose(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(self.name);
            if self.fail {
                anyhow::bail!("{} refused", self.name);
            }
            Ok(())
        }
    }

    #[test]
    fn test_dispose_all_releases_in_reverse_order_despite_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tracker = DisposalTracker::new();
        for (name, fail) in [("first", false), ("second", true), ("third", false)] {
            tracker.add(Recorder {
                name,
                log: log.clone(),
                fail,
            });
        }

        let failures = tokio_test::block_on(tracker.dispose_all());

        assert_eq!(failures, 1);
        assert!(tracker.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["third", "second", "first"]);
    }
}
