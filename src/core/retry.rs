use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use linkgrab_core::models::media::MediaKind;
use tokio_util::sync::CancellationToken;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryLink {
    pub url: String,
    pub kind: MediaKind,
    created_at: Instant,
}

/// Short ids standing in for (URL, kind) behind a resubmit control.
#[derive(Clone)]
pub struct RetryLinks {
    inner: Arc<Mutex<HashMap<String, RetryLink>>>,
    ttl: Duration,
}

impl RetryLinks {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RetryLink>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn store(&self, url: &str, kind: MediaKind) -> String {
        let mut links = self.lock();
        let id = loop {
            let candidate: String = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
            if !links.contains_key(&candidate) {
                break candidate;
            }
        };
        links.insert(
            id.clone(),
            RetryLink {
                url: url.to_string(),
                kind,
                created_at: Instant::now(),
            },
        );
        id
    }

    /// Removes and returns the link; a link is usable once.
    pub fn take(&self, id: &str) -> Option<RetryLink> {
        let mut links = self.lock();
        let link = links.remove(id)?;
        if link.created_at.elapsed() > self.ttl {
            return None;
        }
        Some(link)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sweep(&self) -> usize {
        let ttl = self.ttl;
        let mut links = self.lock();
        let before = links.len();
        links.retain(|_, link| link.created_at.elapsed() <= ttl);
        before - links.len()
    }

    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let links = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
                    _ = cancel.cancelled() => break,
                }
                let removed = links.sweep();
                if removed > 0 {
                    tracing::debug!("[retry] swept {} expired retry links", removed);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_take_once() {
        let links = RetryLinks::new(Duration::from_secs(3600));
        let id = links.store("https://youtu.be/abc", MediaKind::Audio);
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));

        let link = links.take(&id).unwrap();
        assert_eq!(link.url, "https://youtu.be/abc");
        assert_eq!(link.kind, MediaKind::Audio);
        assert!(links.take(&id).is_none());
    }

    #[test]
    fn expired_links_are_dropped() {
        let links = RetryLinks::new(Duration::ZERO);
        let id = links.store("https://youtu.be/abc", MediaKind::Video);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(links.sweep(), 1);
        assert!(links.is_empty());
        assert!(links.take(&id).is_none());
    }

    #[test]
    fn unknown_id_misses() {
        let links = RetryLinks::new(Duration::from_secs(60));
        assert!(links.take("deadbeef").is_none());
    }
}
