use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::ResourceCache;

/// Background task that purges expired cache entries on an interval.
///
/// Must be started inside a tokio runtime. Dropping the janitor without
/// calling [`stop`](CacheJanitor::stop) also ends the task.
#[derive(Debug)]
pub struct CacheJanitor {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<usize>,
}

impl CacheJanitor {
    pub fn start(cache: Arc<ResourceCache>, every: Duration) -> Self {
        let (shutdown, mut rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            let mut purged = 0;
            loop {
                tokio::select! {
                    _ = &mut rx => break,
                    _ = ticker.tick() => {
                        let n = cache.purge_expired();
                        if n > 0 {
                            log::debug!("janitor purged {n} expired cache entries");
                        }
                        purged += n;
                    }
                }
            }
            purged
        });
        log::debug!("cache janitor started, interval {every:?}");
        Self { shutdown, handle }
    }

    /// Stop the task and wait for it. Returns how many entries it purged.
    pub async fn stop(self) -> usize {
        let _ = self.shutdown.send(());
        match self.handle.await {
            Ok(purged) => {
                log::debug!("cache janitor stopped after purging {purged} entries");
                purged
            }
            Err(e) => {
                log::warn!("cache janitor task failed: {e}");
                0
            }
        }
    }
}
