use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use control_plane::{ChangeNotice, LocalCache, RefreshOutcome, ReplicationError, ReplicationSource};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone, Debug)]
pub struct RefresherConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub alert_after_failures: u32,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(2),
            alert_after_failures: 3,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Trigger {
    Interval,
    Signal,
    Notice,
}

/// Keeps a [`LocalCache`] in step with its replication source.
///
/// Refreshes run on a fixed interval, on [`CacheRefresher::signal_invalidation`]
/// and whenever the source pushes a [`ChangeNotice`]. A signalled or pushed
/// refresh restarts the interval, so the next periodic pull is one full
/// interval later. Failures keep the last good snapshot installed.
pub struct CacheRefresher {
    cache: Arc<LocalCache>,
    source: Arc<dyn ReplicationSource>,
    config: RefresherConfig,
    invalidate: Notify,
    failures: AtomicU32,
    stop: watch::Sender<bool>,
}

impl CacheRefresher {
    pub fn new(
        cache: Arc<LocalCache>,
        source: Arc<dyn ReplicationSource>,
        config: RefresherConfig,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            cache,
            source,
            config,
            invalidate: Notify::new(),
            failures: AtomicU32::new(0),
            stop,
        }
    }

    pub fn shared(
        cache: Arc<LocalCache>,
        source: Arc<dyn ReplicationSource>,
        config: RefresherConfig,
    ) -> Arc<Self> {
        Arc::new(Self::new(cache, source, config))
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// One refresh bounded by the configured timeout.
    pub async fn refresh_once(&self) -> Result<RefreshOutcome, ReplicationError> {
        let result = match tokio::time::timeout(
            self.config.timeout,
            self.cache.refresh(self.source.as_ref()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ReplicationError::Timeout),
        };
        match &result {
            Ok(_) => self.failures.store(0, Ordering::SeqCst),
            Err(err) => {
                let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(error = %err, failures, "cache refresh failed");
                if failures == self.config.alert_after_failures {
                    error!(
                        failures,
                        version = ?self.cache.version(),
                        "replication failing repeatedly, serving last installed snapshot"
                    );
                }
            }
        }
        result
    }

    /// Retries until the cache holds a snapshot. `attempts == 0` retries
    /// forever.
    pub async fn prime(
        &self,
        attempts: u32,
        backoff: Duration,
    ) -> Result<RefreshOutcome, ReplicationError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.refresh_once().await {
                Ok(outcome) => {
                    info!(?outcome, attempt, "cache primed");
                    return Ok(outcome);
                }
                Err(err) if attempts != 0 && attempt >= attempts => return Err(err),
                Err(_) => tokio::time::sleep(backoff).await,
            }
        }
    }

    /// Requests an immediate refresh from the running loop. A signal sent
    /// before the loop starts is kept until it does.
    pub fn signal_invalidation(&self) {
        self.invalidate.notify_one();
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub async fn run(self: Arc<Self>) {
        let mut stop = self.stop.subscribe();
        if *stop.borrow_and_update() {
            return;
        }
        let mut changes = self.source.subscribe();
        let mut ticker = tokio::time::interval(self.config.interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.reset();

        info!(interval = ?self.config.interval, push = changes.is_some(), "cache refresher started");
        loop {
            let trigger = tokio::select! {
                _ = stop.changed() => break,
                _ = ticker.tick() => Trigger::Interval,
                _ = self.invalidate.notified() => Trigger::Signal,
                notice = next_notice(&mut changes) => match notice {
                    Ok(notice) => {
                        debug!(?notice, "change notice received");
                        Trigger::Notice
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "change notices lagged");
                        Trigger::Notice
                    }
                    Err(RecvError::Closed) => {
                        debug!("change channel closed, polling only");
                        changes = None;
                        continue;
                    }
                },
            };
            if let Ok(outcome) = self.refresh_once().await {
                debug!(?trigger, ?outcome, "cache refresh");
            }
            if !matches!(trigger, Trigger::Interval) {
                ticker.reset();
            }
        }
        info!("cache refresher stopped");
    }
}

async fn next_notice(
    changes: &mut Option<broadcast::Receiver<ChangeNotice>>,
) -> Result<ChangeNotice, RecvError> {
    match changes {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
