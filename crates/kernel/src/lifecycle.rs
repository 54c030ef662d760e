use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::AuthzError;

/// Admission control for the request path.
#[derive(Default)]
pub struct RequestGate {
    closed: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Held for the lifetime of one admitted request.
pub struct InFlight {
    gate: Arc<RequestGate>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.gate.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.gate.idle.notify_waiters();
        }
    }
}

impl RequestGate {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enter(self: &Arc<Self>) -> Result<InFlight, AuthzError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight { gate: self.clone() };
        if self.closed.load(Ordering::SeqCst) {
            return Err(AuthzError::ShuttingDown);
        }
        Ok(guard)
    }

    pub fn stop_accepting_requests(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Waits for admitted requests to finish. Returns `false` on timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

type ShutdownHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Ordered shutdown hooks, run at most once. Each hook gets the grace period;
/// one that overruns is abandoned and the next one starts.
pub struct ShutdownManager {
    grace: Duration,
    hooks: Mutex<Vec<(String, ShutdownHook)>>,
    started: AtomicBool,
}

impl ShutdownManager {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            hooks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    pub fn shared(grace: Duration) -> Arc<Self> {
        Arc::new(Self::new(grace))
    }

    pub fn register<F, Fut>(&self, name: &str, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: ShutdownHook = Box::new(move || hook().boxed());
        self.hooks.lock().push((name.to_string(), hook));
    }

    pub fn is_shutting_down(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Runs the hooks in registration order. Returns `false` when shutdown
    /// had already been started.
    pub async fn shutdown(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        let hooks = std::mem::take(&mut *self.hooks.lock());
        info!(hooks = hooks.len(), "shutdown started");
        for (name, hook) in hooks {
            match tokio::time::timeout(self.grace, hook()).await {
                Ok(()) => info!(hook = %name, "shutdown hook finished"),
                Err(_) => warn!(hook = %name, grace = ?self.grace, "shutdown hook timed out"),
            }
        }
        info!("shutdown complete");
        true
    }
}
