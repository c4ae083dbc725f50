use std::time::Duration;

use futures::future::{self, Either, LocalBoxFuture};

/// Clock, timers and task spawning. Everything in the engine runs on one
/// thread, so spawned futures don't need to be `Send`.
pub trait Platform {
    /// Milliseconds since some fixed point. Only differences are meaningful.
    fn now_ms(&self) -> f64;

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;

    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}

/// Run `fut`, giving up after `duration`. `None` means the watchdog fired.
pub async fn timeout<T>(
    platform: &dyn Platform,
    duration: Duration,
    fut: impl Future<Output = T>,
) -> Option<T> {
    let fut = std::pin::pin!(fut);
    match future::select(fut, platform.sleep(duration)).await {
        Either::Left((value, _)) => Some(value),
        Either::Right(((), _)) => None,
    }
}

/// Tokio-backed platform for native builds. Must be used inside a
/// `tokio::task::LocalSet`.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Clone, Debug)]
pub struct TokioPlatform {
    started: tokio::time::Instant,
}

#[cfg(not(target_arch = "wasm32"))]
impl Default for TokioPlatform {
    fn default() -> Self {
        Self {
            started: tokio::time::Instant::now(),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl TokioPlatform {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Platform for TokioPlatform {
    fn now_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        tokio::task::spawn_local(task);
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_on_virtual_time() {
        let platform = TokioPlatform::new();
        let never = future::pending::<()>();
        assert_eq!(
            timeout(&platform, Duration::from_millis(4000), never).await,
            None
        );
        assert!(platform.now_ms() >= 4000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_passes_value_through() {
        let platform = TokioPlatform::new();
        let value = timeout(&platform, Duration::from_secs(1), async { 7 }).await;
        assert_eq!(value, Some(7));
    }
}
