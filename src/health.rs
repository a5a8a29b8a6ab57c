//! Health check: a ping sub-task and a pong-wait sub-task that race each other, grounded on the
//! run supervisor's health-check description.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::adapter::CollectingAdapter;
use crate::error::{fail, ErrorKind, Result};
use crate::fsm::async_exec;
use crate::multiplexer::Multiplexer;
use crate::request::Request;

async fn ping_task(
    mux: Arc<Mutex<Multiplexer>>,
    interval: Duration,
    ping_id: String,
    work_available: Arc<Notify>,
    cancellation: CancellationToken,
    received: Arc<AtomicBool>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; skip it
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancellation.cancelled() => return Ok(()),
        }
        let mut request = Request::new();
        request.push("PING", [ping_id.as_str()]);
        async_exec(
            &mux,
            true,
            false,
            false,
            &request,
            Box::new(CollectingAdapter::default()),
            &work_available,
            &cancellation,
        )
        .await?;
        received.store(true, Ordering::SeqCst);
    }
}

async fn pong_wait_task(
    interval: Duration,
    received: Arc<AtomicBool>,
    cancellation: CancellationToken,
) -> Result<()> {
    loop {
        tokio::time::sleep(interval * 2).await;
        if !received.swap(false, Ordering::SeqCst) {
            cancellation.cancel();
            fail!((
                ErrorKind::PongTimeout,
                "no successful ping within the health-check window"
            ));
        }
    }
}

/// Runs the health check for as long as `cancellation` stays unset. When `interval` is zero the
/// health check is disabled and this simply waits for cancellation.
pub async fn run_health_check(
    mux: Arc<Mutex<Multiplexer>>,
    interval: Duration,
    ping_id: String,
    work_available: Arc<Notify>,
    cancellation: CancellationToken,
) -> Result<()> {
    if interval.is_zero() {
        cancellation.cancelled().await;
        return Ok(());
    }
    let received = Arc::new(AtomicBool::new(false));
    tokio::select! {
        r = ping_task(mux, interval, ping_id, work_available, cancellation.clone(), received.clone()) => r,
        r = pong_wait_task(interval, received, cancellation.clone()) => r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::PushManager;

    #[tokio::test]
    async fn disabled_health_check_waits_for_cancellation_only() {
        let cancellation = CancellationToken::new();
        let cancellation_clone = cancellation.clone();
        let handle = tokio::spawn(async move {
            run_health_check(
                Arc::new(Mutex::new(Multiplexer::new(PushManager::new()))),
                Duration::ZERO,
                "healthcheck".into(),
                Arc::new(Notify::new()),
                cancellation_clone,
            )
            .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        cancellation.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pong_timeout_fires_when_no_ping_ever_succeeds() {
        let cancellation = CancellationToken::new();
        let received = Arc::new(AtomicBool::new(false));
        let err = pong_wait_task(Duration::from_millis(50), received, cancellation.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PongTimeout);
        assert!(cancellation.is_cancelled());
    }
}
