//! Exec FSM: submits one user request and awaits its completion, honoring cancellation.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::adapter::ResponseAdapter;
use crate::error::{fail, ErrorKind, Result};
use crate::multiplexer::{Element, Multiplexer};
use crate::request::Request;

/// Submits `request` to `mux` and waits for it to complete, or for `cancellation` to fire.
/// Resolves to the number of bytes read for this request's responses.
///
/// If the connection is not currently open and the request asks to be cancelled in that case,
/// completes immediately with `not_connected` without touching the multiplexer at all.
pub async fn async_exec(
    mux: &Arc<Mutex<Multiplexer>>,
    connected: bool,
    cancel_if_not_connected: bool,
    retry_safe: bool,
    request: &Request,
    adapter: Box<dyn ResponseAdapter + Send>,
    work_available: &Notify,
    cancellation: &CancellationToken,
) -> Result<usize> {
    if !connected && cancel_if_not_connected {
        fail!((ErrorKind::NotConnected, "not connected to the server"));
    }

    let elem = Element::new(
        Bytes::copy_from_slice(request.as_bytes()),
        request.expected_responses(),
        request.get_priority(),
        retry_safe,
        adapter,
    );
    {
        let mut mux = mux.lock().unwrap();
        mux.add(elem.clone());
    }
    work_available.notify_one();

    tokio::select! {
        _ = elem.wait_done() => {
            elem.take_result().unwrap_or(Ok(0))
        }
        _ = cancellation.cancelled() => {
            let removed = {
                let mut mux = mux.lock().unwrap();
                mux.remove(&elem)
            };
            if removed {
                fail!((ErrorKind::OperationAborted, "exec cancelled before being written"));
            }
            // Already written: cannot be abandoned mid-response, wait it out.
            elem.wait_done().await;
            elem.take_result().unwrap_or(Ok(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::CollectingAdapter;
    use crate::push::PushManager;

    #[tokio::test]
    async fn not_connected_with_cancel_flag_fails_fast_without_touching_the_queue() {
        let mux = Arc::new(Mutex::new(Multiplexer::new(PushManager::new())));
        let work_available = Notify::new();
        let cancellation = CancellationToken::new();
        let mut request = Request::new();
        request.push("PING", []);

        let err = async_exec(
            &mux,
            false,
            true,
            false,
            &request,
            Box::new(CollectingAdapter::default()),
            &work_available,
            &cancellation,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert!(mux.lock().unwrap().write_buffer().is_empty());
    }

    #[tokio::test]
    async fn cancelling_before_write_aborts_the_request() {
        let mux = Arc::new(Mutex::new(Multiplexer::new(PushManager::new())));
        let work_available = Notify::new();
        let cancellation = CancellationToken::new();
        let mut request = Request::new();
        request.push("PING", []);

        cancellation.cancel();
        let err = async_exec(
            &mux,
            true,
            false,
            false,
            &request,
            Box::new(CollectingAdapter::default()),
            &work_available,
            &cancellation,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationAborted);
    }

    #[tokio::test]
    async fn completes_once_the_multiplexer_delivers_a_response() {
        let mux = Arc::new(Mutex::new(Multiplexer::new(PushManager::new())));
        let work_available = Notify::new();
        let cancellation = CancellationToken::new();
        let mut request = Request::new();
        request.push("PING", []);

        let mux_clone = mux.clone();
        let responder = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let mut mux = mux_clone.lock().unwrap();
            mux.prepare_write();
            mux.commit_write();
            mux.consume_next(b"+PONG\r\n").unwrap();
        });

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
        .await
        .unwrap();
        responder.await.unwrap();
    }
}
