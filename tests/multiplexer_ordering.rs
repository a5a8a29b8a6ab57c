//! End-to-end exercise of the multiplexer and exec FSM together: several requests submitted
//! concurrently from separate tasks pipeline onto one write stream, and each caller's response —
//! delivered back over a single ordered byte stream with no request id in the wire format — lands
//! on the task that actually submitted it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use redis_resp3::adapter::ResponseAdapter;
use redis_resp3::fsm::{async_exec, ReaderFsm};
use redis_resp3::multiplexer::Multiplexer;
use redis_resp3::push::PushManager;
use redis_resp3::read_buffer::ReadBuffer;
use redis_resp3::request::Request;
use redis_resp3::{Error, Node};
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;

/// Records the single node this request's reply carries and reports it back once the response is
/// complete, standing in for a caller-provided projection.
struct RecordingAdapter {
    tx: Option<oneshot::Sender<String>>,
    seen: Option<String>,
}

impl ResponseAdapter for RecordingAdapter {
    fn on_node(&mut self, node: &Node, _err: &mut Option<Error>) {
        self.seen = Some(String::from_utf8_lossy(&node.value).into_owned());
    }

    fn on_done(&mut self) {
        if let (Some(tx), Some(value)) = (self.tx.take(), self.seen.take()) {
            let _ = tx.send(value);
        }
    }
}

fn submit(
    mux: &Arc<Mutex<Multiplexer>>,
    work_available: &Arc<Notify>,
    cancellation: &CancellationToken,
    label: &str,
) -> (
    tokio::task::JoinHandle<redis_resp3::Result<usize>>,
    oneshot::Receiver<String>,
) {
    let (tx, rx) = oneshot::channel();
    let mux = mux.clone();
    let work_available = work_available.clone();
    let cancellation = cancellation.clone();
    let mut request = Request::new();
    request.push("ECHO", [label]);
    let handle = tokio::spawn(async move {
        async_exec(
            &mux,
            true,
            false,
            false,
            &request,
            Box::new(RecordingAdapter {
                tx: Some(tx),
                seen: None,
            }),
            &work_available,
            &cancellation,
        )
        .await
    });
    (handle, rx)
}

#[tokio::test]
async fn three_concurrent_execs_each_receive_their_own_reply_in_submission_order() {
    let mux = Arc::new(Mutex::new(Multiplexer::new(PushManager::new())));
    let work_available = Arc::new(Notify::new());
    let cancellation = CancellationToken::new();

    // Submit strictly in order, giving each a moment to register in the queue before the next,
    // so submission order is deterministic.
    let (first_handle, first_rx) = submit(&mux, &work_available, &cancellation, "first");
    tokio::time::sleep(Duration::from_millis(5)).await;
    let (second_handle, second_rx) = submit(&mux, &work_available, &cancellation, "second");
    tokio::time::sleep(Duration::from_millis(5)).await;
    let (third_handle, third_rx) = submit(&mux, &work_available, &cancellation, "third");
    tokio::time::sleep(Duration::from_millis(5)).await;

    // Simulate one writer-loop pass: everything currently waiting is coalesced into a single
    // write, as real pipelining does.
    {
        let mut guard = mux.lock().unwrap();
        guard.prepare_write();
        guard.commit_write();
    }

    // The wire format carries no request id, so the three replies must be matched strictly by
    // queue order: whichever request is at the front of the queue gets the next reply.
    let mut read_buf = ReadBuffer::new(4096, 256);
    let mut source: &[u8] = b"+first\r\n+second\r\n+third\r\n";
    read_buf.fill_some(&mut source).await.unwrap();
    {
        let mut guard = mux.lock().unwrap();
        ReaderFsm::new().drain(&mut guard, &mut read_buf).unwrap();
    }

    assert_eq!(first_rx.await.unwrap(), "first");
    assert_eq!(second_rx.await.unwrap(), "second");
    assert_eq!(third_rx.await.unwrap(), "third");

    assert_eq!(first_handle.await.unwrap().unwrap(), 8); // b"+first\r\n"
    assert_eq!(second_handle.await.unwrap().unwrap(), 9); // b"+second\r\n"
    assert_eq!(third_handle.await.unwrap().unwrap(), 8); // b"+third\r\n"
}

#[tokio::test]
async fn a_push_message_arriving_between_two_responses_does_not_disturb_queue_order() {
    let push = PushManager::new();
    let mut rx = push.replace_receiver();
    let mux = Arc::new(Mutex::new(Multiplexer::new(push)));
    let work_available = Arc::new(Notify::new());
    let cancellation = CancellationToken::new();

    let (first_handle, first_rx) = submit(&mux, &work_available, &cancellation, "first");
    tokio::time::sleep(Duration::from_millis(5)).await;
    let (second_handle, second_rx) = submit(&mux, &work_available, &cancellation, "second");
    tokio::time::sleep(Duration::from_millis(5)).await;

    {
        let mut guard = mux.lock().unwrap();
        guard.prepare_write();
        guard.commit_write();
    }

    let mut read_buf = ReadBuffer::new(4096, 256);
    let mut source: &[u8] =
        b"+first\r\n>2\r\n$7\r\nmessage\r\n$5\r\nhello\r\n+second\r\n";
    read_buf.fill_some(&mut source).await.unwrap();
    {
        let mut guard = mux.lock().unwrap();
        ReaderFsm::new().drain(&mut guard, &mut read_buf).unwrap();
    }

    assert_eq!(first_rx.await.unwrap(), "first");
    assert_eq!(second_rx.await.unwrap(), "second");
    first_handle.await.unwrap().unwrap();
    second_handle.await.unwrap().unwrap();
    assert!(rx.try_recv().is_ok());
}
