//! Public API surface: a handle a caller constructs once, then drives with `run`, `exec`, and
//! `receive`, cancelling any of them independently via `cancel`.

use std::sync::atomic::Ordering;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use crate::adapter::ResponseAdapter;
use crate::config::Config;
use crate::error::{fail, ErrorKind, Result};
use crate::fsm::async_exec;
use crate::request::Request;
use crate::run::{self, Shared};

/// Which in-flight operation [`Connection::cancel`] should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Stops the connection entirely: tears down the transport, ends `run`, disables reconnection.
    Run,
    /// Cancels whichever `exec` calls are currently awaiting a response.
    Exec,
    /// Ends the currently installed `receive` loop.
    Receive,
    /// Lets the current connection (if any) keep running, but stops the run loop from
    /// reconnecting once it drops.
    Reconnection,
    /// Everything above.
    All,
}

/// A handle to one logical RESP3 connection. Constructing it does not connect; call [`run`] to
/// drive the connection lifecycle (typically spawned onto its own task), then submit work through
/// [`exec`] and [`receive`].
///
/// [`run`]: Connection::run
/// [`exec`]: Connection::exec
/// [`receive`]: Connection::receive
pub struct Connection {
    shared: std::sync::Arc<Shared>,
    exec_cancellation: Mutex<CancellationToken>,
    receive_cancellation: Mutex<CancellationToken>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Connection {
            shared: Shared::new(),
            exec_cancellation: Mutex::new(CancellationToken::new()),
            receive_cancellation: Mutex::new(CancellationToken::new()),
        }
    }

    /// Runs the connection lifecycle until permanently failed or cancelled via
    /// `cancel(Operation::Run)` (or `Operation::All`).
    pub async fn run(&self, config: Config) -> Result<()> {
        run::run(config, self.shared.clone()).await
    }

    /// Submits one request and waits for its response(s), resolving to the total bytes read.
    ///
    /// `cancel_if_not_connected` mirrors the request-level policy described for the setup
    /// request and health check: when set, a request submitted while disconnected fails fast with
    /// `not_connected` instead of queuing for the next reconnect. `retry_safe` controls whether the
    /// request is retained (and resubmitted) across a reconnect rather than failed outright.
    pub async fn exec(
        &self,
        request: &Request,
        adapter: Box<dyn ResponseAdapter + Send>,
        cancel_if_not_connected: bool,
        retry_safe: bool,
    ) -> Result<usize> {
        let cancellation = self.exec_cancellation.lock().unwrap().clone();
        async_exec(
            &self.shared.mux,
            self.shared.is_connected(),
            cancel_if_not_connected,
            retry_safe,
            request,
            adapter,
            &self.shared.work_available,
            &cancellation,
        )
        .await
    }

    /// Installs `adapter` as the push receiver and feeds it every push frame delivered until
    /// cancelled (`Operation::Receive` or `Operation::All`) or the connection is torn down for
    /// good.
    pub async fn receive(&self, mut adapter: Box<dyn ResponseAdapter + Send>) -> Result<()> {
        let cancellation = self.receive_cancellation.lock().unwrap().clone();
        let mut rx = self.shared.push.replace_receiver();
        adapter.on_init();
        loop {
            tokio::select! {
                message = rx.recv() => {
                    match message {
                        Some(push) => {
                            for node in &push.nodes {
                                let mut err = None;
                                adapter.on_node(node, &mut err);
                                if let Some(err) = err {
                                    return Err(err);
                                }
                            }
                            adapter.on_done();
                        }
                        None => fail!((
                            ErrorKind::ConnectionLost,
                            "push receiver channel closed"
                        )),
                    }
                }
                _ = cancellation.cancelled() => return Ok(()),
            }
        }
    }

    /// Cancels the given operation. See [`Operation`] for what each variant affects.
    pub fn cancel(&self, operation: Operation) {
        match operation {
            Operation::Run => self.shared.cancellation.cancel(),
            Operation::Exec => {
                let mut slot = self.exec_cancellation.lock().unwrap();
                slot.cancel();
                *slot = CancellationToken::new();
            }
            Operation::Receive => {
                let mut slot = self.receive_cancellation.lock().unwrap();
                slot.cancel();
                *slot = CancellationToken::new();
            }
            Operation::Reconnection => {
                self.shared.disable_reconnect.store(true, Ordering::Relaxed);
            }
            Operation::All => {
                self.shared.cancellation.cancel();
                self.shared.disable_reconnect.store(true, Ordering::Relaxed);
                self.cancel(Operation::Exec);
                self.cancel(Operation::Receive);
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::CollectingAdapter;
    use crate::config::Endpoint;
    use std::time::Duration;

    #[tokio::test]
    async fn exec_fails_fast_when_not_connected_and_policy_requests_it() {
        let conn = Connection::new();
        let mut request = Request::new();
        request.push("PING", []);
        let err = conn
            .exec(&request, Box::new(CollectingAdapter::default()), true, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn cancel_run_stops_the_run_future() {
        let conn = Connection::new();
        let mut config = Config::new(Endpoint::Tcp {
            host: "127.0.0.1".into(),
            port: 1, // nothing listens here; run_once will fail and retry
        });
        config.reconnect_wait_interval = Duration::from_millis(5);
        config.connect_timeout = Duration::from_millis(20);

        conn.cancel(Operation::Run);
        conn.run(config).await.unwrap();
    }

    #[tokio::test]
    async fn cancel_receive_ends_the_receive_loop() {
        let conn = std::sync::Arc::new(Connection::new());
        let conn_clone = conn.clone();
        let handle = tokio::spawn(async move {
            conn_clone
                .receive(Box::new(CollectingAdapter::default()))
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        conn.cancel(Operation::Receive);
        handle.await.unwrap().unwrap();
    }
}
