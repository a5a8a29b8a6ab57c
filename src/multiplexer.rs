//! Component D — the pipelining multiplexer.
//!
//! Sequences concurrently submitted requests into one ordered write stream, matches incoming
//! top-level RESP3 messages back to the request that is waiting for them in strict FIFO order,
//! and routes push frames out-of-band regardless of what else is in flight.
//!
//! Grounded on the lineage's `multiplexed_connection.rs`: a `VecDeque` of in-flight entries, each
//! carrying a completion slot, walked head-first as responses arrive.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::sync::Notify;
use tracing::warn;

use crate::adapter::ResponseAdapter;
use crate::error::{Error, ErrorKind, Result};
use crate::push::{PushManager, PushMessage};
use crate::resp3::{Node, ParseEvent, Parser, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementState {
    Waiting,
    Staged,
    Written,
    Done,
}

struct Guarded {
    state: ElementState,
    remaining: usize,
    adapter: Box<dyn ResponseAdapter + Send>,
    first_error: Option<Error>,
    bytes_read: usize,
    result: Option<Result<usize>>,
}

struct Shared {
    guarded: Mutex<Guarded>,
    notify: Notify,
    payload: Bytes,
    priority: bool,
    retry_safe: bool,
}

/// Handle to one request's place in the multiplexer's queue. Cloning shares the same underlying
/// state; the submitting caller keeps a clone to await completion while the multiplexer keeps
/// another in its queue.
#[derive(Clone)]
pub struct Element(Arc<Shared>);

impl Element {
    pub fn new(
        payload: Bytes,
        expected_responses: usize,
        priority: bool,
        retry_safe: bool,
        adapter: Box<dyn ResponseAdapter + Send>,
    ) -> Self {
        Element(Arc::new(Shared {
            guarded: Mutex::new(Guarded {
                state: ElementState::Waiting,
                remaining: expected_responses,
                adapter,
                first_error: None,
                bytes_read: 0,
                result: None,
            }),
            notify: Notify::new(),
            payload,
            priority,
            retry_safe,
        }))
    }

    pub fn priority(&self) -> bool {
        self.0.priority
    }

    pub fn retry_safe(&self) -> bool {
        self.0.retry_safe
    }

    fn state(&self) -> ElementState {
        self.0.guarded.lock().unwrap().state
    }

    fn set_state(&self, state: ElementState) {
        self.0.guarded.lock().unwrap().state = state;
    }

    pub fn is_done(&self) -> bool {
        self.state() == ElementState::Done
    }

    /// Takes the `(bytes_read_or_error)` result out, once. Returns `None` if not yet done or
    /// already taken.
    pub fn take_result(&self) -> Option<Result<usize>> {
        self.0.guarded.lock().unwrap().result.take()
    }

    /// Waits until this element transitions to `done`.
    pub async fn wait_done(&self) {
        loop {
            let notified = self.0.notify.notified();
            if self.is_done() {
                return;
            }
            notified.await;
        }
    }

    fn mark_done(&self, result: Result<usize>) {
        let mut g = self.0.guarded.lock().unwrap();
        g.state = ElementState::Done;
        g.result = Some(result);
        drop(g);
        self.0.notify.notify_waiters();
    }

    fn on_init(&self) {
        self.0.guarded.lock().unwrap().adapter.on_init();
    }

    fn on_node(&self, node: &Node, consumed: usize) {
        let mut g = self.0.guarded.lock().unwrap();
        let mut err = None;
        g.adapter.on_node(node, &mut err);
        g.bytes_read += consumed;
        if g.first_error.is_none() {
            g.first_error = err;
        }
    }

    /// Called once the parser has completed one top-level message routed to this element. Returns
    /// `true` if this was the element's last expected response (it is now `done`).
    fn finish_one_response(&self) -> bool {
        let mut g = self.0.guarded.lock().unwrap();
        g.adapter.on_done();
        g.remaining = g.remaining.saturating_sub(1);
        if g.remaining == 0 {
            let result = g.first_error.take().map(Err).unwrap_or(Ok(g.bytes_read));
            g.state = ElementState::Done;
            g.result = Some(result);
            drop(g);
            self.0.notify.notify_waiters();
            true
        } else {
            false
        }
    }
}

/// Outcome of one [`Multiplexer::consume_next`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsumeOutcome {
    NeedsMore,
    GotResponse,
    GotPush,
}

enum Routing {
    Element(Element),
    Push(Vec<Node>),
    Discard,
}

pub struct Multiplexer {
    queue: VecDeque<Element>,
    write_buffer: BytesMut,
    parser: Parser,
    push: PushManager,
    current: Option<Routing>,
}

impl Multiplexer {
    pub fn new(push: PushManager) -> Self {
        Multiplexer {
            queue: VecDeque::new(),
            write_buffer: BytesMut::new(),
            parser: Parser::new(),
            push,
            current: None,
        }
    }

    pub fn add(&mut self, elem: Element) {
        if elem.priority() {
            let mut idx = self.queue.len();
            while idx > 0 {
                let prev = &self.queue[idx - 1];
                if prev.priority() && prev.state() == ElementState::Waiting {
                    idx -= 1;
                } else {
                    break;
                }
            }
            self.queue.insert(idx, elem);
        } else {
            self.queue.push_back(elem);
        }
    }

    /// Removes `elem` from the queue iff it is still `waiting`.
    pub fn remove(&mut self, elem: &Element) -> bool {
        if let Some(pos) = self
            .queue
            .iter()
            .position(|e| Arc::ptr_eq(&e.0, &elem.0) && e.state() == ElementState::Waiting)
        {
            self.queue.remove(pos);
            true
        } else {
            false
        }
    }

    /// Stages every currently-waiting element's payload into the write buffer. Idempotent: a
    /// second call before `commit_write` sees nothing left in `waiting` and returns 0.
    pub fn prepare_write(&mut self) -> usize {
        let mut staged = 0;
        for elem in self.queue.iter() {
            if elem.state() == ElementState::Waiting {
                self.write_buffer.extend_from_slice(&elem.0.payload);
                elem.set_state(ElementState::Staged);
                staged += 1;
            }
        }
        staged
    }

    pub fn write_buffer(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Transitions every `staged` element to `written` (or directly to `done` if it expects zero
    /// responses, e.g. a bare subscribe command whose confirmation arrives as a push). Clears the
    /// write buffer. Returns how many elements went straight to `done`.
    pub fn commit_write(&mut self) -> usize {
        self.write_buffer.clear();
        let mut completed_immediately = 0;
        for elem in self.queue.iter() {
            if elem.state() == ElementState::Staged {
                elem.set_state(ElementState::Written);
                if elem.0.guarded.lock().unwrap().remaining == 0 {
                    elem.mark_done(Ok(0));
                    completed_immediately += 1;
                }
            }
        }
        completed_immediately
    }

    pub fn is_writing(&self) -> bool {
        self.queue
            .iter()
            .any(|e| matches!(e.state(), ElementState::Staged | ElementState::Written))
    }

    /// Feeds `bytes` to the parser and routes at most one node. Returns the outcome and how many
    /// bytes the caller should discard from the front of its read buffer.
    pub fn consume_next(&mut self, bytes: &[u8]) -> Result<(ConsumeOutcome, usize)> {
        let event = self.parser.next(bytes)?;
        let ParseEvent::Node { node, consumed } = event else {
            return Ok((ConsumeOutcome::NeedsMore, 0));
        };

        if self.current.is_none() {
            self.current = Some(self.start_routing(&node));
        }

        let outcome = match self.current.as_mut().expect("just initialized") {
            Routing::Push(nodes) => {
                nodes.push(node);
                ConsumeOutcome::GotPush
            }
            Routing::Element(elem) => {
                elem.on_node(&node, consumed);
                ConsumeOutcome::GotResponse
            }
            Routing::Discard => ConsumeOutcome::GotResponse,
        };

        if self.parser.done() {
            self.parser.reset();
            match self.current.take().expect("set above") {
                Routing::Push(nodes) => {
                    self.push.try_send(PushMessage { nodes });
                }
                Routing::Element(elem) => {
                    if elem.finish_one_response() {
                        if matches!(self.queue.front(), Some(front) if Arc::ptr_eq(&front.0, &elem.0))
                        {
                            self.queue.pop_front();
                        }
                    }
                }
                Routing::Discard => {}
            }
        }

        Ok((outcome, consumed))
    }

    fn start_routing(&mut self, root: &Node) -> Routing {
        if root.data_type == Type::Push {
            return Routing::Push(Vec::new());
        }
        match self.queue.front() {
            Some(front) if front.state() == ElementState::Written => {
                let elem = front.clone();
                elem.on_init();
                Routing::Element(elem)
            }
            _ => {
                warn!("received a response with no matching in-flight request; discarding");
                Routing::Discard
            }
        }
    }

    /// Aborts every `waiting` element with `operation_aborted`. Returns how many were aborted.
    pub fn cancel_waiting(&mut self) -> usize {
        let mut cancelled = 0;
        self.queue.retain(|elem| {
            if elem.state() == ElementState::Waiting {
                elem.mark_done(Err(Error::from((
                    ErrorKind::OperationAborted,
                    "cancelled before being written",
                ))));
                cancelled += 1;
                false
            } else {
                true
            }
        });
        cancelled
    }

    /// Called when the underlying connection has gone away. Elements marked `retry_safe` that
    /// were not yet written are kept (reset to `waiting`) for resubmission on the next connection;
    /// everything else is completed with `connection_lost`. Returns how many were completed.
    pub fn cancel_on_conn_lost(&mut self) -> usize {
        let mut cancelled = 0;
        let mut retained = VecDeque::with_capacity(self.queue.len());
        while let Some(elem) = self.queue.pop_front() {
            if elem.retry_safe() && elem.state() != ElementState::Written {
                elem.set_state(ElementState::Waiting);
                retained.push_back(elem);
            } else {
                elem.mark_done(Err(Error::from((
                    ErrorKind::ConnectionLost,
                    "connection lost while request was in flight",
                ))));
                cancelled += 1;
            }
        }
        self.queue = retained;
        self.write_buffer.clear();
        self.parser.reset();
        self.current = None;
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::CollectingAdapter;

    fn element(payload: &[u8], expected: usize, priority: bool) -> Element {
        Element::new(
            Bytes::copy_from_slice(payload),
            expected,
            priority,
            false,
            Box::new(CollectingAdapter::default()),
        )
    }

    #[test]
    fn prepare_write_is_idempotent_until_commit() {
        let mut mux = Multiplexer::new(PushManager::new());
        mux.add(element(b"*1\r\n$4\r\nPING\r\n", 1, false));
        assert_eq!(mux.prepare_write(), 1);
        assert_eq!(mux.prepare_write(), 0);
        mux.commit_write();
        assert!(mux.is_writing());
    }

    #[test]
    fn responses_are_matched_fifo() {
        let mut mux = Multiplexer::new(PushManager::new());
        let a = element(b"*1\r\n$4\r\nPING\r\n", 1, false);
        let b = element(b"*1\r\n$4\r\nPING\r\n", 1, false);
        mux.add(a.clone());
        mux.add(b.clone());
        mux.prepare_write();
        mux.commit_write();

        let (outcome, consumed) = mux.consume_next(b"+PONG\r\n").unwrap();
        assert_eq!(outcome, ConsumeOutcome::GotResponse);
        assert_eq!(consumed, 7);
        assert!(a.is_done());
        assert!(!b.is_done());

        let (outcome, _) = mux.consume_next(b"+PONG\r\n").unwrap();
        assert_eq!(outcome, ConsumeOutcome::GotResponse);
        assert!(b.is_done());
    }

    #[test]
    fn priority_element_jumps_the_waiting_queue() {
        let mut mux = Multiplexer::new(PushManager::new());
        let normal = element(b"*1\r\n$4\r\nPING\r\n", 1, false);
        let prio = element(b"*1\r\n$5\r\nHELLO\r\n", 1, true);
        mux.add(normal.clone());
        mux.add(prio.clone());
        assert!(Arc::ptr_eq(&mux.queue[0].0, &prio.0));
        assert!(Arc::ptr_eq(&mux.queue[1].0, &normal.0));
    }

    #[test]
    fn priority_never_preempts_an_already_written_element() {
        let mut mux = Multiplexer::new(PushManager::new());
        let normal = element(b"*1\r\n$4\r\nPING\r\n", 1, false);
        mux.add(normal.clone());
        mux.prepare_write();
        mux.commit_write();

        let prio = element(b"*1\r\n$5\r\nHELLO\r\n", 1, true);
        mux.add(prio.clone());
        assert!(Arc::ptr_eq(&mux.queue[0].0, &normal.0));
        assert!(Arc::ptr_eq(&mux.queue[1].0, &prio.0));
    }

    #[test]
    fn push_is_routed_out_of_band_while_a_response_is_pending() {
        let push_manager = PushManager::new();
        let mut rx = push_manager.replace_receiver();
        let mut mux = Multiplexer::new(push_manager);
        let elem = element(b"*1\r\n$4\r\nPING\r\n", 1, false);
        mux.add(elem.clone());
        mux.prepare_write();
        mux.commit_write();

        let (outcome, _) = mux
            .consume_next(b">2\r\n$7\r\nmessage\r\n$2\r\nhi\r\n")
            .unwrap();
        assert_eq!(outcome, ConsumeOutcome::GotPush);
        assert!(rx.try_recv().is_ok());
        assert!(!elem.is_done());

        let (outcome, _) = mux.consume_next(b"+PONG\r\n").unwrap();
        assert_eq!(outcome, ConsumeOutcome::GotResponse);
        assert!(elem.is_done());
    }

    #[test]
    fn zero_expected_response_element_completes_on_commit() {
        let mut mux = Multiplexer::new(PushManager::new());
        let sub = element(b"*2\r\n$9\r\nSUBSCRIBE\r\n$2\r\nch\r\n", 0, false);
        mux.add(sub.clone());
        mux.prepare_write();
        let completed = mux.commit_write();
        assert_eq!(completed, 1);
        assert!(sub.is_done());
    }

    #[test]
    fn cancel_waiting_aborts_only_unwritten_elements() {
        let mut mux = Multiplexer::new(PushManager::new());
        let written = element(b"*1\r\n$4\r\nPING\r\n", 1, false);
        mux.add(written.clone());
        mux.prepare_write();
        mux.commit_write();

        let waiting = element(b"*1\r\n$4\r\nPING\r\n", 1, false);
        mux.add(waiting.clone());

        let cancelled = mux.cancel_waiting();
        assert_eq!(cancelled, 1);
        assert!(waiting.is_done());
        assert!(!written.is_done());
        assert_eq!(
            waiting.take_result().unwrap().unwrap_err().kind(),
            ErrorKind::OperationAborted
        );
    }

    #[test]
    fn cancel_on_conn_lost_retains_retry_safe_unwritten_elements() {
        let mut mux = Multiplexer::new(PushManager::new());
        let retry_safe = Element::new(
            Bytes::from_static(b"*1\r\n$4\r\nPING\r\n"),
            1,
            false,
            true,
            Box::new(CollectingAdapter::default()),
        );
        let doomed = element(b"*1\r\n$4\r\nPING\r\n", 1, false);
        mux.add(retry_safe.clone());
        mux.add(doomed.clone());

        let cancelled = mux.cancel_on_conn_lost();
        assert_eq!(cancelled, 1);
        assert!(!retry_safe.is_done());
        assert!(doomed.is_done());
        assert_eq!(
            doomed.take_result().unwrap().unwrap_err().kind(),
            ErrorKind::ConnectionLost
        );
    }
}
