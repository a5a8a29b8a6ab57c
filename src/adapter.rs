//! The adapter seam: how a stream of [`Node`]s produced by the parser is turned into whatever
//! shape a caller wants.
//!
//! Internal call sites (the setup request, the health check ping) use a monomorphized adapter;
//! the public `exec` entry point boxes one up, mirroring the lineage's split between its internal
//! `ConnectionLike` calls and the type-erased public command surface.

use crate::error::Error;
use crate::resp3::Node;

/// Receives the node stream for one top-level response and decides how to interpret it.
///
/// `on_node` is called once per node in pre-order, including the root. Setting `*err` aborts
/// interpretation of the rest of this response (the multiplexer still drains the remaining wire
/// bytes; it just stops delivering them to this adapter) but the underlying connection keeps
/// running — RESP3 errors are data, not transport failures.
pub trait ResponseAdapter {
    fn on_init(&mut self) {}

    fn on_node(&mut self, node: &Node, err: &mut Option<Error>);

    fn on_done(&mut self) {}
}

/// A `ResponseAdapter` that simply collects every node it sees, in order. Used internally for the
/// HELLO/SELECT setup exchange and the health-check PING, where the caller only needs to confirm
/// shape (an array of the right length, a `+PONG`) rather than project into a richer type.
#[derive(Debug, Default)]
pub struct CollectingAdapter {
    pub nodes: Vec<Node>,
}

impl ResponseAdapter for CollectingAdapter {
    fn on_node(&mut self, node: &Node, _err: &mut Option<Error>) {
        self.nodes.push(node.clone());
    }
}

impl ResponseAdapter for Box<dyn ResponseAdapter + Send> {
    fn on_init(&mut self) {
        (**self).on_init()
    }

    fn on_node(&mut self, node: &Node, err: &mut Option<Error>) {
        (**self).on_node(node, err)
    }

    fn on_done(&mut self) {
        (**self).on_done()
    }
}
