//! A pipelining RESP3 client core for Redis: an incremental parser, a request multiplexer, and a
//! run supervisor that owns a connection's lifecycle (resolve, connect, optional TLS, optional
//! Sentinel discovery, setup handshake, health checks, and reconnection with backoff).
//!
//! This crate implements the protocol and connection-state-machine core only. It does not expose
//! a typed command API (`SET`, `GET`, ...) — callers build [`request::Request`]s directly and
//! interpret replies through a [`adapter::ResponseAdapter`].

pub mod adapter;
pub mod config;
pub mod connection;
pub mod error;
pub mod fsm;
pub mod health;
pub mod multiplexer;
pub mod push;
pub mod read_buffer;
pub mod request;
pub mod resp3;
pub mod retry;
#[cfg(feature = "sentinel")]
pub mod sentinel;
#[cfg(feature = "tls")]
pub mod tls;
pub mod transport;

mod run;

pub use adapter::{CollectingAdapter, ResponseAdapter};
pub use config::{Config, Endpoint};
pub use connection::{Connection, Operation};
pub use error::{Error, ErrorKind, Result};
pub use request::Request;
pub use resp3::{Node, ParseEvent, Parser, Type};
