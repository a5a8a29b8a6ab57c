//! Component E — the three sans-I/O state machines that drive a connection.
//!
//! Each FSM is a plain Rust state machine with a `resume`-shaped method returning an action; the
//! actual tokio I/O is performed by an `async fn` driver (in [`crate::run`]) that calls `resume`,
//! performs the action, and feeds the result back in. This keeps the FSMs unit-testable without a
//! live socket.

pub mod exec;
pub mod reader;
pub mod writer;

pub use exec::async_exec;
pub use reader::ReaderFsm;
pub use writer::{WriterAction, WriterFsm};
