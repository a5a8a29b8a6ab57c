//! A minimal in-process RESP3 peer for exercising the run supervisor and setup handshake without
//! a real server. Reads client commands with the crate's own parser (requests are just arrays of
//! blob strings, so the reply parser reads them equally well) and lets the test script the
//! replies.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use redis_resp3::{Node, ParseEvent, Parser};

/// Reads bytes from `stream` until one complete top-level RESP3 message (e.g. one command array)
/// has been parsed, returning its flattened pre-order nodes.
pub async fn read_one_command(stream: &mut TcpStream) -> Vec<Node> {
    let mut parser = Parser::new();
    let mut buf = Vec::new();
    let mut nodes = Vec::new();
    loop {
        match parser.next(&buf).expect("well-formed client command") {
            ParseEvent::NeedMore => {
                let mut chunk = [0u8; 4096];
                let n = stream
                    .read(&mut chunk)
                    .await
                    .expect("client stream readable");
                assert!(n > 0, "client closed before sending a full command");
                buf.extend_from_slice(&chunk[..n]);
            }
            ParseEvent::Node { node, consumed } => {
                nodes.push(node);
                buf.drain(..consumed);
                if parser.done() {
                    return nodes;
                }
            }
        }
    }
}

/// The first argument of a command array, as sent by `Request::push` (`nodes[1]` — `nodes[0]` is
/// the array header itself).
pub fn command_name(nodes: &[Node]) -> String {
    String::from_utf8_lossy(&nodes[1].value).to_ascii_uppercase()
}

pub async fn write_reply(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).await.expect("reply write succeeds");
}
