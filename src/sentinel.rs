//! Redis Sentinel master discovery.
//!
//! Bootstraps against the configured sentinel list, asks each in turn for the current master
//! address and gossiped sentinel list, adopts the first answer, and rotates/merges the sentinel
//! list the way the distilled spec describes. This is a bespoke request/response exchange over a
//! throwaway connection, independent of the long-lived multiplexer used for the real connection.

use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{fail, Error, ErrorKind, Result};
use crate::request::Request;
use crate::resp3::{Node, ParseEvent, Parser, Type};
use crate::transport;

/// One complete top-level RESP3 reply, as a flat pre-order node list.
type Reply = Vec<Node>;

async fn exchange(
    stream: &mut TcpStream,
    request: &Request,
    expected_replies: usize,
    read_timeout: Duration,
) -> Result<Vec<Reply>> {
    tokio::time::timeout(read_timeout, stream.write_all(request.as_bytes()))
        .await
        .map_err(|_| Error::from((ErrorKind::WriteTimeout, "sentinel request write timed out")))?
        .map_err(Error::from)?;

    let mut parser = Parser::new();
    let mut buf = Vec::new();
    let mut replies = Vec::with_capacity(expected_replies);
    let mut current = Vec::new();

    while replies.len() < expected_replies {
        loop {
            match parser.next(&buf)? {
                ParseEvent::NeedMore => break,
                ParseEvent::Node { node, consumed } => {
                    current.push(node);
                    buf.drain(..consumed);
                    if parser.done() {
                        parser.reset();
                        replies.push(std::mem::take(&mut current));
                    }
                }
            }
        }
        if replies.len() == expected_replies {
            break;
        }
        let mut chunk = [0u8; 4096];
        let n = tokio::time::timeout(read_timeout, stream.read(&mut chunk))
            .await
            .map_err(|_| Error::from((ErrorKind::ResolveTimeout, "sentinel response read timed out")))?
            .map_err(Error::from)?;
        if n == 0 {
            fail!((
                ErrorKind::SentinelResolveFailed,
                "sentinel closed the connection"
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(replies)
}

fn bulk_string_value(node: &Node) -> Option<String> {
    if node.data_type.is_blob_marker() || node.data_type == Type::SimpleString {
        Some(String::from_utf8_lossy(&node.value).into_owned())
    } else {
        None
    }
}

fn parse_get_master_addr(reply: &Reply) -> Option<(String, u16)> {
    // *2\r\n$host\r\n$port\r\n, or a null reply if the master is unknown.
    if reply.len() < 3 {
        return None;
    }
    let host = bulk_string_value(&reply[1])?;
    let port: u16 = bulk_string_value(&reply[2])?.parse().ok()?;
    Some((host, port))
}

fn parse_sentinels_list(reply: &Reply) -> Vec<(String, u16)> {
    // *N\r\n of maps/arrays, each containing flattened "ip"/"port" field pairs.
    let mut out = Vec::new();
    let mut i = 1; // skip the root array node
    while i < reply.len() {
        if reply[i].depth != 1 || !reply[i].data_type.is_aggregate() {
            i += 1;
            continue;
        }
        let entry_depth = reply[i].depth + 1;
        let mut j = i + 1;
        let mut ip = None;
        let mut port = None;
        while j < reply.len() && reply[j].depth >= entry_depth {
            if reply[j].depth == entry_depth {
                if let Some(value) = bulk_string_value(&reply[j]) {
                    if value.eq_ignore_ascii_case("ip") {
                        if let Some(v) = reply.get(j + 1).and_then(bulk_string_value) {
                            ip = Some(v);
                        }
                    } else if value.eq_ignore_ascii_case("port") {
                        if let Some(v) = reply.get(j + 1).and_then(bulk_string_value) {
                            port = v.parse().ok();
                        }
                    }
                }
            }
            j += 1;
        }
        if let (Some(ip), Some(port)) = (ip, port) {
            out.push((ip, port));
        }
        i = j;
    }
    out
}

fn merge_sentinel_lists(bootstrap: &[(String, u16)], gossiped: Vec<(String, u16)>) -> Vec<(String, u16)> {
    let mut merged = bootstrap.to_vec();
    for addr in gossiped {
        if !merged.contains(&addr) {
            merged.push(addr);
        }
    }
    merged
}

/// Result of a successful discovery round.
pub struct Discovery {
    pub master: (String, u16),
    pub sentinels: Vec<(String, u16)>,
}

/// Iterates `bootstrap` sentinels, asking each for the master address and its gossiped sentinel
/// list, adopting the first that answers.
pub async fn discover_master(
    bootstrap: &[(String, u16)],
    master_name: &str,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Discovery> {
    // Randomize which sentinel is tried first so a fleet of clients doesn't pile onto the same
    // one every time it needs to (re)discover the master.
    let mut order: Vec<usize> = (0..bootstrap.len()).collect();
    order.shuffle(&mut rand::thread_rng());

    for idx in order {
        let (host, port) = &bootstrap[idx];
        let addr = match transport::resolve(host, *port, connect_timeout).await {
            Ok(addr) => addr,
            Err(_) => continue,
        };
        let mut stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            _ => continue,
        };

        let mut request = Request::new();
        request.push("SENTINEL", ["get-master-addr-by-name", master_name]);
        request.push("SENTINEL", ["SENTINELS", master_name]);

        let replies = match exchange(&mut stream, &request, 2, read_timeout).await {
            Ok(replies) => replies,
            Err(_) => continue,
        };

        let Some(master) = parse_get_master_addr(&replies[0]) else {
            continue;
        };
        let gossiped = parse_sentinels_list(&replies[1]);

        let mut rotated = bootstrap.to_vec();
        rotated.rotate_left(idx);
        let sentinels = merge_sentinel_lists(&rotated, gossiped);

        return Ok(Discovery { master, sentinels });
    }
    fail!((
        ErrorKind::SentinelResolveFailed,
        "no configured sentinel answered"
    ));
}

/// Confirms the server at `stream` reports its role as `master` via the `ROLE` command.
pub async fn verify_role_is_master(stream: &mut TcpStream, read_timeout: Duration) -> Result<()> {
    let mut request = Request::new();
    request.push("ROLE", []);
    let replies = exchange(stream, &request, 1, read_timeout).await?;
    let is_master = replies[0]
        .get(1)
        .and_then(bulk_string_value)
        .map(|role| role.eq_ignore_ascii_case("master"))
        .unwrap_or(false);
    if is_master {
        Ok(())
    } else {
        fail!((ErrorKind::RoleCheckFailed, "connected server is not a master"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn node(ty: Type, depth: usize, value: &str) -> Node {
        Node::new(ty, 0, depth, Bytes::copy_from_slice(value.as_bytes()))
    }

    #[test]
    fn parses_get_master_addr_reply() {
        let reply = vec![
            Node::new(Type::Array, 2, 0, Bytes::new()),
            node(Type::BlobString, 1, "10.0.0.5"),
            node(Type::BlobString, 1, "6380"),
        ];
        let (host, port) = parse_get_master_addr(&reply).unwrap();
        assert_eq!(host, "10.0.0.5");
        assert_eq!(port, 6380);
    }

    #[test]
    fn merges_bootstrap_and_gossiped_sentinels_without_duplicates() {
        let bootstrap = vec![("a".to_string(), 1u16), ("b".to_string(), 2u16)];
        let gossiped = vec![("b".to_string(), 2u16), ("c".to_string(), 3u16)];
        let merged = merge_sentinel_lists(&bootstrap, gossiped);
        assert_eq!(
            merged,
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 2),
                ("c".to_string(), 3)
            ]
        );
    }
}
