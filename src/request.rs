//! Component C — request buffering and serialization.
//!
//! A [`Request`] accumulates one or more Redis commands as wire-ready bytes and tracks how many
//! top-level responses the multiplexer should expect back for it.

use bytes::{BufMut, BytesMut};

/// Something that can be written out as one (or, for pair-like types, two) RESP3 bulk strings.
///
/// Commands are always sent as flat arrays of blob strings regardless of the negotiated protocol
/// version; RESP3 only changes how *replies* are framed.
pub trait ToArg {
    /// Number of bulk strings this value contributes (1, except pairs which contribute 2).
    fn arity(&self) -> usize {
        1
    }

    fn write_bulk(&self, buf: &mut BytesMut);
}

fn write_one_bulk(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u8(b'$');
    buf.put_slice(bytes.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(bytes);
    buf.put_slice(b"\r\n");
}

impl ToArg for &str {
    fn write_bulk(&self, buf: &mut BytesMut) {
        write_one_bulk(buf, self.as_bytes());
    }
}

impl ToArg for String {
    fn write_bulk(&self, buf: &mut BytesMut) {
        write_one_bulk(buf, self.as_bytes());
    }
}

impl ToArg for &[u8] {
    fn write_bulk(&self, buf: &mut BytesMut) {
        write_one_bulk(buf, self);
    }
}

impl ToArg for Vec<u8> {
    fn write_bulk(&self, buf: &mut BytesMut) {
        write_one_bulk(buf, self);
    }
}

impl ToArg for i64 {
    fn write_bulk(&self, buf: &mut BytesMut) {
        write_one_bulk(buf, self.to_string().as_bytes());
    }
}

impl<A, B> ToArg for (A, B)
where
    A: ToArg,
    B: ToArg,
{
    fn arity(&self) -> usize {
        2
    }

    fn write_bulk(&self, buf: &mut BytesMut) {
        self.0.write_bulk(buf);
        self.1.write_bulk(buf);
    }
}

/// True for commands whose replies arrive as out-of-band push frames rather than an ordinary
/// in-order response — namely the subscribe family once RESP3 push semantics are negotiated.
fn expects_push_reply(command: &str) -> bool {
    matches!(
        command.to_ascii_uppercase().as_str(),
        "SUBSCRIBE" | "UNSUBSCRIBE" | "PSUBSCRIBE" | "PUNSUBSCRIBE" | "SSUBSCRIBE" | "SUNSUBSCRIBE"
    )
}

/// A buffered sequence of commands plus the bookkeeping the multiplexer needs to match replies.
#[derive(Debug, Default)]
pub struct Request {
    buf: BytesMut,
    expected_responses: usize,
    priority: bool,
}

impl Request {
    pub fn new() -> Self {
        Request::default()
    }

    /// Appends one command with a fixed argument list.
    pub fn push<'a>(&mut self, command: &str, args: impl IntoIterator<Item = &'a str>) -> &mut Self {
        let args: Vec<&str> = args.into_iter().collect();
        self.write_header(command, args.len());
        for arg in &args {
            write_one_bulk(&mut self.buf, arg.as_bytes());
        }
        self.account(command);
        self
    }

    /// Appends one command whose argument count is driven by an iterable of [`ToArg`] elements,
    /// each contributing `arity()` bulk strings (pairs contribute two, e.g. field/value lists for
    /// `HSET`). `key`, if present, is written as the first argument ahead of the iterable.
    pub fn push_range<T: ToArg>(
        &mut self,
        command: &str,
        key: Option<&str>,
        iterable: impl IntoIterator<Item = T>,
    ) -> &mut Self {
        let items: Vec<T> = iterable.into_iter().collect();
        let argc = key.is_some() as usize + items.iter().map(|i| i.arity()).sum::<usize>();
        self.write_header(command, argc);
        if let Some(key) = key {
            write_one_bulk(&mut self.buf, key.as_bytes());
        }
        for item in &items {
            item.write_bulk(&mut self.buf);
        }
        self.account(command);
        self
    }

    fn write_header(&mut self, command: &str, argc: usize) {
        self.buf.put_u8(b'*');
        self.buf.put_slice((argc + 1).to_string().as_bytes());
        self.buf.put_slice(b"\r\n");
        write_one_bulk(&mut self.buf, command.as_bytes());
    }

    fn account(&mut self, command: &str) {
        if !expects_push_reply(command) {
            self.expected_responses += 1;
        }
    }

    /// Resets the request to empty, ready for reuse.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.expected_responses = 0;
        self.priority = false;
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn expected_responses(&self) -> usize {
        self.expected_responses
    }

    pub fn get_priority(&self) -> bool {
        self.priority
    }

    pub fn set_priority(&mut self, priority: bool) -> &mut Self {
        self.priority = priority;
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_serializes_as_one_element_array() {
        let mut req = Request::new();
        req.push("PING", []);
        assert_eq!(req.as_bytes(), b"*1\r\n$4\r\nPING\r\n");
        assert_eq!(req.expected_responses(), 1);
    }

    #[test]
    fn set_with_options_serializes_bit_exact() {
        let mut req = Request::new();
        req.push("SET", ["key", "value", "EX", "2"]);
        assert_eq!(
            req.as_bytes(),
            b"*5\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n$2\r\nEX\r\n$1\r\n2\r\n"
        );
    }

    #[test]
    fn push_range_flattens_pairs() {
        let mut req = Request::new();
        req.push_range("HSET", Some("key"), [("k1", "v1"), ("k2", "v2")]);
        assert_eq!(
            req.as_bytes(),
            b"*6\r\n$4\r\nHSET\r\n$3\r\nkey\r\n$2\r\nk1\r\n$2\r\nv1\r\n$2\r\nk2\r\n$2\r\nv2\r\n"
        );
        assert_eq!(req.expected_responses(), 1);
    }

    #[test]
    fn multiple_pushes_accumulate_and_count() {
        let mut req = Request::new();
        req.push("PING", []);
        req.push("PING", []);
        assert_eq!(req.expected_responses(), 2);
        assert_eq!(req.as_bytes(), b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn subscribe_does_not_count_toward_expected_responses() {
        let mut req = Request::new();
        req.push("SUBSCRIBE", ["channel"]);
        assert_eq!(req.expected_responses(), 0);
    }

    #[test]
    fn clear_resets_everything() {
        let mut req = Request::new();
        req.push("PING", []);
        req.set_priority(true);
        req.clear();
        assert!(req.is_empty());
        assert_eq!(req.expected_responses(), 0);
        assert!(!req.get_priority());
    }
}
