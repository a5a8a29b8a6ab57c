//! Error taxonomy for the RESP3 client core.
//!
//! Grounded on the lineage's `RedisError`/`ErrorKind` split: a small `Copy` enum naming the
//! failure category, wrapped in an owning type that may carry a human-readable detail string and,
//! for I/O failures, the underlying `std::io::Error`.

use std::fmt;
use std::io;

/// Category of failure observed by the core. Names follow §7 of the specification verbatim so
/// that a reader can map a variant straight back to the taxonomy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // --- wire / parser ---
    InvalidDataType,
    NotANumber,
    ExceedsMaxNestedDepth,
    UnexpectedBoolValue,
    EmptyField,
    IncompatibleSize,
    NotADouble,
    ExceedsMaximumReadBufferSize,
    IncompatibleNodeDepth,

    // --- adapter ---
    ExpectsResp3SimpleType,
    ExpectsResp3Aggregate,
    ExpectsResp3Map,
    ExpectsResp3Set,
    NestedAggregateNotSupported,
    Resp3SimpleError,
    Resp3BlobError,
    Resp3Null,

    // --- lifecycle ---
    ResolveTimeout,
    ConnectTimeout,
    SslHandshakeTimeout,
    WriteTimeout,
    PongTimeout,
    Resp3Hello,
    NotConnected,

    // --- configuration ---
    UnixSocketsUnsupported,
    UnixSocketsSslUnsupported,
    SentinelUnixSocketsUnsupported,

    // --- sentinel ---
    SentinelResolveFailed,
    RoleCheckFailed,

    // --- runtime / misc (not named in §7, but required to map std::io::Error) ---
    Io,
    OperationAborted,
    ConnectionLost,
}

impl ErrorKind {
    /// Stable lower_snake_case name, matching the tokens used in §7/§8 of the specification.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidDataType => "invalid_data_type",
            ErrorKind::NotANumber => "not_a_number",
            ErrorKind::ExceedsMaxNestedDepth => "exceeeds_max_nested_depth",
            ErrorKind::UnexpectedBoolValue => "unexpected_bool_value",
            ErrorKind::EmptyField => "empty_field",
            ErrorKind::IncompatibleSize => "incompatible_size",
            ErrorKind::NotADouble => "not_a_double",
            ErrorKind::ExceedsMaximumReadBufferSize => "exceeds_maximum_read_buffer_size",
            ErrorKind::IncompatibleNodeDepth => "incompatible_node_depth",
            ErrorKind::ExpectsResp3SimpleType => "expects_resp3_simple_type",
            ErrorKind::ExpectsResp3Aggregate => "expects_resp3_aggregate",
            ErrorKind::ExpectsResp3Map => "expects_resp3_map",
            ErrorKind::ExpectsResp3Set => "expects_resp3_set",
            ErrorKind::NestedAggregateNotSupported => "nested_aggregate_not_supported",
            ErrorKind::Resp3SimpleError => "resp3_simple_error",
            ErrorKind::Resp3BlobError => "resp3_blob_error",
            ErrorKind::Resp3Null => "resp3_null",
            ErrorKind::ResolveTimeout => "resolve_timeout",
            ErrorKind::ConnectTimeout => "connect_timeout",
            ErrorKind::SslHandshakeTimeout => "ssl_handshake_timeout",
            ErrorKind::WriteTimeout => "write_timeout",
            ErrorKind::PongTimeout => "pong_timeout",
            ErrorKind::Resp3Hello => "resp3_hello",
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::UnixSocketsUnsupported => "unix_sockets_unsupported",
            ErrorKind::UnixSocketsSslUnsupported => "unix_sockets_ssl_unsupported",
            ErrorKind::SentinelUnixSocketsUnsupported => "sentinel_unix_sockets_unsupported",
            ErrorKind::SentinelResolveFailed => "sentinel_resolve_failed",
            ErrorKind::RoleCheckFailed => "role_check_failed",
            ErrorKind::Io => "io_error",
            ErrorKind::OperationAborted => "operation_aborted",
            ErrorKind::ConnectionLost => "connection_lost",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Repr {
    kind: ErrorKind,
    description: &'static str,
    detail: Option<String>,
    source: Option<io::Error>,
}

/// The error type returned throughout the core.
#[derive(Debug)]
pub struct Error(Box<Repr>);

impl Error {
    pub fn kind(&self) -> ErrorKind {
        self.0.kind
    }

    pub fn detail(&self) -> Option<&str> {
        self.0.detail.as_deref()
    }

    /// True if this error represents the underlying transport going away, as opposed to a
    /// protocol-level or adapter-level failure. Used by cancellation policy (`cancel_on_connection_lost`).
    pub fn is_connection_dropped(&self) -> bool {
        matches!(
            self.0.kind,
            ErrorKind::Io | ErrorKind::ConnectionLost | ErrorKind::NotConnected
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.0.kind, self.0.description)?;
        if let Some(detail) = &self.0.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<(ErrorKind, &'static str)> for Error {
    fn from((kind, description): (ErrorKind, &'static str)) -> Self {
        Error(Box::new(Repr {
            kind,
            description,
            detail: None,
            source: None,
        }))
    }
}

impl From<(ErrorKind, &'static str, String)> for Error {
    fn from((kind, description, detail): (ErrorKind, &'static str, String)) -> Self {
        Error(Box::new(Repr {
            kind,
            description,
            detail: Some(detail),
            source: None,
        }))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::TimedOut => ErrorKind::ConnectTimeout,
            _ => ErrorKind::Io,
        };
        Error(Box::new(Repr {
            kind,
            description: "I/O error",
            detail: Some(err.to_string()),
            source: Some(err),
        }))
    }
}

#[cfg(feature = "tls")]
impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error(Box::new(Repr {
            kind: ErrorKind::Io,
            description: "TLS error",
            detail: Some(err.to_string()),
            source: None,
        }))
    }
}

#[cfg(feature = "tls")]
impl From<rustls_pki_types::InvalidDnsNameError> for Error {
    fn from(err: rustls_pki_types::InvalidDnsNameError) -> Self {
        Error(Box::new(Repr {
            kind: ErrorKind::Io,
            description: "invalid DNS name",
            detail: Some(err.to_string()),
            source: None,
        }))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Returns early with an `Err(Error::from($expr))`. Mirrors the lineage's `fail!` macro.
macro_rules! fail {
    ($expr:expr) => {
        return Err(::std::convert::From::from($expr))
    };
}
pub(crate) use fail;
