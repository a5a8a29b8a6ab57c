//! Configuration surface consumed by the run supervisor.
//!
//! Grounded on the lineage's split between `ConnectionAddr` (how to reach the server) and
//! `RedisConnectionInfo` (what to do once connected) — collapsed into one `Config` struct here
//! since this crate has no URL-parsing front door to justify keeping them apart.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{fail, ErrorKind, Result};

#[cfg(feature = "tls")]
use crate::tls::TlsCertificates;

/// How to reach the server.
#[derive(Debug, Clone)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix { path: PathBuf },
}

/// Bootstrap configuration for Redis Sentinel master discovery.
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub addresses: Vec<(String, u16)>,
    pub master_name: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: Endpoint,
    pub use_ssl: bool,
    #[cfg(feature = "tls")]
    pub tls_certificates: Option<TlsCertificates>,

    pub username: String,
    pub password: String,
    pub clientname: String,
    pub database_index: Option<i64>,

    pub health_check_interval: Duration,
    pub health_check_id: String,

    pub resolve_timeout: Duration,
    pub connect_timeout: Duration,
    pub ssl_handshake_timeout: Duration,
    pub write_timeout: Duration,

    /// Zero disables reconnection entirely; a failed run ends the connection for good.
    pub reconnect_wait_interval: Duration,

    pub max_read_size: usize,
    pub read_buffer_append_size: usize,

    #[cfg(feature = "sentinel")]
    pub sentinel: Option<SentinelConfig>,
}

impl Config {
    pub fn new(endpoint: Endpoint) -> Self {
        Config {
            endpoint,
            use_ssl: false,
            #[cfg(feature = "tls")]
            tls_certificates: None,
            username: String::new(),
            password: String::new(),
            clientname: String::new(),
            database_index: None,
            health_check_interval: Duration::from_secs(20),
            health_check_id: "redis-resp3".to_string(),
            resolve_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            ssl_handshake_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            reconnect_wait_interval: Duration::from_secs(1),
            max_read_size: 512 * 1024 * 1024,
            read_buffer_append_size: 16 * 1024,
            #[cfg(feature = "sentinel")]
            sentinel: None,
        }
    }

    fn is_unix(&self) -> bool {
        matches!(self.endpoint, Endpoint::Unix { .. })
    }

    /// Rejects combinations the transport layer cannot support before any I/O is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.is_unix() && self.use_ssl {
            fail!((
                ErrorKind::UnixSocketsSslUnsupported,
                "TLS is not supported over a UNIX domain socket"
            ));
        }
        #[cfg(feature = "sentinel")]
        if self.is_unix() && self.sentinel.is_some() {
            fail!((
                ErrorKind::SentinelUnixSocketsUnsupported,
                "Sentinel discovery is not supported alongside a UNIX domain socket endpoint"
            ));
        }
        Ok(())
    }

    fn auth_is_empty(&self) -> bool {
        self.password.is_empty() && (self.username.is_empty() || self.username == "default")
    }

    /// Builds the HELLO/AUTH/SETNAME/SELECT setup request as described for the run supervisor.
    ///
    /// AUTH and SETNAME are both trailing arguments of the single HELLO push, not separate
    /// commands — `HELLO 3 [AUTH user password] [SETNAME clientname]`.
    pub fn build_setup_request(&self) -> crate::request::Request {
        let mut request = crate::request::Request::new();
        let mut hello_args: Vec<&str> = vec!["3"];
        if !self.auth_is_empty() {
            let user = if self.username.is_empty() {
                "default"
            } else {
                &self.username
            };
            hello_args.extend(["AUTH", user, &self.password]);
        }
        if !self.clientname.is_empty() {
            hello_args.extend(["SETNAME", &self.clientname]);
        }
        request.push("HELLO", hello_args);
        match self.database_index {
            Some(db) if db != 0 => {
                request.push("SELECT", [db.to_string().as_str()]);
            }
            _ => {}
        }
        request.set_priority(true);
        request
    }
}
