//! Component F — the run supervisor.
//!
//! Owns one connection's full lifecycle: resolve (optionally via Sentinel), connect, TLS
//! handshake, setup request, then the reader/writer/health-check trio running concurrently until
//! one of them fails, at which point everything is torn down and, unless reconnection is
//! disabled, retried after a jittered backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, Endpoint};
use crate::error::{fail, Error, ErrorKind, Result};
use crate::fsm::{ReaderFsm, WriterAction, WriterFsm};
use crate::health;
use crate::multiplexer::Multiplexer;
use crate::push::PushManager;
use crate::read_buffer::ReadBuffer;
use crate::request::Request;
use crate::resp3::{Node, ParseEvent, Parser, Type};
use crate::retry;
use crate::transport::{self, Transport};

#[cfg(feature = "sentinel")]
use crate::sentinel;

/// State shared between the public [`crate::connection::Connection`] handle and the background
/// run task.
pub(crate) struct Shared {
    pub mux: Arc<Mutex<Multiplexer>>,
    pub push: PushManager,
    pub work_available: Arc<Notify>,
    pub cancellation: CancellationToken,
    pub disable_reconnect: AtomicBool,
    connected: AtomicBool,
}

impl Shared {
    pub fn new() -> Arc<Self> {
        let push = PushManager::new();
        Arc::new(Shared {
            mux: Arc::new(Mutex::new(Multiplexer::new(push.clone()))),
            push,
            work_available: Arc::new(Notify::new()),
            cancellation: CancellationToken::new(),
            disable_reconnect: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Runs the reconnect loop until the connection is cancelled (resolves `Ok`) or reconnection is
/// disabled after a failed cycle (resolves with that cycle's error).
pub(crate) async fn run(config: Config, shared: Arc<Shared>) -> Result<()> {
    let mut backoff = retry::reconnect_backoff(config.reconnect_wait_interval);
    loop {
        if shared.cancellation.is_cancelled() {
            // Permanent stop before ever connecting: anything parked `waiting` (e.g. an `exec`
            // submitted before `run` was even polled) would otherwise await a response that will
            // never come.
            shared.mux.lock().unwrap().cancel_waiting();
            return Ok(());
        }
        let outcome = run_once(&config, &shared).await;
        shared.connected.store(false, Ordering::Relaxed);
        shared.mux.lock().unwrap().cancel_on_conn_lost();
        shared.push.clear_receiver();

        if let Err(e) = &outcome {
            warn!(error = %e, "connection cycle ended");
        }
        if shared.cancellation.is_cancelled() {
            shared.mux.lock().unwrap().cancel_waiting();
            return Ok(());
        }
        if config.reconnect_wait_interval.is_zero() || shared.disable_reconnect.load(Ordering::Relaxed) {
            // Reconnection is never coming back: elements `cancel_on_conn_lost` retained as
            // `waiting` (retry-safe, unwritten) would otherwise hang their caller's `exec` forever.
            shared.mux.lock().unwrap().cancel_waiting();
            return outcome;
        }
        let wait = backoff.next().unwrap_or(config.reconnect_wait_interval);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shared.cancellation.cancelled() => {
                shared.mux.lock().unwrap().cancel_waiting();
                return Ok(());
            }
        }
    }
}

async fn run_once(config: &Config, shared: &Arc<Shared>) -> Result<()> {
    config.validate()?;

    #[cfg(feature = "sentinel")]
    let master_override = if let Some(sentinel_cfg) = &config.sentinel {
        let discovery = sentinel::discover_master(
            &sentinel_cfg.addresses,
            &sentinel_cfg.master_name,
            config.connect_timeout,
            config.resolve_timeout,
        )
        .await?;
        verify_master_role(&discovery.master, config).await?;
        Some(discovery.master)
    } else {
        None
    };
    #[cfg(not(feature = "sentinel"))]
    let master_override: Option<(String, u16)> = None;

    let mut transport = connect(config, master_override.as_ref()).await?;
    perform_setup(&mut transport, config).await?;

    shared.connected.store(true, Ordering::Relaxed);
    info!("connection established");

    // A child token: cancelled automatically if the whole connection is cancelled, but cancelling
    // it here (to tear down the other two tasks once one of reader/writer/health fails) must not
    // reach back up and cancel `shared.cancellation` itself, or the next reconnect attempt would
    // see it already cancelled and give up instead of retrying.
    let cancellation = shared.cancellation.child_token();
    let (reader_half, writer_half) = tokio::io::split(transport);

    let reader = reader_loop(
        shared.clone(),
        reader_half,
        config.max_read_size,
        config.read_buffer_append_size,
        cancellation.clone(),
    );
    let writer = writer_loop(shared.clone(), writer_half, config.write_timeout, cancellation.clone());
    let health_check = health::run_health_check(
        shared.mux.clone(),
        config.health_check_interval,
        config.health_check_id.clone(),
        shared.work_available.clone(),
        cancellation.clone(),
    );

    let result = tokio::select! {
        r = reader => r,
        r = writer => r,
        r = health_check => r,
        _ = shared.cancellation.cancelled() => Ok(()),
    };
    cancellation.cancel();
    result
}

async fn connect(config: &Config, master_override: Option<&(String, u16)>) -> Result<Transport> {
    if let Some((host, port)) = master_override {
        return connect_tcp_maybe_tls(config, host, *port).await;
    }
    match &config.endpoint {
        Endpoint::Tcp { host, port } => connect_tcp_maybe_tls(config, host, *port).await,
        Endpoint::Unix { path } => {
            #[cfg(unix)]
            {
                Transport::connect_unix(path, config.connect_timeout).await
            }
            #[cfg(not(unix))]
            {
                let _ = path;
                fail!((
                    ErrorKind::UnixSocketsUnsupported,
                    "UNIX domain sockets are not supported on this platform"
                ));
            }
        }
    }
}

async fn connect_tcp_maybe_tls(config: &Config, host: &str, port: u16) -> Result<Transport> {
    let addr = transport::resolve(host, port, config.resolve_timeout).await?;
    let tcp = Transport::connect_tcp(addr, config.connect_timeout).await?;
    if !config.use_ssl {
        return Ok(tcp);
    }
    #[cfg(feature = "tls")]
    {
        let Transport::Tcp(tcp) = tcp else {
            unreachable!("connect_tcp always returns Transport::Tcp")
        };
        let tls_config = crate::tls::build_client_config(config.tls_certificates.clone())?;
        let connector = tokio_rustls::TlsConnector::from(tls_config);
        let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
            .map_err(Error::from)?;
        Transport::upgrade_to_tls(tcp, connector, server_name, config.ssl_handshake_timeout).await
    }
    #[cfg(not(feature = "tls"))]
    {
        let _ = &tcp;
        fail!((ErrorKind::Io, "TLS was requested but this build has the `tls` feature disabled"));
    }
}

#[cfg(feature = "sentinel")]
async fn verify_master_role(master: &(String, u16), config: &Config) -> Result<()> {
    let addr = transport::resolve(&master.0, master.1, config.resolve_timeout).await?;
    let mut stream = tokio::time::timeout(config.connect_timeout, tokio::net::TcpStream::connect(addr))
        .await
        .map_err(|_| Error::from((ErrorKind::ConnectTimeout, "timed out connecting to verify master role")))?
        .map_err(Error::from)?;
    sentinel::verify_role_is_master(&mut stream, config.resolve_timeout).await
}

async fn exchange_raw<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin>(
    transport: &mut T,
    request: &Request,
    expected_replies: usize,
    write_timeout: Duration,
) -> Result<Vec<Vec<Node>>> {
    tokio::time::timeout(write_timeout, transport.write_all(request.as_bytes()))
        .await
        .map_err(|_| Error::from((ErrorKind::WriteTimeout, "setup request write timed out")))?
        .map_err(Error::from)?;

    let mut parser = Parser::new();
    let mut buf = Vec::new();
    let mut replies = Vec::new();
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
        let n = transport.read(&mut chunk).await.map_err(Error::from)?;
        if n == 0 {
            fail!((ErrorKind::Resp3Hello, "connection closed during setup"));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(replies)
}

async fn perform_setup(transport: &mut Transport, config: &Config) -> Result<()> {
    let request = config.build_setup_request();
    if request.expected_responses() == 0 {
        return Ok(());
    }
    let replies = exchange_raw(
        transport,
        &request,
        request.expected_responses(),
        config.write_timeout,
    )
    .await?;
    for reply in &replies {
        if let Some(root) = reply.first() {
            if matches!(root.data_type, Type::SimpleError | Type::BlobError) {
                fail!((
                    ErrorKind::Resp3Hello,
                    "server rejected the setup request",
                    String::from_utf8_lossy(&root.value).into_owned()
                ));
            }
        }
    }
    Ok(())
}

async fn reader_loop(
    shared: Arc<Shared>,
    mut reader_half: impl tokio::io::AsyncRead + Unpin,
    max_read_size: usize,
    append_size: usize,
    cancellation: CancellationToken,
) -> Result<()> {
    let mut reader_fsm = ReaderFsm::new();
    let mut read_buf = ReadBuffer::new(max_read_size, append_size);
    loop {
        {
            let mut mux = shared.mux.lock().unwrap();
            reader_fsm.drain(&mut mux, &mut read_buf)?;
        }
        tokio::select! {
            res = read_buf.fill_some(&mut reader_half) => { res?; }
            _ = cancellation.cancelled() => return Ok(()),
        }
    }
}

async fn writer_loop(
    shared: Arc<Shared>,
    mut writer_half: impl tokio::io::AsyncWrite + Unpin,
    write_timeout: Duration,
    cancellation: CancellationToken,
) -> Result<()> {
    let mut writer_fsm = WriterFsm::new();
    loop {
        let action = {
            let mut mux = shared.mux.lock().unwrap();
            writer_fsm.resume(&mut mux, cancellation.is_cancelled())
        };
        match action {
            WriterAction::Done => return Ok(()),
            WriterAction::Wait => {
                tokio::select! {
                    _ = shared.work_available.notified() => {}
                    _ = cancellation.cancelled() => return Ok(()),
                }
            }
            WriterAction::Write { .. } => {
                let bytes = shared.mux.lock().unwrap().write_buffer().to_vec();
                tokio::time::timeout(write_timeout, writer_half.write_all(&bytes))
                    .await
                    .map_err(|_| Error::from((ErrorKind::WriteTimeout, "write timed out")))?
                    .map_err(Error::from)?;
                let mut mux = shared.mux.lock().unwrap();
                writer_fsm.write_completed(&mut mux);
            }
        }
    }
}

