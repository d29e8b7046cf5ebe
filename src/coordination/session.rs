//! Coordination Session
//!
//! Manages the TCP session to the ZooKeeper coordination service: a
//! reachability probe before the full handshake, keepalive pings, a reader
//! task that demultiplexes replies by transaction id and hands watch
//! notifications off to a channel, and reconnect-on-drop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use super::protocol::{
    self, error_code, keeper_state, op, xid, ConnectRequest, ConnectResponse, EventKind,
    ReplyHeader, RequestHeader, WatchedEvent,
};
use super::CoordinationClient;
use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};

type Reader = FramedRead<OwnedReadHalf, LengthDelimitedCodec>;
type Writer = FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>;

/// A decoded reply frame routed back to the waiting request
struct Reply {
    header: ReplyHeader,
    body: Bytes,
}

/// One live TCP session to the coordination service
struct Connection {
    writer: Mutex<Writer>,
    pending: Mutex<HashMap<i32, oneshot::Sender<Reply>>>,
    next_xid: AtomicI32,
    alive: AtomicBool,
    session_id: i64,
    request_timeout: Duration,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Send one request frame and wait for its reply. The reply header's
    /// error code is returned to the caller uninterpreted, since some
    /// operations treat specific codes (NoNode, NodeExists) as answers
    /// rather than failures.
    async fn request(&self, op_code: i32, encode_body: impl FnOnce(&mut BytesMut)) -> Result<Reply> {
        if !self.is_alive() {
            return Err(Error::Session("session not connected".to_string()));
        }

        let req_xid = self.next_xid.fetch_add(1, Ordering::SeqCst);
        let mut buf = BytesMut::new();
        RequestHeader {
            xid: req_xid,
            op: op_code,
        }
        .encode_into(&mut buf);
        encode_body(&mut buf);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(req_xid, tx);

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send(buf.freeze()).await {
                self.pending.lock().await.remove(&req_xid);
                self.alive.store(false, Ordering::SeqCst);
                return Err(Error::Session(format!("session write failed: {}", e)));
            }
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // Sender dropped: the reader task died and drained the pending map
            Ok(Err(_)) => Err(Error::Session("session lost while awaiting reply".to_string())),
            Err(_) => {
                self.pending.lock().await.remove(&req_xid);
                Err(Error::Coordination(format!(
                    "no reply within {:?}",
                    self.request_timeout
                )))
            }
        }
    }

    /// Send a keepalive ping; the reply is consumed by the reader task
    async fn ping(&self) -> Result<()> {
        let mut buf = BytesMut::new();
        RequestHeader {
            xid: xid::PING,
            op: op::PING,
        }
        .encode_into(&mut buf);

        let mut writer = self.writer.lock().await;
        writer
            .send(buf.freeze())
            .await
            .map_err(|e| Error::Session(format!("ping failed: {}", e)))
    }

    /// Release the session: best-effort close-session request, then stop
    /// the background tasks
    async fn shutdown(&self) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }

        let mut buf = BytesMut::new();
        RequestHeader {
            xid: self.next_xid.fetch_add(1, Ordering::SeqCst),
            op: op::CLOSE_SESSION,
        }
        .encode_into(&mut buf);

        let close = async {
            let mut writer = self.writer.lock().await;
            let _ = writer.send(buf.freeze()).await;
        };
        if timeout(Duration::from_secs(1), close).await.is_err() {
            tracing::debug!("close-session request timed out");
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            task.abort();
        }
    }
}

/// Reader task: routes replies to pending requests and watch notifications
/// onto the watch channel, so they reach the election loop instead of
/// running inside this I/O task
async fn run_reader(conn: Arc<Connection>, mut reader: Reader, watch_tx: mpsc::Sender<WatchedEvent>) {
    loop {
        match reader.next().await {
            Some(Ok(frame)) => {
                let mut buf = frame.freeze();
                let header = match ReplyHeader::decode(&mut buf) {
                    Ok(header) => header,
                    Err(e) => {
                        tracing::warn!("malformed reply frame: {}", e);
                        break;
                    }
                };

                match header.xid {
                    xid::NOTIFICATION => match WatchedEvent::decode(&mut buf) {
                        Ok(event) => {
                            if event.kind == EventKind::SessionState
                                && event.state == keeper_state::EXPIRED
                            {
                                tracing::warn!("coordination session expired");
                                conn.alive.store(false, Ordering::SeqCst);
                            }
                            if watch_tx.try_send(event).is_err() {
                                tracing::debug!("watch notification dropped: no consumer");
                            }
                        }
                        Err(e) => {
                            tracing::warn!("malformed watch notification: {}", e);
                            break;
                        }
                    },
                    xid::PING => {
                        tracing::trace!("keepalive acknowledged");
                    }
                    reply_xid => {
                        let waiter = conn.pending.lock().await.remove(&reply_xid);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(Reply { header, body: buf });
                            }
                            None => tracing::debug!("reply for unknown xid {}", reply_xid),
                        }
                    }
                }
            }
            Some(Err(e)) => {
                if conn.is_alive() {
                    tracing::warn!("session read error: {}", e);
                }
                break;
            }
            None => {
                if conn.is_alive() {
                    tracing::info!("coordination service closed the connection");
                }
                break;
            }
        }
    }

    conn.alive.store(false, Ordering::SeqCst);
    // Dropping the senders fails every in-flight request
    conn.pending.lock().await.clear();
}

/// Keepalive task: pings at a third of the negotiated session timeout
async fn run_pinger(conn: Arc<Connection>, interval: Duration) {
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !conn.is_alive() {
            break;
        }
        if let Err(e) = conn.ping().await {
            tracing::warn!("keepalive failed: {}", e);
            break;
        }
    }
}

/// Session manager for the coordination service
pub struct CoordinationSession {
    config: CoordinatorConfig,
    election_path: String,
    watch_tx: mpsc::Sender<WatchedEvent>,
    conn: RwLock<Option<Arc<Connection>>>,
}

impl CoordinationSession {
    /// Probe reachability, open a session, and ensure the parent election
    /// path exists. Probe failure within the timeout is fatal to the
    /// election attempt; the caller decides whether to retry the whole
    /// procedure later.
    pub async fn connect(
        config: CoordinatorConfig,
        election_path: String,
        watch_tx: mpsc::Sender<WatchedEvent>,
    ) -> Result<Self> {
        let session = Self {
            config,
            election_path,
            watch_tx,
            conn: RwLock::new(None),
        };
        session.ensure_connected().await?;
        Ok(session)
    }

    fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Open a TCP connection and run the session handshake
    async fn open_connection(&self) -> Result<Arc<Connection>> {
        let address = self.address();
        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs);

        // Reachability probe before committing to the full handshake
        match timeout(connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(probe)) => drop(probe),
            Ok(Err(e)) => {
                return Err(Error::Connectivity {
                    address,
                    reason: e.to_string(),
                })
            }
            Err(_) => return Err(Error::ConnectionTimeout(address)),
        }

        let stream = match timeout(connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Error::Connectivity {
                    address,
                    reason: e.to_string(),
                })
            }
            Err(_) => return Err(Error::ConnectionTimeout(address)),
        };
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, LengthDelimitedCodec::new());
        let mut writer = FramedWrite::new(write_half, LengthDelimitedCodec::new());

        let request = ConnectRequest::new(self.config.session_timeout_ms as i32);
        writer
            .send(request.encode())
            .await
            .map_err(|e| Error::Session(format!("handshake write failed: {}", e)))?;

        let frame = match timeout(connect_timeout, reader.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => return Err(Error::Session(format!("handshake read failed: {}", e))),
            Ok(None) => return Err(Error::Session("connection closed during handshake".to_string())),
            Err(_) => return Err(Error::ConnectionTimeout(address)),
        };
        let response = ConnectResponse::decode(&mut frame.freeze())?;
        if !response.is_valid() {
            return Err(Error::Session("session rejected by the server".to_string()));
        }

        let negotiated = Duration::from_millis(response.timeout_ms as u64);
        let conn = Arc::new(Connection {
            writer: Mutex::new(writer),
            pending: Mutex::new(HashMap::new()),
            next_xid: AtomicI32::new(1),
            alive: AtomicBool::new(true),
            session_id: response.session_id,
            request_timeout: negotiated,
            tasks: std::sync::Mutex::new(Vec::new()),
        });

        let reader_task = tokio::spawn(run_reader(
            Arc::clone(&conn),
            reader,
            self.watch_tx.clone(),
        ));
        let ping_task = tokio::spawn(run_pinger(Arc::clone(&conn), negotiated / 3));
        conn.tasks.lock().unwrap().extend([reader_task, ping_task]);

        tracing::info!(
            "coordination session 0x{:x} established at {} (timeout {:?})",
            conn.session_id,
            self.address(),
            negotiated
        );

        Ok(conn)
    }

    /// Idempotently create every component of the parent election path
    async fn ensure_path(&self, conn: &Connection) -> Result<()> {
        let mut acc = String::new();
        for part in self.election_path.split('/').filter(|p| !p.is_empty()) {
            acc.push('/');
            acc.push_str(part);
            let path = acc.clone();
            let reply = conn
                .request(op::CREATE, |buf| protocol::encode_create(buf, &path, b"", 0))
                .await?;
            match reply.header.err {
                error_code::OK | error_code::NODE_EXISTS => {}
                err => return Err(protocol::server_error(err)),
            }
        }
        Ok(())
    }

    /// Current connection, or a session error when none is live
    async fn current(&self) -> Result<Arc<Connection>> {
        let conn = self.conn.read().await;
        match &*conn {
            Some(conn) if conn.is_alive() => Ok(Arc::clone(conn)),
            _ => Err(Error::Session("session not connected".to_string())),
        }
    }
}

#[async_trait]
impl CoordinationClient for CoordinationSession {
    async fn ensure_connected(&self) -> Result<()> {
        {
            let conn = self.conn.read().await;
            if let Some(conn) = &*conn {
                if conn.is_alive() {
                    return Ok(());
                }
            }
        }

        let mut guard = self.conn.write().await;
        if let Some(conn) = &*guard {
            if conn.is_alive() {
                return Ok(());
            }
        }
        if let Some(old) = guard.take() {
            tracing::warn!("coordination session dropped, reconnecting");
            old.shutdown().await;
        }

        let conn = self.open_connection().await?;
        self.ensure_path(&conn).await?;
        *guard = Some(conn);
        Ok(())
    }

    async fn create_ephemeral_sequential(&self, path_prefix: &str) -> Result<String> {
        let conn = self.current().await?;
        let reply = conn
            .request(op::CREATE, |buf| {
                protocol::encode_create(
                    buf,
                    path_prefix,
                    b"",
                    protocol::create_flags::EPHEMERAL_SEQUENTIAL,
                )
            })
            .await?;
        if reply.header.err != error_code::OK {
            return Err(protocol::server_error(reply.header.err));
        }
        let mut body = reply.body;
        protocol::decode_create_response(&mut body)
    }

    async fn get_children(&self, path: &str, watch: bool) -> Result<Vec<String>> {
        let conn = self.current().await?;
        let reply = conn
            .request(op::GET_CHILDREN, |buf| {
                protocol::encode_get_children(buf, path, watch)
            })
            .await?;
        if reply.header.err != error_code::OK {
            return Err(protocol::server_error(reply.header.err));
        }
        let mut body = reply.body;
        protocol::decode_children(&mut body)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let conn = self.current().await?;
        let reply = conn
            .request(op::EXISTS, |buf| protocol::encode_exists(buf, path, false))
            .await?;
        match reply.header.err {
            error_code::OK => Ok(true),
            error_code::NO_NODE => Ok(false),
            err => Err(protocol::server_error(err)),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let conn = self.current().await?;
        let reply = conn
            .request(op::DELETE, |buf| protocol::encode_delete(buf, path))
            .await?;
        match reply.header.err {
            // Already gone counts as removed
            error_code::OK | error_code::NO_NODE => Ok(()),
            err => Err(protocol::server_error(err)),
        }
    }

    async fn is_connected(&self) -> bool {
        let conn = self.conn.read().await;
        matches!(&*conn, Some(conn) if conn.is_alive())
    }

    async fn close(&self) {
        let conn = self.conn.write().await.take();
        if let Some(conn) = conn {
            tracing::info!("closing coordination session 0x{:x}", conn.session_id);
            conn.shutdown().await;
        }
    }
}
