//! Async client for the latticed control channel.
//!
//! One socket connection carries any number of concurrent requests. A reader
//! task correlates responses to callers by request id and routes pushed
//! state-feed events to the watch request that opened the bus; a writer task
//! serializes outgoing frames.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::debug;

use crate::{
    errors::ClientError,
    protocol::{
        decode_server_message, encode_envelope, MaskedPrefs, Notify, Prefs, Request,
        RequestEnvelope, Response, ResponseData, ServerMessage, StartOptions, Status,
        MAX_MESSAGE_SIZE,
    },
};

pub type Result<T> = std::result::Result<T, ClientError>;

/// Bounded channel capacity for the client writer task.
const WRITER_CHANNEL_CAPACITY: usize = 64;

struct PendingRequest {
    response_tx: oneshot::Sender<Response>,
    notify_tx: Option<mpsc::UnboundedSender<Notify>>,
}

/// Connection to the local latticed daemon.
pub struct LocalClient {
    writer_tx: mpsc::Sender<Vec<u8>>,
    pending: Arc<DashMap<u64, PendingRequest>>,
    next_id: Arc<AtomicU64>,
    _reader_handle: JoinHandle<()>,
    _writer_handle: JoinHandle<()>,
}

impl LocalClient {
    /// Connect to the daemon at the given socket path
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(ClientError::Connect)?;

        let (read_half, mut write_half) = stream.into_split();

        let pending: Arc<DashMap<u64, PendingRequest>> = Arc::new(DashMap::new());

        // All outgoing frames funnel through one channel so writes never
        // interleave, even between concurrent callers and WatchHandle drops
        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(WRITER_CHANNEL_CAPACITY);

        let writer_handle = tokio::spawn(async move {
            while let Some(bytes) = writer_rx.recv().await {
                if let Err(e) = write_half.write_all(&bytes).await {
                    debug!("write to latticed failed: {e}");
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        // Reader task: every frame from latticed is either a response for a
        // waiting caller or an event for an open watch
        let reader_pending = pending.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = read_half;

            loop {
                let mut len_buf = [0u8; 4];
                if let Err(e) = reader.read_exact(&mut len_buf).await {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        debug!("latticed hung up");
                    } else {
                        debug!("read from latticed failed: {e}");
                    }
                    // Failing the whole pending map turns one connection loss
                    // into Disconnected for every waiter and ends every watch
                    reader_pending.clear();
                    return;
                }
                let msg_len = u32::from_be_bytes(len_buf) as usize;

                if msg_len > MAX_MESSAGE_SIZE {
                    debug!("latticed sent a frame over the size limit, closing");
                    reader_pending.clear();
                    return;
                }

                let mut payload = vec![0u8; msg_len];
                if let Err(e) = reader.read_exact(&mut payload).await {
                    debug!("read from latticed failed: {e}");
                    reader_pending.clear();
                    return;
                }

                match decode_server_message(&payload) {
                    Ok(ServerMessage::Response { id, response }) => {
                        if let Some((_, pending_req)) = reader_pending.remove(&id) {
                            let _ = pending_req.response_tx.send(response);
                        } else {
                            // Expected after a WatchHandle drop: the watch
                            // response and the StopWatch ack land here
                            debug!("discarding response for request id={id}, no waiter");
                        }
                    }
                    Ok(ServerMessage::Event { event }) => {
                        let request_id = event.request_id();
                        if let Some(pending_req) = reader_pending.get(&request_id) {
                            if let Some(ref notify_tx) = pending_req.notify_tx {
                                let crate::protocol::ServerEvent::Notify { notify, .. } = event;
                                let _ = notify_tx.send(notify);
                            }
                        }
                    }
                    Err(e) => {
                        debug!("undecodable frame from latticed: {e}");
                    }
                }
            }
        });

        Ok(Self {
            writer_tx,
            pending,
            next_id: Arc::new(AtomicU64::new(1)),
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// Send one request and wait for its response
    async fn roundtrip(&self, request: Request) -> Result<Response> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (response_tx, response_rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingRequest {
                response_tx,
                notify_tx: None,
            },
        );

        let envelope = RequestEnvelope { id, request };
        let bytes = match encode_envelope(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.pending.remove(&id);
                return Err(e.into());
            }
        };

        if self.writer_tx.send(bytes).await.is_err() {
            self.pending.remove(&id);
            return Err(ClientError::Disconnected);
        }

        response_rx.await.map_err(|_| ClientError::Disconnected)
    }

    /// Unwrap a response, mapping daemon-reported errors
    fn expect_ok(response: Response) -> Result<Option<ResponseData>> {
        match response {
            Response::Ok { data } => Ok(data),
            Response::Error { message } => Err(ClientError::Daemon(message)),
        }
    }

    /// Current daemon state snapshot
    pub async fn status(&self) -> Result<Status> {
        match Self::expect_ok(self.roundtrip(Request::Status).await?)? {
            Some(ResponseData::Status(status)) => Ok(status),
            _ => Err(ClientError::UnexpectedResponse { request: "Status" }),
        }
    }

    /// Current daemon preferences
    pub async fn get_prefs(&self) -> Result<Prefs> {
        match Self::expect_ok(self.roundtrip(Request::GetPrefs).await?)? {
            Some(ResponseData::Prefs(prefs)) => Ok(prefs),
            _ => Err(ClientError::UnexpectedResponse { request: "GetPrefs" }),
        }
    }

    /// Apply a masked preference patch; returns the updated preferences
    pub async fn edit_prefs(&self, masked: MaskedPrefs) -> Result<Prefs> {
        match Self::expect_ok(self.roundtrip(Request::EditPrefs(masked)).await?)? {
            Some(ResponseData::Prefs(prefs)) => Ok(prefs),
            _ => Err(ClientError::UnexpectedResponse { request: "EditPrefs" }),
        }
    }

    /// Start (or resume) the backend
    pub async fn start(&self, options: StartOptions) -> Result<()> {
        Self::expect_ok(self.roundtrip(Request::Start(options)).await?)?;
        Ok(())
    }

    /// Begin an interactive login flow; the login URL arrives on the bus
    pub async fn start_login_interactive(&self) -> Result<()> {
        Self::expect_ok(self.roundtrip(Request::StartLoginInteractive).await?)?;
        Ok(())
    }

    /// Log out and invalidate the node key
    pub async fn logout(&self) -> Result<()> {
        Self::expect_ok(self.roundtrip(Request::Logout).await?)?;
        Ok(())
    }

    /// Open a state watch. The request is fired eagerly and its response is
    /// never awaited; events stream into the returned handle until it is
    /// dropped or the connection fails.
    pub async fn watch_state(&self, since: u64) -> Result<WatchHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (response_tx, _response_rx) = oneshot::channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        self.pending.insert(
            id,
            PendingRequest {
                response_tx,
                notify_tx: Some(notify_tx),
            },
        );

        let envelope = RequestEnvelope {
            id,
            request: Request::WatchBus { since },
        };
        let bytes = match encode_envelope(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.pending.remove(&id);
                return Err(e.into());
            }
        };

        if self.writer_tx.send(bytes).await.is_err() {
            self.pending.remove(&id);
            return Err(ClientError::Disconnected);
        }

        Ok(WatchHandle {
            rx: notify_rx,
            watch_id: id,
            pending: self.pending.clone(),
            next_id: self.next_id.clone(),
            writer_tx: self.writer_tx.clone(),
        })
    }
}

/// Live subscription to the daemon's state feed.
///
/// Dropping the handle cancels the subscription: the pending entry is removed
/// so no further events are routed, and a StopWatch is sent best-effort so the
/// daemon stops producing them.
pub struct WatchHandle {
    rx: mpsc::UnboundedReceiver<Notify>,
    watch_id: u64,
    pending: Arc<DashMap<u64, PendingRequest>>,
    next_id: Arc<AtomicU64>,
    writer_tx: mpsc::Sender<Vec<u8>>,
}

impl WatchHandle {
    /// Next event, or None when the subscription has ended (connection lost)
    pub async fn next(&mut self) -> Option<Notify> {
        self.rx.recv().await
    }

    pub fn id(&self) -> u64 {
        self.watch_id
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.pending.remove(&self.watch_id);

        let envelope = RequestEnvelope {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            request: Request::StopWatch {
                watch_id: self.watch_id,
            },
        };
        if let Ok(bytes) = encode_envelope(&envelope) {
            // try_send: Drop cannot await; a full writer queue means the
            // connection is wedged and the daemon will see the close instead
            let _ = self.writer_tx.try_send(bytes);
        }
    }
}
