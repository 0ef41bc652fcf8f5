//! Manager client handle and session internals
//!
//! The session is split into a background reader task that parses frames
//! into typed events, and a cheap-clone [`ManagerClient`] handle that
//! writes actions and awaits their correlated `Response` frames.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use ringline_ami_core::action::{Action, ActionId, LoginAction};
use ringline_ami_core::event::{AmiEvent, ResponseFrame};
use ringline_ami_core::frame::FrameBuffer;

use crate::config::AmiConfig;
use crate::error::{AmiClientError, Result};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// State shared between the client handle, the reader task, and the
/// connection supervisor.
pub(crate) struct Shared {
    pub(crate) config: AmiConfig,
    live: AtomicBool,
    event_tx: broadcast::Sender<AmiEvent>,
    pending: DashMap<String, oneshot::Sender<ResponseFrame>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    action_seq: AtomicU64,
    /// Bumped on every established session so a stale reader task cannot
    /// clear the liveness of its successor.
    epoch: AtomicU64,
}

impl Shared {
    pub(crate) fn new(config: AmiConfig) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            config,
            live: AtomicBool::new(false),
            event_tx,
            pending: DashMap::new(),
            writer: Mutex::new(None),
            action_seq: AtomicU64::new(1),
            epoch: AtomicU64::new(0),
        })
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_not_live(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn next_internal_id(&self) -> ActionId {
        ActionId(format!("ami-{}", self.action_seq.fetch_add(1, Ordering::Relaxed)))
    }

    /// Establish one authenticated session: connect, consume the banner,
    /// log in, then hand the read half to a background reader task.
    pub(crate) async fn establish(self: &Arc<Self>) -> Result<()> {
        let endpoint = self.config.endpoint();
        debug!("Connecting to manager endpoint {}", endpoint);

        let stream = tokio::time::timeout(
            self.config.action_timeout,
            TcpStream::connect(&endpoint),
        )
        .await
        .map_err(|_| AmiClientError::ActionTimeout {
            action: "Connect".to_string(),
            seconds: self.config.action_timeout.as_secs(),
        })??;

        let (mut read_half, mut write_half) = stream.into_split();
        let mut buffer = FrameBuffer::new();

        // The manager greets with a single banner line before any frames.
        let banner = read_banner(&mut read_half, &mut buffer, &self.config).await?;
        debug!("Manager banner: {}", banner);

        // Login handshake happens inline, before the reader task exists.
        let login_id = self.next_internal_id();
        let login = Action::Login(LoginAction {
            username: self.config.username.clone(),
            secret: self.config.secret.clone(),
        });
        write_half.write_all(login.serialize(&login_id).as_bytes()).await?;
        write_half.flush().await?;

        let response = read_login_response(&mut read_half, &mut buffer, &self.config, &login_id).await?;
        if !response.is_success() {
            return Err(AmiClientError::LoginRejected(
                response.message.unwrap_or_else(|| response.response.clone()),
            ));
        }

        *self.writer.lock().await = Some(write_half);
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.live.store(true, Ordering::SeqCst);
        info!("✅ Manager session established to {}", endpoint);

        let shared = self.clone();
        tokio::spawn(async move {
            shared.read_loop(read_half, buffer, epoch).await;
        });

        Ok(())
    }

    async fn read_loop(self: Arc<Self>, mut read_half: OwnedReadHalf, mut buffer: FrameBuffer, epoch: u64) {
        let mut chunk = [0u8; 4096];
        loop {
            // Drain everything already buffered before the next read.
            loop {
                match buffer.next_frame() {
                    Ok(Some(frame)) => match AmiEvent::from_frame(frame) {
                        Ok(event) => self.dispatch(event),
                        Err(e) => warn!("Dropping unparseable manager frame: {}", e),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Malformed manager block: {}", e);
                        break;
                    }
                }
            }

            match read_half.read(&mut chunk).await {
                Ok(0) => {
                    warn!("Manager session closed by peer");
                    break;
                }
                Ok(n) => buffer.extend(&chunk[..n]),
                Err(e) => {
                    error!("Manager session read error: {}", e);
                    break;
                }
            }
        }
        self.teardown(epoch).await;
    }

    fn dispatch(&self, event: AmiEvent) {
        if let AmiEvent::Response(response) = &event {
            if let Some(action_id) = &response.action_id {
                if let Some((_, tx)) = self.pending.remove(action_id.as_str()) {
                    let _ = tx.send(response.clone());
                    return;
                }
            }
            debug!("Uncorrelated response frame: {:?}", response.response);
            return;
        }
        // Nobody listening is fine; the engine may not have started yet.
        let _ = self.event_tx.send(event);
    }

    async fn teardown(&self, epoch: u64) {
        // A reconnect may already have produced a newer session.
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        self.live.store(false, Ordering::SeqCst);
        *self.writer.lock().await = None;
        // Outstanding callers get a clean error instead of a full timeout.
        self.pending.clear();
        info!("Manager session marked not-live");
    }

    async fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(AmiClientError::NotConnected)?;
        if let Err(e) = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        }
        .await
        {
            // A failed write means the socket is gone; the reader will tear
            // the session down too, but do not wait for it.
            self.mark_not_live();
            *guard = None;
            return Err(e.into());
        }
        Ok(())
    }
}

async fn read_banner(
    read_half: &mut OwnedReadHalf,
    buffer: &mut FrameBuffer,
    config: &AmiConfig,
) -> Result<String> {
    let deadline = tokio::time::Instant::now() + config.action_timeout;
    let mut chunk = [0u8; 512];
    loop {
        if let Some(line) = buffer.next_line() {
            return Ok(line);
        }
        let n = tokio::time::timeout_at(deadline, read_half.read(&mut chunk))
            .await
            .map_err(|_| AmiClientError::ActionTimeout {
                action: "Banner".to_string(),
                seconds: config.action_timeout.as_secs(),
            })??;
        if n == 0 {
            return Err(AmiClientError::NotConnected);
        }
        buffer.extend(&chunk[..n]);
    }
}

async fn read_login_response(
    read_half: &mut OwnedReadHalf,
    buffer: &mut FrameBuffer,
    config: &AmiConfig,
    login_id: &ActionId,
) -> Result<ResponseFrame> {
    let deadline = tokio::time::Instant::now() + config.action_timeout;
    let mut chunk = [0u8; 4096];
    loop {
        while let Some(frame) = buffer.next_frame()? {
            if let Ok(AmiEvent::Response(response)) = AmiEvent::from_frame(frame) {
                // Some managers omit the ActionID on the login ack.
                let matches = response
                    .action_id
                    .as_ref()
                    .map(|id| id == login_id)
                    .unwrap_or(true);
                if matches {
                    return Ok(response);
                }
            }
            // Events arriving before the login ack are irrelevant here.
        }
        let n = tokio::time::timeout_at(deadline, read_half.read(&mut chunk))
            .await
            .map_err(|_| AmiClientError::ActionTimeout {
                action: "Login".to_string(),
                seconds: config.action_timeout.as_secs(),
            })??;
        if n == 0 {
            return Err(AmiClientError::NotConnected);
        }
        buffer.extend(&chunk[..n]);
    }
}

/// Cheap-clone handle for sending actions and receiving events.
///
/// All clones share one session; see [`crate::ConnectionManager`] for the
/// supervision side.
#[derive(Clone)]
pub struct ManagerClient {
    pub(crate) shared: Arc<Shared>,
}

impl ManagerClient {
    /// Whether the session is currently established and authenticated.
    pub fn is_live(&self) -> bool {
        self.shared.is_live()
    }

    /// Subscribe to the inbound event stream.
    ///
    /// Every subscriber sees every event from subscription time onward;
    /// a slow subscriber can lag and lose the oldest events.
    pub fn events(&self) -> broadcast::Receiver<AmiEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Send an action and await its correlated `Response` frame.
    ///
    /// The pending entry is registered before the bytes hit the socket, so
    /// a fast responder cannot win the race. The entry is removed on
    /// response, timeout, or send failure; never leaked.
    pub async fn send_action(&self, action: &Action, action_id: &ActionId) -> Result<ResponseFrame> {
        if !self.is_live() {
            return Err(AmiClientError::NotConnected);
        }

        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(action_id.as_str().to_string(), tx);

        if let Err(e) = self.shared.write(action.serialize(action_id).as_bytes()).await {
            self.shared.pending.remove(action_id.as_str());
            return Err(e);
        }

        match tokio::time::timeout(self.shared.config.action_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                // Sender dropped: session torn down while we waited.
                Err(AmiClientError::NotConnected)
            }
            Err(_) => {
                self.shared.pending.remove(action_id.as_str());
                Err(AmiClientError::ActionTimeout {
                    action: action.name().to_string(),
                    seconds: self.shared.config.action_timeout.as_secs(),
                })
            }
        }
    }

    /// Liveness probe: a `Ping` action answered with success.
    pub async fn ping(&self) -> Result<()> {
        let action_id = self.shared.next_internal_id();
        let response = self.send_action(&Action::Ping, &action_id).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(AmiClientError::action_failed(
                "Ping",
                response.message.unwrap_or(response.response),
            ))
        }
    }
}
