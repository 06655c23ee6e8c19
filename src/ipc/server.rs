//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications of
//! state events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};

use crate::events::{Input, StateEvent};
use crate::lifecycle::LifecycleHandle;
use crate::state::State;

use super::protocol::{DaemonStatus, Notification, Request, Response, MAX_FRAME_LEN};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Everything a client handler needs
struct Shared {
    status: RwLock<ServerState>,
    input_tx: mpsc::Sender<Input>,
    event_tx: broadcast::Sender<StateEvent>,
    lifecycle: LifecycleHandle,
}

/// Pipeline view kept current from state events
struct ServerState {
    start_time: Instant,
    current_state: State,
    cycles_completed: u64,
}

impl Server {
    /// Bind the socket at `socket_path`, replacing a stale one
    pub fn new(
        socket_path: &Path,
        input_tx: mpsc::Sender<Input>,
        event_tx: broadcast::Sender<StateEvent>,
        lifecycle: LifecycleHandle,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
                .context("failed to restrict socket permissions")?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let shared = Arc::new(Shared {
            status: RwLock::new(ServerState {
                start_time: Instant::now(),
                current_state: State::Idle,
                cycles_completed: 0,
            }),
            input_tx,
            event_tx,
            lifecycle,
        });

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            shared,
            shutdown_tx,
        })
    }

    /// Fold a state event into the status snapshot
    pub async fn observe(&self, event: &StateEvent) {
        match event {
            StateEvent::Transition { to, .. } => {
                self.shared.status.write().await.current_state = *to;
            }
            StateEvent::CycleComplete { .. } => {
                self.shared.status.write().await.cycles_completed += 1;
            }
            _ => {}
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let shared = Arc::clone(&self.shared);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, shared) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();

        // Frames are read on their own task so a half-read frame is never
        // dropped while a notification is being pushed
        let (request_tx, mut request_rx) = mpsc::channel::<Result<Request, String>>(8);
        let read_task = tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(body)) => {
                        let request = serde_json::from_slice(&body).map_err(|e| e.to_string());
                        if request_tx.send(request).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(?e, "client read failed");
                        break;
                    }
                }
            }
        });

        let mut events: Option<broadcast::Receiver<StateEvent>> = None;
        let result = loop {
            tokio::select! {
                request = request_rx.recv() => {
                    let Some(request) = request else {
                        debug!("client disconnected");
                        break Ok(());
                    };
                    let response = match request {
                        Ok(request) => {
                            debug!(?request, "received request");
                            if request == Request::Subscribe && events.is_none() {
                                events = Some(shared.event_tx.subscribe());
                                debug!("client subscribed to notifications");
                            }
                            Self::process_request(request, &shared).await
                        }
                        Err(message) => Response::error("bad_request", message),
                    };
                    if let Err(e) = send_message(&mut writer, &response).await {
                        break Err(e);
                    }
                }
                event = next_event(&mut events) => {
                    match event {
                        Ok(event) => {
                            let note = Notification::StateEvent { event };
                            if let Err(e) = send_message(&mut writer, &note).await {
                                break Err(e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => events = None,
                    }
                }
            }
        };

        read_task.abort();
        result
    }

    /// Process a request and return a response
    async fn process_request(request: Request, shared: &Shared) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let status = shared.status.read().await;
                Response::Status(DaemonStatus {
                    running: shared.lifecycle.is_running(),
                    state: status.current_state,
                    cycles_completed: status.cycles_completed,
                    uptime_secs: status.start_time.elapsed().as_secs(),
                    ..DaemonStatus::default()
                })
            }

            Request::Submit { text } => Self::submit(text, shared).await,

            Request::Subscribe => Response::Subscribed,
        }
    }

    async fn submit(text: String, shared: &Shared) -> Response {
        let text = text.trim();
        if text.is_empty() {
            return Response::error("invalid", "text must not be empty");
        }
        if !shared.lifecycle.is_running() {
            return Response::error("unavailable", "daemon is not running");
        }

        let (reply, accepted) = oneshot::channel();
        let input = Input::Submit {
            text: text.to_string(),
            reply,
        };
        if shared.input_tx.send(input).await.is_err() {
            return Response::error("unavailable", "state machine stopped");
        }

        match accepted.await {
            Ok(Ok(cycle)) => {
                info!(%cycle, "submitted text accepted");
                Response::Accepted { cycle }
            }
            Ok(Err(state)) => Response::error("busy", format!("pipeline is {state}")),
            Err(_) => Response::error("unavailable", "state machine stopped"),
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Next event for a subscribed client; never resolves otherwise
async fn next_event(
    events: &mut Option<broadcast::Receiver<StateEvent>>,
) -> Result<StateEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read one length-prefixed frame; `None` on clean EOF or an oversized frame
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        warn!(len, "message too large, disconnecting");
        return Ok(None);
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Send a length-prefixed JSON message
async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = u32::try_from(msg_bytes.len())
        .context("message too large")?
        .to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};

    use super::*;
    use crate::events::CycleId;
    use crate::lifecycle::{Lifecycle, Phase};

    struct Fixture {
        _dir: tempfile::TempDir,
        server: Arc<Server>,
        input_rx: mpsc::Receiver<Input>,
        event_tx: broadcast::Sender<StateEvent>,
        lifecycle: Lifecycle,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let (input_tx, input_rx) = mpsc::channel(8);
            let (event_tx, _) = broadcast::channel(16);
            let lifecycle = Lifecycle::new();
            lifecycle.advance(Phase::Running);
            let server = Server::new(
                &dir.path().join("daemon.sock"),
                input_tx,
                event_tx.clone(),
                lifecycle.handle(),
            )
            .unwrap();
            let server = Arc::new(server);
            let running = Arc::clone(&server);
            tokio::spawn(async move { running.run().await });

            Self {
                _dir: dir,
                server,
                input_rx,
                event_tx,
                lifecycle,
            }
        }

        async fn connect(&self) -> UnixStream {
            UnixStream::connect(&self.server.socket_path).await.unwrap()
        }
    }

    async fn call(stream: &mut UnixStream, request: Value) -> Value {
        send_message(stream, &request).await.unwrap();
        receive(stream).await
    }

    async fn receive(stream: &mut UnixStream) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(2), read_frame(stream))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        serde_json::from_slice(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_socket_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let fixture = Fixture::new();
        let mode = std::fs::metadata(&fixture.server.socket_path)
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let fixture = Fixture::new();
        fixture
            .server
            .observe(&StateEvent::Transition {
                from: State::Idle,
                to: State::Armed,
            })
            .await;
        fixture
            .server
            .observe(&StateEvent::CycleComplete {
                cycle: CycleId(1),
                duration_ms: 900,
            })
            .await;

        let mut client = fixture.connect().await;
        assert_eq!(call(&mut client, json!({"type": "ping"})).await, json!({"type": "pong"}));

        let status = call(&mut client, json!({"type": "get_status"})).await;
        assert_eq!(status["type"], "status");
        assert_eq!(status["state"], "armed");
        assert_eq!(status["running"], true);
        assert_eq!(status["cycles_completed"], 1);
        assert_eq!(status["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_submit_forwards_to_state_machine() {
        let mut fixture = Fixture::new();
        let mut client = fixture.connect().await;

        let pending = tokio::spawn(async move {
            call(&mut client, json!({"type": "submit", "text": " flashlight on "})).await
        });

        match fixture.input_rx.recv().await.unwrap() {
            Input::Submit { text, reply } => {
                assert_eq!(text, "flashlight on");
                reply.send(Ok(CycleId(4))).unwrap();
            }
            other => panic!("unexpected input {other:?}"),
        }
        assert_eq!(
            pending.await.unwrap(),
            json!({"type": "accepted", "cycle": 4})
        );
    }

    #[tokio::test]
    async fn test_submit_while_busy() {
        let mut fixture = Fixture::new();
        let mut client = fixture.connect().await;

        let pending = tokio::spawn(async move {
            call(&mut client, json!({"type": "submit", "text": "play jazz"})).await
        });
        if let Some(Input::Submit { reply, .. }) = fixture.input_rx.recv().await {
            reply.send(Err(State::Capturing)).unwrap();
        }

        let response = pending.await.unwrap();
        assert_eq!(response["type"], "error");
        assert_eq!(response["code"], "busy");
    }

    #[tokio::test]
    async fn test_submit_rejected_when_stopping_or_empty() {
        let fixture = Fixture::new();
        let mut client = fixture.connect().await;

        let response = call(&mut client, json!({"type": "submit", "text": "   "})).await;
        assert_eq!(response["code"], "invalid");

        fixture.lifecycle.advance(Phase::Stopping);
        let response = call(&mut client, json!({"type": "submit", "text": "flashlight on"})).await;
        assert_eq!(response["code"], "unavailable");
    }

    #[tokio::test]
    async fn test_malformed_request_keeps_connection() {
        let fixture = Fixture::new();
        let mut client = fixture.connect().await;

        let response = call(&mut client, json!({"type": "set_mode"})).await;
        assert_eq!(response["code"], "bad_request");
        assert_eq!(call(&mut client, json!({"type": "ping"})).await["type"], "pong");
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let fixture = Fixture::new();
        let mut client = fixture.connect().await;

        assert_eq!(
            call(&mut client, json!({"type": "subscribe"})).await,
            json!({"type": "subscribed"})
        );
        fixture
            .event_tx
            .send(StateEvent::WakeDetected { cycle: CycleId(2) })
            .unwrap();

        let note = receive(&mut client).await;
        assert_eq!(note["type"], "state_event");
        assert_eq!(note["event"], json!({"type": "wake_detected", "cycle": 2}));
    }

    #[tokio::test]
    async fn test_oversized_frame_disconnects() {
        let fixture = Fixture::new();
        let mut client = fixture.connect().await;

        let len = (MAX_FRAME_LEN as u32 + 1).to_le_bytes();
        client.write_all(&len).await.unwrap();

        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);
    }

    #[tokio::test]
    async fn test_shutdown_removes_socket() {
        let fixture = Fixture::new();
        assert!(fixture.server.socket_path.exists());
        fixture.server.shutdown().await;
        assert!(!fixture.server.socket_path.exists());
    }
}
