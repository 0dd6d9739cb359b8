use crate::config::{SyncConfig, TetherConfig};
use crate::errors::TetherError;
use crate::tether::capture::CaptureCoordinator;
use crate::tether::events::{ParameterControl, SessionEvent, SessionSnapshot};
use crate::tether::resolver::ConfigKeyResolver;
use crate::tether::sync_loop::{Command, Reply, SyncLoop, SyncLoopParts};
use crate::transport::{CameraTransport, TransportEvent};
use crate::types::{CameraParameters, CandidateTable, CaptureResult, ConnectionState, SemanticParam};
use crate::workspace::{provider_from_config, WorkspaceProvider};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Builder for a [`TetherSession`].
pub struct SessionBuilder {
    sync: SyncConfig,
    candidates: CandidateTable,
    workspace: Option<Arc<dyn WorkspaceProvider>>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            candidates: CandidateTable::default(),
            workspace: None,
        }
    }
}

impl SessionBuilder {
    /// Timing, candidate keys and workspace provider taken from `config`.
    pub fn from_config(config: &TetherConfig) -> Result<Self, TetherError> {
        config.validate()?;
        Ok(Self {
            sync: config.sync.clone(),
            candidates: config.candidate_table()?,
            workspace: provider_from_config(&config.storage),
        })
    }

    pub fn sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.sync.poll_interval_ms = duration_ms(interval);
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.sync.settle_delay_ms = duration_ms(delay);
        self
    }

    pub fn candidates(mut self, table: CandidateTable) -> Self {
        self.candidates = table;
        self
    }

    pub fn workspace(mut self, provider: Arc<dyn WorkspaceProvider>) -> Self {
        self.workspace = Some(provider);
        self
    }

    /// Start the session task on the current Tokio runtime.
    ///
    /// The session starts out `Disconnected`; feed it transport events through
    /// [`TetherSession::notify`].
    pub fn spawn<T: CameraTransport>(self, transport: T) -> TetherSession {
        let (command_tx, command_rx) = mpsc::channel(self.sync.command_capacity.max(1));
        let (event_tx, _) = broadcast::channel(self.sync.event_capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let sync_loop = SyncLoop::new(SyncLoopParts {
            transport: Box::new(transport),
            resolver: ConfigKeyResolver::new(self.candidates),
            coordinator: CaptureCoordinator::new(self.workspace),
            poll_interval: self.sync.poll_interval().max(MIN_PERIOD),
            settle_delay: self.sync.settle_delay(),
            events: event_tx.clone(),
            snapshot: snapshot_tx,
        });
        tokio::spawn(sync_loop.run(command_rx));

        log::debug!(
            "Spawned tether session (poll {:?}, settle {:?})",
            self.sync.poll_interval(),
            self.sync.settle_delay()
        );

        TetherSession {
            commands: command_tx,
            events: event_tx,
            snapshot: snapshot_rx,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Handle to one camera session. Cheap to clone; the session task stops once every handle is
/// dropped or [`TetherSession::shutdown`] is called.
#[derive(Clone)]
pub struct TetherSession {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl TetherSession {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Spawn a session configured from `config`.
    pub fn spawn<T: CameraTransport>(
        transport: T,
        config: &TetherConfig,
    ) -> Result<TetherSession, TetherError> {
        Ok(SessionBuilder::from_config(config)?.spawn(transport))
    }

    async fn send(&self, command: Command) -> Result<(), TetherError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TetherError::SessionClosed)
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, TetherError> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx)).await?;
        rx.await.map_err(|_| TetherError::SessionClosed)?
    }

    /// Deliver an event from the transport.
    pub async fn notify(&self, event: TransportEvent) -> Result<(), TetherError> {
        self.send(Command::Transport(event)).await
    }

    /// [`notify`](Self::notify) for driver threads outside the runtime. Panics if called from
    /// inside an async context.
    pub fn notify_blocking(&self, event: TransportEvent) -> Result<(), TetherError> {
        self.commands
            .blocking_send(Command::Transport(event))
            .map_err(|_| TetherError::SessionClosed)
    }

    pub async fn connection_changed(&self, state: ConnectionState) -> Result<(), TetherError> {
        self.notify(TransportEvent::Status(state)).await
    }

    /// End the camera session as if the camera reported a disconnect.
    pub async fn disconnect(&self) -> Result<(), TetherError> {
        self.send(Command::Disconnect).await
    }

    /// Read the camera now. Joins a read that is already running or queued rather than
    /// issuing a second one. A failure here ends the session.
    pub async fn read(&self) -> Result<CameraParameters, TetherError> {
        self.request(|reply| Command::Read { reply }).await
    }

    /// Write `value` to the camera key resolved for `param`.
    ///
    /// The stored parameters are not touched. The new value shows up once the read that
    /// follows the settle delay returns it. If the camera turns out to be gone, the session
    /// ends and `DeviceUnavailable` comes back.
    pub async fn write(
        &self,
        param: SemanticParam,
        value: impl Into<String>,
    ) -> Result<(), TetherError> {
        let value = value.into();
        self.request(|reply| Command::Write {
            param,
            value,
            reply,
        })
        .await
    }

    pub async fn capture(
        &self,
        preferred_folder: Option<PathBuf>,
    ) -> Result<CaptureResult, TetherError> {
        self.request(|reply| Command::Capture {
            folder: preferred_folder,
            reply,
        })
        .await
    }

    /// Make `path` the camera's download folder, now and on every later connect.
    pub async fn set_workspace_folder(&self, path: impl Into<PathBuf>) -> Result<(), TetherError> {
        let path = path.into();
        self.request(|reply| Command::SetDownloadFolder { path, reply })
            .await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    pub fn parameters(&self) -> Option<CameraParameters> {
        self.snapshot.borrow().parameters.clone()
    }

    pub fn choices(&self, param: SemanticParam) -> Option<Vec<String>> {
        self.snapshot.borrow().choices(param).map(<[String]>::to_vec)
    }

    pub fn control(&self, param: SemanticParam) -> ParameterControl {
        self.snapshot.borrow().control(param)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Stop polling, cancel a pending settle read, fail queued requests and end the task.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }
}
