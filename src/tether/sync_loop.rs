//! The task that owns a camera session.
//!
//! Every device call goes through one FIFO queue with at most one job running at a time, so
//! reads, writes, captures and key lookups never overlap. The poll timer, the settle timer,
//! transport events and host requests only ever enqueue work.
//!
//! Device calls block, so each job runs on the blocking pool. A job remembers the connection
//! epoch it started in; if the connection changed before it finished, its result belongs to a
//! session that no longer exists and is not applied.

use crate::errors::TetherError;
use crate::tether::capture::CaptureCoordinator;
use crate::tether::connection::{ConnectionStateMachine, Transition};
use crate::tether::events::{SessionEvent, SessionSnapshot};
use crate::tether::resolver::ConfigKeyResolver;
use crate::tether::store::ParameterStore;
use crate::transport::{CameraTransport, TransportError, TransportEvent};
use crate::types::{AliasMap, CameraParameters, CaptureResult, ConnectionState, SemanticParam};
use std::collections::VecDeque;
use std::future::pending;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};

pub(crate) type BoxedTransport = Box<dyn CameraTransport>;
pub(crate) type Reply<T> = oneshot::Sender<Result<T, TetherError>>;

/// Requests into the session task.
pub(crate) enum Command {
    Transport(TransportEvent),
    Disconnect,
    Read {
        reply: Reply<CameraParameters>,
    },
    Write {
        param: SemanticParam,
        value: String,
        reply: Reply<()>,
    },
    Capture {
        folder: Option<PathBuf>,
        reply: Reply<CaptureResult>,
    },
    SetDownloadFolder {
        path: PathBuf,
        reply: Reply<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Why a read was asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadTrigger {
    Connect,
    Poll,
    Settle,
    Refresh,
    CameraButton,
    Caller,
}

enum DeviceOp {
    Resolve,
    Read {
        waiters: Vec<Reply<CameraParameters>>,
    },
    Write {
        param: SemanticParam,
        value: String,
        reply: Reply<()>,
    },
    Capture {
        folder: Option<PathBuf>,
        reply: Reply<CaptureResult>,
    },
    SetDownloadFolder {
        path: PathBuf,
        reply: Option<Reply<()>>,
    },
}

impl DeviceOp {
    fn fail(self, error: TetherError) {
        match self {
            DeviceOp::Resolve => {}
            DeviceOp::Read { waiters } => {
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
            }
            DeviceOp::Write { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            DeviceOp::Capture { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            DeviceOp::SetDownloadFolder { reply, .. } => {
                if let Some(reply) = reply {
                    let _ = reply.send(Err(error));
                }
            }
        }
    }
}

/// What a finished job hands back. Replies travel with the job so the caller is answered
/// even if the session moved on in the meantime.
enum OpOutcome {
    Resolved(AliasMap),
    Read(Result<CameraParameters, TransportError>),
    Written {
        param: SemanticParam,
        key: String,
        value: String,
        result: Result<(), TransportError>,
        reply: Reply<()>,
    },
    Captured {
        result: Result<CaptureResult, TetherError>,
        download_folder: Option<PathBuf>,
        refresh: Option<Result<CameraParameters, TransportError>>,
        reply: Reply<CaptureResult>,
    },
    DownloadFolderSet {
        path: PathBuf,
        result: Result<(), TransportError>,
        reply: Option<Reply<()>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobKind {
    Resolve,
    Read,
    Write,
    Capture,
    DownloadFolder,
}

struct InFlight {
    epoch: u64,
    kind: JobKind,
    read_waiters: Vec<Reply<CameraParameters>>,
    handle: JoinHandle<OpOutcome>,
}

pub(crate) struct SyncLoopParts {
    pub transport: BoxedTransport,
    pub resolver: ConfigKeyResolver,
    pub coordinator: CaptureCoordinator,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub events: broadcast::Sender<SessionEvent>,
    pub snapshot: watch::Sender<SessionSnapshot>,
}

pub(crate) struct SyncLoop {
    transport: Arc<Mutex<BoxedTransport>>,
    resolver: ConfigKeyResolver,
    coordinator: CaptureCoordinator,
    connection: ConnectionStateMachine,
    store: ParameterStore,
    queue: VecDeque<DeviceOp>,
    in_flight: Option<InFlight>,
    poll: Option<Interval>,
    settle: Option<Pin<Box<Sleep>>>,
    poll_interval: Duration,
    settle_delay: Duration,
    download_folder: Option<PathBuf>,
    events: broadcast::Sender<SessionEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
}

async fn job_done(in_flight: &mut Option<InFlight>) -> Result<OpOutcome, JoinError> {
    match in_flight {
        Some(job) => (&mut job.handle).await,
        None => pending().await,
    }
}

async fn next_poll(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn settled(settle: &mut Option<Pin<Box<Sleep>>>) {
    match settle {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

impl SyncLoop {
    pub(crate) fn new(parts: SyncLoopParts) -> Self {
        Self {
            transport: Arc::new(Mutex::new(parts.transport)),
            resolver: parts.resolver,
            coordinator: parts.coordinator,
            connection: ConnectionStateMachine::new(),
            store: ParameterStore::new(),
            queue: VecDeque::new(),
            in_flight: None,
            poll: None,
            settle: None,
            poll_interval: parts.poll_interval,
            settle_delay: parts.settle_delay,
            download_folder: None,
            events: parts.events,
            snapshot: parts.snapshot,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        log::debug!("Tether session task started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                joined = job_done(&mut self.in_flight) => self.on_job_finished(joined),
                _ = next_poll(&mut self.poll) => self.request_read(ReadTrigger::Poll, None),
                _ = settled(&mut self.settle) => {
                    self.settle = None;
                    self.request_read(ReadTrigger::Settle, None);
                }
            }
            self.dispatch_next();
        }
        log::debug!("Tether session task stopped");
    }

    /// Returns `false` once the task should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Transport(TransportEvent::Status(state)) => self.on_status(state),
            Command::Transport(TransportEvent::Captured(result)) => {
                log::info!("Camera captured {:?}", result.file_path);
                self.emit(SessionEvent::Captured { result });
                self.request_read(ReadTrigger::CameraButton, None);
            }
            Command::Disconnect => self.disconnect("disconnected by host"),
            Command::Read { reply } => self.request_read(ReadTrigger::Caller, Some(reply)),
            Command::Write { param, value, reply } => {
                if self.store.is_active() {
                    self.queue.push_back(DeviceOp::Write { param, value, reply });
                } else {
                    let _ = reply.send(Err(not_connected()));
                }
            }
            Command::Capture { folder, reply } => {
                if self.store.is_active() {
                    self.queue.push_back(DeviceOp::Capture { folder, reply });
                } else {
                    let _ = reply.send(Err(not_connected()));
                }
            }
            Command::SetDownloadFolder { path, reply } => {
                self.download_folder = Some(path.clone());
                if self.store.is_active() {
                    self.queue.push_back(DeviceOp::SetDownloadFolder {
                        path,
                        reply: Some(reply),
                    });
                } else {
                    log::debug!("Download folder {:?} will be applied on connect", path);
                    let _ = reply.send(Ok(()));
                }
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn on_status(&mut self, state: ConnectionState) {
        match self.connection.apply(state) {
            Transition::SessionStarted => self.start_session(),
            Transition::Refresh => self.request_read(ReadTrigger::Refresh, None),
            Transition::SessionEnded => self.teardown("camera reported disconnect"),
            Transition::Unchanged => log::debug!("Ignoring disconnect while already disconnected"),
        }
    }

    fn disconnect(&mut self, reason: &str) {
        if self.connection.apply(ConnectionState::Disconnected) == Transition::SessionEnded {
            self.teardown(reason);
        }
    }

    fn start_session(&mut self) {
        let id = self.store.begin_session();
        log::info!("Camera connected, session {}", id);

        // Keys are resolved before the first read is applied.
        self.queue.push_back(DeviceOp::Resolve);
        if let Some(path) = self.download_folder.clone() {
            self.queue
                .push_back(DeviceOp::SetDownloadFolder { path, reply: None });
        }
        self.request_read(ReadTrigger::Connect, None);

        let mut poll = tokio::time::interval_at(
            Instant::now() + self.poll_interval,
            self.poll_interval,
        );
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.poll = Some(poll);
        self.settle = None;

        self.emit(SessionEvent::StatusChanged {
            state: ConnectionState::Connected,
            session_id: Some(id),
        });
        self.publish();
    }

    /// Drop all session state after the state machine has gone to `Disconnected`.
    fn teardown(&mut self, reason: &str) {
        self.poll = None;
        self.settle = None;

        let ended = self.store.end_session();
        self.store.clear_error();
        for op in self.queue.drain(..) {
            op.fail(TetherError::DeviceUnavailable(reason.to_string()));
        }

        match ended {
            Some(id) => log::info!("Camera session {} ended: {}", id, reason),
            None => log::info!("Camera disconnected: {}", reason),
        }

        self.emit(SessionEvent::StatusChanged {
            state: ConnectionState::Disconnected,
            session_id: None,
        });
        self.publish();
    }

    fn shutdown(&mut self) {
        self.poll = None;
        self.settle = None;
        for op in self.queue.drain(..) {
            op.fail(TetherError::SessionClosed);
        }
        if let Some(job) = self.in_flight.take() {
            for waiter in job.read_waiters {
                let _ = waiter.send(Err(TetherError::SessionClosed));
            }
        }
        if self.connection.apply(ConnectionState::Disconnected) == Transition::SessionEnded {
            self.store.end_session();
            self.emit(SessionEvent::StatusChanged {
                state: ConnectionState::Disconnected,
                session_id: None,
            });
        }
        self.publish();
        log::info!("Tether session shut down");
    }

    /// Queue a read unless one is already running or waiting, in which case the caller rides
    /// along with it.
    fn request_read(&mut self, trigger: ReadTrigger, waiter: Option<Reply<CameraParameters>>) {
        if !self.store.is_active() {
            if let Some(waiter) = waiter {
                let _ = waiter.send(Err(not_connected()));
            }
            return;
        }

        // The settle read covers this window.
        if trigger == ReadTrigger::Poll && self.write_pending() {
            log::debug!("Skipping poll while a write is pending");
            return;
        }

        // A read already on the wire may have started before the firmware settled.
        let epoch = self.connection.epoch();
        if let Some(job) = self.in_flight.as_mut().filter(|job| {
            trigger != ReadTrigger::Settle && job.kind == JobKind::Read && job.epoch == epoch
        }) {
            log::debug!("{:?} read joins the read in flight", trigger);
            job.read_waiters.extend(waiter);
            return;
        }

        let queued = self.queue.iter_mut().find_map(|op| match op {
            DeviceOp::Read { waiters } => Some(waiters),
            _ => None,
        });
        match queued {
            Some(waiters) => {
                log::debug!("{:?} read joins the queued read", trigger);
                waiters.extend(waiter);
            }
            None => {
                log::debug!("{:?} read queued", trigger);
                self.queue.push_back(DeviceOp::Read {
                    waiters: waiter.into_iter().collect(),
                });
            }
        }
    }

    /// A write is queued, running, or waiting out its settle delay.
    fn write_pending(&self) -> bool {
        self.settle.is_some()
            || self
                .in_flight
                .as_ref()
                .is_some_and(|job| job.kind == JobKind::Write)
            || self
                .queue
                .iter()
                .any(|op| matches!(op, DeviceOp::Write { .. }))
    }

    fn dispatch_next(&mut self) {
        while self.in_flight.is_none() {
            let Some(op) = self.queue.pop_front() else {
                return;
            };
            self.in_flight = self.start(op);
        }
    }

    fn spawn_job<F>(&self, job: F) -> JoinHandle<OpOutcome>
    where
        F: FnOnce(&mut BoxedTransport) -> OpOutcome + Send + 'static,
    {
        let transport = self.transport.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = transport.lock().unwrap_or_else(PoisonError::into_inner);
            job(&mut *guard)
        })
    }

    /// Launch `op` on the blocking pool. Returns `None` if it was answered without touching
    /// the camera.
    fn start(&mut self, op: DeviceOp) -> Option<InFlight> {
        let epoch = self.connection.epoch();
        let (handle, kind, read_waiters) = match op {
            DeviceOp::Resolve => {
                let resolver = self.resolver.clone();
                let handle =
                    self.spawn_job(move |transport| OpOutcome::Resolved(resolver.resolve_all(transport)));
                (handle, JobKind::Resolve, Vec::new())
            }
            DeviceOp::Read { waiters } => {
                let handle = self.spawn_job(|transport| OpOutcome::Read(transport.get_params()));
                (handle, JobKind::Read, waiters)
            }
            DeviceOp::Write {
                param,
                value,
                reply,
            } => {
                // Looked up now rather than on request, so a pending resolve has finished.
                let key = match self.store.write_target(param) {
                    Ok(key) => key,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        return None;
                    }
                };
                log::debug!("Writing {} = '{}' via '{}'", param, value, key);
                let handle = self.spawn_job(move |transport| {
                    let result = transport.set_config_value(&key, &value);
                    OpOutcome::Written {
                        param,
                        key,
                        value,
                        result,
                        reply,
                    }
                });
                (handle, JobKind::Write, Vec::new())
            }
            DeviceOp::Capture { folder, reply } => {
                let coordinator = self.coordinator.clone();
                let handle = self.spawn_job(move |transport| {
                    let mut download_folder = None;
                    let result = coordinator
                        .resolve_folder(folder.as_deref())
                        .and_then(|target| {
                            if let Some(dir) = &target {
                                match transport.set_download_folder(dir) {
                                    Ok(()) => download_folder = Some(dir.clone()),
                                    Err(e) => log::warn!(
                                        "Could not point downloads at {:?}: {}",
                                        dir,
                                        e
                                    ),
                                }
                            }
                            transport
                                .capture(target.as_deref())
                                .map_err(TetherError::from_capture)
                        });
                    // Forced: runs right behind the capture, inside the same job.
                    let refresh = result.is_ok().then(|| transport.get_params());
                    OpOutcome::Captured {
                        result,
                        download_folder,
                        refresh,
                        reply,
                    }
                });
                (handle, JobKind::Capture, Vec::new())
            }
            DeviceOp::SetDownloadFolder { path, reply } => {
                let handle = self.spawn_job(move |transport| {
                    let result = transport.set_download_folder(&path);
                    OpOutcome::DownloadFolderSet {
                        path,
                        result,
                        reply,
                    }
                });
                (handle, JobKind::DownloadFolder, Vec::new())
            }
        };

        Some(InFlight {
            epoch,
            kind,
            read_waiters,
            handle,
        })
    }

    fn on_job_finished(&mut self, joined: Result<OpOutcome, JoinError>) {
        let Some(job) = self.in_flight.take() else {
            return;
        };
        let current = job.epoch == self.connection.epoch();

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Camera worker failed: {}", e);
                let error = TetherError::DeviceUnavailable(format!("camera worker failed: {e}"));
                for waiter in job.read_waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
                if current {
                    self.disconnect("camera worker failed");
                }
                return;
            }
        };

        if !current {
            log::debug!("Discarding result of a job from an earlier connection");
        }

        match outcome {
            OpOutcome::Resolved(aliases) => {
                if current {
                    self.apply_aliases(aliases);
                }
            }
            OpOutcome::Read(result) => {
                if current {
                    self.apply_read(result, job.read_waiters);
                } else {
                    for waiter in job.read_waiters {
                        let _ = waiter.send(Err(TetherError::DeviceUnavailable(
                            "connection changed during read".to_string(),
                        )));
                    }
                }
            }
            OpOutcome::Written {
                param,
                key,
                value,
                result,
                reply,
            } => match result {
                Ok(()) => {
                    log::info!("Set {} ('{}') to '{}'", param, key, value);
                    if current && self.store.is_active() {
                        // A later write restarts the wait.
                        self.settle = Some(Box::pin(tokio::time::sleep(self.settle_delay)));
                    }
                    let _ = reply.send(Ok(()));
                }
                Err(e) => {
                    let error = TetherError::from_write(e);
                    log::warn!("Write of {} = '{}' failed: {}", param, value, error);
                    if current {
                        self.fail_current(&error);
                    }
                    let _ = reply.send(Err(error));
                }
            },
            OpOutcome::Captured {
                result,
                download_folder,
                refresh,
                reply,
            } => {
                if download_folder.is_some() {
                    self.download_folder = download_folder;
                }
                match &result {
                    Ok(captured) => {
                        log::info!("Captured {:?}", captured.file_path);
                        self.emit(SessionEvent::Captured {
                            result: captured.clone(),
                        });
                    }
                    Err(e) => {
                        log::warn!("Capture failed: {}", e);
                        if current {
                            self.fail_current(e);
                        }
                    }
                }
                let _ = reply.send(result);
                if let Some(refresh) = refresh.filter(|_| current) {
                    self.apply_read(refresh, Vec::new());
                }
            }
            OpOutcome::DownloadFolderSet {
                path,
                result,
                reply,
            } => {
                let result = result.map_err(TetherError::from_write);
                match &result {
                    Ok(()) => log::info!("Download folder set to {:?}", path),
                    Err(e) => {
                        log::warn!("Could not set download folder {:?}: {}", path, e);
                        if current && e.is_device_unavailable() {
                            self.disconnect(&e.to_string());
                        }
                    }
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
        }
    }

    /// A device call of the current connection failed. A detached camera ends the session and
    /// the state change is all the host sees; anything else is reported and the session stays.
    fn fail_current(&mut self, error: &TetherError) {
        if error.is_device_unavailable() {
            self.disconnect(&error.to_string());
        } else {
            self.report_error(error);
        }
    }

    fn apply_aliases(&mut self, aliases: AliasMap) {
        let resolved = aliases.params();
        let unavailable: Vec<SemanticParam> = SemanticParam::ALL
            .into_iter()
            .filter(|p| !aliases.contains(*p))
            .collect();
        log::info!(
            "Resolved {} of {} camera parameters",
            resolved.len(),
            SemanticParam::ALL.len()
        );

        self.store.install_aliases(aliases);
        self.emit(SessionEvent::AliasesResolved {
            resolved,
            unavailable,
        });
        self.publish();
    }

    /// A successful read replaces the snapshot. A failed one means the camera is gone.
    fn apply_read(
        &mut self,
        result: Result<CameraParameters, TransportError>,
        waiters: Vec<Reply<CameraParameters>>,
    ) {
        match result {
            Ok(params) => {
                let changed = self.store.replace_parameters(params.clone());
                self.store.clear_error();
                if changed {
                    log::debug!("Camera parameters changed (iso {})", params.iso);
                    self.emit(SessionEvent::ParametersUpdated {
                        parameters: params.clone(),
                    });
                }
                for waiter in waiters {
                    let _ = waiter.send(Ok(params.clone()));
                }
                self.publish();
            }
            Err(e) => {
                let error = TetherError::from_read(e);
                log::warn!("Parameter read failed, treating camera as detached: {}", error);
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
                self.disconnect(&error.to_string());
            }
        }
    }

    fn report_error(&mut self, error: &TetherError) {
        self.store.set_error(error.to_string());
        self.emit(SessionEvent::Error {
            message: error.to_string(),
        });
        self.publish();
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        let snapshot = self.store.snapshot(self.connection.state());
        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

fn not_connected() -> TetherError {
    TetherError::DeviceUnavailable("no camera connected".to_string())
}
