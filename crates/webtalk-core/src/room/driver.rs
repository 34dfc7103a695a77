//! Room driver task and its handle
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  RoomHandle (cloneable)                                         │
//! │  ├── commands ──► mpsc ──┐                                      │
//! │  └── subscribe() ◄── broadcast<RoomEvent>                       │
//! │                          │                                      │
//! │  Room task (one per room, sole owner of core + store)           │
//! │  ├── select! { command, transport event }                       │
//! │  ├── RoomCore handler ──► Vec<Effect>                           │
//! │  └── apply effects in order                                     │
//! │      ├── Store     → MessageStore::apply                        │
//! │      ├── Transport → join / leave / send                        │
//! │      │   └── Delivery::After → spawned sleep-then-send          │
//! │      └── Emit      → broadcast                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use super::core::{JoinStatus, ReactionKind, RoomCore, TextDraft};
use super::events::{Delivery, Effect, RoomEvent, TransportCommand};
use crate::config::RoomConfig;
use crate::error::{RoomError, RoomResult};
use crate::identity::IdentityProvider;
use crate::protocol::RoomMessage;
use crate::store::MessageStore;
use crate::transport::{Transport, TransportEvent, TransportReceiver};
use crate::types::{now_ms, NormalMessage, PeerId, RoomId, RoomUser};

/// Default capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Source of epoch-millisecond timestamps for the room
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Requests sent from a [`RoomHandle`] to its task
#[derive(Debug)]
enum RoomCommand {
    Join,
    Leave,
    SendText(TextDraft),
    React { id: String, kind: ReactionKind },
    ClearHistory,
    Users(oneshot::Sender<Vec<RoomUser>>),
    Messages(oneshot::Sender<RoomResult<Vec<NormalMessage>>>),
    Status(oneshot::Sender<JoinStatus>),
    Shutdown,
}

/// Builder for a room task.
pub struct Room<T, S> {
    room_id: RoomId,
    transport: T,
    events: TransportReceiver,
    store: S,
    identity: Arc<dyn IdentityProvider>,
    config: RoomConfig,
    clock: Clock,
}

impl<T, S> Room<T, S>
where
    T: Transport,
    S: MessageStore,
{
    pub fn new(
        room_id: RoomId,
        transport: T,
        events: TransportReceiver,
        store: S,
        identity: impl IdentityProvider,
    ) -> Self {
        Self {
            room_id,
            transport,
            events,
            store,
            identity: Arc::new(identity),
            config: RoomConfig::default(),
            clock: Arc::new(now_ms),
        }
    }

    pub fn with_config(mut self, config: RoomConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the wall clock, e.g. with one driven by `tokio::time`.
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Start the room task. Must be called from within a tokio runtime.
    pub fn spawn(self) -> RoomHandle {
        let peer_id = self.transport.peer_id();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let span = info_span!("room", room = %self.room_id, peer = %peer_id.short());
        let task = RoomTask {
            core: RoomCore::new(self.room_id.clone(), peer_id.clone(), self.config),
            transport: Arc::new(self.transport),
            store: self.store,
            identity: self.identity,
            clock: self.clock,
            event_tx: event_tx.clone(),
            span: span.clone(),
        };

        let join_handle = tokio::spawn(task.run(command_rx, self.events).instrument(span));

        RoomHandle {
            room_id: self.room_id,
            peer_id,
            commands: command_tx,
            event_tx,
            task: Arc::new(parking_lot::Mutex::new(Some(join_handle))),
        }
    }
}

/// State owned by the running task
struct RoomTask<T, S> {
    core: RoomCore,
    transport: Arc<T>,
    store: S,
    identity: Arc<dyn IdentityProvider>,
    clock: Clock,
    event_tx: broadcast::Sender<RoomEvent>,
    span: Span,
}

impl<T, S> RoomTask<T, S>
where
    T: Transport,
    S: MessageStore,
{
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<RoomCommand>,
        mut events: TransportReceiver,
    ) {
        debug!("Room task started");
        let mut transport_open = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(RoomCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                event = events.recv(), if transport_open => match event {
                    Some(event) => self.handle_transport(event),
                    None => {
                        warn!("Transport event stream closed");
                        transport_open = false;
                    }
                },
            }
        }

        if self.core.is_joined() {
            let user = self.identity.user_info();
            let effects = self.core.leave(&user);
            self.apply(effects);
        }
        debug!("Room task ended");
    }

    fn handle_command(&mut self, command: RoomCommand) {
        let now = (self.clock)();
        let effects = match command {
            RoomCommand::Join => {
                let user = self.identity.user_info();
                self.core.join(&user, now)
            }
            RoomCommand::Leave => {
                let user = self.identity.user_info();
                self.core.leave(&user)
            }
            RoomCommand::SendText(draft) => self.core.send_text(draft, now),
            RoomCommand::React { id, kind } => self.core.send_reaction(&self.store, &id, kind, now),
            RoomCommand::ClearHistory => self.core.clear_history(),
            RoomCommand::Users(reply) => {
                let _ = reply.send(self.core.users());
                return;
            }
            RoomCommand::Messages(reply) => {
                let _ = reply.send(self.store.list());
                return;
            }
            RoomCommand::Status(reply) => {
                let _ = reply.send(self.core.status());
                return;
            }
            RoomCommand::Shutdown => return,
        };
        self.apply(effects);
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        let now = (self.clock)();
        let effects = self.core.handle_transport(&self.store, event, now);
        self.apply(effects);
    }

    /// Apply effects in order. A failed store write or immediate send emits
    /// an error and discards the rest of the batch.
    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            let result = match effect {
                Effect::Store(command) => self.store.apply(command),
                Effect::Emit(event) => {
                    self.emit(event);
                    Ok(())
                }
                Effect::Transport(TransportCommand::Join) => {
                    let joined = self.transport.join_room();
                    if joined.is_err() {
                        let user = self.identity.user_info();
                        self.core.join_failed(&user);
                    }
                    joined
                }
                Effect::Transport(TransportCommand::Leave) => self.transport.leave_room(),
                Effect::Transport(TransportCommand::Send {
                    message,
                    targets,
                    delivery,
                }) => self.send(message, targets, delivery),
            };

            if let Err(err) = result {
                error!(error = %err, "Effect failed, discarding the rest of the batch");
                self.emit(RoomEvent::Error(err));
                return;
            }
        }
    }

    fn send(
        &self,
        message: RoomMessage,
        targets: Option<Vec<PeerId>>,
        delivery: Delivery,
    ) -> RoomResult<()> {
        let payload = message.encode()?;
        match delivery {
            Delivery::Immediate => self
                .transport
                .send(&payload, targets.as_deref())
                .map_err(as_send_failure),
            Delivery::After(delay) => {
                let transport = self.transport.clone();
                let kind = message.kind();
                tokio::spawn(
                    async move {
                        tokio::time::sleep(delay).await;
                        if let Err(e) = transport.send(&payload, targets.as_deref()) {
                            warn!(error = %e, kind, "Delayed send failed");
                        }
                    }
                    .instrument(self.span.clone()),
                );
                Ok(())
            }
        }
    }

    fn emit(&self, event: RoomEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

fn as_send_failure(err: RoomError) -> RoomError {
    match err {
        RoomError::SendFailed(_) => err,
        other => RoomError::SendFailed(other.to_string()),
    }
}

/// Handle to a running room task.
///
/// Commands are fire-and-forget; their outcome arrives as [`RoomEvent`]s.
/// Every method fails with [`RoomError::Closed`] once the task is gone.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    peer_id: PeerId,
    commands: mpsc::UnboundedSender<RoomCommand>,
    event_tx: broadcast::Sender<RoomEvent>,
    task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Transport connection id of this room instance
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Subscribe to room events.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.event_tx.subscribe()
    }

    fn command(&self, command: RoomCommand) -> RoomResult<()> {
        self.commands.send(command).map_err(|_| RoomError::Closed)
    }

    async fn query<R>(&self, build: impl FnOnce(oneshot::Sender<R>) -> RoomCommand) -> RoomResult<R> {
        let (tx, rx) = oneshot::channel();
        self.command(build(tx))?;
        rx.await.map_err(|_| RoomError::Closed)
    }

    pub fn join(&self) -> RoomResult<()> {
        self.command(RoomCommand::Join)
    }

    pub fn leave(&self) -> RoomResult<()> {
        self.command(RoomCommand::Leave)
    }

    pub fn send_text(&self, draft: impl Into<TextDraft>) -> RoomResult<()> {
        self.command(RoomCommand::SendText(draft.into()))
    }

    pub fn send_like(&self, message_id: impl Into<String>) -> RoomResult<()> {
        self.command(RoomCommand::React {
            id: message_id.into(),
            kind: ReactionKind::Like,
        })
    }

    pub fn send_hate(&self, message_id: impl Into<String>) -> RoomResult<()> {
        self.command(RoomCommand::React {
            id: message_id.into(),
            kind: ReactionKind::Hate,
        })
    }

    pub fn clear_history(&self) -> RoomResult<()> {
        self.command(RoomCommand::ClearHistory)
    }

    /// Current membership, ordered by user id
    pub async fn users(&self) -> RoomResult<Vec<RoomUser>> {
        self.query(RoomCommand::Users).await
    }

    /// The local chat log
    pub async fn messages(&self) -> RoomResult<Vec<NormalMessage>> {
        self.query(RoomCommand::Messages).await?
    }

    pub async fn status(&self) -> RoomResult<JoinStatus> {
        self.query(RoomCommand::Status).await
    }

    pub async fn is_joined(&self) -> RoomResult<bool> {
        Ok(self.status().await? == JoinStatus::Joined)
    }

    /// Stop the task, leaving the room first if joined, and wait for it.
    pub async fn shutdown(&self) {
        info!(room = %self.room_id, peer = %self.peer_id.short(), "Shutting down room");
        let _ = self.command(RoomCommand::Shutdown);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Room task panicked");
            }
        }
    }
}
