//! Lifecycle controller
//!
//! One controller owns one version. It runs as an actor task fed by a channel
//! and moves through
//!
//! ```text
//! Parsed → Installing → Waiting → Activating → Active → Redundant
//! ```
//!
//! Install pre-warms the static generation all-or-nothing. Activation deletes
//! every generation that does not belong to this version and then claims the
//! [`Scope`], retiring whichever controller served requests before. Fetch
//! events are only run through the caching pipeline while `Active`; in every
//! other state they go straight to the network.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::busting::CacheBuster;
use crate::cache::{CacheKind, CacheStore, CachedEntry, GenerationName, RequestKey, StoreError};
use crate::config::{Config, DEFAULT_RETRY_CAPACITY};
use crate::fetch::{FetchError, Fetcher};
use crate::http::{Request, Response};
use crate::intercept::Interceptor;
use crate::notify::{ClickOutcome, NotificationRelay, NotificationSink};
use crate::retry::{RetryQueue, SyncReport};
use crate::strategy::{PendingWrites, StrategyExecutor, WriteGate};
use crate::version::VersionToken;

/// Capacity of a controller's mailbox
const MAILBOX_CAPACITY: usize = 64;

/// States of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Created, install not started
    Parsed,
    /// Pre-warming the static generation
    Installing,
    /// Installed, waiting to be activated
    Waiting,
    /// Deleting old generations
    Activating,
    /// Serving requests through the caching strategies
    Active,
    /// Discarded after a failed install or replaced by a newer version
    Redundant,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Parsed => "parsed",
            LifecycleState::Installing => "installing",
            LifecycleState::Waiting => "waiting",
            LifecycleState::Activating => "activating",
            LifecycleState::Active => "active",
            LifecycleState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Errors that abort an install attempt
///
/// None of these touch the generations of the currently active version.
#[derive(Debug, Error)]
pub enum InstallError {
    /// A manifest entry is not a valid URL
    #[error("Invalid manifest entry '{0}': {1}")]
    InvalidManifestEntry(String, #[source] url::ParseError),

    /// A manifest asset could not be fetched
    #[error("Failed to fetch manifest asset {url}: {source}")]
    AssetFetch {
        url: String,
        #[source]
        source: FetchError,
    },

    /// A manifest asset answered with a non-2xx status
    #[error("Manifest asset {url} returned status {status}")]
    AssetStatus { url: String, status: u16 },

    /// The complete generation could not be written
    #[error("Failed to store static generation: {0}")]
    Store(#[from] StoreError),
}

/// Errors returned by controller operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The event is not valid in the controller's current state
    #[error("Cannot {event} while {state}")]
    InvalidTransition {
        event: &'static str,
        state: LifecycleState,
    },

    /// Install failed
    #[error(transparent)]
    Install(#[from] InstallError),

    /// The store failed during activation or restore
    #[error("Cache store failed: {0}")]
    Store(#[from] StoreError),

    /// The offline document path cannot be resolved against the origin
    #[error("Invalid offline document '{0}': {1}")]
    InvalidOfflineDocument(String, #[source] url::ParseError),

    /// Restore was requested for a version whose static generation is missing
    #[error("Version {0} is not installed")]
    NotInstalled(VersionToken),

    /// The controller task is gone
    #[error("Lifecycle controller has stopped")]
    Stopped,

    /// The controller answered with a reply for a different event
    #[error("Unexpected reply to {0} event")]
    UnexpectedReply(&'static str),

    /// No controller has claimed the scope yet
    #[error("No active controller in scope")]
    Unclaimed,
}

/// Events the host environment delivers to a controller
#[derive(Debug)]
pub enum Event {
    /// Pre-warm the static generation
    Install,
    /// Garbage-collect old generations and claim the scope
    Activate,
    /// An intercepted request
    Fetch(Request),
    /// Connectivity restored; the tag names the sync registration
    Sync(String),
    /// Inbound push payload
    Push(Bytes),
    /// A notification or one of its actions was clicked
    NotificationClick(Option<String>),
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Event::Install => "install",
            Event::Activate => "activate",
            Event::Fetch(_) => "fetch",
            Event::Sync(_) => "sync",
            Event::Push(_) => "push",
            Event::NotificationClick(_) => "notificationclick",
        }
    }
}

/// Result of a successful install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Name of the static generation written
    pub generation: String,
    /// Number of entries it holds
    pub assets: usize,
}

/// Result of a successful activation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Generations deleted because they belong to other versions
    pub deleted: Vec<String>,
    /// Generations of the activated version
    pub retained: Vec<String>,
}

/// Acknowledgement for each event kind
#[derive(Debug)]
pub enum Reply {
    Installed(Result<InstallReport, LifecycleError>),
    Activated(Result<ActivationReport, LifecycleError>),
    Response(Response),
    Synced(SyncReport),
    Pushed,
    Clicked(ClickOutcome),
}

enum Command {
    Dispatch {
        event: Event,
        reply: oneshot::Sender<Reply>,
    },
    State(oneshot::Sender<LifecycleState>),
    PendingWrites(oneshot::Sender<PendingWrites>),
    Retire,
}

/// Everything a controller needs to run one version
pub struct Instance {
    pub config: Config,
    pub token: VersionToken,
    pub store: Arc<dyn CacheStore>,
    pub fetcher: Arc<dyn Fetcher>,
    pub sink: Arc<dyn NotificationSink>,
    pub scope: Scope,
}

/// Routes host requests to whichever controller last claimed it
///
/// The scope outlives individual versions, so it also owns what has to
/// survive a cutover: the retry queue and the fence for cache writes.
#[derive(Debug, Clone)]
pub struct Scope {
    controller: Arc<RwLock<Option<ControllerHandle>>>,
    retry: Arc<RetryQueue>,
    write_fence: Arc<RwLock<()>>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::with_retry_capacity(DEFAULT_RETRY_CAPACITY)
    }
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope whose retry queue holds at most `capacity` requests
    pub fn with_retry_capacity(capacity: usize) -> Self {
        Self {
            controller: Arc::new(RwLock::new(None)),
            retry: Arc::new(RetryQueue::new(capacity)),
            write_fence: Arc::new(RwLock::new(())),
        }
    }

    /// Failed mutations waiting for a sync event, shared by every version
    pub fn retry_queue(&self) -> Arc<RetryQueue> {
        Arc::clone(&self.retry)
    }

    /// Installs `handle` as the routing target, returning the previous one
    pub async fn claim(&self, handle: ControllerHandle) -> Option<ControllerHandle> {
        self.controller.write().await.replace(handle)
    }

    /// The controller currently routing requests
    pub async fn controller(&self) -> Option<ControllerHandle> {
        self.controller.read().await.clone()
    }

    /// Sends an event to the claiming controller
    pub async fn dispatch(&self, event: Event) -> Result<Reply, LifecycleError> {
        let controller = self.controller().await.ok_or(LifecycleError::Unclaimed)?;
        controller.dispatch(event).await
    }

    /// Routes a request through the claiming controller
    pub async fn fetch(&self, request: Request) -> Result<Response, LifecycleError> {
        let controller = self.controller().await.ok_or(LifecycleError::Unclaimed)?;
        controller.fetch(request).await
    }
}

/// Cloneable handle for sending events to a controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    mailbox: mpsc::Sender<Command>,
    token: VersionToken,
    gate: WriteGate,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Dispatch { event, .. } => write!(f, "Dispatch({})", event.name()),
            Command::State(_) => f.write_str("State"),
            Command::PendingWrites(_) => f.write_str("PendingWrites"),
            Command::Retire => f.write_str("Retire"),
        }
    }
}

impl ControllerHandle {
    /// Version this controller serves
    pub fn token(&self) -> &VersionToken {
        &self.token
    }

    /// Returns true if both handles address the same controller
    pub fn same_controller(&self, other: &ControllerHandle) -> bool {
        self.mailbox.same_channel(&other.mailbox)
    }

    /// Single entry point for host events
    pub async fn dispatch(&self, event: Event) -> Result<Reply, LifecycleError> {
        let (reply, answer) = oneshot::channel();
        self.mailbox
            .send(Command::Dispatch { event, reply })
            .await
            .map_err(|_| LifecycleError::Stopped)?;
        answer.await.map_err(|_| LifecycleError::Stopped)
    }

    pub async fn install(&self) -> Result<InstallReport, LifecycleError> {
        match self.dispatch(Event::Install).await? {
            Reply::Installed(result) => result,
            _ => Err(LifecycleError::UnexpectedReply("install")),
        }
    }

    pub async fn activate(&self) -> Result<ActivationReport, LifecycleError> {
        match self.dispatch(Event::Activate).await? {
            Reply::Activated(result) => result,
            _ => Err(LifecycleError::UnexpectedReply("activate")),
        }
    }

    pub async fn fetch(&self, request: Request) -> Result<Response, LifecycleError> {
        match self.dispatch(Event::Fetch(request)).await? {
            Reply::Response(response) => Ok(response),
            _ => Err(LifecycleError::UnexpectedReply("fetch")),
        }
    }

    pub async fn sync(&self, tag: impl Into<String>) -> Result<SyncReport, LifecycleError> {
        match self.dispatch(Event::Sync(tag.into())).await? {
            Reply::Synced(report) => Ok(report),
            _ => Err(LifecycleError::UnexpectedReply("sync")),
        }
    }

    pub async fn push(&self, payload: impl Into<Bytes>) -> Result<(), LifecycleError> {
        match self.dispatch(Event::Push(payload.into())).await? {
            Reply::Pushed => Ok(()),
            _ => Err(LifecycleError::UnexpectedReply("push")),
        }
    }

    pub async fn notification_click(&self, action: Option<&str>) -> Result<ClickOutcome, LifecycleError> {
        match self
            .dispatch(Event::NotificationClick(action.map(str::to_string)))
            .await?
        {
            Reply::Clicked(outcome) => Ok(outcome),
            _ => Err(LifecycleError::UnexpectedReply("notificationclick")),
        }
    }

    /// Current lifecycle state
    pub async fn state(&self) -> Result<LifecycleState, LifecycleError> {
        let (reply, answer) = oneshot::channel();
        self.mailbox
            .send(Command::State(reply))
            .await
            .map_err(|_| LifecycleError::Stopped)?;
        answer.await.map_err(|_| LifecycleError::Stopped)
    }

    /// Waits for every cache write started so far to finish
    pub async fn settle(&self) -> Result<(), LifecycleError> {
        let (reply, answer) = oneshot::channel();
        self.mailbox
            .send(Command::PendingWrites(reply))
            .await
            .map_err(|_| LifecycleError::Stopped)?;
        let pending = answer.await.map_err(|_| LifecycleError::Stopped)?;
        pending.settle().await;
        Ok(())
    }

    async fn retire(&self) {
        self.gate.retire();
        if self.mailbox.send(Command::Retire).await.is_err() {
            debug!(version = %self.token, "retired controller already stopped");
        }
    }
}

/// Actor owning one version's lifecycle
pub struct LifecycleController {
    state: LifecycleState,
    token: VersionToken,
    manifest: Vec<String>,
    sync_tag: String,
    static_generation: String,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    buster: CacheBuster,
    interceptor: Arc<Interceptor>,
    retry: Arc<RetryQueue>,
    relay: NotificationRelay,
    pending: PendingWrites,
    gate: WriteGate,
    scope: Scope,
    mailbox: mpsc::WeakSender<Command>,
}

impl LifecycleController {
    /// Starts a controller for a version that still has to be installed
    pub fn spawn(instance: Instance) -> Result<ControllerHandle, LifecycleError> {
        let (handle, _) = Self::start(instance, LifecycleState::Parsed)?;
        Ok(handle)
    }

    /// Starts a controller for a version installed by an earlier run, already active
    ///
    /// Fails with [`LifecycleError::NotInstalled`] unless the version's static
    /// generation is present.
    pub async fn restore(instance: Instance) -> Result<ControllerHandle, LifecycleError> {
        let static_generation = GenerationName::new(CacheKind::Static, &instance.token).to_string();
        if !instance.store.has_generation(&static_generation).await? {
            return Err(LifecycleError::NotInstalled(instance.token));
        }

        let (handle, scope) = Self::start(instance, LifecycleState::Active)?;
        info!(version = %handle.token, "restored active version");
        claim(&scope, handle.clone()).await;
        Ok(handle)
    }

    fn start(
        instance: Instance,
        state: LifecycleState,
    ) -> Result<(ControllerHandle, Scope), LifecycleError> {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let scope = instance.scope.clone();
        let controller = Self::build(instance, state, tx.downgrade())?;
        let handle = ControllerHandle {
            mailbox: tx,
            token: controller.token.clone(),
            gate: controller.gate.clone(),
        };
        tokio::spawn(controller.run(rx));
        Ok((handle, scope))
    }

    fn build(
        instance: Instance,
        state: LifecycleState,
        mailbox: mpsc::WeakSender<Command>,
    ) -> Result<Self, LifecycleError> {
        let Instance {
            config,
            token,
            store,
            fetcher,
            sink,
            scope,
        } = instance;

        let buster = CacheBuster::new(config.origin.clone(), token.clone());
        let offline_document = buster
            .resolve(&config.offline_document)
            .map(|url| buster.bust(url))
            .map_err(|err| LifecycleError::InvalidOfflineDocument(config.offline_document.clone(), err))?;

        let retry = scope.retry_queue();
        let gate = WriteGate::new(Arc::clone(&scope.write_fence));
        let executor = StrategyExecutor::new(
            Arc::clone(&store),
            Arc::clone(&fetcher),
            Arc::clone(&retry),
            &token,
            offline_document,
        )
        .with_api_fallback_max_age(config.api_fallback_max_age())
        .with_write_gate(gate.clone());
        let pending = executor.pending_writes();
        let interceptor = Interceptor::new(buster.clone(), config.api_marker.clone(), Arc::new(executor));

        Ok(Self {
            state,
            static_generation: GenerationName::new(CacheKind::Static, &token).to_string(),
            token,
            manifest: config.manifest,
            sync_tag: config.sync_tag,
            store,
            fetcher,
            buster,
            interceptor: Arc::new(interceptor),
            retry,
            relay: NotificationRelay::new(sink, config.origin.as_str()),
            pending,
            gate,
            scope,
            mailbox,
        })
    }

    async fn run(mut self, mut mailbox: mpsc::Receiver<Command>) {
        while let Some(command) = mailbox.recv().await {
            match command {
                Command::Dispatch { event, reply } => self.dispatch(event, reply).await,
                Command::State(reply) => {
                    let _ = reply.send(self.state);
                }
                Command::PendingWrites(reply) => {
                    let _ = reply.send(self.pending.clone());
                }
                Command::Retire => {
                    info!(version = %self.token, from = %self.state, "controller retired");
                    self.state = LifecycleState::Redundant;
                }
            }
        }
        debug!(version = %self.token, "controller mailbox closed");
    }

    async fn dispatch(&mut self, event: Event, reply: oneshot::Sender<Reply>) {
        debug!(version = %self.token, state = %self.state, event = event.name(), "dispatching event");
        match event {
            Event::Install => {
                let result = self.install().await;
                let _ = reply.send(Reply::Installed(result));
            }
            Event::Activate => {
                let result = self.activate().await;
                let _ = reply.send(Reply::Activated(result));
            }
            Event::Fetch(request) => {
                let interceptor = Arc::clone(&self.interceptor);
                let controlled = self.state == LifecycleState::Active;
                tokio::spawn(async move {
                    let response = if controlled {
                        interceptor.intercept(request).await
                    } else {
                        interceptor.bypass(request).await
                    };
                    let _ = reply.send(Reply::Response(response));
                });
            }
            Event::Sync(tag) => {
                if tag != self.sync_tag {
                    debug!(tag = %tag, "ignoring unknown sync tag");
                    let _ = reply.send(Reply::Synced(SyncReport::default()));
                    return;
                }
                let retry = Arc::clone(&self.retry);
                let fetcher = Arc::clone(&self.fetcher);
                tokio::spawn(async move {
                    let report = retry.replay(fetcher.as_ref()).await;
                    info!(replayed = report.replayed, dropped = report.dropped, "retry queue replayed");
                    let _ = reply.send(Reply::Synced(report));
                });
            }
            Event::Push(payload) => {
                self.relay.push(payload);
                let _ = reply.send(Reply::Pushed);
            }
            Event::NotificationClick(action) => {
                let outcome = self.relay.click(action.as_deref());
                let _ = reply.send(Reply::Clicked(outcome));
            }
        }
    }

    async fn install(&mut self) -> Result<InstallReport, LifecycleError> {
        if self.state != LifecycleState::Parsed {
            return Err(LifecycleError::InvalidTransition {
                event: "install",
                state: self.state,
            });
        }

        self.state = LifecycleState::Installing;
        info!(version = %self.token, assets = self.manifest.len(), "installing");
        match self.precache().await {
            Ok(report) => {
                self.state = LifecycleState::Waiting;
                info!(version = %self.token, generation = %report.generation, "installed");
                Ok(report)
            }
            Err(err) => {
                self.state = LifecycleState::Redundant;
                warn!(version = %self.token, error = %err, "install failed, discarding version");
                Err(err.into())
            }
        }
    }

    /// Fetches the whole manifest, then writes the static generation in one step
    async fn precache(&self) -> Result<InstallReport, InstallError> {
        let requests = self
            .manifest
            .iter()
            .map(|path| {
                self.buster
                    .apply(Request::get(path.as_str()))
                    .map_err(|err| InstallError::InvalidManifestEntry(path.clone(), err))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let results = join_all(requests.iter().map(|request| self.fetcher.fetch(request))).await;

        let mut entries = Vec::with_capacity(requests.len());
        for (request, result) in requests.iter().zip(results) {
            let response = result.map_err(|source| InstallError::AssetFetch {
                url: request.url.clone(),
                source,
            })?;
            if !response.is_success() {
                return Err(InstallError::AssetStatus {
                    url: request.url.clone(),
                    status: response.status,
                });
            }
            entries.push(CachedEntry::from_response(
                RequestKey::get(request.url.clone()),
                &response,
            ));
        }

        let assets = entries.len();
        self.store
            .replace_generation(&self.static_generation, entries)
            .await?;
        Ok(InstallReport {
            generation: self.static_generation.clone(),
            assets,
        })
    }

    async fn activate(&mut self) -> Result<ActivationReport, LifecycleError> {
        if self.state != LifecycleState::Waiting {
            return Err(LifecycleError::InvalidTransition {
                event: "activate",
                state: self.state,
            });
        }

        self.state = LifecycleState::Activating;
        info!(version = %self.token, "activating");
        // Writes of the previous version wait here and see it retired afterwards
        let fence = self.gate.exclusive().await;
        let report = match self.collect_garbage().await {
            Ok(report) => report,
            Err(err) => {
                self.state = LifecycleState::Waiting;
                warn!(version = %self.token, error = %err, "activation failed");
                return Err(err.into());
            }
        };

        self.state = LifecycleState::Active;
        if let Some(mailbox) = self.mailbox.upgrade() {
            let handle = ControllerHandle {
                mailbox,
                token: self.token.clone(),
                gate: self.gate.clone(),
            };
            claim(&self.scope, handle).await;
        }
        drop(fence);
        info!(version = %self.token, deleted = report.deleted.len(), "activated");
        Ok(report)
    }

    /// Deletes every generation that does not belong to this version
    async fn collect_garbage(&self) -> Result<ActivationReport, StoreError> {
        let mut report = ActivationReport::default();
        for name in self.store.generation_names().await? {
            let current = GenerationName::parse(&name)
                .is_some_and(|generation| generation.token() == &self.token);
            if current {
                report.retained.push(name);
            } else {
                self.store.delete_generation(&name).await?;
                debug!(generation = %name, "deleted old generation");
                report.deleted.push(name);
            }
        }
        Ok(report)
    }
}

/// Claims the scope for `handle` and retires the controller it replaces
async fn claim(scope: &Scope, handle: ControllerHandle) {
    if let Some(previous) = scope.claim(handle.clone()).await {
        if !previous.same_controller(&handle) {
            info!(previous = %previous.token, current = %handle.token, "claimed scope");
            previous.retire().await;
        }
    }
}
