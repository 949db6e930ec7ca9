//! Identity-keyed session registry with single-flight connection setup.
//!
//! Every capability call goes through [`SessionClient`], which resolves the
//! session via [`SessionManager::get_or_create`]. That function and
//! [`SessionManager::disconnect`]/[`SessionManager::disconnect_all`] are the
//! only code paths that mutate the registry, apart from the connect task
//! settling its own slot.

use crate::mcp::client::{
    ClientDetails, ResourceContent, ResourceDescriptor, Session, SessionInfo, SessionState,
    ToolDescriptor,
};
use crate::mcp::error::McpError;
use crate::mcp::provisioning::EndpointProvisioner;
use crate::mcp::transport::{Endpoint, TransportConnector};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Identity key used by profiles that share one session process-wide.
pub const GLOBAL_IDENTITY: &str = "global";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DISCONNECT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionScope {
    /// One shared session under [`GLOBAL_IDENTITY`].
    Global,
    /// One session per caller-supplied identity key.
    PerIdentity,
}

impl SessionScope {
    pub fn parse(scope: Option<&str>) -> Result<Self, String> {
        let scope = scope.unwrap_or("global").to_ascii_lowercase();
        match scope.as_str() {
            "global" => Ok(SessionScope::Global),
            "per-identity" | "per_identity" | "per-user" => Ok(SessionScope::PerIdentity),
            other => Err(format!("Unsupported session scope: {}", other)),
        }
    }
}

/// Where the endpoint for a new session comes from.
pub enum EndpointSource {
    /// Every identity connects to the same endpoint.
    Static(Endpoint),
    /// Each identity gets its own endpoint, allocated once and cached.
    Provisioned(Arc<dyn EndpointProvisioner>),
    /// Required credentials are absent; no endpoint can be built.
    Unconfigured,
}

impl std::fmt::Debug for EndpointSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointSource::Static(endpoint) => f.debug_tuple("Static").field(endpoint).finish(),
            EndpointSource::Provisioned(_) => f.write_str("Provisioned"),
            EndpointSource::Unconfigured => f.write_str("Unconfigured"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub server_id: String,
    pub scope: SessionScope,
    pub client: ClientDetails,
    /// Default deadline applied to each capability call.
    pub request_timeout: Duration,
    /// Deadline for transport open plus handshake.
    pub connect_timeout: Duration,
    /// Credentials that must be supplied before any connection is attempted.
    pub missing: Vec<String>,
}

impl ManagerSettings {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            scope: SessionScope::Global,
            client: ClientDetails::default(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            missing: Vec::new(),
        }
    }
}

/// Outcome of a bulk teardown.
#[derive(Debug, Default)]
pub struct DisconnectReport {
    pub closed: usize,
    pub abandoned: usize,
    pub failures: Vec<(String, McpError)>,
}

type ConnectAttempt = Shared<BoxFuture<'static, Result<Arc<Session>, McpError>>>;
type SessionMap = Mutex<HashMap<String, SessionSlot>>;

enum SessionSlot {
    Connecting {
        attempt: ConnectAttempt,
        generation: u64,
    },
    Connected(Arc<Session>),
}

/// State a connection attempt needs. Held separately from the registry so an
/// in-flight attempt never keeps the registry alive.
struct ConnectContext {
    settings: ManagerSettings,
    source: EndpointSource,
    connector: Arc<dyn TransportConnector>,
    provisioned: StdMutex<HashMap<String, Endpoint>>,
}

impl ConnectContext {
    fn provisioned(&self) -> std::sync::MutexGuard<'_, HashMap<String, Endpoint>> {
        self.provisioned
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn endpoint_for(&self, identity: &str) -> Result<Endpoint, McpError> {
        match &self.source {
            EndpointSource::Static(endpoint) => Ok(endpoint.clone()),
            EndpointSource::Provisioned(provisioner) => {
                let cached = self.provisioned().get(identity).cloned();
                if let Some(endpoint) = cached {
                    return Ok(endpoint);
                }
                let endpoint = provisioner.provision(identity).await?;
                info!(
                    server_id = %self.settings.server_id,
                    identity = %identity,
                    target = %endpoint.describe(),
                    "Provisioned MCP endpoint"
                );
                self.provisioned()
                    .insert(identity.to_string(), endpoint.clone());
                Ok(endpoint)
            }
            EndpointSource::Unconfigured => Err(McpError::not_configured(
                &self.settings.server_id,
                &self.settings.missing,
            )),
        }
    }

    async fn connect(&self, identity: &str) -> Result<Session, McpError> {
        let endpoint = self.endpoint_for(identity).await?;
        Session::connect(
            &self.settings.server_id,
            identity,
            endpoint,
            self.connector.as_ref(),
            &self.settings.client,
            self.settings.connect_timeout,
        )
        .await
    }
}

pub struct SessionManager {
    context: Arc<ConnectContext>,
    sessions: Arc<SessionMap>,
    next_generation: AtomicU64,
}

impl SessionManager {
    pub fn new(
        settings: ManagerSettings,
        source: EndpointSource,
        connector: Arc<dyn TransportConnector>,
    ) -> Self {
        Self {
            context: Arc::new(ConnectContext {
                settings,
                source,
                connector,
                provisioned: StdMutex::new(HashMap::new()),
            }),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.context.settings
    }

    pub fn server_id(&self) -> &str {
        &self.context.settings.server_id
    }

    pub fn scope(&self) -> SessionScope {
        self.context.settings.scope
    }

    pub fn is_configured(&self) -> bool {
        self.context.settings.missing.is_empty()
            && !matches!(self.context.source, EndpointSource::Unconfigured)
    }

    pub fn missing_credentials(&self) -> &[String] {
        &self.context.settings.missing
    }

    /// Maps a caller-supplied identity onto the registry key for this
    /// profile's scope. The key itself is never inspected.
    pub fn resolve_identity(&self, requested: Option<&str>) -> Result<String, McpError> {
        match (self.scope(), requested) {
            (SessionScope::Global, _) => Ok(GLOBAL_IDENTITY.to_string()),
            (SessionScope::PerIdentity, Some(identity)) => Ok(identity.to_string()),
            (SessionScope::PerIdentity, None) => Err(McpError::InvalidInput(format!(
                "server '{}' requires an identity key",
                self.server_id()
            ))),
        }
    }

    fn ensure_configured(&self) -> Result<(), McpError> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(McpError::not_configured(
                self.server_id(),
                self.missing_credentials(),
            ))
        }
    }

    /// Returns the live session for `identity`, joining an in-flight attempt
    /// or starting one. Concurrent callers for one key share a single attempt.
    pub async fn get_or_create(&self, identity: &str) -> Result<Arc<Session>, McpError> {
        self.ensure_configured()?;

        let (attempt, stale) = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(identity) {
                Some(SessionSlot::Connected(session)) if session.is_connected() => {
                    return Ok(Arc::clone(session));
                }
                Some(SessionSlot::Connecting { attempt, .. }) => (attempt.clone(), None),
                _ => {
                    let stale = match sessions.remove(identity) {
                        Some(SessionSlot::Connected(session)) => Some(session),
                        _ => None,
                    };
                    let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
                    let attempt = self.start_attempt(identity, generation);
                    sessions.insert(
                        identity.to_string(),
                        SessionSlot::Connecting {
                            attempt: attempt.clone(),
                            generation,
                        },
                    );
                    (attempt, stale)
                }
            }
        };

        if let Some(stale) = stale {
            debug!(server_id = %self.server_id(), identity = %identity, "Replacing disconnected MCP session");
            if let Err(err) = stale.close().await {
                debug!(server_id = %self.server_id(), identity = %identity, error = %err, "Stale MCP session close failed");
            }
        }

        attempt.await
    }

    /// Runs the attempt on its own task so it reaches `settle` even when
    /// every caller waiting on it has gone away. Must be called with the
    /// registry lock held; the task blocks on that lock before settling.
    fn start_attempt(&self, identity: &str, generation: u64) -> ConnectAttempt {
        let context = Arc::clone(&self.context);
        let sessions = Arc::downgrade(&self.sessions);
        let identity = identity.to_string();
        let task = tokio::spawn(async move {
            let outcome = context.connect(&identity).await.map(Arc::new);
            settle(
                &context.settings.server_id,
                sessions,
                &identity,
                generation,
                outcome,
            )
            .await
        });

        async move {
            task.await.unwrap_or_else(|err| {
                Err(McpError::TransportUnavailable(format!(
                    "connection task failed: {err}"
                )))
            })
        }
        .boxed()
        .shared()
    }

    /// Closes and evicts one session. Absent keys are a no-op.
    pub async fn disconnect(&self, identity: &str) -> Result<(), McpError> {
        let removed = self.sessions.lock().await.remove(identity);
        match removed {
            Some(SessionSlot::Connected(session)) => {
                info!(server_id = %self.server_id(), identity = %identity, "Disconnecting MCP session");
                session.close().await
            }
            Some(SessionSlot::Connecting { .. }) => {
                debug!(server_id = %self.server_id(), identity = %identity, "Abandoned in-flight MCP connection; it closes on completion");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Closes and evicts every session. Individual close failures are logged
    /// and reported without stopping the sweep.
    pub async fn disconnect_all(&self) -> DisconnectReport {
        let drained: Vec<(String, SessionSlot)> = self.sessions.lock().await.drain().collect();
        let mut report = DisconnectReport::default();
        let mut sessions = Vec::new();
        for (identity, slot) in drained {
            match slot {
                SessionSlot::Connected(session) => sessions.push((identity, session)),
                SessionSlot::Connecting { .. } => report.abandoned += 1,
            }
        }

        let server_id = self.server_id().to_string();
        let outcomes: Vec<(String, Result<(), McpError>)> = futures_util::stream::iter(sessions)
            .map(|(identity, session)| async move {
                let result = session.close().await;
                (identity, result)
            })
            .buffer_unordered(DISCONNECT_CONCURRENCY)
            .collect()
            .await;

        for (identity, result) in outcomes {
            match result {
                Ok(()) => report.closed += 1,
                Err(err) => {
                    warn!(server_id = %server_id, identity = %identity, error = %err, "Failed to close MCP session");
                    report.failures.push((identity, err));
                }
            }
        }
        info!(
            server_id = %server_id,
            closed = report.closed,
            failed = report.failures.len(),
            abandoned = report.abandoned,
            "Disconnected MCP sessions"
        );
        report
    }

    /// Keys currently present in the registry, sorted.
    pub async fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        identities.sort();
        identities
    }

    pub async fn session_state(&self, identity: &str) -> SessionState {
        match self.sessions.lock().await.get(identity) {
            Some(SessionSlot::Connecting { .. }) => SessionState::Connecting,
            Some(SessionSlot::Connected(session)) => session.state(),
            None => SessionState::Disconnected,
        }
    }

    pub async fn session_info(&self, identity: &str) -> Option<SessionInfo> {
        match self.sessions.lock().await.get(identity) {
            Some(SessionSlot::Connected(session)) => Some(session.info()),
            _ => None,
        }
    }

    /// Capability surface bound to one identity key.
    pub fn client(&self, identity: &str) -> SessionClient<'_> {
        SessionClient {
            manager: self,
            identity: identity.to_string(),
            timeout: self.context.settings.request_timeout,
        }
    }
}

/// Publishes the outcome of attempt `generation` if it still owns the slot.
/// Failures leave no entry behind so the next call retries. A session whose
/// slot was evicted, or whose manager is gone, is closed here.
async fn settle(
    server_id: &str,
    sessions: Weak<SessionMap>,
    identity: &str,
    generation: u64,
    outcome: Result<Arc<Session>, McpError>,
) -> Result<Arc<Session>, McpError> {
    let Some(sessions) = sessions.upgrade() else {
        if let Ok(session) = outcome {
            release_evicted(server_id, identity, &session).await;
        }
        return Err(McpError::NotConnected);
    };

    let mut slots = sessions.lock().await;
    let owns_slot = matches!(
        slots.get(identity),
        Some(SessionSlot::Connecting { generation: current, .. }) if *current == generation
    );

    match outcome {
        Ok(session) if owns_slot => {
            slots.insert(
                identity.to_string(),
                SessionSlot::Connected(Arc::clone(&session)),
            );
            Ok(session)
        }
        Ok(session) => {
            drop(slots);
            release_evicted(server_id, identity, &session).await;
            Err(McpError::NotConnected)
        }
        Err(err) => {
            if owns_slot {
                slots.remove(identity);
            }
            debug!(server_id = %server_id, identity = %identity, error = %err, "MCP connection attempt failed");
            Err(err)
        }
    }
}

async fn release_evicted(server_id: &str, identity: &str, session: &Session) {
    debug!(server_id = %server_id, identity = %identity, "MCP session evicted while connecting");
    if let Err(err) = session.close().await {
        debug!(server_id = %server_id, identity = %identity, error = %err, "Evicted MCP session close failed");
    }
}

/// Connects on demand and applies a per-call deadline. A call that misses its
/// deadline fails with [`McpError::Timeout`]; the session stays in place.
pub struct SessionClient<'a> {
    manager: &'a SessionManager,
    identity: String,
    timeout: Duration,
}

impl SessionClient<'_> {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        self.run(|session| async move { session.list_tools().await })
            .await
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<Value, McpError> {
        self.manager.ensure_configured()?;
        if name.trim().is_empty() {
            return Err(McpError::InvalidInput(
                "tool name must not be empty".to_string(),
            ));
        }
        let name = name.to_string();
        self.run(|session| async move { session.call_tool(&name, arguments).await })
            .await
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, McpError> {
        self.run(|session| async move { session.list_resources().await })
            .await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ResourceContent, McpError> {
        self.manager.ensure_configured()?;
        if uri.trim().is_empty() {
            return Err(McpError::InvalidInput(
                "resource uri must not be empty".to_string(),
            ));
        }
        let uri = uri.to_string();
        self.run(|session| async move { session.read_resource(&uri).await })
            .await
    }

    pub async fn ping(&self) -> Result<(), McpError> {
        self.run(|session| async move { session.ping().await }).await
    }

    async fn run<T, F, Fut>(&self, operation: F) -> Result<T, McpError>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T, McpError>>,
    {
        let session = self.manager.get_or_create(&self.identity).await?;
        match tokio::time::timeout(self.timeout, operation(session)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    server_id = %self.manager.server_id(),
                    identity = %self.identity,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "MCP call timed out"
                );
                Err(McpError::Timeout(self.timeout))
            }
        }
    }
}
