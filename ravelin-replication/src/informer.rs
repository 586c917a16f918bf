use crate::destination::{ReplicationDestination, ReplicationDocument, REPLICATION_DESTINATIONS_KEY};
use crate::failover::{FailoverCandidate, FailoverState};
use crate::failure::FailureCounters;
use crate::local_cache::LocalCache;
use crate::transport::HttpTransport;
use crate::types::{FailoverStatusChanged, HttpMethod, OperationMetadata};
use ravelin::{ClientConfig, FailoverBehavior, RavelinError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct Topology {
    destinations: Vec<ReplicationDestination>,
    last_update: Option<Instant>,
}

/// Knows the replicas of one primary server and routes requests among them
/// when the primary fails.
///
/// The topology is fetched from the primary and mirrored to a local file keyed
/// by [`ravelin::server_hash`], so a new informer can fail over using the last
/// known replicas before it ever reaches the primary.
pub struct ReplicationInformer<T: HttpTransport> {
    primary: OperationMetadata,
    server_hash: String,
    config: Arc<ClientConfig>,
    transport: Arc<T>,
    local_cache: LocalCache,
    topology: RwLock<Topology>,
    failures: FailureCounters,
    refresh_lock: tokio::sync::Mutex<()>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    read_striping: AtomicUsize,
}

impl<T: HttpTransport> ReplicationInformer<T> {
    /// Build an informer for `primary`, seeding its topology from the local
    /// cache when a previous run left one behind.
    pub fn new(primary: OperationMetadata, config: Arc<ClientConfig>, transport: Arc<T>) -> Self {
        let server_hash = ravelin::server_hash(&primary.url);
        let local_cache = LocalCache::new(&config.local_cache_dir);

        let informer = ReplicationInformer {
            primary,
            server_hash,
            config,
            transport,
            local_cache,
            topology: RwLock::new(Topology::default()),
            failures: FailureCounters::new(),
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_task: Mutex::new(None),
            read_striping: AtomicUsize::new(0),
        };

        if !informer.config.failover_behavior.is_fail_immediately() {
            let cached = informer.get_or_load_cached_destinations(&informer.server_hash);
            if !cached.is_empty() {
                tracing::info!(
                    "Loaded {} cached replication destinations for {}",
                    cached.len(),
                    informer.primary.url
                );
                informer.set_destinations(cached);
            }
        }

        informer
    }

    pub fn primary(&self) -> &OperationMetadata {
        &self.primary
    }

    pub fn server_hash(&self) -> &str {
        &self.server_hash
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn read_topology(&self) -> std::sync::RwLockReadGuard<'_, Topology> {
        self.topology.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_topology(&self) -> std::sync::RwLockWriteGuard<'_, Topology> {
        self.topology.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every destination in the last topology, disabled ones included.
    pub fn destinations(&self) -> Vec<ReplicationDestination> {
        self.read_topology().destinations.clone()
    }

    /// Usable replicas in the order the server declared them.
    pub fn replication_destinations(&self) -> Vec<OperationMetadata> {
        if self.config.failover_behavior.is_fail_immediately() {
            return Vec::new();
        }
        self.read_topology()
            .destinations
            .iter()
            .filter(|d| !d.disabled && !d.ignored_client)
            .filter_map(ReplicationDestination::to_operation_metadata)
            .collect()
    }

    fn failover_candidates(&self) -> Vec<FailoverCandidate> {
        if self.config.failover_behavior.is_fail_immediately() {
            return Vec::new();
        }
        self.read_topology()
            .destinations
            .iter()
            .filter(|d| !d.ignored_client)
            .filter_map(|d| {
                d.to_operation_metadata().map(|operation| FailoverCandidate {
                    operation,
                    disabled: d.disabled,
                })
            })
            .collect()
    }

    fn set_destinations(&self, destinations: Vec<ReplicationDestination>) {
        for url in destinations.iter().filter_map(ReplicationDestination::operation_url) {
            self.failures.track(&url);
        }
        self.write_topology().destinations = destinations;
    }

    /// Whether `error` means the server could not be reached, so the request
    /// may go elsewhere.
    pub fn is_server_down(&self, error: &RavelinError) -> bool {
        error.is_server_down()
    }

    pub fn is_timeout(&self, error: &RavelinError) -> bool {
        error.is_timeout()
    }

    /// Take `url` out of the running for the rest of the operation tracked by
    /// `state`, and count the failure against it.
    pub fn handle_request_failure(&self, state: &mut FailoverState, url: &str) {
        state.mark_failed(url);
        self.failures.increment(url);
    }

    /// Destinations from the local cache file for `server_hash`; empty when
    /// there is no usable file.
    pub fn get_or_load_cached_destinations(&self, server_hash: &str) -> Vec<ReplicationDestination> {
        let Some(document) = self.local_cache.try_load(server_hash) else {
            return Vec::new();
        };
        match ReplicationDocument::from_value(&document) {
            Ok(doc) => doc.destinations.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(
                    "Ignoring cached replication information for {}: {}",
                    server_hash,
                    e
                );
                Vec::new()
            }
        }
    }

    fn update_from_document(&self, document: &serde_json::Value) -> bool {
        match ReplicationDocument::from_value(document) {
            Ok(doc) => {
                let destinations = doc.destinations.unwrap_or_default();
                tracing::info!(
                    "Replication topology for {}: {} destinations",
                    self.primary.url,
                    destinations.len()
                );
                self.set_destinations(destinations);
                true
            }
            Err(e) => {
                tracing::error!(
                    "Invalid replication document from {}: {}",
                    self.primary.url,
                    e
                );
                false
            }
        }
    }

    /// Fetch the topology from the primary and persist it locally.
    ///
    /// If the primary cannot be reached the local copy is used instead and the
    /// transport error is returned. A primary without a topology document
    /// still counts as checked.
    pub async fn refresh_replication_information(&self) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;

        let (document, outcome) = match self
            .transport
            .get_document(&self.primary, REPLICATION_DESTINATIONS_KEY)
            .await
        {
            Ok(document) => {
                // we just hit the primary, so its failure history is moot
                self.failures.replace_with_fresh(&self.primary.url);
                if let Some(doc) = document.as_ref() {
                    if self.update_from_document(doc) {
                        self.local_cache.try_save(&self.server_hash, doc);
                    }
                }
                (None, Ok(()))
            }
            Err(e) => {
                tracing::error!(
                    "Could not contact {} for new replication information: {}",
                    self.primary.url,
                    e
                );
                (self.local_cache.try_load(&self.server_hash), Err(e))
            }
        };

        if let Some(cached) = document {
            self.update_from_document(&cached);
        }
        self.write_topology().last_update = Some(Instant::now());
        outcome
    }

    fn is_stale(&self) -> bool {
        match self.read_topology().last_update {
            Some(at) => at.elapsed() >= self.config.replication_refresh_interval,
            None => true,
        }
    }

    /// Start a background refresh if the topology is older than the refresh
    /// interval and none is running. Does nothing outside a Tokio runtime.
    pub fn update_replication_information_if_needed(self: &Arc<Self>) {
        if self.config.failover_behavior.is_fail_immediately() || !self.is_stale() {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!("No async runtime, skipping replication refresh");
                return;
            }
        };

        let mut task = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let informer = Arc::clone(self);
        *task = Some(runtime.spawn(async move {
            if let Err(e) = informer.refresh_replication_information().await {
                tracing::warn!("Background replication refresh failed: {}", e);
            }
        }));
    }

    /// Wait for an in-flight background refresh to finish.
    pub async fn close(&self) {
        let handle = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Replication refresh task failed: {}", e);
            }
        }
    }

    pub fn read_striping_base(&self) -> usize {
        self.read_striping.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn failure_count(&self, url: &str) -> u64 {
        self.failures.failure_count(url)
    }

    pub fn is_first_failure(&self, url: &str) -> bool {
        self.failures.is_first_failure(url)
    }

    pub fn increment_failure_count(&self, url: &str) {
        self.failures.increment(url);
    }

    pub fn reset_failure_count(&self, url: &str) {
        self.failures.reset(url);
    }

    pub fn force_check(&self, url: &str, should_force: bool) {
        self.failures.force_check(url, should_force);
    }

    pub fn on_failover_status_changed<F>(&self, listener: F)
    where
        F: Fn(&FailoverStatusChanged) + Send + Sync + 'static,
    {
        self.failures.on_status_changed(listener);
    }

    /// Reject sending `method` to a secondary when the failover behavior
    /// forbids it.
    pub fn assert_valid_operation(&self, method: HttpMethod) -> Result<()> {
        let behavior = self.config.failover_behavior;
        let base = behavior.without_flags();

        if base.contains(FailoverBehavior::ALLOW_READS_FROM_SECONDARIES_AND_WRITES_TO_SECONDARIES) {
            return Ok(());
        }
        if method == HttpMethod::Get
            && (base.contains(FailoverBehavior::ALLOW_READS_FROM_SECONDARIES)
                || behavior.contains(FailoverBehavior::READ_FROM_ALL_SERVERS))
        {
            return Ok(());
        }

        Err(RavelinError::InvalidOperation(format!(
            "Could not replicate {} operation to secondary node, failover behavior is: {}",
            method, behavior
        )))
    }

    /// Whether request number `current_request` should be sent to `url` now.
    pub fn should_execute_using(
        &self,
        url: &str,
        current_request: u64,
        method: HttpMethod,
        primary: bool,
    ) -> Result<bool> {
        if !primary {
            self.assert_valid_operation(method)?;
        }
        Ok(self.failures.should_check(
            url,
            current_request,
            self.config.max_failover_check_period,
        ))
    }

    /// Run `operation` against `primary`, failing over to replicas when it is
    /// down.
    ///
    /// Application errors are returned as is. When every destination is down
    /// the result is [`RavelinError::AllDestinationsFailed`].
    pub async fn execute_with_replication<R, F, Fut>(
        &self,
        method: HttpMethod,
        primary: &OperationMetadata,
        current_request: u64,
        read_striping_base: usize,
        operation: F,
    ) -> Result<R>
    where
        F: Fn(OperationMetadata) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let primary = primary.clone();
        let mut state = FailoverState::new(primary.clone(), self.failover_candidates());

        if method == HttpMethod::Get
            && self
                .config
                .failover_behavior
                .contains(FailoverBehavior::READ_FROM_ALL_SERVERS)
        {
            let enabled: Vec<OperationMetadata> = state
                .replicas()
                .iter()
                .filter(|c| !c.disabled)
                .map(|c| c.operation.clone())
                .collect();
            // index == enabled.len() means the primary serves this read
            let index = read_striping_base % (enabled.len() + 1);
            if let Some(replica) = enabled.get(index) {
                if self.should_execute_using(&replica.url, current_request, method, false)? {
                    match self.attempt(&operation, replica, Some(&primary)).await {
                        Ok(result) => {
                            state.complete();
                            return Ok(result);
                        }
                        Err(e) if e.is_server_down() => {
                            tracing::warn!("Striped read from {} failed: {}", replica.url, e);
                            state.record_error(e.to_string());
                            self.handle_request_failure(&mut state, &replica.url);
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        while let Some(candidate) = state.next_candidate() {
            let is_primary = state.is_primary(&candidate.url);
            if !self.should_execute_using(&candidate.url, current_request, method, is_primary)? {
                tracing::debug!(
                    "Skipping {} for request {}: still failing",
                    candidate.url,
                    current_request
                );
                state.skip(&candidate.url);
                continue;
            }

            let credentials_from = if is_primary { None } else { Some(&primary) };
            match self.attempt(&operation, &candidate, credentials_from).await {
                Ok(result) => {
                    state.complete();
                    return Ok(result);
                }
                Err(e) if e.is_server_down() => {
                    if state.has_remaining_after(&candidate.url) {
                        tracing::warn!("{} is down, failing over: {}", candidate.url, e);
                    } else {
                        tracing::warn!("{} is down and no destinations remain: {}", candidate.url, e);
                    }
                    state.record_error(e.to_string());
                    self.handle_request_failure(&mut state, &candidate.url);
                }
                Err(e) => return Err(e),
            }
        }

        Err(RavelinError::AllDestinationsFailed {
            attempted: state.total_destinations(),
            last_error: state.last_error().map(str::to_string),
        })
    }

    /// One destination, with a single retry for a non-timeout network failure
    /// on a destination that had not failed before.
    async fn attempt<R, F, Fut>(
        &self,
        operation: &F,
        target: &OperationMetadata,
        primary: Option<&OperationMetadata>,
    ) -> Result<R>
    where
        F: Fn(OperationMetadata) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        match self.try_operation(operation, target, primary).await {
            Err(e)
                if e.is_server_down()
                    && !e.is_timeout()
                    && self.failures.is_first_failure(&target.url) =>
            {
                tracing::debug!("Retrying {} once after: {}", target.url, e);
                self.try_operation(operation, target, primary).await
            }
            other => other,
        }
    }

    /// A replica that has not failed before is tried with the primary's
    /// credentials; if it rejects them, with its own.
    async fn try_operation<R, F, Fut>(
        &self,
        operation: &F,
        target: &OperationMetadata,
        primary: Option<&OperationMetadata>,
    ) -> Result<R>
    where
        F: Fn(OperationMetadata) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let primary_credentials = primary
            .filter(|_| self.failures.is_first_failure(&target.url))
            .map(|p| p.credentials.clone());

        let effective = match primary_credentials.as_ref() {
            Some(credentials) => {
                OperationMetadata::with_credentials(target.url.clone(), credentials.clone())
            }
            None => target.clone(),
        };

        match operation(effective).await {
            Ok(result) => {
                self.failures.reset(&target.url);
                Ok(result)
            }
            Err(e)
                if primary_credentials.is_some()
                    && target.credentials.has_credentials()
                    && e.is_http_status(&[http::StatusCode::UNAUTHORIZED]) =>
            {
                tracing::debug!(
                    "{} rejected the primary's credentials, retrying with its own",
                    target.url
                );
                self.failures.increment(&target.url);
                let result = operation(target.clone()).await;
                if result.is_ok() {
                    self.failures.reset(&target.url);
                }
                result
            }
            Err(e) => Err(e),
        }
    }
}
