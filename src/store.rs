//! The service store: single owner of the service collection

use crate::errors::{MonitorError, Result};
use crate::prober::Prober;
use crate::seed::example_services;
use crate::service::{Service, ServiceDraft};
use crate::storage::ServiceRepository;
use chrono::{DateTime, Utc};
use std::future::poll_fn;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Ordered collection of services, persisted on every mutation.
///
/// Probes run as independent tasks on the runtime the store was opened in.
/// Their results come back through [`ServiceStore::update_status`]. Cloning
/// the store yields another handle to the same collection.
#[derive(Clone)]
pub struct ServiceStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    services: RwLock<Vec<Service>>,
    repository: Arc<dyn ServiceRepository>,
    prober: Arc<dyn Prober>,
    probes: Mutex<JoinSet<()>>,
    runtime: Handle,
}

impl ServiceStore {
    /// Load the persisted collection, seeding the example services if it is empty
    pub fn open(repository: Arc<dyn ServiceRepository>, prober: Arc<dyn Prober>) -> Result<Self> {
        Self::open_with(repository, prober, true)
    }

    /// Load the persisted collection without seeding
    pub fn open_unseeded(
        repository: Arc<dyn ServiceRepository>,
        prober: Arc<dyn Prober>,
    ) -> Result<Self> {
        Self::open_with(repository, prober, false)
    }

    fn open_with(
        repository: Arc<dyn ServiceRepository>,
        prober: Arc<dyn Prober>,
        seed: bool,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            MonitorError::Config("service store must be opened inside a Tokio runtime".to_string())
        })?;

        let services = repository.load()?;
        info!("Loaded {} services", services.len());

        let store = Self {
            inner: Arc::new(StoreInner {
                services: RwLock::new(services),
                repository,
                prober,
                probes: Mutex::new(JoinSet::new()),
                runtime,
            }),
        };

        if seed && store.is_empty() {
            info!("No stored services, seeding examples");
            for draft in example_services() {
                store.add(draft)?;
            }
        }

        Ok(store)
    }

    /// All services in insertion order
    pub fn list(&self) -> Vec<Service> {
        self.read_services().clone()
    }

    pub fn get(&self, id: &str) -> Option<Service> {
        self.read_services().iter().find(|s| s.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read_services().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_services().is_empty()
    }

    /// Register a new service and dispatch its first probe.
    ///
    /// The returned service is stored and persisted before this returns; the
    /// probe completes later.
    pub fn add(&self, draft: ServiceDraft) -> Result<Service> {
        draft.validate()?;

        let service = {
            let mut services = self.write_services();
            let mut service = Service::from_draft(draft, Utc::now());
            while services.iter().any(|s| s.id == service.id) {
                service.id = Uuid::new_v4().to_string();
            }

            services.push(service.clone());
            self.persist(&services);
            service
        };

        info!("Added service {} ({}) at {}", service.name, service.id, service.url);
        self.dispatch_probe(service.id.clone(), service.url.clone());
        Ok(service)
    }

    /// Record a probe result.
    ///
    /// Unknown ids are ignored, as are results older than the recorded
    /// `last_check`. Returns whether the result was applied.
    pub fn update_status(&self, id: &str, is_active: bool, checked_at: DateTime<Utc>) -> bool {
        let mut services = self.write_services();

        let Some(service) = services.iter_mut().find(|s| s.id == id) else {
            debug!("Dropping probe result for unknown service {}", id);
            return false;
        };

        if checked_at < service.last_check {
            debug!(
                "Dropping stale probe result for {} ({} < {})",
                id, checked_at, service.last_check
            );
            return false;
        }

        if service.is_active != is_active {
            info!(
                "Service {} is now {}",
                service.name,
                if is_active { "reachable" } else { "unreachable" }
            );
        }

        service.is_active = is_active;
        service.last_check = checked_at;
        self.persist(&services);
        true
    }

    /// Remove a service. Returns whether anything was removed.
    pub fn remove(&self, id: &str) -> bool {
        let mut services = self.write_services();
        let original_len = services.len();
        services.retain(|s| s.id != id);

        if services.len() == original_len {
            debug!("Service not found for removal: {}", id);
            return false;
        }

        self.persist(&services);
        info!("Removed service {}", id);
        true
    }

    /// Dispatch a probe for one service. Returns false for unknown ids.
    pub fn check(&self, id: &str) -> bool {
        let url = self
            .read_services()
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.url.clone());

        match url {
            Some(url) => {
                self.dispatch_probe(id.to_string(), url);
                true
            }
            None => false,
        }
    }

    /// Dispatch one probe per listed service without waiting for any of them
    pub fn recheck_all(&self) -> usize {
        let targets: Vec<(String, String)> = self
            .read_services()
            .iter()
            .map(|s| (s.id.clone(), s.url.clone()))
            .collect();

        for (id, url) in &targets {
            self.dispatch_probe(id.clone(), url.clone());
        }

        debug!("Dispatched {} probes", targets.len());
        targets.len()
    }

    /// Probe tasks dispatched but not yet joined
    pub fn pending_probes(&self) -> usize {
        self.lock_probes().len()
    }

    /// Wait until every dispatched probe has finished and been recorded.
    ///
    /// Tasks stay in the shared set while waiting, so dropping this future
    /// leaves them running.
    pub async fn wait_for_probes(&self) {
        while let Some(result) = poll_fn(|cx| self.lock_probes().poll_join_next(cx)).await {
            if let Err(e) = result {
                warn!("Probe task failed: {}", e);
            }
        }
    }

    fn dispatch_probe(&self, id: String, url: String) {
        let prober = Arc::clone(&self.inner.prober);
        let store: Weak<StoreInner> = Arc::downgrade(&self.inner);

        let mut probes = self.lock_probes();
        while let Some(result) = probes.try_join_next() {
            if let Err(e) = result {
                warn!("Probe task failed: {}", e);
            }
        }

        probes.spawn_on(
            async move {
                let outcome = prober.probe(&url).await;
                if let Some(inner) = store.upgrade() {
                    ServiceStore { inner }.update_status(&id, outcome.reachable, outcome.checked_at);
                }
            },
            &self.inner.runtime,
        );
    }

    /// Save the whole collection.
    ///
    /// Callers hold the collection write lock, so saves land in mutation
    /// order. The save is a small synchronous file replace and runs on the
    /// calling thread rather than through `spawn_blocking`.
    fn persist(&self, services: &[Service]) {
        if let Err(e) = self.inner.repository.save(services) {
            warn!("Failed to persist {} services, keeping in-memory state: {}", services.len(), e);
        }
    }

    fn read_services(&self) -> RwLockReadGuard<'_, Vec<Service>> {
        self.inner.services.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_services(&self) -> RwLockWriteGuard<'_, Vec<Service>> {
        self.inner.services.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_probes(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.inner.probes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::{HttpProber, ProbeOutcome};
    use crate::service::Lifecycle;
    use crate::storage::{JsonFileStorage, MemoryStorage};
    use async_trait::async_trait;
    use chrono::Duration;
    use std::collections::{HashMap, HashSet};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Answers from a fixed table and records every URL it was asked about.
    #[derive(Default)]
    struct ScriptedProber {
        reachable: HashMap<String, bool>,
        calls: Mutex<Vec<String>>,
        delay: std::time::Duration,
    }

    impl ScriptedProber {
        fn with(entries: &[(&str, bool)]) -> Arc<Self> {
            Arc::new(Self {
                reachable: entries.iter().map(|(u, r)| (u.to_string(), *r)).collect(),
                calls: Mutex::new(Vec::new()),
                delay: std::time::Duration::ZERO,
            })
        }

        fn slow(entries: &[(&str, bool)], delay: std::time::Duration) -> Arc<Self> {
            Arc::new(Self {
                reachable: entries.iter().map(|(u, r)| (u.to_string(), *r)).collect(),
                calls: Mutex::new(Vec::new()),
                delay,
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, url: &str) -> ProbeOutcome {
            self.calls.lock().unwrap().push(url.to_string());
            if url.contains("panic") {
                panic!("probe exploded for {}", url);
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            ProbeOutcome::now(self.reachable.get(url).copied().unwrap_or(false))
        }
    }

    fn draft(name: &str, url: &str) -> ServiceDraft {
        ServiceDraft {
            name: name.to_string(),
            url: url.to_string(),
            description: String::new(),
            status: Lifecycle::Production,
            ip: "10.0.0.1".to_string(),
            cloud_provider: "AWS".to_string(),
            monthly_cost: 10.0,
            supported_by: "Ops".to_string(),
        }
    }

    fn empty_store(prober: Arc<ScriptedProber>) -> (ServiceStore, MemoryStorage) {
        let storage = MemoryStorage::new();
        let store = ServiceStore::open_unseeded(Arc::new(storage.clone()), prober).unwrap();
        (store, storage)
    }

    #[tokio::test]
    async fn test_add_is_visible_before_probe_resolves() {
        let prober = ScriptedProber::with(&[("https://good.example", true)]);
        let (store, _) = empty_store(prober.clone());
        let before = Utc::now();

        let service = store.add(draft("API", "https://good.example")).unwrap();

        let listed = store.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0], service);
        assert!(!listed[0].is_active);
        assert!(listed[0].last_check >= before);
        assert_eq!(store.pending_probes(), 1);

        store.wait_for_probes().await;

        let probed = store.get(&service.id).unwrap();
        assert!(probed.is_active);
        assert!(probed.last_check >= service.last_check);
        assert_eq!(prober.calls(), vec!["https://good.example".to_string()]);
        assert_eq!(store.pending_probes(), 0);
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_order_is_kept() {
        let (store, _) = empty_store(ScriptedProber::with(&[]));

        let ids: Vec<String> = (0..20)
            .map(|i| store.add(draft(&format!("svc-{}", i), "https://x.example")).unwrap().id)
            .collect();

        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());

        let listed: Vec<String> = store.list().into_iter().map(|s| s.id).collect();
        assert_eq!(listed, ids);
        store.wait_for_probes().await;
    }

    #[tokio::test]
    async fn test_invalid_draft_leaves_collection_untouched() {
        let prober = ScriptedProber::with(&[]);
        let (store, storage) = empty_store(prober.clone());

        let no_name = draft("", "https://x.example");
        let no_url = draft("API", "");
        let mut no_ip = draft("API", "https://x.example");
        no_ip.ip.clear();
        let mut no_owner = draft("API", "https://x.example");
        no_owner.supported_by.clear();
        let mut negative = draft("API", "https://x.example");
        negative.monthly_cost = -1.0;

        for bad in [no_name, no_url, no_ip, no_owner, negative] {
            let err = store.add(bad).unwrap_err();
            assert!(err.is_validation(), "unexpected error: {}", err);
        }

        assert!(store.is_empty());
        assert!(storage.raw().is_none());
        assert_eq!(store.pending_probes(), 0);
        assert!(prober.calls().is_empty());
    }

    #[tokio::test]
    async fn test_list_is_idempotent() {
        let (store, _) = empty_store(ScriptedProber::with(&[]));
        store.add(draft("API", "https://x.example")).unwrap();
        store.wait_for_probes().await;

        assert_eq!(store.list(), store.list());
    }

    #[tokio::test]
    async fn test_every_mutation_is_persisted() {
        let prober = ScriptedProber::with(&[("https://good.example", true)]);
        let (store, storage) = empty_store(prober);

        let service = store.add(draft("API", "https://good.example")).unwrap();
        assert_eq!(storage.load().unwrap(), vec![service.clone()]);

        store.wait_for_probes().await;
        assert!(storage.load().unwrap()[0].is_active);

        assert!(store.remove(&service.id));
        assert!(storage.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_reconstructs_collection() {
        let prober = ScriptedProber::with(&[("https://good.example", true)]);
        let (store, storage) = empty_store(prober.clone());
        store.add(draft("API", "https://good.example")).unwrap();
        store.add(draft("Down", "https://down.example")).unwrap();
        store.wait_for_probes().await;
        let before = store.list();

        let reopened = ServiceStore::open(Arc::new(storage), prober.clone()).unwrap();

        assert_eq!(reopened.list(), before);
        assert_eq!(reopened.pending_probes(), 0);
        assert_eq!(prober.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_update_status_for_removed_id_is_noop() {
        let (store, storage) = empty_store(ScriptedProber::with(&[]));
        let service = store.add(draft("API", "https://x.example")).unwrap();
        store.wait_for_probes().await;

        assert!(store.remove(&service.id));
        let persisted = storage.raw();

        assert!(!store.update_status(&service.id, true, Utc::now()));
        assert!(store.is_empty());
        assert_eq!(storage.raw(), persisted);
        assert!(!store.remove(&service.id));
        assert!(!store.check(&service.id));
    }

    #[tokio::test]
    async fn test_probe_for_removed_service_is_discarded() {
        let (store, storage) = empty_store(ScriptedProber::with(&[("https://x.example", true)]));
        let keep = store.add(draft("Keep", "https://keep.example")).unwrap();
        let gone = store.add(draft("Gone", "https://x.example")).unwrap();

        assert!(store.remove(&gone.id));
        store.wait_for_probes().await;

        let listed = store.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, keep.id);
        assert!(storage.load().unwrap().iter().all(|s| s.id != gone.id));
    }

    #[tokio::test]
    async fn test_stale_result_does_not_rewind_last_check() {
        let (store, _) = empty_store(ScriptedProber::with(&[]));
        let service = store.add(draft("API", "https://x.example")).unwrap();
        store.wait_for_probes().await;
        let current = store.get(&service.id).unwrap();

        let older = current.last_check - Duration::minutes(1);
        assert!(!store.update_status(&service.id, true, older));
        assert_eq!(store.get(&service.id).unwrap(), current);

        let newer = current.last_check + Duration::seconds(1);
        assert!(store.update_status(&service.id, true, newer));
        let updated = store.get(&service.id).unwrap();
        assert!(updated.is_active);
        assert_eq!(updated.last_check, newer);
    }

    #[tokio::test]
    async fn test_recheck_all_probes_independently() {
        let prober = ScriptedProber::with(&[
            ("https://a.example", true),
            ("https://b.example", true),
        ]);
        let (store, _) = empty_store(prober.clone());
        let a = store.add(draft("A", "https://a.example")).unwrap();
        let b = store.add(draft("B", "https://b.example")).unwrap();
        let down = store.add(draft("Down", "https://unreachable.example")).unwrap();
        let boom = store.add(draft("Boom", "https://panic.example")).unwrap();
        store.wait_for_probes().await;

        assert_eq!(store.recheck_all(), 4);
        store.wait_for_probes().await;

        assert!(store.get(&a.id).unwrap().is_active);
        assert!(store.get(&b.id).unwrap().is_active);
        assert!(!store.get(&down.id).unwrap().is_active);
        assert!(!store.get(&boom.id).unwrap().is_active);
        assert_eq!(prober.calls().len(), 8);
    }

    #[tokio::test]
    async fn test_check_single_service() {
        let prober = ScriptedProber::with(&[("https://a.example", true)]);
        let (store, _) = empty_store(prober.clone());
        let a = store.add(draft("A", "https://a.example")).unwrap();
        store.add(draft("B", "https://b.example")).unwrap();
        store.wait_for_probes().await;

        assert!(store.check(&a.id));
        assert!(!store.check("missing"));
        store.wait_for_probes().await;

        let calls = prober.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2], "https://a.example");
    }

    #[tokio::test]
    async fn test_seeds_examples_once() {
        let prober = ScriptedProber::with(&[]);
        let storage = MemoryStorage::new();

        let store = ServiceStore::open(Arc::new(storage.clone()), prober.clone()).unwrap();
        let names: Vec<String> = store.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["API Gateway", "Auth Service", "CDN"]);

        store.wait_for_probes().await;
        let mut calls = prober.calls();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                "https://api.example.com",
                "https://auth.example.com",
                "https://cdn.example.com",
            ]
        );

        let reopened = ServiceStore::open(Arc::new(storage), prober.clone()).unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.pending_probes(), 0);
    }

    #[tokio::test]
    async fn test_malformed_storage_triggers_seeding() {
        let storage = MemoryStorage::with_raw("{\"services\": 42");
        let store = ServiceStore::open(Arc::new(storage), ScriptedProber::with(&[])).unwrap();
        assert_eq!(store.len(), 3);
        store.wait_for_probes().await;
    }

    #[tokio::test]
    async fn test_undecodable_file_triggers_seeding() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path(), "services");
        std::fs::write(storage.path(), [0xff, 0xfe, 0x00]).unwrap();

        let store = ServiceStore::open(Arc::new(storage), ScriptedProber::with(&[])).unwrap();
        assert_eq!(store.len(), 3);
        store.wait_for_probes().await;
    }

    #[tokio::test]
    async fn test_cleared_storage_is_reseeded_on_open() {
        let prober = ScriptedProber::with(&[]);
        let storage = MemoryStorage::new();
        let first = ServiceStore::open(Arc::new(storage.clone()), prober.clone()).unwrap();
        first.wait_for_probes().await;
        let old_ids: HashSet<String> = first.list().into_iter().map(|s| s.id).collect();

        storage.clear();
        assert!(storage.raw().is_none());

        let reopened = ServiceStore::open(Arc::new(storage.clone()), prober).unwrap();
        assert_eq!(reopened.len(), 3);
        assert!(reopened.list().iter().all(|s| !old_ids.contains(&s.id)));
        assert_eq!(storage.load().unwrap().len(), 3);
        reopened.wait_for_probes().await;
    }

    #[tokio::test]
    async fn test_cancelled_wait_leaves_checks_running() {
        let prober = ScriptedProber::slow(
            &[("https://slow.example", true)],
            std::time::Duration::from_millis(200),
        );
        let (store, storage) = empty_store(prober);
        let service = store.add(draft("Slow", "https://slow.example")).unwrap();

        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(20), store.wait_for_probes())
                .await;
        assert!(waited.is_err());
        assert_eq!(store.pending_probes(), 1);
        assert!(!store.get(&service.id).unwrap().is_active);

        store.wait_for_probes().await;

        assert_eq!(store.pending_probes(), 0);
        assert!(store.get(&service.id).unwrap().is_active);
        assert!(storage.load().unwrap()[0].is_active);
    }

    #[tokio::test]
    async fn test_write_failure_keeps_memory_state() {
        let (store, storage) = empty_store(ScriptedProber::with(&[]));
        storage.set_fail_writes(true);

        let service = store.add(draft("API", "https://x.example")).unwrap();
        store.wait_for_probes().await;

        assert_eq!(store.list()[0].id, service.id);
        assert!(storage.raw().is_none());
    }

    #[test]
    fn test_open_requires_runtime() {
        let result = ServiceStore::open(
            Arc::new(MemoryStorage::new()),
            ScriptedProber::with(&[]),
        );
        assert!(matches!(result, Err(MonitorError::Config(_))));
    }

    #[tokio::test]
    async fn test_http_probe_sets_reachability() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let prober = HttpProber::new(std::time::Duration::from_secs(5)).unwrap();
        let store =
            ServiceStore::open_unseeded(Arc::new(MemoryStorage::new()), Arc::new(prober)).unwrap();

        let good = store.add(draft("API", &server.uri())).unwrap();
        let bad = store.add(draft("API", &dead)).unwrap();
        store.wait_for_probes().await;

        assert!(store.get(&good.id).unwrap().is_active);
        assert!(!store.get(&bad.id).unwrap().is_active);
    }
}
