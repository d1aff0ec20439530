//! Model resource management: lazy, shared, deterministically released handles.
//!
//! Every content model (captioner, OCR, summariser, …) may be backed by weights
//! that take gigabytes of memory. The [`ModelManager`] keeps **at most one live
//! handle per [`Capability`]**, shares it immutably between workers through
//! [`ModelLease`]s, and unloads it as soon as the last lease is dropped. Stages
//! acquire a lease when they start and drop it when they finish, so two heavy
//! models never sit in memory longer than the stage that needs them.
//!
//! Device and precision are never guessed here. They arrive as
//! [`AcquireOptions`] from [`ModelSettings`] in the configuration and are handed
//! to the [`ModelProvider`] verbatim.

use crate::collaborators::{
    EntityRecognizer, GenerativeAnalyzer, GrammarPolisher, ImageCaptioner, ImageOcr,
    TextSummarizer,
};
use crate::error::ModelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Kinds of model the pipeline can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Captioner,
    Ocr,
    Summarizer,
    Generator,
    GrammarChecker,
    EntityRecognizer,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Captioner,
        Capability::Ocr,
        Capability::Summarizer,
        Capability::Generator,
        Capability::GrammarChecker,
        Capability::EntityRecognizer,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Captioner => "captioner",
            Capability::Ocr => "ocr",
            Capability::Summarizer => "summarizer",
            Capability::Generator => "generator",
            Capability::GrammarChecker => "grammar-checker",
            Capability::EntityRecognizer => "entity-recognizer",
        };
        f.write_str(s)
    }
}

/// Compute device a model should be placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Device {
    #[default]
    Cpu,
    /// CUDA device ordinal.
    Cuda(u32),
    Metal,
}

/// Weight precision a model should be loaded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Precision {
    #[default]
    Full,
    Half,
    Int8,
    Int4,
}

/// Placement requested at acquisition time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AcquireOptions {
    pub device: Device,
    pub precision: Precision,
}

impl AcquireOptions {
    pub fn new(device: Device, precision: Precision) -> Self {
        Self { device, precision }
    }
}

/// Per-capability placement, with a shared default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSettings {
    pub default: AcquireOptions,
    pub overrides: HashMap<Capability, AcquireOptions>,
}

impl ModelSettings {
    /// Options for `capability`: its override if one exists, else the default.
    pub fn options_for(&self, capability: Capability) -> AcquireOptions {
        self.overrides
            .get(&capability)
            .copied()
            .unwrap_or(self.default)
    }

    pub fn with_override(mut self, capability: Capability, options: AcquireOptions) -> Self {
        self.overrides.insert(capability, options);
        self
    }
}

/// A loaded model, typed by the capability it serves.
#[derive(Clone)]
pub enum ModelHandle {
    Captioner(Arc<dyn ImageCaptioner>),
    Ocr(Arc<dyn ImageOcr>),
    Summarizer(Arc<dyn TextSummarizer>),
    Generator(Arc<dyn GenerativeAnalyzer>),
    GrammarChecker(Arc<dyn GrammarPolisher>),
    EntityRecognizer(Arc<dyn EntityRecognizer>),
}

impl ModelHandle {
    pub fn capability(&self) -> Capability {
        match self {
            ModelHandle::Captioner(_) => Capability::Captioner,
            ModelHandle::Ocr(_) => Capability::Ocr,
            ModelHandle::Summarizer(_) => Capability::Summarizer,
            ModelHandle::Generator(_) => Capability::Generator,
            ModelHandle::GrammarChecker(_) => Capability::GrammarChecker,
            ModelHandle::EntityRecognizer(_) => Capability::EntityRecognizer,
        }
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelHandle({})", self.capability())
    }
}

/// Loads and unloads the concrete models behind each capability.
///
/// `unload` is the explicit memory-reclamation hook: it runs after the last
/// lease for `capability` is gone and the manager has dropped its own
/// reference, so an implementation can free device memory there. No `load`
/// of the same capability starts until `unload` has returned.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn load(
        &self,
        capability: Capability,
        options: &AcquireOptions,
    ) -> Result<ModelHandle, ModelError>;

    fn unload(&self, capability: Capability) {
        let _ = capability;
    }
}

enum Slot {
    Live {
        handle: Arc<ModelHandle>,
        leases: usize,
    },
    /// The provider is reclaiming the last instance; loads wait for it.
    Unloading,
}

enum Claim {
    Shared(ModelLease),
    Unloading,
    Vacant,
}

struct Inner {
    provider: Arc<dyn ModelProvider>,
    table: Mutex<HashMap<Capability, Slot>>,
    // Serialises loads so two workers never load the same capability twice.
    load_gate: tokio::sync::Mutex<()>,
    unloaded: Notify,
}

impl Inner {
    fn table(&self) -> MutexGuard<'_, HashMap<Capability, Slot>> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle table for every capability the pipeline uses.
///
/// Cloning is cheap; clones share the same table.
#[derive(Clone)]
pub struct ModelManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelManager")
            .field("live", &self.live_capabilities())
            .finish()
    }
}

impl ModelManager {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                table: Mutex::new(HashMap::new()),
                load_gate: tokio::sync::Mutex::new(()),
                unloaded: Notify::new(),
            }),
        }
    }

    /// Lease the model for `capability`, loading it on first use.
    ///
    /// If the capability is already live the existing handle is shared and
    /// `options` is ignored; placement is decided by whoever loaded it.
    pub async fn acquire(
        &self,
        capability: Capability,
        options: &AcquireOptions,
    ) -> Result<ModelLease, ModelError> {
        if let Some(lease) = self.try_share(capability) {
            return Ok(lease);
        }

        let _gate = self.inner.load_gate.lock().await;
        loop {
            let unloaded = self.inner.unloaded.notified();
            tokio::pin!(unloaded);
            unloaded.as_mut().enable();
            match self.claim(capability) {
                Claim::Shared(lease) => return Ok(lease),
                Claim::Vacant => break,
                Claim::Unloading => {
                    debug!("Waiting for {} model to finish unloading", capability);
                    unloaded.await;
                }
            }
        }

        debug!(
            "Loading {} model on {:?} ({:?})",
            capability, options.device, options.precision
        );
        let handle = self.inner.provider.load(capability, options).await?;
        if handle.capability() != capability {
            return Err(ModelError::CapabilityMismatch {
                expected: capability,
                found: handle.capability(),
            });
        }

        let handle = Arc::new(handle);
        self.inner.table().insert(
            capability,
            Slot::Live {
                handle: Arc::clone(&handle),
                leases: 1,
            },
        );
        info!(
            "Loaded {} model on {:?} ({:?})",
            capability, options.device, options.precision
        );

        Ok(ModelLease {
            capability,
            handle: Some(handle),
            manager: Arc::clone(&self.inner),
        })
    }

    fn try_share(&self, capability: Capability) -> Option<ModelLease> {
        match self.claim(capability) {
            Claim::Shared(lease) => Some(lease),
            _ => None,
        }
    }

    fn claim(&self, capability: Capability) -> Claim {
        let mut table = self.inner.table();
        match table.get_mut(&capability) {
            Some(Slot::Live { handle, leases }) => {
                *leases += 1;
                Claim::Shared(ModelLease {
                    capability,
                    handle: Some(Arc::clone(handle)),
                    manager: Arc::clone(&self.inner),
                })
            }
            Some(Slot::Unloading) => Claim::Unloading,
            None => Claim::Vacant,
        }
    }

    /// Give a lease back. Equivalent to dropping it.
    pub fn release(&self, lease: ModelLease) {
        drop(lease);
    }

    /// Capabilities that currently have a loaded model.
    pub fn live_capabilities(&self) -> Vec<Capability> {
        let table = self.inner.table();
        Capability::ALL
            .into_iter()
            .filter(|c| matches!(table.get(c), Some(Slot::Live { .. })))
            .collect()
    }

    /// Outstanding leases for `capability`.
    pub fn lease_count(&self, capability: Capability) -> usize {
        match self.inner.table().get(&capability) {
            Some(Slot::Live { leases, .. }) => *leases,
            _ => 0,
        }
    }
}

/// A shared, read-only borrow of a loaded model.
///
/// Dropping the last lease for a capability unloads the model.
pub struct ModelLease {
    capability: Capability,
    handle: Option<Arc<ModelHandle>>,
    manager: Arc<Inner>,
}

impl fmt::Debug for ModelLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelLease({})", self.capability)
    }
}

impl ModelLease {
    pub fn capability(&self) -> Capability {
        self.capability
    }

    fn mismatch(&self) -> ModelError {
        let found = self
            .handle
            .as_ref()
            .map(|h| h.capability())
            .unwrap_or(self.capability);
        ModelError::CapabilityMismatch {
            expected: self.capability,
            found,
        }
    }

    fn handle(&self) -> Option<&ModelHandle> {
        self.handle.as_deref()
    }

    pub fn captioner(&self) -> Result<&dyn ImageCaptioner, ModelError> {
        match self.handle() {
            Some(ModelHandle::Captioner(m)) => Ok(m.as_ref()),
            _ => Err(self.mismatch()),
        }
    }

    pub fn ocr(&self) -> Result<&dyn ImageOcr, ModelError> {
        match self.handle() {
            Some(ModelHandle::Ocr(m)) => Ok(m.as_ref()),
            _ => Err(self.mismatch()),
        }
    }

    pub fn summarizer(&self) -> Result<&dyn TextSummarizer, ModelError> {
        match self.handle() {
            Some(ModelHandle::Summarizer(m)) => Ok(m.as_ref()),
            _ => Err(self.mismatch()),
        }
    }

    pub fn generator(&self) -> Result<&dyn GenerativeAnalyzer, ModelError> {
        match self.handle() {
            Some(ModelHandle::Generator(m)) => Ok(m.as_ref()),
            _ => Err(self.mismatch()),
        }
    }

    pub fn grammar_checker(&self) -> Result<&dyn GrammarPolisher, ModelError> {
        match self.handle() {
            Some(ModelHandle::GrammarChecker(m)) => Ok(m.as_ref()),
            _ => Err(self.mismatch()),
        }
    }

    pub fn entity_recognizer(&self) -> Result<&dyn EntityRecognizer, ModelError> {
        match self.handle() {
            Some(ModelHandle::EntityRecognizer(m)) => Ok(m.as_ref()),
            _ => Err(self.mismatch()),
        }
    }
}

impl Drop for ModelLease {
    fn drop(&mut self) {
        // Our reference goes first so the unload hook sees the last one gone.
        drop(self.handle.take());

        let released = {
            let mut table = self.manager.table();
            let last = match table.get_mut(&self.capability) {
                Some(Slot::Live { leases, .. }) => {
                    *leases = leases.saturating_sub(1);
                    *leases == 0
                }
                _ => false,
            };
            if last {
                table.insert(self.capability, Slot::Unloading);
            }
            last
        };

        if released {
            let _finish = UnloadFinish {
                manager: &self.manager,
                capability: self.capability,
            };
            self.manager.provider.unload(self.capability);
            debug!("Released {} model", self.capability);
        }
    }
}

/// Clears the `Unloading` mark and wakes waiting loads, even if `unload`
/// panics.
struct UnloadFinish<'a> {
    manager: &'a Inner,
    capability: Capability,
}

impl Drop for UnloadFinish<'_> {
    fn drop(&mut self) {
        let mut table = self.manager.table();
        if matches!(table.get(&self.capability), Some(Slot::Unloading)) {
            table.remove(&self.capability);
        } else {
            warn!("{} slot changed while unloading", self.capability);
        }
        drop(table);
        self.manager.unloaded.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Analysis;
    use crate::error::CollaboratorError;
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoCaptioner;

    #[async_trait]
    impl ImageCaptioner for EchoCaptioner {
        async fn caption(&self, image: &RgbImage) -> Result<String, CollaboratorError> {
            Ok(format!("{}x{}", image.width(), image.height()))
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl GenerativeAnalyzer for EchoGenerator {
        async fn analyze(&self, d: &str, _s: &str) -> Result<Analysis, CollaboratorError> {
            Ok(Analysis {
                description: d.to_string(),
                findings: String::new(),
            })
        }
    }

    #[derive(Default)]
    struct CountingProvider {
        loads: AtomicUsize,
        unloads: AtomicUsize,
        last_options: Mutex<Option<AcquireOptions>>,
        wrong_kind: bool,
    }

    #[async_trait]
    impl ModelProvider for CountingProvider {
        async fn load(
            &self,
            capability: Capability,
            options: &AcquireOptions,
        ) -> Result<ModelHandle, ModelError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            *self.last_options.lock().unwrap() = Some(*options);
            tokio::task::yield_now().await;
            if self.wrong_kind {
                return Ok(ModelHandle::Generator(Arc::new(EchoGenerator)));
            }
            match capability {
                Capability::Captioner => Ok(ModelHandle::Captioner(Arc::new(EchoCaptioner))),
                Capability::Generator => Ok(ModelHandle::Generator(Arc::new(EchoGenerator))),
                other => Err(ModelError::LoadFailed {
                    capability: other,
                    detail: "not available in tests".into(),
                }),
            }
        }

        fn unload(&self, _capability: Capability) {
            self.unloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn lazy_load_and_release_on_last_drop() {
        let provider = Arc::new(CountingProvider::default());
        let manager = ModelManager::new(provider.clone());
        assert!(manager.live_capabilities().is_empty());

        let a = manager
            .acquire(Capability::Captioner, &AcquireOptions::default())
            .await
            .unwrap();
        let b = manager
            .acquire(Capability::Captioner, &AcquireOptions::default())
            .await
            .unwrap();
        assert_eq!(provider.loads.load(Ordering::SeqCst), 1);
        assert_eq!(manager.lease_count(Capability::Captioner), 2);

        let img = RgbImage::new(4, 2);
        assert_eq!(a.captioner().unwrap().caption(&img).await.unwrap(), "4x2");

        manager.release(a);
        assert_eq!(manager.live_capabilities(), vec![Capability::Captioner]);
        assert_eq!(provider.unloads.load(Ordering::SeqCst), 0);

        drop(b);
        assert!(manager.live_capabilities().is_empty());
        assert_eq!(provider.unloads.load(Ordering::SeqCst), 1);

        let _c = manager
            .acquire(Capability::Captioner, &AcquireOptions::default())
            .await
            .unwrap();
        assert_eq!(provider.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_acquire_loads_once() {
        let provider = Arc::new(CountingProvider::default());
        let manager = ModelManager::new(provider.clone());
        let opts = AcquireOptions::default();

        let (a, b, c) = tokio::join!(
            manager.acquire(Capability::Generator, &opts),
            manager.acquire(Capability::Generator, &opts),
            manager.acquire(Capability::Generator, &opts),
        );
        let leases = [a.unwrap(), b.unwrap(), c.unwrap()];
        assert_eq!(provider.loads.load(Ordering::SeqCst), 1);
        assert_eq!(manager.lease_count(Capability::Generator), 3);
        drop(leases);
        assert_eq!(manager.lease_count(Capability::Generator), 0);
        assert_eq!(provider.unloads.load(Ordering::SeqCst), 1);
    }

    /// Tracks which capabilities the provider believes are resident. Unloads
    /// take a while, like freeing device memory.
    #[derive(Default)]
    struct SlowUnloadProvider {
        resident: Mutex<Vec<Capability>>,
        events: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl ModelProvider for SlowUnloadProvider {
        async fn load(
            &self,
            capability: Capability,
            _options: &AcquireOptions,
        ) -> Result<ModelHandle, ModelError> {
            self.events.lock().unwrap().push("load");
            self.resident.lock().unwrap().push(capability);
            Ok(ModelHandle::Generator(Arc::new(EchoGenerator)))
        }

        fn unload(&self, capability: Capability) {
            std::thread::sleep(std::time::Duration::from_millis(200));
            self.resident.lock().unwrap().retain(|c| *c != capability);
            self.events.lock().unwrap().push("unload");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reload_waits_for_pending_unload() {
        let provider = Arc::new(SlowUnloadProvider::default());
        let manager = ModelManager::new(provider.clone());
        let opts = AcquireOptions::default();

        let first = manager.acquire(Capability::Generator, &opts).await.unwrap();
        let dropper = std::thread::spawn(move || drop(first));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let second = manager.acquire(Capability::Generator, &opts).await.unwrap();
        dropper.join().unwrap();

        assert_eq!(*provider.events.lock().unwrap(), ["load", "unload", "load"]);
        assert_eq!(*provider.resident.lock().unwrap(), [Capability::Generator]);
        assert_eq!(manager.live_capabilities(), vec![Capability::Generator]);
        assert_eq!(manager.lease_count(Capability::Generator), 1);

        drop(second);
        assert!(provider.resident.lock().unwrap().is_empty());
        assert!(manager.live_capabilities().is_empty());
    }

    #[tokio::test]
    async fn options_are_passed_through() {
        let provider = Arc::new(CountingProvider::default());
        let manager = ModelManager::new(provider.clone());
        let settings = ModelSettings::default().with_override(
            Capability::Captioner,
            AcquireOptions::new(Device::Cuda(1), Precision::Half),
        );
        let opts = settings.options_for(Capability::Captioner);
        let _lease = manager.acquire(Capability::Captioner, &opts).await.unwrap();
        assert_eq!(
            *provider.last_options.lock().unwrap(),
            Some(AcquireOptions::new(Device::Cuda(1), Precision::Half))
        );
        assert_eq!(
            settings.options_for(Capability::Ocr),
            AcquireOptions::default()
        );
    }

    #[tokio::test]
    async fn load_failure_leaves_table_empty() {
        let manager = ModelManager::new(Arc::new(CountingProvider::default()));
        let err = manager
            .acquire(Capability::Ocr, &AcquireOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::LoadFailed { .. }));
        assert!(manager.live_capabilities().is_empty());
    }

    #[tokio::test]
    async fn mismatched_handle_is_rejected() {
        let provider = Arc::new(CountingProvider {
            wrong_kind: true,
            ..Default::default()
        });
        let manager = ModelManager::new(provider);
        let err = manager
            .acquire(Capability::Captioner, &AcquireOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::CapabilityMismatch { .. }));
    }

    #[tokio::test]
    async fn wrong_accessor_reports_mismatch() {
        let manager = ModelManager::new(Arc::new(CountingProvider::default()));
        let lease = manager
            .acquire(Capability::Captioner, &AcquireOptions::default())
            .await
            .unwrap();
        assert!(lease.ocr().is_err());
        assert!(lease.captioner().is_ok());
    }
}
