//! Startup and shutdown sequencing

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::shutdown::{ShutdownCoordinator, ShutdownReport};
use super::signals::ShutdownReason;
use crate::bus::{BusEvent, EventBus};
use crate::config::{CameraConfig, NvrConfig};
use crate::db::{MemoryDatabase, RecordingStore};
use crate::error::{Error, Result};
use crate::frontend::{FrontEnd, Reactor};
use crate::janitor::RecordingJanitor;
use crate::messaging::{self, MessagePublisher};
use crate::pipeline::{
    CapabilityProvider, Detector, FfmpegCapabilities, NullDetector, PipelineContext, PostProcessor,
};
use crate::registry::{
    RestartableUnit, ThreadRegistry, UnitBody, UnitCategory, UnitHandle, UnitKey, UnitState,
};
use crate::watchdog::{SubprocessWatchDog, ThreadWatchDog};

/// Builder for an [`Orchestrator`]
///
/// Collaborators that are not supplied fall back to the built-in ones: the
/// [`Reactor`] front end, an in-memory database and the ffmpeg pipelines.
pub struct OrchestratorBuilder {
    config: NvrConfig,
    front_end: Option<Arc<dyn FrontEnd>>,
    database: Option<Arc<dyn RecordingStore>>,
    capabilities: Option<Arc<dyn CapabilityProvider>>,
    message_publisher: Option<Arc<dyn MessagePublisher>>,
}

impl OrchestratorBuilder {
    /// Use a custom front end
    pub fn front_end(mut self, front_end: Arc<dyn FrontEnd>) -> Self {
        self.front_end = Some(front_end);
        self
    }

    /// Use a custom recording store
    pub fn database(mut self, database: Arc<dyn RecordingStore>) -> Self {
        self.database = Some(database);
        self
    }

    /// Use custom detection and pipeline capabilities
    pub fn capabilities(mut self, capabilities: Arc<dyn CapabilityProvider>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Publisher used when messaging is configured
    pub fn message_publisher(mut self, publisher: Arc<dyn MessagePublisher>) -> Self {
        self.message_publisher = Some(publisher);
        self
    }

    pub fn build(self) -> Orchestrator {
        let config = self.config;
        let registry = Arc::new(ThreadRegistry::new());

        let thread_watchdog = Arc::new(ThreadWatchDog::new(
            Arc::clone(&registry),
            config.watchdog.thread_interval,
        ));
        let subprocess_watchdog = Arc::new(SubprocessWatchDog::new(
            config.watchdog.subprocess_interval,
        ));

        let database = self
            .database
            .unwrap_or_else(|| Arc::new(MemoryDatabase::new()));
        let janitor = Arc::new(RecordingJanitor::new(database, &config.recorder));

        Orchestrator {
            registry,
            thread_watchdog,
            subprocess_watchdog,
            front_end: self.front_end.unwrap_or_else(|| Arc::new(Reactor::new())),
            capabilities: self
                .capabilities
                .unwrap_or_else(|| Arc::new(FfmpegCapabilities::default())),
            message_publisher: self.message_publisher,
            janitor,
            bus: OnceLock::new(),
            coordinator: ShutdownCoordinator::new(),
            started: AtomicBool::new(false),
            config,
        }
    }
}

/// Outcome of the startup sequence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    /// Cameras whose pipeline was registered and started
    pub cameras_started: Vec<String>,
    /// Cameras skipped because setup failed
    pub cameras_failed: Vec<String>,
    /// Post-processors loaded
    pub post_processors: usize,
    /// Whether the message publisher was started
    pub messaging: bool,
}

/// Top-level lifecycle controller
///
/// Owns the registry and both watchdogs, sequences startup of every
/// collaborator, and tears everything down exactly once.
pub struct Orchestrator {
    config: NvrConfig,
    registry: Arc<ThreadRegistry>,
    thread_watchdog: Arc<ThreadWatchDog>,
    subprocess_watchdog: Arc<SubprocessWatchDog>,
    front_end: Arc<dyn FrontEnd>,
    capabilities: Arc<dyn CapabilityProvider>,
    message_publisher: Option<Arc<dyn MessagePublisher>>,
    janitor: Arc<RecordingJanitor>,
    bus: OnceLock<EventBus<BusEvent>>,
    coordinator: ShutdownCoordinator,
    started: AtomicBool,
}

impl Orchestrator {
    /// Start assembling an orchestrator for a loaded configuration
    pub fn builder(config: NvrConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            front_end: None,
            database: None,
            capabilities: None,
            message_publisher: None,
        }
    }

    pub fn config(&self) -> &NvrConfig {
        &self.config
    }

    /// Registry holding every unit
    pub fn registry(&self) -> &Arc<ThreadRegistry> {
        &self.registry
    }

    pub fn thread_watchdog(&self) -> &Arc<ThreadWatchDog> {
        &self.thread_watchdog
    }

    pub fn subprocess_watchdog(&self) -> &Arc<SubprocessWatchDog> {
        &self.subprocess_watchdog
    }

    /// Event bus, available once the front end is running
    pub fn bus(&self) -> Option<&EventBus<BusEvent>> {
        self.bus.get()
    }

    /// Run the startup sequence
    ///
    /// Only watchdog, front end and janitor failures are returned; camera,
    /// detector, post-processor and messaging failures are logged and the
    /// affected piece is skipped. After an error, call
    /// [`shutdown`](Self::shutdown) to stop whatever did start.
    pub fn start(&self) -> Result<StartupReport> {
        if self.coordinator.is_triggered() {
            return Err(Error::ShuttingDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }

        let mut report = StartupReport::default();
        tracing::info!(cameras = self.config.cameras.len(), "Starting NVR");

        self.thread_watchdog.start()?;
        self.subprocess_watchdog.start(&self.registry)?;

        self.front_end.start()?;
        let bus = self
            .bus
            .get_or_init(|| EventBus::new(self.front_end.context(), self.config.bus.clone()))
            .clone();

        let (_, sweep) = self.janitor.start(&self.registry)?;
        tracing::debug!(
            expired = sweep.expired,
            removed = sweep.rows_removed,
            "Initial recording sweep done"
        );

        report.messaging = self.start_messaging();

        let detector = self.load_detector();
        let post_processors = self.load_post_processors();
        report.post_processors = post_processors.len();

        let context = PipelineContext {
            bus,
            subprocess_watchdog: Arc::clone(&self.subprocess_watchdog),
            detector,
            post_processors: Arc::new(post_processors),
            object_detection: self.config.object_detection.clone(),
        };

        let results = self.setup_cameras(&context);
        for (camera, registered) in results {
            if registered {
                report.cameras_started.push(camera);
            } else {
                report.cameras_failed.push(camera);
            }
        }

        for handle in self.registry.list(UnitCategory::CameraPipeline) {
            if let Err(e) = handle.start() {
                tracing::error!(unit = %handle.key(), error = %e, "Failed to start camera pipeline");
                report.cameras_started.retain(|name| *name != handle.key().name);
                report.cameras_failed.push(handle.key().name.clone());
            }
        }

        tracing::info!(
            started = report.cameras_started.len(),
            failed = report.cameras_failed.len(),
            post_processors = report.post_processors,
            "NVR started"
        );

        Ok(report)
    }

    fn start_messaging(&self) -> bool {
        match (&self.config.messaging, &self.message_publisher) {
            (Some(messaging), Some(publisher)) => {
                match messaging::start_publisher(Arc::clone(publisher), &self.registry) {
                    Ok(_) => {
                        tracing::info!(broker = %messaging.broker, port = messaging.port, "Message publisher started");
                        true
                    }
                    Err(e) => {
                        tracing::error!(broker = %messaging.broker, error = %e, "Failed to start message publisher");
                        false
                    }
                }
            }
            (Some(messaging), None) => {
                tracing::warn!(broker = %messaging.broker, "Messaging configured but no publisher available");
                false
            }
            (None, Some(_)) => {
                tracing::debug!("Message publisher supplied but messaging is not configured");
                false
            }
            (None, None) => false,
        }
    }

    fn load_detector(&self) -> Arc<dyn Detector> {
        match self.capabilities.detector(&self.config.object_detection) {
            Ok(detector) => {
                tracing::info!(detector = detector.name(), "Detector loaded");
                detector
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load detector, object detection disabled");
                Arc::new(NullDetector)
            }
        }
    }

    fn load_post_processors(&self) -> Vec<Arc<dyn PostProcessor>> {
        let mut loaded = Vec::new();
        for (kind, settings) in &self.config.post_processors {
            match self.capabilities.post_processor(kind, settings) {
                Ok(post_processor) => {
                    tracing::info!(kind = %kind, "Post processor loaded");
                    loaded.push(post_processor);
                }
                Err(e) => {
                    tracing::error!(kind = %kind, error = %e, "Failed to load post processor, skipping it");
                }
            }
        }
        loaded
    }

    /// Build and register every camera pipeline concurrently
    fn setup_cameras(&self, context: &PipelineContext) -> Vec<(String, bool)> {
        std::thread::scope(|scope| {
            let tasks: Vec<_> = self
                .config
                .cameras
                .iter()
                .map(|camera| {
                    let task = scope.spawn(move || self.setup_camera(camera, context));
                    (camera.name.clone(), task)
                })
                .collect();

            tasks
                .into_iter()
                .map(|(name, task)| {
                    let registered = task.join().unwrap_or_else(|_| {
                        tracing::error!(camera = %name, "Camera setup panicked");
                        false
                    });
                    (name, registered)
                })
                .collect()
        })
    }

    fn setup_camera(&self, camera: &CameraConfig, context: &PipelineContext) -> bool {
        tracing::debug!(camera = %camera.name, url = %camera.redacted_url(), "Setting up camera");

        let body = match self.capabilities.build_pipeline(camera, context) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(camera = %camera.name, error = %e, "Camera setup failed, skipping camera");
                return false;
            }
        };

        let unit = RestartableUnit::new(UnitKey::camera(&camera.name), UnitBody::Stoppable(body));
        match self.registry.register(unit) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(camera = %camera.name, error = %e, "Failed to register camera pipeline");
                false
            }
        }
    }

    /// Ask a running [`run_until_signal`](Self::run_until_signal) to shut down
    pub fn request_shutdown(&self) {
        self.coordinator.request();
    }

    /// Whether the shutdown sequence has run (or is running)
    pub fn is_shut_down(&self) -> bool {
        self.coordinator.is_triggered()
    }

    /// Run the shutdown sequence
    ///
    /// Returns `None` if shutdown already ran; the sequence executes at most
    /// once no matter how many callers race here.
    pub fn shutdown(&self) -> Option<ShutdownReport> {
        if !self.coordinator.trigger() {
            tracing::debug!("Shutdown already in progress");
            return None;
        }
        self.coordinator.request();

        let timeout = self.config.shutdown.join_timeout;
        let mut report = ShutdownReport::default();
        tracing::info!("Shutting down");

        // Supervision goes first so nothing torn down below is restarted
        let watchdogs = self.registry.list(UnitCategory::Watchdog);
        stop_units(&watchdogs, timeout, &mut report);

        let cameras = self.registry.list(UnitCategory::CameraPipeline);
        stop_units(&cameras, timeout, &mut report);
        self.registry.drain(UnitCategory::CameraPipeline);

        let mut services = self.registry.list(UnitCategory::Messaging);
        services.extend(self.registry.list(UnitCategory::Janitor));
        stop_units(&services, timeout, &mut report);
        self.registry.drain(UnitCategory::Messaging);
        self.registry.drain(UnitCategory::Janitor);

        self.front_end.stop();
        report.front_end_stopped = self.front_end.join(timeout);
        if !report.front_end_stopped {
            tracing::warn!(timeout_s = timeout.as_secs_f64(), "Front end did not stop in time");
        }

        self.registry.drain(UnitCategory::Watchdog);

        tracing::info!(
            stopped = report.stopped.len(),
            timed_out = report.timed_out.len(),
            abandoned = report.abandoned.len(),
            "Shutdown complete"
        );

        Some(report)
    }

    /// Start, wait for a termination signal or [`request_shutdown`], then
    /// shut down
    ///
    /// [`request_shutdown`]: Self::request_shutdown
    pub fn run_until_signal(&self) -> Result<ShutdownReason> {
        if let Err(e) = self.start() {
            self.shutdown();
            return Err(e);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let reason = runtime.block_on(self.coordinator.wait());
        tracing::info!(%reason, "Shutdown requested");

        self.shutdown();
        Ok(reason)
    }
}

/// Request every unit to stop, then join each one
fn stop_units(units: &[UnitHandle], timeout: Duration, report: &mut ShutdownReport) {
    for unit in units {
        if unit.request_stop() == UnitState::Abandoned {
            report.abandoned.push(unit.key().clone());
        }
    }

    for unit in units {
        if unit.state() == UnitState::Abandoned {
            continue;
        }
        if unit.join(timeout) {
            tracing::debug!(unit = %unit.key(), "Unit stopped");
            report.stopped.push(unit.key().clone());
        } else {
            tracing::warn!(
                unit = %unit.key(),
                timeout_s = timeout.as_secs_f64(),
                "Unit did not stop in time"
            );
            report.timed_out.push(unit.key().clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;

    use super::*;
    use crate::pipeline::SetupError;
    use crate::registry::Stoppable;
    use crate::test_support::{wait_until, Worker};
    use crate::watchdog::{WatchdogConfig, SUBPROCESS_WATCHDOG, THREAD_WATCHDOG};

    /// Capabilities handing out test workers; cameras named `broken*` fail
    #[derive(Default)]
    struct FakeCapabilities {
        workers: Mutex<Vec<(String, Worker)>>,
        detector_calls: AtomicUsize,
    }

    impl FakeCapabilities {
        fn worker(&self, camera: &str) -> Worker {
            self.workers
                .lock()
                .iter()
                .find(|(name, _)| name == camera)
                .map(|(_, worker)| worker.clone())
                .unwrap()
        }
    }

    impl CapabilityProvider for FakeCapabilities {
        fn detector(
            &self,
            _config: &crate::config::ObjectDetectionConfig,
        ) -> std::result::Result<Arc<dyn Detector>, SetupError> {
            self.detector_calls.fetch_add(1, Ordering::SeqCst);
            Err(SetupError::Detector("no model".into()))
        }

        fn build_pipeline(
            &self,
            camera: &CameraConfig,
            _context: &PipelineContext,
        ) -> std::result::Result<Arc<dyn Stoppable>, SetupError> {
            if camera.name.starts_with("broken") {
                return Err(SetupError::Probe {
                    camera: camera.name.clone(),
                    reason: "connection refused".into(),
                });
            }
            let worker = Worker::new();
            self.workers.lock().push((camera.name.clone(), worker.clone()));
            match worker.body() {
                UnitBody::Stoppable(body) => Ok(body),
                UnitBody::Runnable(_) => unreachable!(),
            }
        }
    }

    fn config(cameras: &[&str]) -> NvrConfig {
        let mut config = NvrConfig::default();
        config.watchdog = WatchdogConfig::default()
            .thread_interval(Duration::from_millis(20))
            .subprocess_interval(Duration::from_millis(20));
        config.shutdown.join_timeout = Duration::from_secs(5);
        config
            .post_processors
            .insert("log".into(), serde_json::Value::Null);
        config
            .post_processors
            .insert("unknown".into(), serde_json::Value::Null);
        for name in cameras {
            config = config.camera(CameraConfig::new(*name, "127.0.0.1"));
        }
        config
    }

    fn orchestrator(cameras: &[&str]) -> (Orchestrator, Arc<FakeCapabilities>) {
        let capabilities = Arc::new(FakeCapabilities::default());
        let orchestrator = Orchestrator::builder(config(cameras))
            .capabilities(capabilities.clone())
            .build();
        (orchestrator, capabilities)
    }

    #[test]
    fn test_startup_registers_units_in_order() {
        let (orchestrator, capabilities) = orchestrator(&["a", "broken", "b"]);
        let report = orchestrator.start().unwrap();

        let mut started = report.cameras_started.clone();
        started.sort();
        assert_eq!(started, vec!["a", "b"]);
        assert_eq!(report.cameras_failed, vec!["broken"]);
        assert_eq!(report.post_processors, 1);
        assert!(!report.messaging);
        assert_eq!(capabilities.detector_calls.load(Ordering::SeqCst), 1);

        let registry = orchestrator.registry();
        let watchdogs: Vec<_> = registry
            .list(UnitCategory::Watchdog)
            .iter()
            .map(|unit| unit.key().name.clone())
            .collect();
        assert_eq!(watchdogs, vec![THREAD_WATCHDOG, SUBPROCESS_WATCHDOG]);
        assert_eq!(registry.count(UnitCategory::Janitor), 1);
        assert_eq!(registry.count(UnitCategory::CameraPipeline), 2);
        assert!(registry
            .list(UnitCategory::CameraPipeline)
            .iter()
            .all(|unit| unit.state() == UnitState::Running));
        assert!(orchestrator.bus().is_some());

        assert!(orchestrator.shutdown().unwrap().is_clean());
    }

    #[test]
    fn test_start_twice_fails() {
        let (orchestrator, _) = orchestrator(&[]);
        orchestrator.start().unwrap();
        assert!(matches!(orchestrator.start(), Err(Error::AlreadyStarted)));
        orchestrator.shutdown();
        assert!(matches!(orchestrator.start(), Err(Error::ShuttingDown)));
    }

    #[test]
    fn test_crashed_camera_restarted_by_watchdog() {
        let (orchestrator, capabilities) = orchestrator(&["a"]);
        orchestrator.start().unwrap();
        let worker = capabilities.worker("a");
        let unit = orchestrator.registry().get(&UnitKey::camera("a")).unwrap();

        assert!(wait_until(Duration::from_secs(5), || worker.runs() == 1));
        worker.crash();

        assert!(wait_until(Duration::from_secs(5), || worker.runs() == 2));
        assert!(wait_until(Duration::from_secs(5), || unit.state() == UnitState::Running));
        assert_eq!(unit.snapshot().generation, 2);

        orchestrator.shutdown();
    }

    #[test]
    fn test_shutdown_runs_once_and_empties_registry() {
        let (orchestrator, capabilities) = orchestrator(&["a", "b"]);
        orchestrator.start().unwrap();

        let report = orchestrator.shutdown().unwrap();
        assert!(report.is_clean());
        assert!(report.stopped.contains(&UnitKey::camera("a")));
        assert!(report.stopped.contains(&UnitKey::camera("b")));
        assert_eq!(
            report.stopped.first(),
            Some(&UnitKey::new(UnitCategory::Watchdog, THREAD_WATCHDOG))
        );
        assert!(orchestrator.registry().is_empty());
        assert!(orchestrator.thread_watchdog().is_stopped());
        assert!(orchestrator.subprocess_watchdog().is_stopped());
        assert_eq!(capabilities.worker("a").stops(), 1);

        // Each watchdog is stopped exactly once, through its unit
        for name in [THREAD_WATCHDOG, SUBPROCESS_WATCHDOG] {
            let key = UnitKey::new(UnitCategory::Watchdog, name);
            assert_eq!(report.stopped.iter().filter(|k| **k == key).count(), 1);
        }

        assert!(orchestrator.is_shut_down());
        assert!(orchestrator.shutdown().is_none());
    }

    #[test]
    fn test_uncooperative_camera_times_out() {
        struct Stubborn;

        impl crate::registry::Runnable for Stubborn {
            fn run(&self) {
                std::thread::sleep(Duration::from_millis(500));
            }
        }

        impl Stoppable for Stubborn {
            fn stop(&self) {}
        }

        struct StubbornCapabilities;

        impl CapabilityProvider for StubbornCapabilities {
            fn detector(
                &self,
                _config: &crate::config::ObjectDetectionConfig,
            ) -> std::result::Result<Arc<dyn Detector>, SetupError> {
                Ok(Arc::new(NullDetector))
            }

            fn build_pipeline(
                &self,
                _camera: &CameraConfig,
                _context: &PipelineContext,
            ) -> std::result::Result<Arc<dyn Stoppable>, SetupError> {
                Ok(Arc::new(Stubborn))
            }
        }

        let mut config = config(&["stuck"]);
        config.shutdown.join_timeout = Duration::from_millis(50);
        let orchestrator = Orchestrator::builder(config)
            .capabilities(Arc::new(StubbornCapabilities))
            .build();
        orchestrator.start().unwrap();

        let report = orchestrator.shutdown().unwrap();
        assert!(report.timed_out.contains(&UnitKey::camera("stuck")));
        assert!(!report.is_clean());
    }

    #[test]
    fn test_run_until_signal_returns_on_request() {
        let (orchestrator, _) = orchestrator(&["a"]);
        let orchestrator = Arc::new(orchestrator);

        let runner = {
            let orchestrator = Arc::clone(&orchestrator);
            std::thread::spawn(move || orchestrator.run_until_signal())
        };

        assert!(wait_until(Duration::from_secs(5), || {
            orchestrator.registry().count(UnitCategory::CameraPipeline) == 1
        }));
        orchestrator.request_shutdown();

        let reason = runner.join().unwrap().unwrap();
        assert_eq!(reason, ShutdownReason::Internal);
        assert!(orchestrator.is_shut_down());
        assert!(orchestrator.registry().is_empty());
    }
}
