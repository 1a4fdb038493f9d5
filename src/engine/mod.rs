//! The pipeline orchestrator.
//!
//! [`Engine`] owns the camera source, the GPU context and kernel
//! backend, the shared preprocessor, and an ordered list of detector
//! plugins. A single driver thread runs the per-frame loop; detector CPU
//! stages run as at-most-one job per plugin on their own workers, and
//! each frame exports the latest completed results (see
//! [`crate::detect`]).
//!
//! # Lifecycle
//!
//! `new -> use_plugin* -> initialize(options) -> start(callback?) ->
//! stop -> destroy`. `stop` pauses frame scheduling but lets in-flight
//! GPU work drain; `destroy` joins or times out detector jobs and
//! releases every tracked resource. Both are idempotent.
//!
//! # Events
//!
//! Subscribe with [`Engine::on`] / [`Engine::once`] / [`Engine::off`];
//! ordering guarantees are documented on [`crate::events`].

mod diagnostics;
mod frame_loop;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

pub use diagnostics::Diagnostics;
use glam::Vec3;

use crate::camera::CameraSource;
use crate::detect::{initialization_order, DetectorPlugin, PluginSetup};
use crate::error::{ArError, ErrorCode, Suggestion};
use crate::events::{
    ArEvent, EventEmitter, EventKind, EventStream, ListenerId, WaitTimeout,
};
use crate::frame::ArFrame;
use crate::gpu::backend::{select_backend, BackendKind};
use crate::gpu::context::GpuContext;
use crate::gpu::shader_composer::ShaderComposer;
use crate::gpu::tracker::{EngineTag, ResourceTracker};
use crate::math::CameraIntrinsics;
use crate::options::EngineOptions;
use crate::preprocess::Preprocessor;
use crate::util::frame_timing::FrameTiming;

use self::frame_loop::{DriverCommand, FrameDriver};

/// Callback invoked with every assembled frame.
pub type FrameCallback = Box<dyn FnMut(&ArFrame) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Initialized,
    Running,
    Stopped,
    Destroyed,
}

struct RuntimeInfo {
    adapter_name: String,
    supports_compute: bool,
    backend_kind: BackendKind,
    resolution: (u32, u32),
}

struct Runtime {
    tag: EngineTag,
    tx: mpsc::Sender<DriverCommand>,
    driver: Option<std::thread::JoinHandle<()>>,
    running: Arc<AtomicBool>,
    info: RuntimeInfo,
}

/// The perception engine.
pub struct Engine {
    state: Lifecycle,
    options: EngineOptions,
    emitter: Arc<EventEmitter>,
    pending_plugins: Vec<Box<dyn DetectorPlugin>>,
    injected_camera: Option<Box<dyn CameraSource>>,
    runtime: Option<Runtime>,
}

impl Engine {
    /// An empty engine; register plugins, then call
    /// [`initialize`](Self::initialize).
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Lifecycle::Created,
            options: EngineOptions::default(),
            emitter: Arc::new(EventEmitter::new()),
            pending_plugins: Vec::new(),
            injected_camera: None,
            runtime: None,
        }
    }

    /// Register a detector plugin. Must happen before `initialize`.
    ///
    /// # Errors
    ///
    /// Returns `PluginDuplicate` when a plugin with the same name is
    /// already registered and `InvalidState` after initialization.
    pub fn use_plugin(
        &mut self,
        plugin: Box<dyn DetectorPlugin>,
    ) -> Result<(), ArError> {
        if self.state != Lifecycle::Created {
            return Err(ArError::new(
                ErrorCode::InvalidState,
                "plugins must be registered before initialize",
            ));
        }
        if self
            .pending_plugins
            .iter()
            .any(|p| p.name() == plugin.name())
        {
            return Err(ArError::new(
                ErrorCode::PluginDuplicate,
                format!("plugin '{}' is already registered", plugin.name()),
            ));
        }
        log::debug!(
            "registered plugin '{}' v{} (priority {})",
            plugin.name(),
            plugin.version(),
            plugin.priority()
        );
        self.pending_plugins.push(plugin);
        Ok(())
    }

    /// Replace the camera source (defaults to live capture when the
    /// `capture` feature is enabled, otherwise the synthetic source).
    /// Must happen before `initialize`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` after initialization.
    pub fn set_camera_source(
        &mut self,
        source: Box<dyn CameraSource>,
    ) -> Result<(), ArError> {
        if self.state != Lifecycle::Created {
            return Err(ArError::new(
                ErrorCode::InvalidState,
                "the camera source must be set before initialize",
            ));
        }
        self.injected_camera = Some(source);
        Ok(())
    }

    fn default_camera(options: &EngineOptions) -> Box<dyn CameraSource> {
        #[cfg(feature = "capture")]
        {
            let _ = options;
            Box::new(crate::camera::capture::CaptureSource::new())
        }
        #[cfg(not(feature = "capture"))]
        {
            Box::new(crate::camera::synthetic::SyntheticSource::new(
                options.camera.width,
                options.camera.height,
            ))
        }
    }

    /// Initialize the GPU context, camera, preprocessor, and plugins.
    ///
    /// Environment and configuration failures surface here and are never
    /// caught internally.
    ///
    /// # Errors
    ///
    /// `AlreadyInitialized`, `InvalidConfig`, the GPU codes, the camera
    /// codes, or `PluginInitFailed` / `PluginMissing`.
    pub fn initialize(&mut self, options: EngineOptions) -> Result<(), ArError> {
        match self.state {
            Lifecycle::Created => {}
            Lifecycle::Destroyed => {
                return Err(ArError::new(
                    ErrorCode::InvalidState,
                    "the engine was destroyed",
                ));
            }
            _ => {
                return Err(ArError::new(
                    ErrorCode::AlreadyInitialized,
                    "initialize was already called",
                ));
            }
        }

        let options = options.resolved();
        options.validate()?;

        let tag = ResourceTracker::engine_tag();
        let ctx = pollster::block_on(GpuContext::new(
            options.gpu.power_preference.into(),
            tag,
        ))?;
        let backend =
            select_backend(ctx.supports_compute, options.gpu.force_emulation);
        let mut composer = ShaderComposer::new();

        let mut camera = self
            .injected_camera
            .take()
            .unwrap_or_else(|| Self::default_camera(&options));
        camera.initialize(&options.camera)?;
        let (width, height) = camera.resolution();
        let intrinsics = CameraIntrinsics::from_resolution(
            width,
            height,
            options.camera.assumed_hfov_deg,
        );

        let preprocess = Preprocessor::new(
            &ctx,
            backend.as_ref(),
            &mut composer,
            width,
            height,
            &options.marker,
        )?;

        // Dependency-then-priority order, fixed at initialization.
        let registered = std::mem::take(&mut self.pending_plugins);
        let order = initialization_order(&registered)?;
        let mut slots: Vec<Option<Box<dyn DetectorPlugin>>> =
            registered.into_iter().map(Some).collect();
        let mut plugins: Vec<Box<dyn DetectorPlugin>> = Vec::new();
        for idx in order {
            if let Some(plugin) = slots[idx].take() {
                plugins.push(plugin);
            }
        }

        {
            let mut setup = PluginSetup {
                ctx: &ctx,
                backend: backend.as_ref(),
                composer: &mut composer,
                options: &options,
                width,
                height,
                intrinsics,
            };
            for plugin in &mut plugins {
                plugin.initialize(&mut setup).map_err(|e| {
                    ArError::new(
                        ErrorCode::PluginInitFailed,
                        format!("plugin '{}' failed to initialize", plugin.name()),
                    )
                    .with_cause(e)
                })?;
                log::info!("plugin '{}' initialized", plugin.name());
            }
        }

        let info = RuntimeInfo {
            adapter_name: ctx.adapter_info.name.clone(),
            supports_compute: ctx.supports_compute,
            backend_kind: backend.kind(),
            resolution: (width, height),
        };

        let running = Arc::new(AtomicBool::new(false));
        let timing = FrameTiming::new(options.camera.frame_rate);
        let driver = FrameDriver::new(
            ctx,
            backend,
            camera,
            preprocess,
            plugins,
            Arc::clone(&self.emitter),
            timing,
            width,
            height,
            Arc::clone(&running),
        )?;

        let (tx, rx) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("argus-frame-driver".into())
            .spawn(move || driver.run(&rx))
            .map_err(|e| {
                ArError::new(
                    ErrorCode::PluginInitFailed,
                    format!("frame driver spawn failed: {e}"),
                )
            })?;

        self.runtime = Some(Runtime {
            tag,
            tx,
            driver: Some(handle),
            running,
            info,
        });
        self.options = options;
        self.state = Lifecycle::Initialized;
        Ok(())
    }

    /// Begin the frame loop. Returns immediately; frames are processed
    /// on the driver thread. Idempotent while running.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` before `initialize`.
    pub fn start(&mut self, on_frame: Option<FrameCallback>) -> Result<(), ArError> {
        let runtime = self.runtime.as_ref().ok_or_else(|| {
            ArError::new(
                ErrorCode::NotInitialized,
                "start requires a successful initialize",
            )
            .with_suggestion(Suggestion::new(
                "call Engine::initialize before Engine::start",
            ))
        })?;
        if self.state == Lifecycle::Running {
            return Ok(());
        }
        let _ = runtime.tx.send(DriverCommand::Start(on_frame));
        self.state = Lifecycle::Running;
        Ok(())
    }

    /// Pause frame scheduling. In-flight GPU submissions and pending
    /// readbacks complete and their results are discarded. Idempotent.
    pub fn stop(&mut self) {
        if self.state != Lifecycle::Running {
            return;
        }
        if let Some(runtime) = &self.runtime {
            let _ = runtime.tx.send(DriverCommand::Stop);
        }
        self.state = Lifecycle::Stopped;
    }

    /// Release every resource. Waits for pending detector jobs to finish
    /// or time out. Idempotent; the engine is unusable afterwards.
    pub fn destroy(&mut self) {
        if self.state == Lifecycle::Destroyed {
            return;
        }
        if let Some(mut runtime) = self.runtime.take() {
            let _ = runtime.tx.send(DriverCommand::Shutdown);
            if let Some(handle) = runtime.driver.take() {
                let _ = handle.join();
            }
            let remaining = ResourceTracker::active_count(runtime.tag);
            if remaining == 0 {
                log::info!("engine destroyed; all GPU resources released");
            } else {
                log::error!(
                    "engine destroyed with {remaining} resources still \
                     tracked"
                );
                for leak in ResourceTracker::find_leaks_for(
                    runtime.tag,
                    web_time::Duration::ZERO,
                ) {
                    log::error!(
                        "  leaked {:?} '{}' ({} bytes, age {:?})",
                        leak.ty,
                        leak.label,
                        leak.bytes,
                        leak.age
                    );
                }
            }
        }
        self.state = Lifecycle::Destroyed;
    }

    /// Supply a 3-D point cloud to the plane detector.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` before `initialize`.
    pub fn supply_point_cloud(
        &self,
        points: Vec<Vec3>,
        normals: Option<Vec<Vec3>>,
    ) -> Result<(), ArError> {
        let runtime = self.runtime.as_ref().ok_or_else(|| {
            ArError::new(ErrorCode::NotInitialized, "engine is not initialized")
        })?;
        let _ = runtime
            .tx
            .send(DriverCommand::SupplyPoints(points, normals));
        Ok(())
    }

    /// Subscribe to an event kind.
    pub fn on(
        &self,
        kind: EventKind,
        callback: impl FnMut(&ArEvent) + Send + 'static,
    ) -> ListenerId {
        self.emitter.on(kind, callback)
    }

    /// Subscribe for exactly one delivery.
    pub fn once(
        &self,
        kind: EventKind,
        callback: impl FnMut(&ArEvent) + Send + 'static,
    ) -> ListenerId {
        self.emitter.once(kind, callback)
    }

    /// Remove a listener. Returns `true` if it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        self.emitter.off(id)
    }

    /// Block until an event arrives or the timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns [`WaitTimeout`] on deadline expiry; the listener is
    /// removed first.
    pub fn wait_for_event(
        &self,
        kind: EventKind,
        timeout: web_time::Duration,
    ) -> Result<ArEvent, WaitTimeout> {
        self.emitter.wait_for(kind, timeout)
    }

    /// Queued stream of events, optionally filtered by kind.
    pub fn events(&self, kind: Option<EventKind>) -> EventStream {
        self.emitter.stream(kind)
    }

    /// The resolved options (after preset expansion).
    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Whether the frame loop is currently scheduled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == Lifecycle::Running
            && self
                .runtime
                .as_ref()
                .is_some_and(|r| r.running.load(Ordering::Acquire))
    }

    /// Negotiated camera resolution, once initialized.
    #[must_use]
    pub fn resolution(&self) -> Option<(u32, u32)> {
        self.runtime.as_ref().map(|r| r.info.resolution)
    }

    /// Platform capability report with recommendations.
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        match &self.runtime {
            Some(runtime) => Diagnostics::from_runtime(
                &runtime.info.adapter_name,
                runtime.info.supports_compute,
                runtime.info.backend_kind,
            ),
            None => Diagnostics::probe(),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{FrameInputs, FrameOutputs};
    use crate::gpu::context::GpuContext;

    struct NamedPlugin(&'static str);

    impl DetectorPlugin for NamedPlugin {
        fn name(&self) -> &'static str {
            self.0
        }
        fn initialize(
            &mut self,
            _setup: &mut PluginSetup<'_>,
        ) -> Result<(), ArError> {
            Ok(())
        }
        fn encode(&mut self, _frame: &mut FrameInputs<'_>) -> Result<(), ArError> {
            Ok(())
        }
        fn collect(
            &mut self,
            _ctx: &GpuContext,
            _timestamp_us: u64,
            _out: &mut FrameOutputs,
        ) -> Result<(), ArError> {
            Ok(())
        }
        fn destroy(&mut self, _ctx: &GpuContext) {}
    }

    #[test]
    fn duplicate_plugin_names_are_rejected() {
        let mut engine = Engine::new();
        engine.use_plugin(Box::new(NamedPlugin("markers"))).unwrap();
        let err = engine
            .use_plugin(Box::new(NamedPlugin("markers")))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PluginDuplicate);
    }

    #[test]
    fn start_before_initialize_is_not_initialized() {
        let mut engine = Engine::new();
        let err = engine.start(None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotInitialized);
        assert!(!err.suggestions().is_empty());
    }

    #[test]
    fn stop_and_destroy_are_idempotent_without_init() {
        let mut engine = Engine::new();
        engine.stop();
        engine.stop();
        engine.destroy();
        engine.destroy();
        // Destroyed engines refuse further initialization.
        let err = engine.initialize(EngineOptions::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
    }

    #[test]
    fn event_subscription_works_before_initialize() {
        let engine = Engine::new();
        let id = engine.on(EventKind::Ready, |_| {});
        assert!(engine.off(id));
        assert!(!engine.off(id));
    }

    /// Full bootstrap against a real adapter: ready fires once, frames
    /// flow with strictly increasing timestamps, and destroy leaves the
    /// tracker empty. Skips quietly on hosts without any GPU adapter.
    #[test]
    fn bootstrap_frames_and_clean_destroy() {
        use std::sync::atomic::AtomicU64;
        use web_time::Duration;

        use crate::camera::synthetic::{solid_frame, SyntheticSource};
        use crate::gpu::tracker::ResourceTracker;
        use crate::options::Preset;

        let mut engine = Engine::new();
        engine
            .use_plugin(Box::new(
                crate::detect::marker::MarkerDetectorPlugin::new(),
            ))
            .unwrap();
        engine
            .set_camera_source(Box::new(SyntheticSource::with_script(
                1280,
                720,
                vec![solid_frame(1280, 720, 160)],
            )))
            .unwrap();

        let mut options = EngineOptions::from_preset(Preset::Desktop);
        options.light.enabled = false;
        match engine.initialize(options) {
            Ok(()) => {}
            Err(e)
                if matches!(
                    e.code(),
                    ErrorCode::GpuAdapterFailed | ErrorCode::GpuUnavailable
                ) =>
            {
                // Headless host without a GPU; nothing to exercise.
                return;
            }
            Err(e) => panic!("initialize failed: {e}"),
        }
        let tag = engine.runtime.as_ref().map(|r| r.tag);
        let frames_seen = {
            let frames = Arc::new(AtomicU64::new(0));
            let f2 = Arc::clone(&frames);
            let last_ts = Arc::new(AtomicU64::new(0));
            let l2 = Arc::clone(&last_ts);
            let _listener = engine.on(EventKind::Frame, move |ev| {
                if let ArEvent::Frame(frame) = ev {
                    assert_eq!(frame.width, 1280);
                    assert_eq!(frame.height, 720);
                    let prev = l2.swap(frame.timestamp_us, Ordering::SeqCst);
                    assert!(frame.timestamp_us > prev);
                    let _ = f2.fetch_add(1, Ordering::SeqCst);
                }
            });

            engine.start(None).unwrap();
            let ready = engine
                .wait_for_event(EventKind::Ready, Duration::from_secs(2));
            assert!(ready.is_ok(), "ready did not fire within 2s");

            // Let a handful of frames through.
            let deadline = web_time::Instant::now() + Duration::from_secs(5);
            while frames.load(Ordering::SeqCst) < 5 {
                assert!(
                    web_time::Instant::now() < deadline,
                    "frames stalled ({} seen)",
                    frames.load(Ordering::SeqCst)
                );
                std::thread::sleep(Duration::from_millis(10));
            }
            engine.stop();
            frames.load(Ordering::SeqCst)
        };
        assert!(frames_seen >= 5);

        engine.destroy();
        // Destroy must release every resource registered under this
        // engine's tag.
        if let Some(tag) = tag {
            assert_eq!(ResourceTracker::active_count(tag), 0);
            assert!(ResourceTracker::find_leaks_for(tag, Duration::ZERO)
                .is_empty());
        }
    }
}
