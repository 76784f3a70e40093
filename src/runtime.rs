//! The process-wide runtime: registries of operators, devices and model formats, set up once
//! and shared by every context and graph.

use std::sync::{Arc, Mutex, Once, OnceLock};

use crate::{
    config::RuntimeConfig,
    device::{CpuBuilder, DeviceRegistry},
    error::{Error, Record, Result},
    ir::OpRegistry,
    model::ModelRegistry,
};

/// Extends the runtime at initialization, e.g. by registering operators, devices or formats.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    fn init(&self, runtime: &Runtime) -> Result<()>;
    fn release(&self) {}
}

pub struct Runtime {
    config: RuntimeConfig,
    ops: OpRegistry,
    devices: DeviceRegistry,
    models: ModelRegistry,
    plugins: Vec<Box<dyn Plugin>>,
    released: Once,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let plugins: Vec<_> = self.plugins.iter().map(|plugin| plugin.name()).collect();
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("ops", &self.ops)
            .field("devices", &self.devices)
            .field("models", &self.models)
            .field("plugins", &plugins)
            .finish()
    }
}

impl Runtime {
    pub(crate) fn new(config: RuntimeConfig, plugins: Vec<Box<dyn Plugin>>) -> Result<Self> {
        let ops = OpRegistry::builtin();
        let devices = DeviceRegistry::new(config.default_device.clone());
        let cpu = CpuBuilder::new().workers(config.cpu_workers()).build()?;
        devices.register(Arc::new(cpu))?;
        let models = ModelRegistry::builtin();

        let runtime = Self {
            config,
            ops,
            devices,
            models,
            plugins: vec![],
            released: Once::new(),
        };
        for plugin in &plugins {
            log::info!("plugin: {}", plugin.name());
            plugin.init(&runtime).map_err(|err| {
                log::error!("plugin {}: {err}", plugin.name());
                Error::Plugin(plugin.name().to_owned())
            })?;
        }

        let default = &runtime.config.default_device;
        if !runtime.devices.contains(default) {
            return Err(Error::DeviceNotFound(default.clone()));
        }
        Ok(Self { plugins, ..runtime })
    }

    #[inline]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[inline]
    pub fn ops(&self) -> &OpRegistry {
        &self.ops
    }

    #[inline]
    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    #[inline]
    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Runs every plugin's `release`. Only the first call has any effect.
    pub fn release(&self) {
        self.released.call_once(|| {
            for plugin in self.plugins.iter().rev() {
                log::info!("plugin released: {}", plugin.name());
                plugin.release();
            }
        });
    }
}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();
static INIT: Mutex<()> = Mutex::new(());

/// Initializes the runtime from the environment. Later calls return the same runtime.
pub fn init() -> Result<&'static Runtime> {
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime);
    }
    RuntimeConfig::from_env()
        .and_then(|config| init_with(config, vec![]))
        .record()
}

/// Initializes the runtime with an explicit configuration and plugins.
///
/// Concurrent first callers race to a single winner; the others get the winner's runtime and
/// their arguments are dropped. A failed initialization may be retried.
pub fn init_with(config: RuntimeConfig, plugins: Vec<Box<dyn Plugin>>) -> Result<&'static Runtime> {
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime);
    }
    let _guard = INIT.lock().expect("failed to lock");
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime);
    }

    #[cfg(feature = "trace")]
    let _span = tracing::info_span!("init").entered();

    let runtime = Runtime::new(config, plugins).record()?;
    log::info!("weft {} initialized", version());
    Ok(RUNTIME.get_or_init(|| runtime))
}

/// Returns the runtime, initializing it from the environment if nobody did.
pub fn runtime() -> Result<&'static Runtime> {
    match RUNTIME.get() {
        Some(runtime) => Ok(runtime),
        None => init(),
    }
}

/// Runs the plugins' release hooks. Does nothing if the runtime was never initialized.
pub fn release() {
    if let Some(runtime) = RUNTIME.get() {
        runtime.release();
    }
}

/// Name of the device graphs run on unless they select one.
pub fn default_device() -> Result<String> {
    Ok(runtime()?.devices().default_name())
}

pub fn set_default_device(name: &str) -> Result<()> {
    runtime()
        .and_then(|runtime| runtime.devices().set_default(name))
        .record()
}

#[inline]
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
