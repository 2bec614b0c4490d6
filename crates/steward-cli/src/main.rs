use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use steward_core::content::{
    ContainerConfig, ContentHandler, ContentUnit, DispatchRequest, Dispatcher, DispatcherConfig,
    HandlerContainer, HandlerDescriptor, HandlerError, HandlerReport, Options,
};
use steward_core::impls::FileSnapshotStore;
use steward_core::{FifoTaskQueue, QueueConfig, StewardError, TaskId, TaskQueue, TaskStatus};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// `steward-cli [config.json]`; every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliConfig {
    queue: QueueConfig,
    container: ContainerConfig,
    dispatcher: DispatcherConfig,
    /// Keep task snapshots here across runs.
    store_dir: Option<PathBuf>,
}

impl CliConfig {
    fn load(path: Option<&Path>) -> steward_core::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Logs what it would do and reports every unit as changed.
struct DryRunPackages {
    settings: Value,
}

#[async_trait]
impl ContentHandler for DryRunPackages {
    async fn install(&self, units: &[ContentUnit], _: &Options) -> Result<HandlerReport, HandlerError> {
        Ok(self.pretend("install", units))
    }

    async fn update(&self, units: &[ContentUnit], _: &Options) -> Result<HandlerReport, HandlerError> {
        Ok(self.pretend("update", units))
    }

    async fn uninstall(&self, units: &[ContentUnit], _: &Options) -> Result<HandlerReport, HandlerError> {
        Ok(self.pretend("uninstall", units))
    }

    async fn profile(&self) -> Result<HandlerReport, HandlerError> {
        Ok(HandlerReport::succeeded(0, json!([])))
    }
}

impl DryRunPackages {
    fn pretend(&self, op: &str, units: &[ContentUnit]) -> HandlerReport {
        let keys: Vec<_> = units.iter().map(|u| Value::Object(u.unit_key.clone())).collect();
        info!(op, units = units.len(), "dry run");
        HandlerReport::succeeded(units.len(), json!({ op: keys, "settings": self.settings }))
    }
}

/// Accepts reboots without touching the host.
struct DryRunSystem;

#[async_trait]
impl ContentHandler for DryRunSystem {
    async fn install(&self, _: &[ContentUnit], _: &Options) -> Result<HandlerReport, HandlerError> {
        Err(HandlerError::Unsupported("install"))
    }

    async fn update(&self, _: &[ContentUnit], _: &Options) -> Result<HandlerReport, HandlerError> {
        Err(HandlerError::Unsupported("update"))
    }

    async fn uninstall(&self, _: &[ContentUnit], _: &Options) -> Result<HandlerReport, HandlerError> {
        Err(HandlerError::Unsupported("uninstall"))
    }

    async fn profile(&self) -> Result<HandlerReport, HandlerError> {
        Ok(HandlerReport::succeeded(0, Value::Null))
    }

    async fn reboot(&self, _: &Options) -> Result<HandlerReport, HandlerError> {
        warn!("reboot requested (dry run)");
        Ok(HandlerReport::succeeded(0, json!({ "dry_run": true })))
    }
}

type Built = Result<Arc<dyn ContentHandler>, HandlerError>;

fn dry_run_packages(_: &str, descriptor: &HandlerDescriptor) -> Built {
    Ok(Arc::new(DryRunPackages {
        settings: descriptor.settings.clone(),
    }))
}

fn dry_run_system(_: &str, _: &HandlerDescriptor) -> Built {
    Ok(Arc::new(DryRunSystem))
}

/// Without configured locations, serve `rpm` and `system` from a scratch dir.
fn demo_locations(config: ContainerConfig) -> steward_core::Result<ContainerConfig> {
    if !config.locations.is_empty() {
        return Ok(config);
    }
    let dir = std::env::temp_dir().join(format!("steward-demo-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let descriptors = [
        ("rpm.json", json!({ "handler": "dry-run-packages", "types": ["rpm"] })),
        ("system.json", json!({ "handler": "dry-run-system", "types": ["system"] })),
    ];
    for (file, body) in descriptors {
        std::fs::write(dir.join(file), serde_json::to_vec_pretty(&body)?)?;
    }
    Ok(config.with_location(dir))
}

async fn wait_until_complete(queue: &FifoTaskQueue, id: TaskId) -> steward_core::Result<TaskStatus> {
    loop {
        let status = queue.status(id).await?;
        if status.state.is_complete() {
            return Ok(status);
        }
        sleep(Duration::from_millis(50)).await;
    }
}

async fn run(config: CliConfig) -> steward_core::Result<()> {
    let mut container = HandlerContainer::new(demo_locations(config.container)?);
    container.register_factory("dry-run-packages", dry_run_packages)?;
    container.register_factory("dry-run-system", dry_run_system)?;
    let summary = container.load();
    info!(loaded = ?summary.loaded, skipped = summary.skipped.len(), "handlers loaded");

    let dispatcher = Arc::new(Dispatcher::with_config(Arc::new(container), config.dispatcher));

    let mut builder = FifoTaskQueue::builder(config.queue);
    if let Some(dir) = config.store_dir {
        builder = builder.store(Arc::new(FileSnapshotStore::open(dir).await?));
    }
    let queue = builder.build();
    let dispatch = queue.start()?;

    let units = vec![ContentUnit::named("rpm", "zsh"), ContentUnit::named("rpm", "ksh")];
    let install = dispatcher.task(DispatchRequest::install(units, Options::default().with_reboot()))?;
    let profile = dispatcher.task(DispatchRequest::Profile {
        type_ids: vec!["rpm".into()],
    })?;

    let mut ids = Vec::new();
    for task in [install, profile] {
        let status = queue.enqueue(task, true).await?;
        info!(task_id = %status.id, method = %status.method_name, "enqueued");
        ids.push(status.id);
    }

    let outcome = tokio::select! {
        done = async {
            let mut finished = Vec::new();
            for id in ids {
                finished.push(wait_until_complete(&queue, id).await?);
            }
            Ok::<_, StewardError>(finished)
        } => Some(done?),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            None
        }
    };

    if let Some(finished) = outcome {
        for status in &finished {
            println!("{}", serde_json::to_string_pretty(status)?);
        }
    }
    println!("{}", serde_json::to_string(&queue.counts().await)?);

    dispatch.shutdown_and_join().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let result = match CliConfig::load(path.as_deref()) {
        Ok(config) => run(config).await,
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        tracing::error!(error = %err, "steward-cli failed");
        std::process::exit(1);
    }
}
