use eyre::{eyre, Result, WrapErr};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::collector::Collector;
use crate::config::{component_kind, Config};
use crate::notifier::Notifier;
use crate::plugins::Registries;
use crate::registry::Registry;
use crate::shutdown::{self, Shutdown, ShutdownTrigger};
use crate::strategy::Strategy;

/// Owns every configured component and the tasks running them.
pub struct Monitor {
    collectors: Vec<Arc<dyn Collector>>,
    notifiers: Vec<Arc<dyn Notifier>>,
    strategies: Vec<Arc<dyn Strategy>>,
    trigger: ShutdownTrigger,
    shutdown: Shutdown,
    tasks: JoinSet<()>,
}

impl Monitor {
    /// Resolves every config block through `registries` and wires each
    /// strategy to all collectors and notifiers. Unknown types and windows a
    /// collector cannot measure are fatal.
    pub fn from_config(config: &Config, registries: &Registries) -> Result<Self> {
        let collectors = build_all(&registries.collectors, "collectors", &config.collectors)?;
        let notifiers = build_all(&registries.notifiers, "notifiers", &config.notifiers)?;

        let strategies = build_all(&registries.strategies, "strategies", &config.strategies)?
            .into_iter()
            .map(|mut strategy| {
                strategy.add_collectors(&collectors);
                strategy.add_notifiers(&notifiers);
                strategy.validate()?;
                Ok(Arc::from(strategy))
            })
            .collect::<Result<Vec<Arc<dyn Strategy>>>>()?;

        Ok(Self::new(collectors, notifiers, strategies))
    }

    /// A monitor over already-built components.
    pub fn new(
        collectors: Vec<Arc<dyn Collector>>,
        notifiers: Vec<Arc<dyn Notifier>>,
        strategies: Vec<Arc<dyn Strategy>>,
    ) -> Self {
        let (trigger, shutdown) = shutdown::channel();
        Self {
            collectors,
            notifiers,
            strategies,
            trigger,
            shutdown,
            tasks: JoinSet::new(),
        }
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    pub fn strategies(&self) -> &[Arc<dyn Strategy>] {
        &self.strategies
    }

    /// Probes every collector, then starts every strategy.
    pub async fn start(&mut self) {
        for collector in &self.collectors {
            if collector.test_connection().await {
                info!("{} collector connection ok", collector.kind());
            } else {
                warn!("{} collector connection test failed, polling anyway", collector.kind());
            }
        }

        info!(
            "starting {} strategies with {} collectors and {} notifiers",
            self.strategies.len(),
            self.collectors.len(),
            self.notifiers.len()
        );
        for strategy in &self.strategies {
            strategy.clone().run(self.shutdown.clone(), &mut self.tasks);
        }
    }

    /// Signals shutdown and waits for every spawned worker to exit.
    pub async fn stop(mut self) {
        info!("stopping monitor, waiting for {} workers", self.tasks.len());
        self.trigger.trigger();

        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                error!("worker task failed: {:?}", e);
            }
        }
        info!("monitor stopped");
    }
}

fn build_all<T>(registry: &Registry<T>, section: &str, blocks: &[Value]) -> Result<Vec<T>> {
    blocks
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            let kind = component_kind(raw).wrap_err_with(|| format!("{}[{}]", section, index))?;
            registry
                .resolve(kind, raw)
                .wrap_err_with(|| format!("{}[{}]: failed to build {} `{}`", section, index, registry.name(), kind))?
                .ok_or_else(|| {
                    eyre!(
                        "{}[{}]: unknown {} type `{}` (known: {})",
                        section,
                        index,
                        registry.name(),
                        kind,
                        registry.kinds().join(", ")
                    )
                })
        })
        .collect()
}
