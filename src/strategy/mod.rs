pub mod price_change;

use eyre::Result;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::collector::Collector;
use crate::notifier::Notifier;
use crate::shutdown::Shutdown;

/// A configured alerting rule, wired to collectors and notifiers before it runs.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn add_collectors(&mut self, collectors: &[Arc<dyn Collector>]);

    fn add_notifiers(&mut self, notifiers: &[Arc<dyn Notifier>]);

    /// Checks the rule against its attached collectors before anything runs.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Spawns the strategy's workers into `tasks`. Every worker exits once
    /// `shutdown` fires, so draining `tasks` afterwards is the completion barrier.
    fn run(self: Arc<Self>, shutdown: Shutdown, tasks: &mut JoinSet<()>);
}
