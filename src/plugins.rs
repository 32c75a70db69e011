use std::sync::Arc;

use crate::collector::{self, Collector};
use crate::notifier::{self, Notifier};
use crate::registry::Registry;
use crate::strategy::{self, Strategy};

pub type CollectorRegistry = Registry<Arc<dyn Collector>>;
pub type NotifierRegistry = Registry<Arc<dyn Notifier>>;
pub type StrategyRegistry = Registry<Box<dyn Strategy>>;

/// One registry per component family.
pub struct Registries {
    pub collectors: CollectorRegistry,
    pub notifiers: NotifierRegistry,
    pub strategies: StrategyRegistry,
}

impl Registries {
    pub fn empty() -> Self {
        Self {
            collectors: Registry::new("collector"),
            notifiers: Registry::new("notifier"),
            strategies: Registry::new("strategy"),
        }
    }

    /// Every component type this binary ships with.
    pub fn builtin() -> Self {
        let registries = Self::empty();

        registries
            .collectors
            .register(collector::binance::KIND, collector::binance::build);

        registries
            .notifiers
            .register(notifier::webhook::KIND, notifier::webhook::build);
        registries
            .notifiers
            .register(notifier::webhook::WECHAT_KIND, notifier::webhook::build);

        registries
            .strategies
            .register(strategy::price_change::KIND, strategy::price_change::build);

        registries
    }
}
