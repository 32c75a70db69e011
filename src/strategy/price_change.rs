use chrono::Utc;
use eyre::{bail, Result, WrapErr};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::collector::{Collector, PriceStream, STREAM_BUFFER};
use crate::config::deserialize_duration;
use crate::dedup::DedupCache;
use crate::domain::{Delivery, Notification, PriceSnapshot, SymbolPair};
use crate::notifier::Notifier;
use crate::shutdown::Shutdown;
use crate::strategy::Strategy;

pub const KIND: &str = "price_change";
const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Upper bound on deliveries one fan-out worker keeps in flight.
pub const MAX_IN_FLIGHT_DELIVERIES: usize = 64;

#[derive(Debug, Clone, Deserialize)]
pub struct PriceChangeConfig {
    pub symbol1: String,
    pub symbol2: String,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub window_size: Option<Duration>,
    /// Absolute change threshold; unset disables the criterion.
    #[serde(default)]
    pub absolute: Option<f64>,
    /// Percentage change threshold; unset disables the criterion.
    #[serde(default)]
    pub percentage: Option<f64>,
}

/// Outcome of evaluating one snapshot against the rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Same magnitude already alerted inside the current window.
    Duplicate,
    BelowThreshold,
    /// Qualifies; the dedup key has been recorded.
    Alert,
}

/// Alerts when a window's absolute or percentage change crosses a threshold,
/// at most once per change magnitude per window.
pub struct PriceChangeStrategy {
    name: String,
    pair: SymbolPair,
    window: Duration,
    absolute: f64,
    percentage: f64,
    cache: DedupCache,
    collectors: Vec<Arc<dyn Collector>>,
    notifiers: Vec<Arc<dyn Notifier>>,
}

/// Builds a strategy from a raw `price_change` config block.
pub fn build(raw: &Value) -> Result<Box<dyn Strategy>> {
    let config = PriceChangeConfig::deserialize(raw).wrap_err("invalid price_change strategy config")?;
    Ok(Box::new(PriceChangeStrategy::new(config)?))
}

impl PriceChangeStrategy {
    pub fn new(config: PriceChangeConfig) -> Result<Self> {
        if config.symbol1.is_empty() || config.symbol2.is_empty() {
            bail!("symbol1 and symbol2 are required");
        }
        for (field, value) in [("absolute", config.absolute), ("percentage", config.percentage)] {
            if matches!(value, Some(v) if v.is_nan() || v < 0.0) {
                bail!("{} threshold must be a non-negative number", field);
            }
        }
        if config.absolute.is_none() && config.percentage.is_none() {
            warn!(
                "price change strategy [{} - {}] has no thresholds, it will never alert",
                config.symbol1, config.symbol2
            );
        }

        let pair = SymbolPair::new(config.symbol1, config.symbol2);
        Ok(Self {
            name: format!("{}[{}]", KIND, pair),
            pair,
            window: config.window_size.unwrap_or(DEFAULT_WINDOW),
            absolute: config.absolute.unwrap_or(f64::INFINITY),
            percentage: config.percentage.unwrap_or(f64::INFINITY),
            cache: DedupCache::new(),
            collectors: Vec::new(),
            notifiers: Vec::new(),
        })
    }

    pub fn pair(&self) -> &SymbolPair {
        &self.pair
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Identity of a swing for deduplication: the exact absolute change.
    pub fn dedup_key(snapshot: &PriceSnapshot) -> String {
        snapshot.absolute_change.to_string()
    }

    pub fn meets_threshold(&self, snapshot: &PriceSnapshot) -> bool {
        snapshot.absolute_change.abs() >= self.absolute
            || snapshot.percentage_change.abs() >= self.percentage
    }

    /// Evaluates `snapshot` and records its key when it qualifies.
    pub fn admit(&self, snapshot: &PriceSnapshot) -> Verdict {
        let key = Self::dedup_key(snapshot);
        if self.cache.peek(&key) {
            return Verdict::Duplicate;
        }
        if !self.meets_threshold(snapshot) {
            return Verdict::BelowThreshold;
        }
        // another collector may have claimed the key since the peek
        if !self.cache.insert_if_absent(key, self.window) {
            return Verdict::Duplicate;
        }
        Verdict::Alert
    }

    /// Category key notifiers receive with every alert of this rule.
    pub fn category(&self) -> String {
        format!("PriceChange^{}", self.pair)
    }

    pub fn render(&self, snapshot: &PriceSnapshot) -> Notification {
        let at = snapshot
            .closed_at()
            .filter(|_| snapshot.close_time > 0)
            .unwrap_or_else(Utc::now);

        let text = format!(
            "Price swing detected:\n\
             - Time: {}\n\
             - Pair: {} - {}\n\
             - Change: {} ({}%)\n\
             - Orders: {}\n",
            at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.pair.base,
            self.pair.quote,
            snapshot.absolute_change,
            snapshot.percentage_change,
            snapshot.order_count,
        );

        Notification {
            text,
            key: self.category(),
            throttle: true,
        }
    }

    fn on_snapshot(&self, snapshot: PriceSnapshot, events: &mpsc::Sender<PriceSnapshot>) {
        match self.admit(&snapshot) {
            Verdict::Duplicate => {
                info!("{}: change {} already notified in this window", self.name, snapshot.absolute_change);
            }
            Verdict::BelowThreshold => {
                debug!(
                    "{}: unmatched price change, absolute: {}, relative: {}",
                    self.name, snapshot.absolute_change, snapshot.percentage_change
                );
            }
            Verdict::Alert => match events.try_send(snapshot) {
                Ok(()) => info!("{}: strategy matched price change", self.name),
                Err(TrySendError::Full(snapshot)) => {
                    warn!("{}: notify buffer full, discarding {}", self.name, snapshot);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("{}: fan-out worker gone", self.name);
                }
            },
        }
    }

    async fn consume(
        self: Arc<Self>,
        source: String,
        mut stream: PriceStream<PriceSnapshot>,
        events: mpsc::Sender<PriceSnapshot>,
        shutdown: Shutdown,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                next = stream.recv() => match next {
                    Some(snapshot) => self.on_snapshot(snapshot, &events),
                    None => break,
                },
            }
        }

        drop(events);
        stream.finish().await;
        info!("{}: {} listener exited", self.name, source);
    }

    async fn fan_out(self: Arc<Self>, mut events: mpsc::Receiver<PriceSnapshot>, shutdown: Shutdown) {
        let mut deliveries = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                next = events.recv() => match next {
                    Some(snapshot) => self.dispatch(&snapshot, &mut deliveries),
                    None => break,
                },
            }
        }

        // in-flight deliveries finish on their own transport timeout
        while let Some(res) = deliveries.join_next().await {
            log_join_error(res);
        }
        info!("{}: notifier worker exited", self.name);
    }

    fn dispatch(&self, snapshot: &PriceSnapshot, deliveries: &mut JoinSet<()>) {
        let alert_id = Uuid::new_v4();
        let notification = Arc::new(self.render(snapshot));
        debug!("{}: alert {} for {}", self.name, alert_id, snapshot);

        for notifier in &self.notifiers {
            while let Some(res) = deliveries.try_join_next() {
                log_join_error(res);
            }
            if deliveries.len() >= MAX_IN_FLIGHT_DELIVERIES {
                warn!(
                    "{}: {} deliveries in flight, dropping alert {} for {}",
                    self.name,
                    deliveries.len(),
                    alert_id,
                    notifier.kind()
                );
                continue;
            }

            let span = info_span!("alert", id = %alert_id, notifier = %notifier.kind());
            let notifier = notifier.clone();
            let notification = notification.clone();
            deliveries.spawn(
                async move {
                    match notifier.notify(&notification).await {
                        Ok(Delivery::Sent) => info!("price change notification sent"),
                        Ok(Delivery::Throttled) => debug!("price change notification throttled"),
                        Err(e) => error!("notify fail: {:#}", e),
                    }
                }
                .instrument(span),
            );
        }
    }
}

/// Alert events buffered between the consumers and the fan-out worker.
fn events_capacity(collectors: usize) -> usize {
    collectors * STREAM_BUFFER + 1
}

fn log_join_error(res: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        error!("delivery task failed: {:?}", e);
    }
}

impl Strategy for PriceChangeStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_collectors(&mut self, collectors: &[Arc<dyn Collector>]) {
        self.collectors.extend(collectors.iter().cloned());
    }

    fn add_notifiers(&mut self, notifiers: &[Arc<dyn Notifier>]) {
        self.notifiers.extend(notifiers.iter().cloned());
    }

    fn validate(&self) -> Result<()> {
        for collector in &self.collectors {
            collector
                .validate_window(self.window)
                .wrap_err_with(|| format!("{}: unusable window_size for {} collector", self.name, collector.kind()))?;
        }
        Ok(())
    }

    fn run(self: Arc<Self>, shutdown: Shutdown, tasks: &mut JoinSet<()>) {
        info!(
            "start running price change strategy for [{} - {}]: window={:?}, absolute={}, percentage={}",
            self.pair.base, self.pair.quote, self.window, self.absolute, self.percentage
        );
        if self.notifiers.is_empty() {
            warn!("{}: no notifiers attached, alerts will only be logged", self.name);
        }

        let (events_tx, events_rx) = mpsc::channel(events_capacity(self.collectors.len()));

        for collector in &self.collectors {
            let stream = collector.stream_window_price(&self.pair, self.window, shutdown.clone());
            tasks.spawn(self.clone().consume(
                collector.kind().to_string(),
                stream,
                events_tx.clone(),
                shutdown.clone(),
            ));
        }
        drop(events_tx);

        tasks.spawn(self.fan_out(events_rx, shutdown));
    }
}
