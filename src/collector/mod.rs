pub mod binance;

use eyre::Result;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument};

use crate::domain::{PriceSnapshot, SymbolPair, WindowTicker};
use crate::shutdown::Shutdown;

/// Outstanding items a collector stream buffers before dropping new ones.
pub const STREAM_BUFFER: usize = 20;

/// Polls a price source and streams what it sees.
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    fn kind(&self) -> &str;

    /// Live window snapshots for `pair`, one poll per interval, until shutdown.
    fn stream_window_price(
        &self,
        pair: &SymbolPair,
        window: Duration,
        shutdown: Shutdown,
    ) -> PriceStream<PriceSnapshot>;

    /// Live average price for `pair`, one poll per interval, until shutdown.
    fn stream_avg_price(&self, pair: &SymbolPair, shutdown: Shutdown) -> PriceStream<f64>;

    /// Rejects a window the source cannot measure exactly.
    fn validate_window(&self, _window: Duration) -> Result<()> {
        Ok(())
    }

    /// Liveness probe, independent of any running stream.
    async fn test_connection(&self) -> bool;
}

/// Exchange wire client behind a polling collector.
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Window statistics for `pair`; `None` when the exchange returned nothing.
    async fn window_ticker(&self, pair: &SymbolPair, window: Duration) -> Result<Option<WindowTicker>>;

    async fn avg_price(&self, pair: &SymbolPair) -> Result<Option<f64>>;

    fn validate_window(&self, _window: Duration) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()>;
}

/// Receiving end of a collector stream plus the task feeding it.
pub struct PriceStream<T> {
    rx: mpsc::Receiver<T>,
    producer: Option<JoinHandle<()>>,
}

impl<T> PriceStream<T> {
    pub fn new(rx: mpsc::Receiver<T>, producer: JoinHandle<()>) -> Self {
        Self {
            rx,
            producer: Some(producer),
        }
    }

    /// A stream fed by someone else (tests, in-process sources).
    pub fn from_receiver(rx: mpsc::Receiver<T>) -> Self {
        Self { rx, producer: None }
    }

    /// Next item; `None` once the producer has closed the stream.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Drops the receiver and waits for the producer task to exit.
    pub async fn finish(self) {
        let Self { rx, producer } = self;
        drop(rx);
        if let Some(handle) = producer {
            if let Err(e) = handle.await {
                error!("collector producer task failed: {:?}", e);
            }
        }
    }
}

/// Generic collector: polls a `PriceSource` every `interval`, bounding each
/// fetch by `timeout`.
pub struct PollingCollector<S> {
    source: Arc<S>,
    interval: Duration,
    timeout: Duration,
}

impl<S: PriceSource> PollingCollector<S> {
    pub fn new(source: S, interval: Duration, timeout: Duration) -> Self {
        Self {
            source: Arc::new(source),
            interval,
            timeout,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

#[async_trait::async_trait]
impl<S: PriceSource> Collector for PollingCollector<S> {
    fn kind(&self) -> &str {
        self.source.name()
    }

    fn stream_window_price(
        &self,
        pair: &SymbolPair,
        window: Duration,
        shutdown: Shutdown,
    ) -> PriceStream<PriceSnapshot> {
        let source = self.source.clone();
        let pair = pair.clone();
        let label = format!("{} window price [{}]", source.name(), pair);

        spawn_poller(label, self.interval, self.timeout, shutdown, move || {
            let source = source.clone();
            let pair = pair.clone();
            async move {
                let ticker = source.window_ticker(&pair, window).await?;
                Ok(ticker.map(|t| PriceSnapshot::from_ticker(pair, t)))
            }
        })
    }

    fn stream_avg_price(&self, pair: &SymbolPair, shutdown: Shutdown) -> PriceStream<f64> {
        let source = self.source.clone();
        let pair = pair.clone();
        let label = format!("{} average price [{}]", source.name(), pair);

        spawn_poller(label, self.interval, self.timeout, shutdown, move || {
            let source = source.clone();
            let pair = pair.clone();
            async move {
                let price = source.avg_price(&pair).await?;
                Ok(price.filter(|p| *p != 0.0))
            }
        })
    }

    fn validate_window(&self, window: Duration) -> Result<()> {
        self.source.validate_window(window)
    }

    async fn test_connection(&self) -> bool {
        match timeout(self.timeout, self.source.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("{} ping failed: {:#}", self.source.name(), e);
                false
            }
            Err(_) => {
                warn!("{} ping timed out after {:?}", self.source.name(), self.timeout);
                false
            }
        }
    }
}

/// Runs the poll loop on its own task. The first poll happens one interval
/// after start. Failed, timed-out and empty fetches skip the tick; a full
/// buffer drops the new item. Only shutdown (or a dropped receiver) ends it.
fn spawn_poller<T, F, Fut>(
    label: String,
    every: Duration,
    fetch_timeout: Duration,
    shutdown: Shutdown,
    fetch: F,
) -> PriceStream<T>
where
    T: Debug + Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<T>>> + Send,
{
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);

    let producer = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("{} collector started, polling every {:?}", label, every);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                _ = ticker.tick() => {}
            }

            debug!("polling {}", label);
            let item = match timeout(fetch_timeout, fetch()).await {
                Ok(Ok(Some(item))) => item,
                Ok(Ok(None)) => {
                    warn!("{}: empty result, skipping tick", label);
                    continue;
                }
                Ok(Err(e)) => {
                    error!("{}: fetch failed: {:#}", label, e);
                    continue;
                }
                Err(_) => {
                    error!("{}: fetch timed out after {:?}", label, fetch_timeout);
                    continue;
                }
            };

            match tx.try_send(item) {
                Ok(()) => {}
                Err(TrySendError::Full(item)) => {
                    warn!("{}: stream buffer full, discarding {:?}", label, item);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("{}: consumer gone", label);
                    break;
                }
            }
        }

        info!("{} collector exited", label);
    }
    .in_current_span());

    PriceStream::new(rx, producer)
}
