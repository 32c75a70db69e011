#![allow(dead_code)]

use axum::Router;
use eyre::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crypto_monitor::collector::{Collector, PriceSource, PriceStream};
use crypto_monitor::domain::{Delivery, Notification, PriceSnapshot, SymbolPair, WindowTicker};
use crypto_monitor::notifier::Notifier;
use crypto_monitor::shutdown::Shutdown;

pub fn btc_usdt() -> SymbolPair {
    SymbolPair::new("BTC", "USDT")
}

pub fn snapshot(absolute: f64, percentage: f64) -> PriceSnapshot {
    PriceSnapshot {
        pair: btc_usdt(),
        open_price: 10_000.0,
        close_price: 10_000.0 + absolute,
        high_price: 10_300.0,
        low_price: 9_800.0,
        volume: 5.0,
        quote_volume: 50_000.0,
        absolute_change: absolute,
        percentage_change: percentage,
        order_count: 77,
        open_time: 1_700_000_000_000,
        close_time: 1_700_000_900_000,
    }
}

/// Collector whose window stream is fed by the test through a sender.
pub struct ChannelCollector {
    name: String,
    rx: Mutex<Option<mpsc::Receiver<PriceSnapshot>>>,
}

impl ChannelCollector {
    pub fn new(name: &str) -> (Arc<Self>, mpsc::Sender<PriceSnapshot>) {
        let (tx, rx) = mpsc::channel(32);
        let collector = Arc::new(Self {
            name: name.to_string(),
            rx: Mutex::new(Some(rx)),
        });
        (collector, tx)
    }
}

#[async_trait::async_trait]
impl Collector for ChannelCollector {
    fn kind(&self) -> &str {
        &self.name
    }

    fn stream_window_price(&self, _: &SymbolPair, _: Duration, _: Shutdown) -> PriceStream<PriceSnapshot> {
        let rx = self.rx.lock().take().expect("window stream requested twice");
        PriceStream::from_receiver(rx)
    }

    fn stream_avg_price(&self, _: &SymbolPair, _: Shutdown) -> PriceStream<f64> {
        let (_tx, rx) = mpsc::channel(1);
        PriceStream::from_receiver(rx)
    }

    async fn test_connection(&self) -> bool {
        true
    }
}

/// Records every notification it is asked to deliver.
pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl RecordingNotifier {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    fn kind(&self) -> &str {
        "recording"
    }

    async fn notify(&self, notification: &Notification) -> Result<Delivery> {
        let _ = self.tx.send(notification.clone());
        Ok(Delivery::Sent)
    }
}

/// Always fails, counting attempts.
#[derive(Default)]
pub struct FailingNotifier {
    pub attempts: AtomicUsize,
}

#[async_trait::async_trait]
impl Notifier for FailingNotifier {
    fn kind(&self) -> &str {
        "failing"
    }

    async fn notify(&self, _: &Notification) -> Result<Delivery> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(eyre::eyre!("webhook responded 500"))
    }
}

/// Price source that always succeeds and counts polls.
#[derive(Default)]
pub struct CountingSource {
    pub polls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl PriceSource for CountingSource {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn window_ticker(&self, _: &SymbolPair, _: Duration) -> Result<Option<WindowTicker>> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) as f64;
        Ok(Some(WindowTicker {
            open_price: 10_000.0,
            close_price: 10_000.0 + 200.0 + n,
            close_time: 1_700_000_900_000,
            ..Default::default()
        }))
    }

    async fn avg_price(&self, _: &SymbolPair) -> Result<Option<f64>> {
        Ok(Some(10_000.0))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Serves `app` on an ephemeral local port and returns its base url.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}
