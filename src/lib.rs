pub mod collector;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod logging;
pub mod monitor;
pub mod notifier;
pub mod plugins;
pub mod registry;
pub mod shutdown;
pub mod strategy;
