//! Infrastructure layer - ports and the adapters behind them.

pub mod batch_job;
pub mod clock;
pub mod config;
pub mod generators;
pub mod planner;
pub mod ports;
pub mod queues;
pub mod resilient;
pub mod sqlite;
pub mod status_store;
pub mod storage;
