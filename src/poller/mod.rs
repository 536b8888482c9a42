//! The poller subsystem: watermark store (C1), poll coordinator (C7), and
//! worker lifecycle (C8).

mod poll;
mod watermark;
mod worker;

pub use poll::Stats;
pub use watermark::{Watermark, WatermarkStore};
pub use worker::{Worker, WorkerState};
