//! Broker publisher (C6): MQTT delivery of normalized feeding events under a
//! per-center dynamic topic.

mod client;
mod publisher;

pub use client::Client;
pub use publisher::{normalize_topic_segment, Publisher};
