//! Source reader (C2): pulls new feeding-detail rows out of the Akva SQL
//! Server database and hands them to the normalizer (C3).

mod client;
mod mapper;

pub use client::Client;
pub use mapper::to_normalized_event;
