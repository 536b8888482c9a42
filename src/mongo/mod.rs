//! History store (C4): MongoDB persistence of normalized events, keyed by
//! composite `source:ID`, plus the admin-facing read/write surface.

mod client;
mod models;
mod repository;

pub use client::Client;
pub use models::HistoricalEvent;
pub use repository::{QueryOptions, QueryResult, Repository};
