#![warn(clippy::unwrap_used)]

//! Client-side commerce tracking — session holding, click attribution,
//! commerce event enrichment, and batched event collection.
//!
//! # Modules
//!
//! - [`session`] — Session and customer id holder, persisted with an idle timeout
//! - [`attribution`] — Per-product, per-channel attribution ledger (sponsored beats organic)
//! - [`enrichment`] — Merges attribution into add-to-cart, checkout and purchase products
//! - [`collector`] — Per-type batching in front of the event sink
//! - [`tracker`] — Public tracking API tying the above together
//! - [`source`] — Attribute-map data sources for click descriptors
//! - [`events`] — Request shapes accepted by the tracking API

pub mod attribution;
pub mod collector;
pub mod enrichment;
pub mod events;
pub mod session;
pub mod source;
pub mod tracker;

pub use attribution::{AttributionKey, AttributionStore};
pub use collector::EventCollector;
pub use enrichment::{EventEnricher, PreparedProduct, PurchaseEnrichment};
pub use session::{SessionHolder, SessionSource};
pub use source::{StaticDataSource, TrackingDataSource};
pub use tracker::Tracker;
