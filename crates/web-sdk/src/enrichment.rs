//! Event enrichment — merges resolved attribution into commerce products.
//!
//! - add-to-cart: attribution is mandatory unless the caller passed a click id
//! - checkout: best-effort, never consumes
//! - purchase: best-effort, and every record used is consumed once the event
//!   has been accepted for sending (see [`PurchaseEnrichment::commit`])

use std::sync::Arc;

use tracing::debug;

use tracker_core::error::{TrackerError, TrackerResult};
use tracker_core::types::{AttributionRecord, Channel, EnrichedProduct, Product};

use crate::attribution::AttributionStore;
use crate::session::SessionSource;

/// A product after lookup, with the record that enriched it (if any).
#[derive(Debug, Clone)]
pub struct PreparedProduct {
    pub product: EnrichedProduct,
    pub used: Option<AttributionRecord>,
}

/// Enriched purchase lines plus the attribution they spent.
#[derive(Debug, Clone)]
pub struct PurchaseEnrichment {
    pub products: Vec<EnrichedProduct>,
    pub pending: Vec<(String, Channel)>,
}

impl PurchaseEnrichment {
    /// Consume every record this purchase used. Call only after the event
    /// has been handed to the collector.
    pub fn commit(&self, store: &AttributionStore) {
        for (product_ref_id, channel) in &self.pending {
            store.consume(product_ref_id, *channel);
        }
    }
}

pub struct EventEnricher {
    store: Arc<AttributionStore>,
    session: Arc<dyn SessionSource>,
}

impl EventEnricher {
    pub fn new(store: Arc<AttributionStore>, session: Arc<dyn SessionSource>) -> Self {
        Self { store, session }
    }

    pub fn prepare_product(&self, product: Product) -> PreparedProduct {
        let customer_id = self.session.customer_id().unwrap_or_default();
        let used = self.store.resolve(&customer_id, &product.ref_id);
        let mut enriched = EnrichedProduct::from(product);
        if let Some(record) = &used {
            merge_record(&mut enriched, record);
        }
        PreparedProduct {
            product: enriched,
            used,
        }
    }

    pub fn enrich_add_to_cart(
        &self,
        products: Vec<Product>,
        click_id: Option<&str>,
    ) -> TrackerResult<Vec<PreparedProduct>> {
        let explicit = click_id.filter(|id| !id.is_empty());
        products
            .into_iter()
            .map(|product| {
                let mut prepared = self.prepare_product(product);
                match explicit {
                    Some(id) => prepared.product.click_id = Some(id.to_string()),
                    None if prepared.used.is_none() => {
                        return Err(TrackerError::MissingAttribution {
                            product_ref_id: prepared.product.product.ref_id,
                        });
                    }
                    None => {}
                }
                Ok(prepared)
            })
            .collect()
    }

    pub fn enrich_checkout(&self, products: Vec<Product>) -> Vec<PreparedProduct> {
        products
            .into_iter()
            .map(|product| self.prepare_product(product))
            .collect()
    }

    pub fn enrich_purchase(&self, products: Vec<Product>) -> PurchaseEnrichment {
        let mut enriched = Vec::with_capacity(products.len());
        let mut pending = Vec::new();
        for product in products {
            let prepared = self.prepare_product(product);
            if let Some(record) = &prepared.used {
                pending.push((prepared.product.product.ref_id.clone(), record.channel()));
            }
            enriched.push(prepared.product);
        }
        debug!(
            products = enriched.len(),
            attributed = pending.len(),
            "purchase enriched"
        );
        PurchaseEnrichment {
            products: enriched,
            pending,
        }
    }
}

fn merge_record(product: &mut EnrichedProduct, record: &AttributionRecord) {
    product.click_id = Some(record.click_id.clone());
    product.ids = record.ids.clone();
    // Cost and signature terms stay off organic products.
    if record.is_sponsored {
        product.sponsored = record.sponsored.clone();
    }
}
