//! Request shapes accepted by the public tracking API.

use serde::{Deserialize, Serialize};

use tracker_core::types::{PageContext, Product};

/// Add-to-cart, checkout and purchase all share this shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommerceRequest {
    pub products: Vec<Product>,
    /// Explicit causal click. Lifts the attribution requirement on add-to-cart.
    #[serde(default)]
    pub click_id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub context: Option<PageContext>,
}

impl CommerceRequest {
    pub fn new(products: Vec<Product>) -> Self {
        Self {
            products,
            ..Default::default()
        }
    }

    pub fn with_click_id(mut self, click_id: impl Into<String>) -> Self {
        self.click_id = Some(click_id.into());
        self
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductViewRequest {
    pub ref_id: String,
    #[serde(default)]
    pub context: Option<PageContext>,
}

/// Products shown inside a widget or ad slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpressionRequest {
    pub ref_ids: Vec<String>,
    #[serde(default)]
    pub widget_id: Option<String>,
    #[serde(default)]
    pub ad_set_id: Option<String>,
    #[serde(default)]
    pub context: Option<PageContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub result_ref_ids: Vec<String>,
    #[serde(default)]
    pub context: Option<PageContext>,
}
