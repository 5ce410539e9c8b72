//! Tracking data sources — where click descriptors come from.
//!
//! A source hands back the raw attribute map of the clicked element (the
//! `data-*` attributes of a product tile, say). [`click_from_attributes`]
//! turns that map into a [`ClickDescriptor`]; the attribution store never
//! sees the markup.

use std::collections::HashMap;

use tracker_core::types::ClickDescriptor;

pub trait TrackingDataSource {
    fn extract(&self) -> Option<HashMap<String, String>>;
}

/// Fixed attribute map, for server-rendered contexts and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDataSource {
    attributes: Option<HashMap<String, String>>,
}

impl StaticDataSource {
    pub fn new(attributes: HashMap<String, String>) -> Self {
        Self {
            attributes: Some(attributes),
        }
    }

    pub fn empty() -> Self {
        Self { attributes: None }
    }
}

impl<const N: usize> From<[(&str, &str); N]> for StaticDataSource {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl TrackingDataSource for StaticDataSource {
    fn extract(&self) -> Option<HashMap<String, String>> {
        self.attributes.clone()
    }
}

/// Build a click from an attribute map. Keys may carry a `data-` prefix.
/// Returns None without a product id.
pub fn click_from_attributes(attributes: &HashMap<String, String>) -> Option<ClickDescriptor> {
    let normalized: HashMap<&str, &str> = attributes
        .iter()
        .map(|(k, v)| (k.strip_prefix("data-").unwrap_or(k.as_str()), v.trim()))
        .filter(|(_, v)| !v.is_empty())
        .collect();
    let text = |key: &str| normalized.get(key).map(|v| v.to_string());
    let number = |key: &str| normalized.get(key).and_then(|v| v.parse::<f64>().ok());

    let product_ref_id = text("product-id").or_else(|| text("ref-id"))?;
    let mut click = ClickDescriptor::new(product_ref_id);

    click.click_id = text("click-id");
    click.current_url = text("current-url");
    click.referral_url = text("referral-url");
    click.action_type = text("action-type");
    click.context_type = text("context-type");
    click.redirect_url = text("redirect-url").or_else(|| text("href"));
    click.click_position = normalized.get("position").and_then(|v| v.parse().ok());
    click.slot = text("slot");

    let ids = &mut click.ids;
    ids.widget_id = text("widget-id");
    ids.route_id = text("route-id");
    ids.recommender_id = text("recommender-id");
    ids.campaign_id = text("campaign-id");
    ids.tactic_id = text("tactic-id");
    ids.tactic_label = text("tactic-label");
    ids.banner_id = text("banner-id");
    ids.placement_id = text("placement-id");
    ids.retail_boost_collection_campaign_id = text("retail-boost-collection-campaign-id");

    let sponsored = &mut click.sponsored;
    sponsored.ad_set_id = text("ad-set-id");
    sponsored.ad_set_version = text("ad-set-version");
    sponsored.cost_per_click = number("cost-per-click");
    sponsored.cost_per_action = number("cost-per-action");
    sponsored.cost_per_mille = number("cost-per-mille");
    sponsored.time_stamp = text("time-stamp");
    sponsored.hmac_salt = text("hmac-salt");
    sponsored.hmac = text("hmac");
    sponsored.supplier_id = text("supplier-id");

    Some(click)
}
