use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Attribution channel. Sponsored clicks carry an ad-set, organic ones don't.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sponsored,
    Organic,
}

impl Channel {
    /// Resolution order: sponsored always beats organic.
    pub const PRIORITY: [Channel; 2] = [Channel::Sponsored, Channel::Organic];

    /// Stable suffix used in persisted storage keys.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Sponsored => "s",
            Self::Organic => "o",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sponsored => "sponsored",
            Self::Organic => "organic",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identification fields copied from a click onto attributed products.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttributionIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tactic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tactic_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retail_boost_collection_campaign_id: Option<String>,
}

/// Paid-placement terms. Only ever merged onto sponsored-attributed products.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SponsoredFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_set_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_set_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_click: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_action: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_mille: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_stamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac_salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier_id: Option<String>,
}

impl SponsoredFields {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// A click on a product tile, as reported by the click-tracking collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickDescriptor {
    pub product_ref_id: String,
    #[serde(default)]
    pub click_id: Option<String>,
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_url: Option<String>,
    #[serde(default)]
    pub referral_url: Option<String>,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub context_type: Option<String>,
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub click_position: Option<u32>,
    #[serde(default)]
    pub slot: Option<String>,
    #[serde(flatten)]
    pub ids: AttributionIds,
    #[serde(flatten)]
    pub sponsored: SponsoredFields,
}

impl ClickDescriptor {
    pub fn new(product_ref_id: impl Into<String>) -> Self {
        Self {
            product_ref_id: product_ref_id.into(),
            ..Default::default()
        }
    }

    /// Only clicks inside a widget or an ad-set are worth attributing.
    pub fn has_commercial_context(&self) -> bool {
        non_empty(&self.ids.widget_id) || non_empty(&self.sponsored.ad_set_id)
    }

    pub fn channel(&self) -> Channel {
        if non_empty(&self.sponsored.ad_set_id) {
            Channel::Sponsored
        } else {
            Channel::Organic
        }
    }
}

/// One click's causal claim over a product, as persisted in durable storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttributionRecord {
    pub click_id: String,
    pub event_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    #[serde(flatten)]
    pub ids: AttributionIds,
    #[serde(flatten)]
    pub sponsored: SponsoredFields,
    pub is_sponsored: bool,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AttributionRecord {
    /// Build the stored form of a click. The channel is decided here, once,
    /// and frozen into `is_sponsored`.
    pub fn from_click(
        click: &ClickDescriptor,
        click_id: impl Into<String>,
        stored_at: DateTime<Utc>,
        window: Duration,
    ) -> Self {
        Self {
            click_id: click_id.into(),
            event_time: click.event_time.unwrap_or(stored_at),
            current_url: click.current_url.clone(),
            referral_url: click.referral_url.clone(),
            action_type: click.action_type.clone(),
            context_type: click.context_type.clone(),
            redirect_url: click.redirect_url.clone(),
            click_position: click.click_position,
            slot: click.slot.clone(),
            ids: click.ids.clone(),
            sponsored: click.sponsored.clone(),
            is_sponsored: click.channel() == Channel::Sponsored,
            stored_at,
            expires_at: stored_at
                .checked_add_signed(window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn channel(&self) -> Channel {
        if self.is_sponsored {
            Channel::Sponsored
        } else {
            Channel::Organic
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// A product line inside a commerce event request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub ref_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_quantity() -> u32 {
    1
}

impl Product {
    pub fn new(ref_id: impl Into<String>) -> Self {
        Self {
            ref_id: ref_id.into(),
            quantity: default_quantity(),
            price: None,
            currency: None,
            extra: HashMap::new(),
        }
    }

    pub fn with_price(mut self, price: f64, quantity: u32) -> Self {
        self.price = Some(price);
        self.quantity = quantity;
        self
    }
}

/// Wire names owned by attribution. Caller extras never carry these.
pub const ATTRIBUTION_FIELDS: &[&str] = &[
    "clickId",
    "isSponsored",
    "widgetId",
    "routeId",
    "recommenderId",
    "campaignId",
    "tacticId",
    "tacticLabel",
    "bannerId",
    "placementId",
    "retailBoostCollectionCampaignId",
    "adSetId",
    "adSetVersion",
    "costPerClick",
    "costPerAction",
    "costPerMille",
    "timeStamp",
    "hmacSalt",
    "hmac",
    "supplierId",
];

/// A product after attribution fields have been merged in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", from = "EnrichedProductRepr")]
pub struct EnrichedProduct {
    #[serde(flatten)]
    pub product: Product,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_id: Option<String>,
    #[serde(flatten)]
    pub ids: AttributionIds,
    #[serde(flatten)]
    pub sponsored: SponsoredFields,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnrichedProductRepr {
    #[serde(flatten)]
    product: Product,
    #[serde(default)]
    click_id: Option<String>,
    #[serde(flatten)]
    ids: AttributionIds,
    #[serde(flatten)]
    sponsored: SponsoredFields,
}

impl From<EnrichedProductRepr> for EnrichedProduct {
    fn from(repr: EnrichedProductRepr) -> Self {
        Self {
            click_id: repr.click_id,
            ids: repr.ids,
            sponsored: repr.sponsored,
            ..Self::from(repr.product)
        }
    }
}

impl From<Product> for EnrichedProduct {
    fn from(mut product: Product) -> Self {
        product
            .extra
            .retain(|key, _| !ATTRIBUTION_FIELDS.contains(&key.as_str()));
        Self {
            product,
            click_id: None,
            ids: AttributionIds::default(),
            sponsored: SponsoredFields::default(),
        }
    }
}

/// Outbound event types, one batch stream per type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageView,
    ProductView,
    ProductClick,
    Impression,
    Search,
    AddToCart,
    Checkout,
    Purchase,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PageView => "page_view",
            Self::ProductView => "product_view",
            Self::ProductClick => "product_click",
            Self::Impression => "impression",
            Self::Search => "search",
            Self::AddToCart => "add_to_cart",
            Self::Checkout => "checkout",
            Self::Purchase => "purchase",
        }
    }
}

/// Page the event happened on.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageContext {
    pub page_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// An event ready for the transport collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub products: Vec<EnrichedProduct>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<PageContext>,
    pub timestamp: DateTime<Utc>,
}

impl TrackingEvent {
    pub fn new(event_type: EventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            session_id: None,
            customer_id: None,
            click_id: None,
            products: Vec::new(),
            properties: HashMap::new(),
            context: None,
            timestamp,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sponsored_click() -> ClickDescriptor {
        let mut click = ClickDescriptor::new("SKU1");
        click.ids.widget_id = Some("W1".into());
        click.sponsored.ad_set_id = Some("AS1".into());
        click.sponsored.cost_per_click = Some(0.42);
        click
    }

    #[test]
    fn test_channel_derivation() {
        assert_eq!(sponsored_click().channel(), Channel::Sponsored);

        let mut organic = ClickDescriptor::new("SKU1");
        organic.ids.widget_id = Some("W1".into());
        assert_eq!(organic.channel(), Channel::Organic);
        assert!(organic.has_commercial_context());

        // Blank ad-set ids do not make a click sponsored.
        organic.sponsored.ad_set_id = Some("  ".into());
        assert_eq!(organic.channel(), Channel::Organic);
    }

    #[test]
    fn test_click_without_context() {
        let click = ClickDescriptor::new("SKU1");
        assert!(!click.has_commercial_context());
    }

    #[test]
    fn test_record_from_click() {
        let now = Utc::now();
        let record =
            AttributionRecord::from_click(&sponsored_click(), "C1", now, Duration::milliseconds(1000));
        assert!(record.is_sponsored);
        assert_eq!(record.channel(), Channel::Sponsored);
        assert_eq!(record.expires_at, now + Duration::milliseconds(1000));
        assert_eq!(record.event_time, now);
        assert!(record.is_live(now));
        assert!(!record.is_live(now + Duration::milliseconds(1000)));
    }

    #[test]
    fn test_record_json_is_camel_case() {
        let record = AttributionRecord::from_click(
            &sponsored_click(),
            "C1",
            Utc::now(),
            Duration::days(30),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["clickId"], "C1");
        assert_eq!(json["adSetId"], "AS1");
        assert_eq!(json["widgetId"], "W1");
        assert_eq!(json["isSponsored"], true);
        assert!(json.get("hmac").is_none());

        let parsed: AttributionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_channel_suffix() {
        assert_eq!(Channel::Sponsored.suffix(), "s");
        assert_eq!(Channel::Organic.suffix(), "o");
        assert_eq!(Channel::PRIORITY[0], Channel::Sponsored);
    }

    #[test]
    fn test_product_defaults() {
        let product: Product = serde_json::from_str(r#"{"refId":"SKU1","color":"red"}"#).unwrap();
        assert_eq!(product.quantity, 1);
        assert_eq!(product.extra["color"], "red");
    }

    #[test]
    fn test_extras_cannot_spoof_attribution_fields() {
        let product: Product = serde_json::from_str(
            r#"{"refId":"SKU1","color":"red","adSetId":"FAKE","costPerClick":9.9,"clickId":"X"}"#,
        )
        .unwrap();
        let enriched = EnrichedProduct::from(product);
        assert_eq!(enriched.product.extra.len(), 1);

        let json = serde_json::to_value(&enriched).unwrap();
        assert_eq!(json["color"], "red");
        for field in ["adSetId", "costPerClick", "clickId"] {
            assert!(json.get(field).is_none(), "{field} leaked from extras");
        }
    }

    #[test]
    fn test_enriched_product_json_keeps_fields_out_of_extras() {
        let json = r#"{"refId":"SKU1","color":"red","clickId":"C1","widgetId":"W1","adSetId":"AS1"}"#;
        let enriched: EnrichedProduct = serde_json::from_str(json).unwrap();
        assert_eq!(enriched.click_id.as_deref(), Some("C1"));
        assert_eq!(enriched.ids.widget_id.as_deref(), Some("W1"));
        assert_eq!(enriched.sponsored.ad_set_id.as_deref(), Some("AS1"));
        assert_eq!(enriched.product.extra.keys().collect::<Vec<_>>(), vec!["color"]);
    }
}
