//! Tracked items and normalization of raw item records.
//!
//! Records coming out of an archive or a CSV file are loosely typed: numbers may be strings,
//! fields may be missing, ids may be absent. [`normalize_record`] turns any such record into a
//! canonical [`Item`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Owned possession or wishlist entry
#[derive(
    Debug,
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ItemType {
    #[default]
    Owned,
    Wishlist,
}

/// One point of a wishlist price trend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: String,
    pub price: f64,
}

/// One tracked possession or wishlist entry.
///
/// `quantity` is always at least 1. `avg_price` is `price / quantity` rounded to cents,
/// recomputed by [`Item::set_price`] and [`Item::set_quantity`].
/// Fields this crate doesn't know about are kept in `extra` and survive backup and merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub msrp: f64,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub avg_price: f64,
    #[serde(default)]
    pub purchase_date: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub store_name: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub link: String,
    /// Image as a `data:` URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub usage_count: u32,
    #[serde(default)]
    pub price_history: Vec<PricePoint>,
    /// Show the per-unit price instead of the total in list views.
    #[serde(default)]
    pub show_avg_price: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_rate: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub const DEFAULT_STATUS: &str = "new";
pub const DEFAULT_CATEGORY: &str = "other";

fn default_quantity() -> u32 {
    1
}

fn default_status() -> String {
    DEFAULT_STATUS.to_string()
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

impl Item {
    /// Creates an owned item with quantity 1.
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: f64) -> Self {
        Self {
            id: id.into(),
            item_type: ItemType::Owned,
            name: name.into(),
            price,
            msrp: 0.0,
            quantity: 1,
            avg_price: average_price(price, 1),
            purchase_date: String::new(),
            status: default_status(),
            category: default_category(),
            channel: String::new(),
            store_name: String::new(),
            note: String::new(),
            link: String::new(),
            image: None,
            usage_count: 0,
            price_history: Vec::new(),
            show_avg_price: false,
            currency: None,
            discount_rate: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn wishlist(mut self) -> Self {
        self.item_type = ItemType::Wishlist;
        self
    }

    #[must_use]
    pub fn purchased_on(mut self, date: impl Into<String>) -> Self {
        self.purchase_date = date.into();
        self
    }

    #[must_use]
    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.set_quantity(quantity);
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    #[must_use]
    pub fn with_image(mut self, data_url: impl Into<String>) -> Self {
        self.image = Some(data_url.into());
        self
    }

    pub fn set_price(&mut self, price: f64) {
        self.price = price;
        self.avg_price = average_price(self.price, self.quantity);
    }

    /// Sets the quantity (clamped to at least 1) and recomputes the average price.
    pub fn set_quantity(&mut self, quantity: u32) {
        self.quantity = quantity.max(1);
        self.avg_price = average_price(self.price, self.quantity);
    }

    /// Key identifying "the same purchase" recorded on different devices.
    pub fn signature(&self) -> String {
        [
            self.item_type.to_string(),
            self.name.clone(),
            format_number(self.price),
            self.purchase_date.clone(),
            self.channel.clone(),
            self.category.clone(),
            self.status.clone(),
        ]
        .join("|")
    }
}

/// `price / quantity`, rounded to 2 decimals.
pub fn average_price(price: f64, quantity: u32) -> f64 {
    round_cents(price / f64::from(quantity.max(1)))
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Render a number without a trailing `.0` for whole values.
pub(crate) fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

/// Generates a fresh item id.
pub fn generate_item_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Convert a raw record (from an archive or CSV import) into a canonical [`Item`].
///
/// - numeric fields accept numbers or numeric strings; anything else becomes 0
/// - `quantity` defaults to 1 and is clamped to at least 1
/// - `avgPrice` is kept if the record supplies a number, otherwise recomputed
/// - missing `id` gets a generated one, missing `category`/`status` get defaults
/// - unknown fields are carried in `extra`
pub fn normalize_record(raw: Value) -> Item {
    let Value::Object(mut map) = raw else {
        return Item::new(generate_item_id(), "", 0.0);
    };

    let id = take_string(&mut map, "id")
        .filter(|id| !id.is_empty())
        .unwrap_or_else(generate_item_id);
    let item_type = match take_string(&mut map, "type").as_deref() {
        Some("wishlist") => ItemType::Wishlist,
        _ => ItemType::Owned,
    };
    let name = take_string(&mut map, "name").unwrap_or_default();
    let price = take_number(&mut map, "price").unwrap_or(0.0);
    let msrp = take_number(&mut map, "msrp").unwrap_or(0.0);
    let quantity = take_number(&mut map, "quantity")
        .filter(|q| q.is_finite() && *q >= 1.0)
        .map_or(1, |q| q.round().min(f64::from(u32::MAX)) as u32);
    let avg_price = match map.remove("avgPrice") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or_else(|| average_price(price, quantity)),
        _ => average_price(price, quantity),
    };
    let usage_count = take_number(&mut map, "usageCount")
        .filter(|n| n.is_finite() && *n > 0.0)
        .map_or(0, |n| n.round().min(f64::from(u32::MAX)) as u32);
    let price_history = match map.remove("priceHistory") {
        Some(Value::Array(points)) => points
            .into_iter()
            .filter_map(|p| serde_json::from_value::<PricePoint>(p).ok())
            .collect(),
        _ => Vec::new(),
    };
    let image = take_string(&mut map, "image").filter(|img| !img.is_empty());
    let show_avg_price = matches!(map.remove("showAvgPrice"), Some(Value::Bool(true)));
    let currency = take_string(&mut map, "currency").filter(|c| !c.is_empty());
    let discount_rate = take_number(&mut map, "discountRate");

    Item {
        id,
        item_type,
        name,
        price,
        msrp,
        quantity,
        avg_price,
        purchase_date: take_string(&mut map, "purchaseDate").unwrap_or_default(),
        status: take_string(&mut map, "status")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(default_status),
        category: take_string(&mut map, "category")
            .filter(|c| !c.is_empty())
            .unwrap_or_else(default_category),
        channel: take_string(&mut map, "channel").unwrap_or_default(),
        store_name: take_string(&mut map, "storeName").unwrap_or_default(),
        note: take_string(&mut map, "note").unwrap_or_default(),
        link: take_string(&mut map, "link").unwrap_or_default(),
        image,
        usage_count,
        price_history,
        show_avg_price,
        currency,
        discount_rate,
        extra: map,
    }
}

/// Normalize a batch of raw records.
pub fn normalize_records(records: Vec<Value>) -> Vec<Item> {
    records.into_iter().map(normalize_record).collect()
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn take_number(map: &mut Map<String, Value>, key: &str) -> Option<f64> {
    match map.remove(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_leading_float(&s),
        _ => None,
    }
}

/// Parses the longest numeric prefix of `s`, so "12.5 USD" reads as 12.5.
pub(crate) fn parse_leading_float(s: &str) -> Option<f64> {
    let s = s.trim();
    let end = s
        .char_indices()
        .take_while(|(idx, ch)| {
            ch.is_ascii_digit() || *ch == '.' || ((*ch == '-' || *ch == '+') && *idx == 0)
        })
        .map(|(idx, ch)| idx + ch.len_utf8())
        .last()?;
    let mut candidate = &s[..end];
    while !candidate.is_empty() {
        if let Ok(value) = candidate.parse::<f64>() {
            return Some(value);
        }
        candidate = &candidate[..candidate.len() - 1];
    }
    None
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn quantity_change_recomputes_average() {
        let mut item = Item::new("a", "Pens", 10.0).with_quantity(3);
        assert_eq!(item.avg_price, 3.33);
        item.set_price(12.0);
        assert_eq!(item.avg_price, 4.0);
        item.set_quantity(0);
        assert_eq!(item.quantity, 1);
        assert_eq!(item.avg_price, 12.0);
    }

    #[test]
    fn normalize_coerces_strings_and_defaults() {
        let item = normalize_record(json!({
            "id": "x1",
            "type": "wishlist",
            "name": "Lamp",
            "price": "19.90",
            "quantity": "2",
            "category": "",
            "usageCount": "3"
        }));
        assert_eq!(item.id, "x1");
        assert_eq!(item.item_type, ItemType::Wishlist);
        assert_eq!(item.price, 19.9);
        assert_eq!(item.quantity, 2);
        assert_eq!(item.avg_price, 9.95);
        assert_eq!(item.category, "other");
        assert_eq!(item.status, "new");
        assert_eq!(item.usage_count, 3);
        assert!(item.price_history.is_empty());
    }

    #[test]
    fn normalize_clamps_quantity_and_generates_id() {
        let item = normalize_record(json!({"name": "Cup", "price": 8, "quantity": 0}));
        assert!(!item.id.is_empty());
        assert_eq!(item.quantity, 1);
        assert_eq!(item.avg_price, 8.0);
        assert_eq!(item.item_type, ItemType::Owned);
    }

    #[test]
    fn normalize_keeps_supplied_average_price() {
        let item = normalize_record(json!({
            "id": "a", "name": "Set", "price": 30, "quantity": 3, "avgPrice": 9.5
        }));
        assert_eq!(item.avg_price, 9.5);
    }

    #[test]
    fn normalize_preserves_unknown_fields() {
        let item = normalize_record(json!({"id": "a", "name": "Tent", "price": 1, "tags": ["x"]}));
        assert_eq!(item.extra.get("tags"), Some(&json!(["x"])));
        let round = serde_json::to_value(&item).unwrap();
        assert_eq!(round["tags"], json!(["x"]));
        assert_eq!(round["type"], json!("owned"));
        assert_eq!(round["purchaseDate"], json!(""));
    }

    #[test]
    fn signature_ignores_id_and_notes() {
        let left = Item::new("a", "Phone", 699.0)
            .purchased_on("2026-01-01")
            .with_channel("online");
        let mut right = left.clone();
        right.id = "b".to_string();
        right.note = "gift".to_string();
        assert_eq!(left.signature(), right.signature());
        right.price = 699.5;
        assert_ne!(left.signature(), right.signature());
    }

    #[test]
    fn leading_float_parse() {
        assert_eq!(parse_leading_float("12.5 USD"), Some(12.5));
        assert_eq!(parse_leading_float("-3"), Some(-3.0));
        assert_eq!(parse_leading_float("abc"), None);
        assert_eq!(parse_leading_float(""), None);
    }
}
