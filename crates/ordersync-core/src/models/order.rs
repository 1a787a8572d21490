//! Order model

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An order row as persisted in the `orders` table.
///
/// Timestamps are Unix seconds. `raw_data` is the verbatim upstream record;
/// only the fields below are ever extracted from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Stable upstream identifier, kept as text to avoid numeric overflow
    pub order_id: String,
    pub order_status: Option<String>,
    pub sku_id: Option<String>,
    /// Product name snapshot at purchase time
    pub sku_name: Option<String>,
    pub pay_amount: Option<f64>,
    pub count: i64,
    pub pay_time: Option<i64>,
    pub create_time: Option<i64>,
    pub update_time: Option<i64>,
    /// Set only when this order derives from another (refund, reschedule)
    pub source_order_id: Option<String>,
    /// Decrypted contact phone
    pub phone: Option<String>,
    pub raw_data: Value,
    pub sync_time: i64,
}

impl Order {
    /// Normalize a raw upstream record.
    ///
    /// Returns `None` when the record carries no usable `order_id`. The
    /// contact field is left empty; decryption happens in the pipeline.
    #[must_use]
    pub fn from_raw(raw: Value, sync_time: i64) -> Option<Self> {
        let order_id = text_field(&raw, "order_id")?;

        let sku_id = text_field(&raw, "sku_id").or_else(|| {
            raw.get("products")
                .and_then(Value::as_array)
                .and_then(|products| products.first())
                .and_then(|product| text_field(product, "sku_id"))
        });

        Some(Self {
            order_id,
            order_status: text_field(&raw, "order_status"),
            sku_id,
            sku_name: text_field(&raw, "sku_name"),
            pay_amount: number_field(&raw, "pay_amount"),
            count: integer_field(&raw, "count").unwrap_or(1),
            pay_time: nonzero_integer_field(&raw, "pay_time"),
            create_time: nonzero_integer_field(&raw, "create_order_time"),
            update_time: nonzero_integer_field(&raw, "update_order_time"),
            source_order_id: raw
                .get("source_order_id")
                .and_then(value_as_text),
            phone: None,
            raw_data: raw,
            sync_time,
        })
    }

    /// Encrypted contact phone carried by the raw record, if any.
    #[must_use]
    pub fn encrypted_phone(&self) -> Option<&str> {
        encrypted_phone(&self.raw_data)
    }

    /// Whether downstream reports would count this as an original, paid order.
    ///
    /// `source_order_id` may change between fetches, so this answer is not
    /// stable for a given identifier.
    #[must_use]
    pub fn is_original_paid(&self) -> bool {
        self.source_order_id
            .as_deref()
            .is_none_or(|value| value.trim().is_empty())
            && self.pay_time.is_some()
    }
}

/// Locate `contacts[0].phone_encrypt` in a raw record.
pub fn encrypted_phone(raw: &Value) -> Option<&str> {
    raw.get("contacts")
        .and_then(Value::as_array)
        .and_then(|contacts| contacts.first())
        .and_then(|contact| contact.get("phone_encrypt"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Render a scalar as text; integers are never routed through `f64`.
fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn text_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(value_as_text)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

fn number_field(raw: &Value, key: &str) -> Option<f64> {
    match raw.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Integer field where `0`, empty and missing all mean "not set".
fn integer_field(raw: &Value, key: &str) -> Option<i64> {
    match raw.get(key)? {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Timestamps use `0` for "not set".
fn nonzero_integer_field(raw: &Value, key: &str) -> Option<i64> {
    integer_field(raw, key).filter(|value| *value != 0)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn from_raw_extracts_core_fields() {
        let raw = json!({
            "order_id": "1090000000000000001",
            "order_status": 3,
            "sku_name": "Dinner for two",
            "pay_amount": 19900,
            "count": 2,
            "pay_time": 1_700_000_100,
            "create_order_time": 1_700_000_000,
            "update_order_time": 1_700_000_200,
            "products": [{"sku_id": "sku-9"}],
            "contacts": [{"phone_encrypt": "abc"}]
        });

        let order = Order::from_raw(raw.clone(), 42).unwrap();
        assert_eq!(order.order_id, "1090000000000000001");
        assert_eq!(order.order_status.as_deref(), Some("3"));
        assert_eq!(order.sku_id.as_deref(), Some("sku-9"));
        assert_eq!(order.pay_amount, Some(19_900.0));
        assert_eq!(order.count, 2);
        assert_eq!(order.pay_time, Some(1_700_000_100));
        assert_eq!(order.create_time, Some(1_700_000_000));
        assert_eq!(order.update_time, Some(1_700_000_200));
        assert_eq!(order.source_order_id, None);
        assert_eq!(order.encrypted_phone(), Some("abc"));
        assert_eq!(order.raw_data, raw);
        assert_eq!(order.sync_time, 42);
        assert!(order.is_original_paid());
    }

    #[test]
    fn numeric_order_id_keeps_full_precision() {
        let raw = json!({ "order_id": 18_446_744_073_709_551_615_u64 });
        let order = Order::from_raw(raw, 0).unwrap();
        assert_eq!(order.order_id, "18446744073709551615");
    }

    #[test]
    fn root_sku_id_wins_over_products() {
        let raw = json!({
            "order_id": "1",
            "sku_id": "root",
            "products": [{"sku_id": "nested"}]
        });
        assert_eq!(
            Order::from_raw(raw, 0).unwrap().sku_id.as_deref(),
            Some("root")
        );
    }

    #[test]
    fn missing_order_id_is_rejected() {
        assert!(Order::from_raw(json!({ "order_status": 1 }), 0).is_none());
        assert!(Order::from_raw(json!({ "order_id": "  " }), 0).is_none());
    }

    #[test]
    fn zero_timestamps_and_count_default() {
        let order = Order::from_raw(json!({ "order_id": "1", "pay_time": 0 }), 0).unwrap();
        assert_eq!(order.pay_time, None);
        assert_eq!(order.count, 1);
        assert!(!order.is_original_paid());
    }

    #[test]
    fn explicit_zero_count_is_kept() {
        let order = Order::from_raw(json!({ "order_id": "1", "count": 0 }), 0).unwrap();
        assert_eq!(order.count, 0);

        let order = Order::from_raw(json!({ "order_id": "1", "count": "3" }), 0).unwrap();
        assert_eq!(order.count, 3);
    }

    #[test]
    fn derivative_order_is_not_original() {
        let order = Order::from_raw(
            json!({ "order_id": "2", "pay_time": 5, "source_order_id": "1" }),
            0,
        )
        .unwrap();
        assert!(!order.is_original_paid());

        let order = Order::from_raw(
            json!({ "order_id": "3", "pay_time": 5, "source_order_id": "" }),
            0,
        )
        .unwrap();
        assert!(order.is_original_paid());
    }
}
