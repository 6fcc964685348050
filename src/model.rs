//! Wire-format data model shared by the catalog and order managers.
//!
//! Records live in a realtime document tree and were historically written
//! by more than one client generation, so decoding is deliberately
//! tolerant: missing fields default, decimals may arrive as numbers or
//! numeric strings, and the storage keys (category bucket, record id,
//! user partition) always win over whatever the payload embeds.

use serde::{Deserialize, Serialize};

/// The fixed set of catalog categories. Each value is also the name of
/// the storage bucket the furniture record lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Chair,
    HomeDecor,
    Bed,
    Sofa,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Chair,
        Category::HomeDecor,
        Category::Bed,
        Category::Sofa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Chair => "Chair",
            Category::HomeDecor => "HomeDecor",
            Category::Bed => "Bed",
            Category::Sofa => "Sofa",
        }
    }

    /// Case-sensitive lookup of a bucket name. Returns `None` for
    /// anything outside the fixed set.
    pub fn parse(s: &str) -> Option<Category> {
        Category::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A furniture listing stored at `furniture/{category}/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Furniture {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Decimal-as-string, stored verbatim as entered (trimmed).
    #[serde(default, deserialize_with = "de::string_or_number")]
    pub price: String,
    #[serde(default)]
    pub description: String,
    /// Download URLs of the uploaded product photos, in upload order.
    #[serde(default)]
    pub images: Vec<String>,
    /// Download URL of the single 3D model asset.
    #[serde(default)]
    pub glb_model_url: String,
    pub category: Category,
}

/// Customer identity embedded in an order. `uid` doubles as the storage
/// partition key, which is the authoritative copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCustomer {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
}

/// One line item of an order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "de::f64_or_numeric_string")]
    pub price: f64,
    #[serde(default)]
    pub quantity: u32,
}

/// A customer order, stored at `Order_details/{uid}/{orderId}` while
/// pending and moved to `Completed_Order/{uid}/{orderId}` on accept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    #[serde(default)]
    pub order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub user: OrderCustomer,
    #[serde(default)]
    pub products: Vec<OrderLine>,
    /// Precomputed by the ordering client; not validated here. A record
    /// whose total cannot be decoded at all is dropped by the listing
    /// code rather than poisoning the aggregation.
    #[serde(default, deserialize_with = "de::f64_or_numeric_string")]
    pub total_price: f64,
}

mod de {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// Decimal-as-string field that an older writer may have stored as a
    /// bare JSON number. Numbers keep their literal text form.
    pub fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Null => Ok(String::new()),
            other => Err(serde::de::Error::custom(format!(
                "expected string or number, got {other}"
            ))),
        }
    }

    /// Decimal field that may arrive as a JSON number or a numeric
    /// string. Absent and null both decode to 0.0.
    pub fn f64_or_numeric_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| serde::de::Error::custom("number out of f64 range")),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| serde::de::Error::custom(format!("not a decimal: '{s}'"))),
            Value::Null => Ok(0.0),
            other => Err(serde::de::Error::custom(format!(
                "expected number or numeric string, got {other}"
            ))),
        }
    }
}
