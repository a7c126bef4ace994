//! Represents a single purchase recorded in the collection.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Slot under which the local store keeps its serialized item array.
pub const LOCAL_ITEMS_SLOT: &str = "luxury_items";

/// Kind of luxury good. Unknown strings read from storage fall back to `Other`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Category {
    Watch,
    Bag,
    Jewelry,
    Clothing,
    Shoes,
    Accessories,
    Other,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Watch,
        Category::Bag,
        Category::Jewelry,
        Category::Clothing,
        Category::Shoes,
        Category::Accessories,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Watch => "watch",
            Category::Bag => "bag",
            Category::Jewelry => "jewelry",
            Category::Clothing => "clothing",
            Category::Shoes => "shoes",
            Category::Accessories => "accessories",
            Category::Other => "other",
        }
    }

    /// Parse a category string, accepting the labels older local data was
    /// written with.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "watch" | "手表" => Category::Watch,
            "bag" | "包袋" => Category::Bag,
            "jewelry" | "珠宝" => Category::Jewelry,
            "clothing" | "服装" => Category::Clothing,
            "shoes" | "鞋履" => Category::Shoes,
            "accessories" | "配饰" => Category::Accessories,
            _ => Category::Other,
        }
    }
}

impl From<String> for Category {
    fn from(value: String) -> Self {
        Category::parse(&value)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A purchase in the user's collection.
///
/// The `id` is assigned once at creation and never changes; stores match
/// records by it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CollectionItem {
    pub id: Uuid,
    pub name: String,
    pub brand: String,
    pub category: Category,
    pub price: Decimal,
    pub purchase_date: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
    /// Public URL or storage-relative path of the item photo.
    #[serde(default)]
    pub image_reference: Option<String>,
}

impl CollectionItem {
    /// Build a new item with a freshly generated identifier and no image.
    pub fn new(
        name: impl Into<String>,
        brand: impl Into<String>,
        category: Category,
        price: Decimal,
        purchase_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            brand: brand.into(),
            category,
            price,
            purchase_date,
            description: None,
            image_reference: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check field rules before the item reaches a store.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        if self.brand.trim().is_empty() {
            return Err("brand must not be empty".into());
        }
        if self.price.is_sign_negative() && !self.price.is_zero() {
            return Err(format!("price must not be negative (got {})", self.price));
        }
        Ok(())
    }

    pub fn to_record(&self, owner_id: Uuid) -> ItemRecord {
        ItemRecord {
            id: self.id,
            owner_id,
            name: self.name.clone(),
            brand: self.brand.clone(),
            category: self.category,
            price: self.price,
            purchase_date: self.purchase_date,
            description: self.description.clone(),
            image_url: self.image_reference.clone(),
        }
    }
}

/// Row shape of the remote `luxury_items` table.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ItemRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub brand: String,
    pub category: Category,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub purchase_date: DateTime<Utc>,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

impl From<ItemRecord> for CollectionItem {
    fn from(record: ItemRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            brand: record.brand,
            category: record.category,
            price: record.price,
            purchase_date: record.purchase_date,
            description: record.description,
            image_reference: record.image_url,
        }
    }
}

/// Sort items newest purchase first. Ties keep their incoming order.
pub fn sort_newest_first(items: &mut [CollectionItem]) {
    items.sort_by(|a, b| b.purchase_date.cmp(&a.purchase_date));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample() -> CollectionItem {
        CollectionItem::new(
            "Birkin 30",
            "Hermès",
            Category::Bag,
            Decimal::new(5_000_000, 2),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn unknown_category_falls_back_to_other() {
        let parsed: Category = serde_json::from_value(json!("yacht")).unwrap();
        assert_eq!(parsed, Category::Other);
        let parsed: Category = serde_json::from_value(json!("WATCH")).unwrap();
        assert_eq!(parsed, Category::Watch);
        let parsed: Category = serde_json::from_value(json!("包袋")).unwrap();
        assert_eq!(parsed, Category::Bag);
    }

    #[test]
    fn category_serializes_lowercase() {
        for category in Category::ALL {
            let value = serde_json::to_value(category).unwrap();
            assert_eq!(value, json!(category.as_str()));
        }
    }

    #[test]
    fn validate_rejects_negative_price_and_blank_fields() {
        let mut item = sample();
        assert!(item.validate().is_ok());

        item.price = Decimal::new(-1, 0);
        assert!(item.validate().is_err());

        let mut item = sample();
        item.name = "   ".into();
        assert!(item.validate().is_err());

        let mut item = sample();
        item.price = Decimal::ZERO;
        assert!(item.validate().is_ok());
    }

    #[test]
    fn record_uses_backend_field_names() {
        let owner = Uuid::new_v4();
        let mut item = sample();
        item.image_reference = Some("https://cdn.example/bag.jpg".into());
        let value = serde_json::to_value(item.to_record(owner)).unwrap();

        assert_eq!(value["owner_id"], json!(owner.to_string()));
        assert_eq!(value["category"], json!("bag"));
        assert_eq!(value["price"], json!(50000.0));
        assert_eq!(value["image_url"], json!("https://cdn.example/bag.jpg"));
        assert_eq!(value["description"], json!(null));
    }

    #[test]
    fn record_with_unknown_category_decodes_as_other() {
        let row = json!({
            "id": Uuid::new_v4(),
            "owner_id": Uuid::new_v4(),
            "name": "Pen",
            "brand": "Montblanc",
            "category": "stationery",
            "price": 820.5,
            "purchase_date": "2024-03-05T10:00:00+00:00",
            "description": null,
            "image_url": null
        });
        let item: CollectionItem = serde_json::from_value::<ItemRecord>(row).unwrap().into();
        assert_eq!(item.category, Category::Other);
        assert_eq!(item.price, Decimal::new(8205, 1));
    }

    #[test]
    fn sorting_is_newest_first() {
        let mut old = sample();
        old.purchase_date = Utc.with_ymd_and_hms(2020, 5, 1, 0, 0, 0).unwrap();
        let mut new = sample();
        new.purchase_date = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let mut items = vec![old.clone(), new.clone()];
        sort_newest_first(&mut items);
        assert_eq!(items, vec![new, old]);
    }
}
