//! Normalization and schema validation of extracted product fields.

use serde_json::{Map, Value, json};

use crate::error::AppError;
use crate::models::{NewProduct, WorkItem};

/// Placeholder values the extraction service emits for "unknown".
pub const SENTINEL_VALUES: &[&str] = &["nan", "None", "", "string", "null"];

pub const NOT_AN_OBJECT: &str = "extracted data is not a JSON object";
pub const BAD_ID_PRODUCT: &str = "id_product: missing or not a string or number";

/// JSON Schema every product must satisfy after normalization.
pub fn product_schema() -> Value {
    let optional_string = json!({ "type": ["string", "null"] });
    json!({
        "type": "object",
        "required": ["id_product", "product_name", "url", "id_product_smi", "offer_id"],
        "properties": {
            "id_product": { "type": ["string", "number"] },
            "product_name": { "type": "string" },
            "available_color": optional_string,
            "category": optional_string,
            "subcategory": optional_string,
            "description": optional_string,
            "price": { "type": ["string", "number", "null"] },
            "url": { "type": "string" },
            "id_product_smi": { "type": "string" },
            "offer_id": { "type": "integer", "exclusiveMinimum": 0 },
            "keys": optional_string,
            "currency": optional_string,
            "availability": { "type": ["boolean", "null"] }
        },
        "additionalProperties": { "type": ["string", "boolean", "null"] }
    })
}

/// Turns raw extraction output into a [`NewProduct`].
pub struct ProductValidator {
    schema: jsonschema::Validator,
    fields: Vec<(String, jsonschema::Validator)>,
    native_offer: Option<i64>,
}

impl ProductValidator {
    pub fn new(native_offer: Option<i64>) -> Result<Self, AppError> {
        let schema = product_schema();
        let compiled = jsonschema::validator_for(&schema)
            .map_err(|e| AppError::ConfigError(format!("Invalid product schema: {e}")))?;

        let mut fields = Vec::new();
        if let Some(properties) = schema["properties"].as_object() {
            for (name, subschema) in properties {
                let validator = jsonschema::validator_for(subschema).map_err(|e| {
                    AppError::ConfigError(format!("Invalid schema for field {name}: {e}"))
                })?;
                fields.push((name.clone(), validator));
            }
        }

        Ok(Self {
            schema: compiled,
            fields,
            native_offer,
        })
    }

    /// Offer whose pages are parsed directly and whose availability is
    /// stored as delivered.
    pub fn native_offer(&self) -> Option<i64> {
        self.native_offer
    }

    /// Merge the work item's identity into `extracted`, normalize, validate.
    ///
    /// The returned error message is what the failure ledger stores.
    pub fn validate(&self, extracted: &Value, item: &WorkItem) -> Result<NewProduct, AppError> {
        let Some(raw) = extracted.as_object() else {
            return Err(AppError::ValidationError(NOT_AN_OBJECT.into()));
        };

        let mut doc = raw.clone();
        doc.insert("url".into(), Value::String(item.url.clone()));
        doc.insert("id_product_smi".into(), Value::String(item.natural_key.clone()));
        doc.insert("offer_id".into(), Value::from(item.offer_id));

        normalize_sentinels(&mut doc);
        if self.native_offer != Some(item.offer_id) {
            coerce_availability(&mut doc);
        }

        if !matches!(doc.get("id_product"), Some(Value::String(_) | Value::Number(_))) {
            return Err(AppError::ValidationError(BAD_ID_PRODUCT.into()));
        }

        let doc = Value::Object(doc);
        if let Err(e) = self.schema.validate(&doc) {
            let message = match self.failing_field(&doc) {
                Some(field) => format!("{field}: {e}"),
                None => e.to_string(),
            };
            return Err(AppError::ValidationError(message));
        }

        Ok(NewProduct {
            id_product: scalar_string(&doc["id_product"]).unwrap_or_default(),
            id_product_smi: item.natural_key.clone(),
            offer_id: item.offer_id,
            url: item.url.clone(),
            product_name: text(&doc, "product_name").unwrap_or_default(),
            color: text(&doc, "available_color"),
            category: text(&doc, "category"),
            subcategory: text(&doc, "subcategory"),
            description: text(&doc, "description"),
            price: doc.get("price").and_then(scalar_string),
            currency: text(&doc, "currency"),
            availability: doc.get("availability").and_then(Value::as_bool),
            keywords: text(&doc, "keys"),
        })
    }

    /// First declared field whose value violates its own subschema.
    fn failing_field(&self, doc: &Value) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, validator)| doc.get(name).is_some_and(|v| !validator.is_valid(v)))
            .map(|(name, _)| name.as_str())
    }
}

fn normalize_sentinels(doc: &mut Map<String, Value>) {
    for value in doc.values_mut() {
        if let Value::String(s) = value {
            if SENTINEL_VALUES.contains(&s.as_str()) {
                *value = Value::Null;
            }
        }
    }
}

fn coerce_availability(doc: &mut Map<String, Value>) {
    if let Some(value) = doc.get_mut("availability") {
        match value.as_str() {
            Some("true") => *value = Value::Bool(true),
            Some("false") => *value = Value::Bool(false),
            _ => {}
        }
    }
}

fn text(doc: &Value, field: &str) -> Option<String> {
    doc.get(field).and_then(Value::as_str).map(String::from)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
