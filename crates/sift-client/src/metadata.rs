//! Direct product parsing for storefronts that publish Open Graph product
//! metadata, a breadcrumb trail and an attribute table.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use sift_core::error::AppError;
use sift_core::traits::PageParser;

/// Label of the attribute-table row holding the colour.
pub const COLOR_LABEL: &str = "Couleur";
/// Breadcrumb entry pointing at the site root.
pub const HOME_CRUMB: &str = "Accueil";
const IN_STOCK: &str = "in stock";

macro_rules! selector {
    ($name:ident, $css:expr) => {
        static $name: LazyLock<Selector> = LazyLock::new(|| Selector::parse($css).unwrap());
    };
}

selector!(ROWS, "tr");
selector!(ROW_LABEL, "th.col.label");
selector!(ROW_DATA, "td.col.data");
selector!(CRUMBS, "div.breadcrumbs-wrapper .breadcrumbs .items .item");
selector!(PRICE, "div.price-box.price-final_price .price-container .price-wrapper .price");
selector!(META_ID, r#"meta[property="product:retailer_item_id"]"#);
selector!(META_PRICE, r#"meta[property="product:price:amount"]"#);
selector!(META_CURRENCY, r#"meta[property="product:price:currency"]"#);
selector!(META_AVAILABILITY, r#"meta[property="product:availability"]"#);
selector!(META_TITLE, r#"meta[property="og:title"]"#);
selector!(META_DESCRIPTION, r#"meta[property="og:description"]"#);

static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Reads product fields from a full page document without calling the
/// extraction service. Missing fields come back as `null` and are left to
/// the validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetaTagParser;

impl MetaTagParser {
    pub fn new() -> Self {
        Self
    }
}

fn text_of(element: ElementRef<'_>) -> String {
    WHITESPACE
        .replace_all(&element.text().collect::<String>(), " ")
        .trim()
        .to_string()
}

fn meta(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .and_then(|e| e.value().attr("content"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// `"59,90 €"` → `"59.9"`.
fn parse_price(raw: &str) -> Option<String> {
    let normalized = raw.replace(',', ".");
    let number: f64 = NUMBER.find(&normalized)?.as_str().parse().ok()?;
    Some(number.to_string())
}

fn color(document: &Html) -> Option<String> {
    document
        .select(&ROWS)
        .find(|row| {
            row.select(&ROW_LABEL)
                .any(|label| text_of(label).contains(COLOR_LABEL))
        })
        .and_then(|row| row.select(&ROW_DATA).next())
        .map(text_of)
        .filter(|s| !s.is_empty())
}

fn breadcrumbs(document: &Html) -> Vec<String> {
    document
        .select(&CRUMBS)
        .map(text_of)
        .filter(|crumb| !crumb.is_empty() && crumb != HOME_CRUMB)
        .collect()
}

fn price(document: &Html) -> Option<String> {
    document
        .select(&PRICE)
        .next()
        .map(text_of)
        .filter(|s| !s.is_empty())
        .and_then(|text| parse_price(&text))
        .or_else(|| meta(document, &META_PRICE).and_then(|raw| parse_price(&raw)))
}

fn opt(value: Option<String>) -> Value {
    value.map_or(Value::Null, Value::String)
}

impl PageParser for MetaTagParser {
    fn parse(&self, html: &str) -> Result<Value, AppError> {
        let document = Html::parse_document(html);
        let crumbs = breadcrumbs(&document);

        let mut fields = Map::new();
        fields.insert("id_product".into(), opt(meta(&document, &META_ID)));
        fields.insert("product_name".into(), opt(meta(&document, &META_TITLE)));
        fields.insert("price".into(), opt(price(&document)));
        fields.insert("currency".into(), opt(meta(&document, &META_CURRENCY)));
        fields.insert(
            "availability".into(),
            meta(&document, &META_AVAILABILITY)
                .map_or(Value::Null, |a| Value::Bool(a.eq_ignore_ascii_case(IN_STOCK))),
        );
        fields.insert(
            "description".into(),
            opt(meta(&document, &META_DESCRIPTION).map(|d| WHITESPACE.replace_all(&d, " ").into_owned())),
        );
        fields.insert("available_color".into(), opt(color(&document)));
        fields.insert(
            "keys".into(),
            opt((!crumbs.is_empty()).then(|| crumbs.join("/"))),
        );
        fields.insert("category".into(), opt(crumbs.first().cloned()));
        fields.insert("subcategory".into(), opt(crumbs.last().cloned()));

        if fields.values().all(Value::is_null) {
            return Err(AppError::ValidationError(
                "page carries no product metadata".into(),
            ));
        }
        Ok(Value::Object(fields))
    }
}
