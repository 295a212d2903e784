use chrono::{DateTime, Utc};
use sift_core::error::AppError;
use sift_core::models::{InsertOutcome, NewProduct, Product};
use sift_core::traits::ProductStore;
use sqlx::{PgPool, Pool, Postgres};

use crate::db_error;

/// Product persistence in PostgreSQL.
///
/// Inserts are idempotent on the natural key (`id_product_smi`): a second
/// insert for the same key writes nothing and reports
/// [`InsertOutcome::AlreadyExists`]. A collision on `id_product` under a
/// different key is [`AppError::UniqueViolation`].
#[derive(Clone)]
pub struct ProductRepository {
    pool: Pool<Postgres>,
}

impl ProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM products"#)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count)
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id_product: String,
    id_product_smi: String,
    offer_id: i64,
    url: String,
    product_name: String,
    color: Option<String>,
    category: Option<String>,
    subcategory: Option<String>,
    description: Option<String>,
    price: Option<String>,
    currency: Option<String>,
    availability: Option<bool>,
    keywords: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id_product: row.id_product,
            id_product_smi: row.id_product_smi,
            offer_id: row.offer_id,
            url: row.url,
            product_name: row.product_name,
            color: row.color,
            category: row.category,
            subcategory: row.subcategory,
            description: row.description,
            price: row.price,
            currency: row.currency,
            availability: row.availability,
            keywords: row.keywords,
            created_at: row.created_at,
        }
    }
}

impl ProductStore for ProductRepository {
    async fn insert_product(&self, product: &NewProduct) -> Result<InsertOutcome, AppError> {
        let inserted: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO products (
                id_product, id_product_smi, offer_id, url, product_name, color,
                category, subcategory, description, price, currency, availability, keywords
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id_product_smi) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&product.id_product)
        .bind(&product.id_product_smi)
        .bind(product.offer_id)
        .bind(&product.url)
        .bind(&product.product_name)
        .bind(&product.color)
        .bind(&product.category)
        .bind(&product.subcategory)
        .bind(&product.description)
        .bind(&product.price)
        .bind(&product.currency)
        .bind(product.availability)
        .bind(&product.keywords)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(match inserted {
            Some(_) => InsertOutcome::Inserted,
            None => InsertOutcome::AlreadyExists,
        })
    }

    async fn get_by_natural_key(&self, natural_key: &str) -> Result<Option<Product>, AppError> {
        let row = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT id_product, id_product_smi, offer_id, url, product_name, color, category,
                   subcategory, description, price, currency, availability, keywords, created_at
            FROM products
            WHERE id_product_smi = $1
            "#,
        )
        .bind(natural_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }
}
