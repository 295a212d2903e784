use sift_core::error::AppError;
use sift_core::models::{InsertOutcome, NewProduct};
use sift_core::traits::ProductStore;

use crate::integration::common::setup_test_db;

fn product(id_product: &str, key: &str) -> NewProduct {
    NewProduct {
        id_product: id_product.into(),
        id_product_smi: key.into(),
        offer_id: 42,
        url: format!("https://shop.example/fr/produit/{key}"),
        product_name: "Robe longue".into(),
        color: Some("Bleu".into()),
        category: Some("Robes".into()),
        subcategory: None,
        description: None,
        price: Some("59.9".into()),
        currency: Some("EUR".into()),
        availability: Some(true),
        keywords: Some("robe/longue".into()),
    }
}

#[tokio::test]
async fn insert_and_fetch_by_natural_key() {
    let (db, _container) = setup_test_db().await;
    let repo = db.product_repo();

    let outcome = repo.insert_product(&product("981", "k1")).await.unwrap();
    assert_eq!(outcome, InsertOutcome::Inserted);

    let stored = repo
        .get_by_natural_key("k1")
        .await
        .unwrap()
        .expect("Should find the product");
    assert_eq!(stored.id_product, "981");
    assert_eq!(stored.color.as_deref(), Some("Bleu"));
    assert_eq!(stored.availability, Some(true));
    assert!(repo.get_by_natural_key("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn second_insert_for_same_key_is_a_no_op() {
    let (db, _container) = setup_test_db().await;
    let repo = db.product_repo();

    repo.insert_product(&product("981", "k1")).await.unwrap();
    let outcome = repo.insert_product(&product("982", "k1")).await.unwrap();

    assert_eq!(outcome, InsertOutcome::AlreadyExists);
    assert_eq!(repo.count().await.unwrap(), 1);
    let stored = repo.get_by_natural_key("k1").await.unwrap().unwrap();
    assert_eq!(stored.id_product, "981");
}

#[tokio::test]
async fn id_product_collision_is_a_unique_violation() {
    let (db, _container) = setup_test_db().await;
    let repo = db.product_repo();

    repo.insert_product(&product("981", "k1")).await.unwrap();
    let err = repo.insert_product(&product("981", "k2")).await.unwrap_err();

    assert!(matches!(err, AppError::UniqueViolation));
    assert_eq!(err.to_string(), "Unique constraint violation");
}
