use sift_core::ledger::sweep;
use sift_core::models::{NewFailure, NewInvalid, NewProduct};
use sift_core::traits::{FailureLedger, InvalidStore, ProductStore};

use crate::integration::common::{item, setup_test_db};

fn product_for(n: u32) -> NewProduct {
    let item = item(n);
    NewProduct {
        id_product: format!("P{n}"),
        id_product_smi: item.natural_key,
        offer_id: item.offer_id,
        url: item.url,
        product_name: "Robe longue".into(),
        color: None,
        category: None,
        subcategory: None,
        description: None,
        price: None,
        currency: None,
        availability: None,
        keywords: None,
    }
}

#[tokio::test]
async fn repeated_failures_increment_retry_count() {
    let (db, _container) = setup_test_db().await;
    let ledger = db.failed_repo();

    let first = ledger
        .record_failure(&NewFailure::for_item(&item(1), "Network error: reset"))
        .await
        .unwrap();
    assert_eq!(first.retry_count, 0);

    for expected in 1..=3 {
        let record = ledger
            .record_failure(&NewFailure::for_item(&item(1), format!("attempt {expected}")))
            .await
            .unwrap();
        assert_eq!(record.retry_count, expected);
        assert_eq!(record.error_message, format!("attempt {expected}"));
        assert_eq!(record.created_at, first.created_at);
    }
}

#[tokio::test]
async fn known_id_product_survives_later_failures() {
    let (db, _container) = setup_test_db().await;
    let ledger = db.failed_repo();

    ledger
        .record_failure(&NewFailure::for_item(&item(1), "bad").with_id_product(Some("981".into())))
        .await
        .unwrap();
    let record = ledger
        .record_failure(&NewFailure::for_item(&item(1), "worse"))
        .await
        .unwrap();

    assert_eq!(record.id_product.as_deref(), Some("981"));
}

#[tokio::test]
async fn sweep_resolves_then_ignores() {
    let (db, _container) = setup_test_db().await;
    let ledger = db.failed_repo();
    let products = db.product_repo();

    // Resolved by a persisted product.
    ledger
        .record_failure(&NewFailure::for_item(&item(1), "Network error: reset"))
        .await
        .unwrap();
    products.insert_product(&product_for(1)).await.unwrap();
    // Unrecoverable message.
    ledger
        .record_failure(&NewFailure::for_item(&item(2), "Unique constraint violation"))
        .await
        .unwrap();
    // Worn out.
    for _ in 0..4 {
        ledger
            .record_failure(&NewFailure::for_item(&item(3), "Body not found"))
            .await
            .unwrap();
    }
    // Still retryable.
    ledger
        .record_failure(&NewFailure::for_item(&item(4), "Body not found"))
        .await
        .unwrap();

    let report = sweep(&ledger).await.unwrap();
    assert_eq!(report.resolved, 1);
    assert_eq!(report.ignored, 3);

    let resolved = ledger.get_failure("k1").await.unwrap().unwrap();
    assert!(resolved.resolved && resolved.ignore);
    let live = ledger.get_failure("k4").await.unwrap().unwrap();
    assert!(!live.resolved && !live.ignore);

    let again = sweep(&ledger).await.unwrap();
    assert_eq!((again.resolved, again.ignored), (0, 0));
}

#[tokio::test]
async fn retry_candidates_filter_and_limit() {
    let (db, _container) = setup_test_db().await;
    let ledger = db.failed_repo();

    for n in 1..=4 {
        ledger
            .record_failure(&NewFailure::for_item(&item(n), "Body not found"))
            .await
            .unwrap();
    }
    let mut denied = item(5);
    denied.offer_id = 1077;
    ledger
        .record_failure(&NewFailure::for_item(&denied, "Body not found"))
        .await
        .unwrap();
    for _ in 0..3 {
        ledger
            .record_failure(&NewFailure::for_item(&item(4), "Body not found"))
            .await
            .unwrap();
    }

    let candidates = ledger.retry_candidates(&[1077], 10).await.unwrap();
    let keys: Vec<_> = candidates.iter().map(|c| c.natural_key.as_str()).collect();
    assert_eq!(keys, vec!["k1", "k2", "k3"]);

    let limited = ledger.retry_candidates(&[1077], 2).await.unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn invalid_records_are_written_once_per_key_and_offer() {
    let (db, _container) = setup_test_db().await;
    let invalid = db.invalid_repo();

    let record = NewInvalid {
        natural_key: "k1".into(),
        offer_id: 42,
        url: "https://shop.example/".into(),
        reason: "homepage".into(),
    };
    invalid.record_invalid(&record).await.unwrap();
    invalid.record_invalid(&record).await.unwrap();

    let rows = invalid.list_invalid("k1").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].reason, "homepage");
}
