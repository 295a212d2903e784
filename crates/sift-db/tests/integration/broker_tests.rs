use serde_json::json;
use sift_core::broker::Broker;

use crate::integration::common::setup_test_db;

#[tokio::test]
async fn receive_delivers_in_publish_order_up_to_max() {
    let (db, _container) = setup_test_db().await;
    let broker = db.broker();

    for n in 0..5 {
        broker.publish("scrape", &json!({ "n": n })).await.unwrap();
    }
    broker.publish("other", &json!({ "n": 99 })).await.unwrap();

    let batch = broker.receive("scrape", "c1", 3).await.unwrap();
    assert_eq!(batch.len(), 3);
    let ns: Vec<_> = batch.iter().map(|d| d.payload["n"].as_i64().unwrap()).collect();
    assert_eq!(ns, vec![0, 1, 2]);
    assert!(batch.iter().all(|d| d.delivery_count == 1 && d.queue == "scrape"));
    assert_eq!(broker.ready_count("scrape").await.unwrap(), 2);
}

#[tokio::test]
async fn concurrent_consumers_never_share_a_message() {
    let (db, _container) = setup_test_db().await;
    let broker = db.broker();

    for n in 0..20 {
        broker.publish("scrape", &json!({ "n": n })).await.unwrap();
    }

    let (a, b) = tokio::join!(
        broker.receive("scrape", "a", 15),
        broker.receive("scrape", "b", 15)
    );
    let mut ids: Vec<_> = a
        .unwrap()
        .into_iter()
        .chain(b.unwrap())
        .map(|d| d.id)
        .collect();
    let total = ids.len();
    ids.sort_unstable();
    ids.dedup();

    assert_eq!(total, 20);
    assert_eq!(ids.len(), 20);
}

#[tokio::test]
async fn ack_removes_and_nack_requeues_or_drops() {
    let (db, _container) = setup_test_db().await;
    let broker = db.broker();

    for n in 0..3 {
        broker.publish("scrape", &json!({ "n": n })).await.unwrap();
    }
    let batch = broker.receive("scrape", "c1", 3).await.unwrap();

    broker.ack(batch[0].id).await.unwrap();
    broker.nack(batch[1].id, true).await.unwrap();
    broker.nack(batch[2].id, false).await.unwrap();

    let redelivered = broker.receive("scrape", "c2", 10).await.unwrap();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].id, batch[1].id);
    assert_eq!(redelivered[0].delivery_count, 2);
}

#[tokio::test]
async fn recover_returns_a_dead_consumers_deliveries() {
    let (db, _container) = setup_test_db().await;
    let broker = db.broker();

    for n in 0..4 {
        broker.publish("scrape", &json!({ "n": n })).await.unwrap();
    }
    broker.receive("scrape", "dead", 3).await.unwrap();
    broker.receive("scrape", "alive", 1).await.unwrap();

    let recovered = broker.recover("scrape", "dead").await.unwrap();
    assert_eq!(recovered, 3);
    assert_eq!(broker.ready_count("scrape").await.unwrap(), 3);
    assert_eq!(broker.recover("scrape", "dead").await.unwrap(), 0);
}

#[tokio::test]
async fn delivery_past_its_lease_is_reclaimed_by_another_consumer() {
    let (db, _container) = setup_test_db().await;
    let broker = db.broker().with_lease(std::time::Duration::from_secs(1));

    for n in 0..2 {
        broker.publish("scrape", &json!({ "n": n })).await.unwrap();
    }
    let first = broker.receive("scrape", "consumer-a", 10).await.unwrap();
    assert_eq!(first.len(), 2);

    // consumer-a goes away without acking or recovering.
    assert!(broker.receive("scrape", "consumer-b", 10).await.unwrap().is_empty());

    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;

    let reclaimed = broker.receive("scrape", "consumer-b", 10).await.unwrap();
    let first_ids: Vec<_> = first.iter().map(|d| d.id).collect();
    let reclaimed_ids: Vec<_> = reclaimed.iter().map(|d| d.id).collect();
    assert_eq!(reclaimed_ids, first_ids);
    assert!(reclaimed.iter().all(|d| d.delivery_count == 2));

    // A fresh claim is not reclaimable until its own lease lapses.
    assert!(broker.receive("scrape", "consumer-c", 10).await.unwrap().is_empty());
}
