use std::sync::Arc;

use serde_json::json;

use super::*;
use crate::storage::test_support::{catalog_store, replica_store};
use crate::storage::{CatalogStore, NewProduct, ReplicaStore};

async fn replica() -> (ReplicaProjection, Arc<dyn ReplicaStore>) {
    let store: Arc<dyn ReplicaStore> = Arc::new(replica_store().await);
    (ReplicaProjection::new(Arc::clone(&store)), store)
}

#[test]
fn test_identifier_accepts_numbers_and_numeric_strings() {
    assert_eq!(parse_identifier(&json!(5)).unwrap(), 5);
    assert_eq!(parse_identifier(&json!("5")).unwrap(), 5);
    assert!(matches!(
        parse_identifier(&json!("five")),
        Err(ApplyError::InvalidPayload(_))
    ));
    assert!(matches!(
        parse_identifier(&json!(1.5)),
        Err(ApplyError::InvalidPayload(_))
    ));
    assert!(matches!(
        parse_identifier(&json!({"id": 5})),
        Err(ApplyError::InvalidPayload(_))
    ));
}

#[test]
fn test_product_payload_ignores_extra_fields() {
    let product =
        parse_product(&json!({"id": 2, "title": "Lamp", "image": "l.png", "likes": 9})).unwrap();
    assert_eq!(product.id, 2);
    assert_eq!(product.title, "Lamp");

    assert!(matches!(
        parse_product(&json!({"id": 2, "title": "Lamp"})),
        Err(ApplyError::InvalidPayload(_))
    ));
}

#[test]
fn test_only_store_failures_are_transient() {
    assert!(!ApplyError::NotFound(1).is_transient());
    assert!(!ApplyError::UnsupportedKind(EventKind::Liked).is_transient());
    assert!(ApplyError::Store(StoreError::Database(sqlx::Error::PoolTimedOut)).is_transient());
}

#[tokio::test]
async fn test_created_inserts_row_with_payload_id() {
    let (projection, store) = replica().await;

    projection
        .apply(
            EventKind::Created,
            &json!({"id": 1, "title": "Widget", "image": "w.png"}),
        )
        .await
        .unwrap();

    let product = store.get_product(1).await.unwrap();
    assert_eq!(product.title, "Widget");
    assert_eq!(product.image, "w.png");
}

#[tokio::test]
async fn test_updated_for_absent_row_is_not_found() {
    let (projection, store) = replica().await;

    let result = projection
        .apply(
            EventKind::Updated,
            &json!({"id": 99, "title": "Ghost", "image": "g.png"}),
        )
        .await;

    assert!(matches!(result, Err(ApplyError::NotFound(99))));
    assert!(store.list_products().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_deleting_twice_is_not_found_the_second_time() {
    let (projection, _store) = replica().await;
    projection
        .apply(
            EventKind::Created,
            &json!({"id": 3, "title": "Widget", "image": "w.png"}),
        )
        .await
        .unwrap();

    projection
        .apply(EventKind::Deleted, &json!("3"))
        .await
        .unwrap();
    let again = projection.apply(EventKind::Deleted, &json!(3)).await;

    assert!(matches!(again, Err(ApplyError::NotFound(3))));
}

#[tokio::test]
async fn test_created_twice_is_constraint_violation() {
    let (projection, _store) = replica().await;
    let payload = json!({"id": 1, "title": "Widget", "image": "w.png"});

    projection.apply(EventKind::Created, &payload).await.unwrap();
    let again = projection.apply(EventKind::Created, &payload).await;

    assert!(matches!(again, Err(ApplyError::ConstraintViolation(_))));
}

#[tokio::test]
async fn test_replica_does_not_own_likes() {
    let (projection, _store) = replica().await;

    let result = projection.apply(EventKind::Liked, &json!(1)).await;
    assert!(matches!(
        result,
        Err(ApplyError::UnsupportedKind(EventKind::Liked))
    ));
}

#[tokio::test]
async fn test_liked_increments_counter_each_time() {
    let store: Arc<dyn CatalogStore> = Arc::new(catalog_store().await);
    let product = store
        .create(NewProduct {
            title: "Widget".to_string(),
            image: "w.png".to_string(),
        })
        .await
        .unwrap();
    let projection = LikesProjection::new(Arc::clone(&store));

    projection
        .apply(EventKind::Liked, &json!(product.id))
        .await
        .unwrap();
    assert_eq!(store.get(product.id).await.unwrap().likes, 1);

    projection
        .apply(EventKind::Liked, &json!(product.id.to_string()))
        .await
        .unwrap();
    assert_eq!(store.get(product.id).await.unwrap().likes, 2);
}

#[tokio::test]
async fn test_liked_for_absent_product_is_not_found() {
    let store: Arc<dyn CatalogStore> = Arc::new(catalog_store().await);
    let projection = LikesProjection::new(store);

    assert!(matches!(
        projection.apply(EventKind::Liked, &json!(5)).await,
        Err(ApplyError::NotFound(5))
    ));
    assert!(matches!(
        projection.apply(EventKind::Created, &json!({})).await,
        Err(ApplyError::UnsupportedKind(EventKind::Created))
    ));
}
