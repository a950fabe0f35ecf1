//! Dependency resolver readiness rules

mod support;

use offsync_core::{BlockReason, IdMappingRepository, QueueStore, Readiness};
use offsync_domain::{IdMapping, NewOperation, OperationKind, OperationRecord};
use serde_json::{json, Value};
use support::{t, Harness};

async fn enqueue(
    h: &Harness,
    entity: &str,
    id: &str,
    kind: OperationKind,
    payload: Value,
) -> OperationRecord {
    let priority = h.schema.priority_of(&t(entity)).unwrap();
    h.store.enqueue(NewOperation::new(t(entity), id, kind, payload, priority)).await.unwrap()
}

async fn readiness(h: &Harness, record: &OperationRecord) -> Readiness {
    h.resolver().is_ready(record, &h.store, &h.store).await.unwrap()
}

fn reasons(readiness: &Readiness) -> Vec<BlockReason> {
    match readiness {
        Readiness::Ready { .. } => Vec::new(),
        Readiness::Blocked(blocks) => blocks.iter().map(|b| b.reason).collect(),
    }
}

#[tokio::test]
async fn root_entities_are_always_ready() {
    let h = Harness::new();
    let customer =
        enqueue(&h, "customer", "c-1", OperationKind::Create, json!({"id": "c-1"})).await;

    assert_eq!(readiness(&h, &customer).await, Readiness::Ready { parents: Vec::new() });
}

#[tokio::test]
async fn null_and_absent_references_do_not_block() {
    let h = Harness::new();
    let sale = enqueue(
        &h,
        "sale",
        "s-1",
        OperationKind::Create,
        json!({"id": "s-1", "customerId": null}),
    )
    .await;
    let product = enqueue(&h, "product", "p-1", OperationKind::Create, json!({"id": "p-1"})).await;

    assert!(readiness(&h, &sale).await.is_ready());
    assert!(readiness(&h, &product).await.is_ready());
}

#[tokio::test]
async fn parent_status_maps_to_block_reason() {
    let h = Harness::new();
    let sale = enqueue(&h, "sale", "s-1", OperationKind::Create, json!({"id": "s-1"})).await;
    let item = enqueue(
        &h,
        "sale_item",
        "si-1",
        OperationKind::Create,
        json!({"id": "si-1", "saleId": "s-1", "productId": "p-404"}),
    )
    .await;

    let blocked = readiness(&h, &item).await;
    let mut found = reasons(&blocked);
    found.sort_by_key(|r| r.as_str());
    assert_eq!(found, [BlockReason::MissingParent, BlockReason::ParentPending]);

    h.store.mark_in_flight(&sale.id).await.unwrap();
    assert!(reasons(&readiness(&h, &item).await).contains(&BlockReason::ParentInFlight));

    h.store.mark_failed(&sale.id, "transient: 502").await.unwrap();
    assert!(reasons(&readiness(&h, &item).await).contains(&BlockReason::ParentFailed));
}

#[tokio::test]
async fn completed_parent_resolves_to_remote_id() {
    let h = Harness::new();
    let sale = enqueue(&h, "sale", "s-1", OperationKind::Create, json!({"id": "s-1"})).await;
    h.store.mark_in_flight(&sale.id).await.unwrap();
    h.store.mark_completed(&sale.id, Some("srv-5")).await.unwrap();
    let item = enqueue(
        &h,
        "sale_item",
        "si-1",
        OperationKind::Create,
        json!({"id": "si-1", "saleId": "s-1"}),
    )
    .await;

    let Readiness::Ready { parents } = readiness(&h, &item).await else {
        panic!("expected ready");
    };
    assert_eq!(parents.len(), 1);
    assert_eq!(parents[0].field, "saleId");
    assert_eq!(parents[0].remote_id, "srv-5");
}

#[tokio::test]
async fn completed_parent_without_remote_id_is_unmapped() {
    let h = Harness::new();
    let sale = enqueue(&h, "sale", "s-1", OperationKind::Create, json!({"s": 1})).await;
    h.store.mark_in_flight(&sale.id).await.unwrap();
    h.store.mark_completed(&sale.id, None).await.unwrap();
    let payment = enqueue(
        &h,
        "payment",
        "pay-1",
        OperationKind::Create,
        json!({"id": "pay-1", "saleId": "s-1"}),
    )
    .await;

    assert_eq!(reasons(&readiness(&h, &payment).await), [BlockReason::ParentUnmapped]);
}

#[tokio::test]
async fn mapping_alone_makes_a_parent_ready() {
    let h = Harness::new();
    h.store.upsert(&IdMapping::new(t("supplier"), "sup-1", "srv-legacy", 0)).await.unwrap();
    let purchase = enqueue(
        &h,
        "purchase",
        "pur-1",
        OperationKind::Create,
        json!({"id": "pur-1", "supplierId": "sup-1"}),
    )
    .await;

    let Readiness::Ready { parents } = readiness(&h, &purchase).await else {
        panic!("expected ready");
    };
    assert_eq!(parents[0].remote_id, "srv-legacy");
}

#[tokio::test]
async fn updates_wait_for_their_own_create() {
    let h = Harness::new();
    let create = enqueue(&h, "customer", "c-1", OperationKind::Create, json!({"id": "c-1"})).await;
    let update =
        enqueue(&h, "customer", "c-1", OperationKind::Update, json!({"id": "c-1", "n": 1})).await;
    let delete = enqueue(&h, "customer", "c-1", OperationKind::Delete, json!({})).await;

    assert_eq!(reasons(&readiness(&h, &update).await), [BlockReason::ParentPending]);
    assert_eq!(reasons(&readiness(&h, &delete).await), [BlockReason::ParentPending]);

    h.store.mark_in_flight(&create.id).await.unwrap();
    h.store.mark_completed(&create.id, Some("srv-1")).await.unwrap();

    assert!(readiness(&h, &update).await.is_ready());
    assert_eq!(reasons(&readiness(&h, &delete).await), [BlockReason::ParentPending]);
}

#[tokio::test]
async fn operations_on_one_entity_wait_for_older_ones() {
    let h = Harness::new();
    h.store.upsert(&IdMapping::new(t("customer"), "c-1", "srv-1", 0)).await.unwrap();
    let update =
        enqueue(&h, "customer", "c-1", OperationKind::Update, json!({"id": "c-1", "n": 1})).await;
    let delete = enqueue(&h, "customer", "c-1", OperationKind::Delete, json!({})).await;
    let other =
        enqueue(&h, "customer", "c-2", OperationKind::Update, json!({"id": "c-2", "n": 1})).await;

    assert!(readiness(&h, &update).await.is_ready());
    assert!(readiness(&h, &other).await.is_ready());
    assert_eq!(reasons(&readiness(&h, &delete).await), [BlockReason::ParentPending]);

    h.store.mark_in_flight(&update.id).await.unwrap();
    assert_eq!(reasons(&readiness(&h, &delete).await), [BlockReason::ParentInFlight]);

    // A failed predecessor no longer holds the entity.
    h.store.mark_failed(&update.id, "transient: 502").await.unwrap();
    assert!(readiness(&h, &delete).await.is_ready());
}

#[tokio::test]
async fn deletes_ignore_parent_references() {
    let h = Harness::new();
    let delete = enqueue(
        &h,
        "sale_item",
        "si-1",
        OperationKind::Delete,
        json!({"saleId": "gone"}),
    )
    .await;

    assert!(readiness(&h, &delete).await.is_ready());
}

#[tokio::test]
async fn remote_id_prefers_mapping_then_create_then_local_id() {
    let h = Harness::new();
    let resolver = h.resolver();
    let customer = t("customer");

    let id = resolver.remote_id_for(&customer, "c-1", &h.store, &h.store).await.unwrap();
    assert_eq!(id, "c-1");

    let create = enqueue(&h, "customer", "c-1", OperationKind::Create, json!({"id": "c-1"})).await;
    h.store.mark_in_flight(&create.id).await.unwrap();
    h.store.mark_completed(&create.id, Some("srv-1")).await.unwrap();
    let id = resolver.remote_id_for(&customer, "c-1", &h.store, &h.store).await.unwrap();
    assert_eq!(id, "srv-1");

    h.store.upsert(&IdMapping::new(customer.clone(), "c-1", "srv-alias", 1)).await.unwrap();
    let id = resolver.remote_id_for(&customer, "c-1", &h.store, &h.store).await.unwrap();
    assert_eq!(id, "srv-alias");
}
