//! End-to-end reconciliation of `invoice.created` against in-memory stores

mod common;

use common::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tessera_core::{
    models::{
        BillingReason, EntInterval, EntityBalance, EntityBalances, FixedPriceConfig, PriceConfig,
    },
    AppError,
};
use tessera_services::SkipReason;

const PREVIOUS_RESET_MS: i64 = INVOICE_CREATED * 1_000;
const NEXT_RESET_MS: i64 = (INVOICE_CREATED + PERIOD) * 1_000;

/// One attachment billing API calls in arrear on `sub_1`
fn metered_harness(balance: Option<Decimal>, next_reset_at: Option<i64>) -> Harness {
    let harness = Harness::new();
    let calls = api_calls();

    harness.ledger.add_cus_product(settled_cus_product("cp_1"));
    harness
        .ledger
        .add_entitlement(cus_ent("ce_calls", "cp_1", &calls, dec!(100), balance, next_reset_at));
    harness.ledger.add_price(
        "cp_1",
        price("price_calls", PriceConfig::Usage(usage_config(&calls, 10, false))),
    );
    harness.processor.add_subscription(subscription(SUB_ID, &[]));

    harness
}

#[tokio::test]
async fn test_usage_in_arrear_reports_rounded_quantity_and_resets() {
    let harness = metered_harness(Some(dec!(23)), Some(PREVIOUS_RESET_MS));

    let outcome = harness
        .handler
        .handle(&harness.context(), &invoice(BillingReason::SubscriptionCycle))
        .await
        .unwrap();

    // 100 allowance - 23 left = 77 used, rounded to billing units of 10
    let events = harness.processor.meter_events.lock().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].value, dec!(80));
    assert_eq!(events[0].meter_id, "mtr_api_calls");
    assert_eq!(events[0].customer, "cus_stripe_1");
    assert_eq!(events[0].timestamp, INVOICE_CREATED - 86_400);

    let cus_ent = harness.ledger.entitlement("ce_calls");
    assert_eq!(cus_ent.balance, Some(dec!(100)));
    assert_eq!(cus_ent.adjustment, Decimal::ZERO);
    assert_eq!(cus_ent.next_reset_at, Some(NEXT_RESET_MS));

    assert_eq!(outcome.cus_products, 1);
    assert_eq!(outcome.reported, vec!["price_calls".to_string()]);
    assert_eq!(outcome.reset, 1);
    assert!(outcome.skipped.is_empty());
}

#[tokio::test]
async fn test_upgrade_invoice_never_reports() {
    let harness = metered_harness(Some(dec!(-40)), Some(PREVIOUS_RESET_MS));

    let outcome = harness
        .handler
        .handle(&harness.context(), &invoice(BillingReason::SubscriptionUpdate))
        .await
        .unwrap();

    assert_eq!(harness.processor.write_count(), 0);
    assert_eq!(harness.ledger.entitlement("ce_calls").balance, Some(dec!(-40)));
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].reason, SkipReason::SubscriptionUpdate);
}

#[tokio::test]
async fn test_invoice_close_to_attachment_is_a_duplicate() {
    let harness = Harness::new();
    let calls = api_calls();

    // Attached five minutes after the invoice was created
    harness
        .ledger
        .add_cus_product(cus_product("cp_1", INVOICE_CREATED * 1_000 + 5 * 60_000));
    harness.ledger.add_entitlement(cus_ent(
        "ce_calls",
        "cp_1",
        &calls,
        dec!(100),
        Some(dec!(23)),
        Some(PREVIOUS_RESET_MS),
    ));
    harness.ledger.add_price(
        "cp_1",
        price("price_calls", PriceConfig::Usage(usage_config(&calls, 10, false))),
    );
    harness.processor.add_subscription(subscription(SUB_ID, &[]));

    let outcome = harness
        .handler
        .handle(&harness.context(), &invoice(BillingReason::SubscriptionCycle))
        .await
        .unwrap();

    assert_eq!(harness.processor.write_count(), 0);
    assert_eq!(harness.ledger.entitlement("ce_calls").balance, Some(dec!(23)));
    assert_eq!(outcome.skipped[0].reason, SkipReason::RecentlyAttached);
}

#[tokio::test]
async fn test_missing_cadence_reports_without_reset() {
    let harness = metered_harness(Some(dec!(-5)), None);

    let outcome = harness
        .handler
        .handle(&harness.context(), &invoice(BillingReason::SubscriptionCycle))
        .await
        .unwrap();

    assert_eq!(harness.processor.meter_values(), vec![dec!(110)]);

    // Neither the balance nor the schedule moves without a cadence
    let cus_ent = harness.ledger.entitlement("ce_calls");
    assert_eq!(cus_ent.balance, Some(dec!(-5)));
    assert_eq!(cus_ent.next_reset_at, None);
    assert_eq!(outcome.reported, vec!["price_calls".to_string()]);
    assert_eq!(outcome.reset, 0);
}

#[tokio::test]
async fn test_lifetime_surplus_is_left_alone() {
    let harness = metered_harness(Some(dec!(5)), None);

    let outcome = harness
        .handler
        .handle(&harness.context(), &invoice(BillingReason::SubscriptionCycle))
        .await
        .unwrap();

    assert_eq!(harness.processor.write_count(), 0);
    assert_eq!(outcome.skipped[0].reason, SkipReason::LifetimeSurplus);
}

#[tokio::test]
async fn test_lifetime_interval_reports_without_reset() {
    let harness = metered_harness(Some(dec!(-10)), None);
    harness
        .ledger
        .entitlements
        .lock()
        .get_mut("ce_calls")
        .unwrap()
        .entitlement
        .interval = EntInterval::Lifetime;

    let outcome = harness
        .handler
        .handle(&harness.context(), &invoice(BillingReason::SubscriptionCycle))
        .await
        .unwrap();

    assert_eq!(harness.processor.meter_values(), vec![dec!(110)]);
    assert_eq!(harness.ledger.entitlement("ce_calls").balance, Some(dec!(-10)));
    assert_eq!(outcome.reported.len(), 1);
    assert_eq!(outcome.reset, 0);
}

#[tokio::test]
async fn test_price_without_meter_is_skipped() {
    let harness = Harness::new();
    let calls = api_calls();
    let mut config = usage_config(&calls, 1, false);
    config.stripe_meter_id = None;

    harness.ledger.add_cus_product(settled_cus_product("cp_1"));
    harness.ledger.add_entitlement(cus_ent(
        "ce_calls",
        "cp_1",
        &calls,
        dec!(100),
        Some(dec!(-3)),
        Some(PREVIOUS_RESET_MS),
    ));
    harness
        .ledger
        .add_price("cp_1", price("price_calls", PriceConfig::Usage(config)));
    harness.processor.add_subscription(subscription(SUB_ID, &[]));

    let outcome = harness
        .handler
        .handle(&harness.context(), &invoice(BillingReason::SubscriptionCycle))
        .await
        .unwrap();

    assert_eq!(harness.processor.write_count(), 0);
    assert_eq!(harness.ledger.entitlement("ce_calls").balance, Some(dec!(-3)));
    assert_eq!(outcome.skipped[0].reason, SkipReason::MissingMeter);
}

#[tokio::test]
async fn test_trial_conversion_is_skipped() {
    let harness = metered_harness(Some(dec!(23)), Some(PREVIOUS_RESET_MS));
    let mut sub = subscription(SUB_ID, &[]);
    sub.trial_end = Some(sub.current_period_start);
    harness.processor.add_subscription(sub);

    let outcome = harness
        .handler
        .handle(&harness.context(), &invoice(BillingReason::SubscriptionCycle))
        .await
        .unwrap();

    assert_eq!(harness.processor.write_count(), 0);
    assert_eq!(harness.ledger.entitlement("ce_calls").balance, Some(dec!(23)));
    assert_eq!(outcome.skipped[0].reason, SkipReason::TrialBoundary);
}

#[tokio::test]
async fn test_usage_billed_by_another_subscription_is_ignored() {
    let harness = Harness::new();
    let calls = api_calls();
    let mut cp = settled_cus_product("cp_1");
    cp.subscription_ids.push("sub_usage".to_string());

    harness.ledger.add_cus_product(cp);
    harness.ledger.add_entitlement(cus_ent(
        "ce_calls",
        "cp_1",
        &calls,
        dec!(100),
        Some(dec!(23)),
        Some(PREVIOUS_RESET_MS),
    ));
    harness.ledger.add_price(
        "cp_1",
        price("price_calls", PriceConfig::Usage(usage_config(&calls, 10, false))),
    );
    harness.processor.add_subscription(subscription(SUB_ID, &[]));
    harness
        .processor
        .add_subscription(subscription("sub_usage", &["fe_calls"]));

    let outcome = harness
        .handler
        .handle(&harness.context(), &invoice(BillingReason::SubscriptionCycle))
        .await
        .unwrap();

    assert_eq!(harness.processor.write_count(), 0);
    assert!(outcome.reported.is_empty());
    assert_eq!(harness.ledger.entitlement("ce_calls").balance, Some(dec!(23)));
}

#[tokio::test]
async fn test_entity_scoped_product_bills_invoice_item() {
    let harness = Harness::new();
    let calls = api_calls();
    let users = users();
    let mut cp = settled_cus_product("cp_1");
    cp.internal_entity_id = Some("ent_internal_u1".to_string());

    harness.ledger.add_feature(users.clone());
    harness
        .ledger
        .add_entity(entity("ent_internal_u1", "u1", "Alice", &users, false));
    harness.ledger.add_cus_product(cp);
    harness.ledger.add_entitlement(cus_ent(
        "ce_calls",
        "cp_1",
        &calls,
        dec!(100),
        Some(dec!(-30)),
        Some(PREVIOUS_RESET_MS),
    ));
    harness.ledger.add_price(
        "cp_1",
        price("price_calls", PriceConfig::Usage(usage_config(&calls, 1, false))),
    );
    harness.processor.add_subscription(subscription(SUB_ID, &[]));

    let outcome = harness
        .handler
        .handle(&harness.context(), &invoice(BillingReason::SubscriptionCycle))
        .await
        .unwrap();

    assert!(outcome.annotated);
    assert_eq!(
        harness.processor.descriptions.lock().clone(),
        vec![("in_1".to_string(), "User: Alice (ID: u1)".to_string())]
    );

    // 30 units over allowance at 0.50 each
    let items = harness.processor.invoice_items.lock().clone();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].amount_minor, 1_500);
    assert_eq!(items[0].currency, "usd");
    assert_eq!(items[0].customer, "cus_stripe_1");
    assert_eq!(items[0].invoice, "in_1");
    assert_eq!(items[0].period_end, INVOICE_CREATED);
    assert!(items[0].description.contains("Alice (ID: u1)"));
    assert_eq!(
        items[0].metadata.get("internal_entity_id").map(String::as_str),
        Some("ent_internal_u1")
    );
    assert!(harness.processor.meter_events.lock().is_empty());

    assert_eq!(harness.ledger.entitlement("ce_calls").balance, Some(dec!(100)));
}

#[tokio::test]
async fn test_entity_scoped_product_within_allowance_posts_nothing() {
    let harness = Harness::new();
    let calls = api_calls();
    let users = users();
    let mut cp = settled_cus_product("cp_1");
    cp.internal_entity_id = Some("ent_internal_u1".to_string());

    harness.ledger.add_feature(users.clone());
    harness
        .ledger
        .add_entity(entity("ent_internal_u1", "u1", "Alice", &users, false));
    harness.ledger.add_cus_product(cp);
    harness.ledger.add_entitlement(cus_ent(
        "ce_calls",
        "cp_1",
        &calls,
        dec!(100),
        Some(dec!(12)),
        Some(PREVIOUS_RESET_MS),
    ));
    harness.ledger.add_price(
        "cp_1",
        price("price_calls", PriceConfig::Usage(usage_config(&calls, 1, false))),
    );
    harness.processor.add_subscription(subscription(SUB_ID, &[]));

    let outcome = harness
        .handler
        .handle(&harness.context(), &invoice(BillingReason::SubscriptionCycle))
        .await
        .unwrap();

    assert!(harness.processor.invoice_items.lock().is_empty());
    assert!(harness.processor.meter_events.lock().is_empty());

    // The period still closes
    let cus_ent = harness.ledger.entitlement("ce_calls");
    assert_eq!(cus_ent.balance, Some(dec!(100)));
    assert_eq!(cus_ent.next_reset_at, Some(NEXT_RESET_MS));
    assert_eq!(outcome.reported, vec!["price_calls".to_string()]);
    assert_eq!(outcome.reset, 1);
}

#[tokio::test]
async fn test_finalized_invoice_description_is_swallowed() {
    let harness = Harness::new();
    let calls = api_calls();
    let users = users();
    let mut cp = settled_cus_product("cp_1");
    cp.internal_entity_id = Some("ent_internal_u1".to_string());

    harness.ledger.add_feature(users.clone());
    harness
        .ledger
        .add_entity(entity("ent_internal_u1", "u1", "Alice", &users, false));
    harness.ledger.add_cus_product(cp);
    harness.ledger.add_entitlement(cus_ent(
        "ce_calls",
        "cp_1",
        &calls,
        dec!(100),
        Some(dec!(-2)),
        Some(PREVIOUS_RESET_MS),
    ));
    harness.ledger.add_price(
        "cp_1",
        price("price_calls", PriceConfig::Usage(usage_config(&calls, 1, false))),
    );
    harness.processor.add_subscription(subscription(SUB_ID, &[]));
    harness
        .processor
        .finalized_invoices
        .lock()
        .insert("in_1".to_string());

    let outcome = harness
        .handler
        .handle(&harness.context(), &invoice(BillingReason::SubscriptionCycle))
        .await
        .unwrap();

    assert!(!outcome.annotated);
    assert!(harness.processor.descriptions.lock().is_empty());
    assert_eq!(harness.processor.invoice_items.lock().len(), 1);
    assert_eq!(outcome.reset, 1);
}

/// Users metered with proration, plus a per-user entitlement linked to them
fn prorated_harness() -> Harness {
    let harness = Harness::new();
    let users = users();
    let calls = api_calls();

    harness.ledger.add_cus_product(settled_cus_product("cp_1"));
    harness.ledger.add_entitlement(cus_ent(
        "ce_users",
        "cp_1",
        &users,
        dec!(0),
        Some(dec!(1)),
        Some(PREVIOUS_RESET_MS),
    ));

    let per_user: EntityBalances = ["e1", "e2", "e3", "e4"]
        .into_iter()
        .map(|id| (id.to_string(), EntityBalance::new(dec!(50))))
        .collect();
    harness.ledger.add_entitlement(entity_scoped(
        cus_ent("ce_calls_per_user", "cp_1", &calls, dec!(50), None, Some(PREVIOUS_RESET_MS)),
        &users,
        per_user,
    ));

    for (n, deleted) in [(1, true), (2, true), (3, true), (4, false)] {
        harness.ledger.add_entity(entity(
            &format!("ent_internal_e{}", n),
            &format!("e{}", n),
            &format!("User {}", n),
            &users,
            deleted,
        ));
    }

    harness.ledger.add_price(
        "cp_1",
        price("price_users", PriceConfig::Usage(usage_config(&users, 1, true))),
    );
    harness.processor.add_subscription(subscription(SUB_ID, &[]));

    harness
}

#[tokio::test]
async fn test_deleted_entities_are_unlinked_purged_and_credited() {
    let harness = prorated_harness();
    let ctx = harness.context();
    let inv = invoice(BillingReason::SubscriptionCycle);

    let outcome = harness.handler.handle(&ctx, &inv).await.unwrap();

    let linked = harness.ledger.entitlement("ce_calls_per_user");
    let remaining: Vec<&str> = linked.entities.as_ref().unwrap().keys().collect();
    assert_eq!(remaining, vec!["e4"]);

    assert_eq!(harness.ledger.entity_ids(), vec!["ent_internal_e4".to_string()]);
    assert_eq!(harness.ledger.entitlement("ce_users").balance, Some(dec!(4)));
    assert_eq!(outcome.credited, dec!(3));
    assert_eq!(harness.processor.write_count(), 0);

    // A redelivered event finds nothing left to settle
    let outcome = harness.handler.handle(&ctx, &inv).await.unwrap();

    assert_eq!(harness.ledger.entitlement("ce_users").balance, Some(dec!(4)));
    assert_eq!(
        harness.ledger.entitlement("ce_calls_per_user").entities,
        linked.entities
    );
    assert_eq!(outcome.credited, Decimal::ZERO);
    assert_eq!(outcome.skipped[0].reason, SkipReason::NoDeletedEntities);
}

#[tokio::test]
async fn test_prorated_line_waits_for_new_period() {
    let harness = prorated_harness();
    let mut sub = subscription(SUB_ID, &[]);
    sub.current_period_start = INVOICE_CREATED - PERIOD;
    harness.processor.add_subscription(sub);

    let outcome = harness
        .handler
        .handle(&harness.context(), &invoice(BillingReason::SubscriptionCycle))
        .await
        .unwrap();

    assert_eq!(outcome.skipped[0].reason, SkipReason::SamePeriod);
    assert_eq!(harness.ledger.entity_ids().len(), 4);
    assert_eq!(harness.ledger.entitlement("ce_users").balance, Some(dec!(1)));
}

#[tokio::test]
async fn test_failed_attachment_does_not_stop_siblings() {
    let harness = metered_harness(Some(dec!(23)), Some(PREVIOUS_RESET_MS));
    harness.ledger.add_cus_product(settled_cus_product("cp_broken"));
    harness
        .ledger
        .failing_ledgers
        .lock()
        .insert("cp_broken".to_string());

    let result = harness
        .handler
        .handle(&harness.context(), &invoice(BillingReason::SubscriptionCycle))
        .await;

    match result {
        Err(AppError::Reconciliation { failed, details }) => {
            assert_eq!(failed, 1);
            assert!(details.contains("cp_broken"));
        }
        other => panic!("expected reconciliation error, got {:?}", other),
    }

    assert_eq!(harness.processor.meter_values(), vec![dec!(80)]);
    assert_eq!(harness.ledger.entitlement("ce_calls").balance, Some(dec!(100)));
}

#[tokio::test]
async fn test_reset_failure_after_report_is_propagated() {
    let harness = metered_harness(Some(dec!(23)), Some(PREVIOUS_RESET_MS));
    harness
        .ledger
        .failing_updates
        .lock()
        .insert("ce_calls".to_string());

    let result = harness
        .handler
        .handle(&harness.context(), &invoice(BillingReason::SubscriptionCycle))
        .await;

    assert!(matches!(result, Err(AppError::Reconciliation { failed: 1, .. })));
    assert_eq!(harness.processor.meter_values(), vec![dec!(80)]);
    assert_eq!(harness.ledger.entitlement("ce_calls").balance, Some(dec!(23)));
}

#[tokio::test]
async fn test_non_arrear_and_unknown_prices() {
    let harness = metered_harness(Some(dec!(23)), Some(PREVIOUS_RESET_MS));
    harness.ledger.add_price(
        "cp_1",
        price(
            "price_base",
            PriceConfig::Fixed(FixedPriceConfig {
                amount: dec!(49),
                interval: Some("month".to_string()),
                stripe_price_id: None,
            }),
        ),
    );
    harness
        .ledger
        .add_price("cp_1", price("price_legacy", PriceConfig::Unknown));

    let outcome = harness
        .handler
        .handle(&harness.context(), &invoice(BillingReason::SubscriptionCycle))
        .await
        .unwrap();

    assert_eq!(outcome.reported, vec!["price_calls".to_string()]);
    assert_eq!(outcome.unclassified, vec!["price_legacy".to_string()]);
    assert_eq!(harness.processor.write_count(), 1);
}

#[tokio::test]
async fn test_invoice_without_attachments_or_subscription() {
    let harness = Harness::new();
    let ctx = harness.context();

    let outcome = harness
        .handler
        .handle(&ctx, &invoice(BillingReason::SubscriptionCycle))
        .await
        .unwrap();
    assert_eq!(outcome.cus_products, 0);

    let mut one_off = invoice(BillingReason::Manual);
    one_off.subscription = None;
    let outcome = harness.handler.handle(&ctx, &one_off).await.unwrap();
    assert_eq!(outcome.cus_products, 0);
    assert_eq!(harness.processor.write_count(), 0);
}
