//! End-to-end cycle scenarios against scripted venue and model clients.

mod common;

use common::*;
use pentabot::cycle::run_cycle;
use pentabot::models::{BetStatus, CycleStatus};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn happy_path_submits_floor_sized_bet() {
    // ChatGPT at 50.00, one Crypto market at ask 0.40, model says 0.60 @ 8.
    let venue = MockVenue::new().with_market("mkt-1", 0.40);
    let model = MockModel::returning(&decision_blob("0.60", 8.0));
    let mut engine = test_engine(venue, model, test_config()).await;
    solo_firm(&mut engine, "ChatGPT");

    let summary = run_cycle(&engine.ctx).await.unwrap();

    assert_eq!(summary.status, CycleStatus::Completed);
    assert_eq!(summary.markets_tradable, 1);
    assert_eq!(summary.predictions_saved, 1);
    assert_eq!(summary.bets_executed, 1);
    assert_eq!(summary.bets_failed, 0);

    // Kelly desire clamps to the 2% cap, then the 1.50 floor overrides it.
    let placed = engine.venue.placed.lock().clone();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].price, "0.400");
    assert!((placed[0].amount - 1.5).abs() < 1e-9);
    assert_eq!(placed[0].token_id, "mkt-1-yes");
    assert!(placed[0].check_approval);

    let bets = engine
        .ctx
        .store
        .with_tx(|tx| tx.list_recent_bets(10))
        .await
        .unwrap();
    assert_eq!(bets.len(), 1);
    assert_eq!(bets[0].status, BetStatus::Submitted);
    assert!(bets[0].order_id.is_some());
    assert!(bets[0].expected_value > 0.0);

    let counter = engine
        .ctx
        .store
        .with_tx(|tx| tx.daily_counter("ChatGPT", chrono::Utc::now().date_naive()))
        .await
        .unwrap();
    assert_eq!(counter.bets_count, 1);
    assert!((counter.spent - 1.5).abs() < 1e-9);

    // Stake held from the bankroll.
    let portfolio = engine
        .ctx
        .store
        .with_tx(|tx| tx.get_portfolio("ChatGPT"))
        .await
        .unwrap()
        .unwrap();
    assert!((portfolio.balance - 48.5).abs() < 1e-9);
}

#[tokio::test]
async fn demoted_tier_vetoes_below_floor() {
    // Balance 33 of initial 50: tier cap lands below the 1.50 floor, so no
    // bet is emitted and the prediction carries the veto reason.
    let venue = MockVenue::new().with_market("mkt-1", 0.40);
    let model = MockModel::returning(&decision_blob("0.60", 8.0));
    let mut engine = test_engine(venue, model, test_config()).await;
    solo_firm(&mut engine, "ChatGPT");

    engine
        .ctx
        .store
        .with_tx(|tx| {
            let mut p = tx.get_portfolio("ChatGPT")?.unwrap();
            p.balance = 33.0;
            tx.upsert_portfolio(&p)
        })
        .await
        .unwrap();

    let summary = run_cycle(&engine.ctx).await.unwrap();

    assert_eq!(summary.bets_approved, 0);
    assert!(engine.venue.placed.lock().is_empty());
    assert!(summary
        .skips
        .iter()
        .any(|s| s.reason == "below_minimum_after_tier_cap"));

    let predictions = engine
        .ctx
        .store
        .with_tx(|tx| tx.list_predictions(10))
        .await
        .unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(
        predictions[0].skip_reason.as_deref(),
        Some("below_minimum_after_tier_cap")
    );
}

#[tokio::test]
async fn geographic_rejection_fails_bet_and_continues() {
    let venue = MockVenue::new().with_market("mkt-1", 0.40);
    venue.add_market("mkt-2", "Crypto", json!("ACTIVATED"), 0.40);
    venue.script_place(10403, None, Some("Invalid area"));
    let model = MockModel::returning(&decision_blob("0.60", 8.0));
    let mut engine = test_engine(venue, model, test_config()).await;
    solo_firm(&mut engine, "ChatGPT");

    let summary = run_cycle(&engine.ctx).await.unwrap();

    // First market fails with the business errno, second proceeds.
    assert_eq!(summary.bets_failed, 1);
    assert_eq!(summary.bets_executed, 1);

    let bets = engine
        .ctx
        .store
        .with_tx(|tx| tx.list_bets_by_status(BetStatus::Failed))
        .await
        .unwrap();
    assert_eq!(bets.len(), 1);
    assert!(bets[0].error_text.as_deref().unwrap().contains("10403"));

    // The failed stake came back; the executed one is still held.
    let portfolio = engine
        .ctx
        .store
        .with_tx(|tx| tx.get_portfolio("ChatGPT"))
        .await
        .unwrap()
        .unwrap();
    assert!((portfolio.balance - 48.5).abs() < 1e-9);
}

#[tokio::test]
async fn percent_probability_is_normalised() {
    let venue = MockVenue::new().with_market("mkt-1", 0.40);
    let model = MockModel::returning(&decision_blob("65", 8.0));
    let mut engine = test_engine(venue, model, test_config()).await;
    solo_firm(&mut engine, "Claude");

    let summary = run_cycle(&engine.ctx).await.unwrap();
    assert_eq!(summary.bets_executed, 1);

    let predictions = engine
        .ctx
        .store
        .with_tx(|tx| tx.list_predictions(10))
        .await
        .unwrap();
    assert!((predictions[0].probability - 0.65).abs() < 1e-9);
}

#[tokio::test]
async fn rerun_same_day_does_not_double_book() {
    let venue = MockVenue::new().with_market("mkt-1", 0.40);
    let model = MockModel::returning(&decision_blob("0.60", 8.0));
    let mut engine = test_engine(venue, model, test_config()).await;
    solo_firm(&mut engine, "ChatGPT");

    let first = run_cycle(&engine.ctx).await.unwrap();
    assert_eq!(first.predictions_saved, 1);

    let second = run_cycle(&engine.ctx).await.unwrap();
    assert_eq!(second.predictions_saved, 0);
    assert_eq!(second.bets_executed, 0);

    let predictions = engine
        .ctx
        .store
        .with_tx(|tx| tx.list_predictions(10))
        .await
        .unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(engine.venue.placed.lock().len(), 1);
}

#[tokio::test]
async fn deadline_marks_cycle_partial() {
    let venue = MockVenue::new().with_market("mkt-1", 0.40);
    venue.add_market("mkt-2", "Crypto", json!("ACTIVATED"), 0.40);
    venue.add_market("mkt-3", "Crypto", json!("ACTIVATED"), 0.40);
    let model = MockModel::returning(&decision_blob("0.60", 8.0))
        .with_delay(Duration::from_millis(120));

    let mut config = test_config();
    config.cycle_deadline = Duration::from_millis(100);
    let mut engine = test_engine(venue, model, config).await;
    solo_firm(&mut engine, "ChatGPT");

    let summary = run_cycle(&engine.ctx).await.unwrap();

    // The in-flight pair finishes and persists; later pairs never start.
    assert_eq!(summary.status, CycleStatus::Partial);
    assert!(summary.predictions_saved >= 1);
    assert!(summary.predictions_saved < 3);

    let record = engine
        .ctx
        .store
        .with_tx(|tx| tx.latest_cycle())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, CycleStatus::Partial);
}

#[tokio::test]
async fn untradable_markets_are_filtered_with_reasons() {
    let venue = MockVenue::new().with_market("mkt-ok", 0.40);
    venue.add_market("mkt-sports", "Sports", json!("ACTIVATED"), 0.40);
    venue.add_market("mkt-closed", "Crypto", json!("CLOSED"), 0.40);
    // Listed but the detail endpoint has no record of it.
    venue.summaries.lock().push(pentabot::venue::MarketSummary {
        market_id: "mkt-ghost".into(),
        title: "ghost".into(),
        category: Some("Crypto".into()),
        status: json!("ACTIVATED"),
        volume: Some(1.0),
        resolution_time: None,
    });
    let model = MockModel::returning(&decision_blob("0.60", 8.0));
    let mut engine = test_engine(venue, model, test_config()).await;
    solo_firm(&mut engine, "ChatGPT");

    let summary = run_cycle(&engine.ctx).await.unwrap();

    assert_eq!(summary.markets_tradable, 1);
    assert_eq!(summary.markets_fetched, 4);
    assert!(summary.skips.iter().any(|s| s.reason == "sports_category"));
    assert!(summary.skips.iter().any(|s| s.reason == "not_activated"));
    // The ghost market is silently skipped, never traded.
    assert_eq!(summary.bets_executed, 1);
    assert_eq!(engine.venue.placed.lock()[0].market_id, "mkt-ok");
}

#[tokio::test]
async fn schema_rejection_skips_pair() {
    let venue = MockVenue::new().with_market("mkt-1", 0.40);
    let model = MockModel::returning("the market will definitely go up");
    let mut engine = test_engine(venue, model, test_config()).await;
    solo_firm(&mut engine, "Grok");

    let summary = run_cycle(&engine.ctx).await.unwrap();
    assert_eq!(summary.bets_approved, 0);
    assert!(summary.skips.iter().any(|s| s.reason == "schema_rejected"));
}

#[tokio::test]
async fn negative_ev_is_skipped() {
    // Model probability equals the ask: all edge is eaten by the fee.
    let venue = MockVenue::new().with_market("mkt-1", 0.60);
    let model = MockModel::returning(&decision_blob("0.60", 8.0));
    let mut engine = test_engine(venue, model, test_config()).await;
    solo_firm(&mut engine, "ChatGPT");

    let summary = run_cycle(&engine.ctx).await.unwrap();
    assert_eq!(summary.bets_approved, 0);
    assert!(summary.skips.iter().any(|s| s.reason == "negative_ev"));
}

#[tokio::test]
async fn dry_run_submits_without_touching_venue() {
    let venue = MockVenue::new().with_market("mkt-1", 0.40);
    let model = MockModel::returning(&decision_blob("0.60", 8.0));
    let mut config = test_config();
    config.dry_run = true;
    let mut engine = test_engine(venue, model, config).await;
    solo_firm(&mut engine, "ChatGPT");

    let summary = run_cycle(&engine.ctx).await.unwrap();
    assert_eq!(summary.bets_executed, 1);
    assert!(engine.venue.placed.lock().is_empty());

    let bets = engine
        .ctx
        .store
        .with_tx(|tx| tx.list_bets_by_status(BetStatus::Submitted))
        .await
        .unwrap();
    assert!(bets[0].order_id.as_deref().unwrap().starts_with("dry-run-"));
}

#[tokio::test]
async fn all_five_firms_trade_sequentially() {
    let venue = MockVenue::new().with_market("mkt-1", 0.40);
    let model = MockModel::returning(&decision_blob("0.60", 8.0));
    let engine = test_engine(venue, model, test_config()).await;

    let summary = run_cycle(&engine.ctx).await.unwrap();

    assert_eq!(summary.predictions_saved, 5);
    // Every firm clears the floor on a fresh bankroll.
    assert_eq!(summary.bets_executed, 5);

    // Shared collector work is cached once for the symbol, not per firm.
    assert_eq!(engine.ctx.cache.len(), 0); // cleared at cycle end

    let counter_total: i64 = {
        let store = engine.ctx.store.clone();
        let mut total = 0;
        for firm in &engine.ctx.roster {
            let name = firm.name.clone();
            let c = store
                .with_tx(move |tx| tx.daily_counter(&name, chrono::Utc::now().date_naive()))
                .await
                .unwrap();
            total += c.bets_count;
        }
        total
    };
    assert_eq!(counter_total, 5);
}
