use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal_macros::dec;
use rustrade_core::application::position::reconciliation::reconcile;
use rustrade_core::application::position::store::PositionStore;
use rustrade_core::domain::errors::CoreError;
use rustrade_core::domain::ports::{AlertSeverity, AlertSink, PositionRepository};
use rustrade_core::domain::position::{Position, PositionState, PositionTransition};
use rustrade_core::domain::types::Side;
use rustrade_core::infrastructure::exchange::paper::PaperExchange;

struct NullRepository;

#[async_trait]
impl PositionRepository for NullRepository {
    async fn upsert(&self, _position: &Position) -> Result<(), CoreError> {
        Ok(())
    }
    async fn load_all(&self) -> Result<Vec<Position>, CoreError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct RecordingAlertSink {
    categories: Mutex<Vec<String>>,
}

impl AlertSink for RecordingAlertSink {
    fn emit(&self, _severity: AlertSeverity, category: &str, _message: &str) {
        self.categories.lock().unwrap().push(category.to_string());
    }
}

fn open_position(symbol: &str, quantity: rust_decimal::Decimal) -> Position {
    let mut p = Position::new_opening(symbol.to_string(), Side::Long, quantity, 10, dec!(48000), None, vec![]);
    p.transition(PositionTransition::Fill).unwrap();
    p.entry_price = dec!(50000);
    p
}

fn store() -> PositionStore {
    PositionStore::new(Arc::new(NullRepository))
}

#[tokio::test]
async fn exchange_only_position_is_inserted_as_orphan() {
    let store = store();
    let gateway = PaperExchange::new(dec!(10000));
    let alerts = RecordingAlertSink::default();
    let exchange_position = open_position("BTCUSDT", dec!(0.02));

    let report = reconcile(&store, &gateway, &alerts, &[exchange_position]).await;

    assert_eq!(report.orphans_inserted, 1);
    assert_eq!(store.all().await.len(), 1);
    assert!(alerts.categories.lock().unwrap().contains(&"reconciliation_orphan".to_string()));
}

#[tokio::test]
async fn local_only_position_is_closed_as_ghost() {
    let store = store();
    let gateway = PaperExchange::new(dec!(10000));
    let alerts = RecordingAlertSink::default();
    let ghost = open_position("ETHUSDT", dec!(1.0));
    let id = ghost.id;
    store.insert(ghost).await;

    let report = reconcile(&store, &gateway, &alerts, &[]).await;

    assert_eq!(report.ghosts_closed, 1);
    let persisted = store.get(id).await.unwrap();
    assert_eq!(persisted.state, PositionState::ClosedReconciled);
    assert!(alerts.categories.lock().unwrap().contains(&"reconciliation_ghost".to_string()));
}

#[tokio::test]
async fn quantity_mismatch_beyond_tolerance_adopts_exchange_quantity() {
    let store = store();
    let gateway = PaperExchange::new(dec!(10000));
    let alerts = RecordingAlertSink::default();
    let mut local = open_position("BTCUSDT", dec!(0.02));
    local.quantity = dec!(0.02);
    let id = local.id;
    store.insert(local.clone()).await;

    let mut exch = local;
    exch.quantity = dec!(0.05);

    let report = reconcile(&store, &gateway, &alerts, &[exch]).await;

    assert_eq!(report.quantity_mismatches_adjusted, 1);
    let persisted = store.get(id).await.unwrap();
    assert_eq!(persisted.quantity, dec!(0.05));
    assert!(persisted.stop_order_id.is_some(), "stop order must be resized to the corrected quantity");
}

#[tokio::test]
async fn matching_quantities_within_tolerance_are_untouched() {
    let store = store();
    let gateway = PaperExchange::new(dec!(10000));
    let alerts = RecordingAlertSink::default();
    let local = open_position("BTCUSDT", dec!(0.02));
    let id = local.id;
    store.insert(local.clone()).await;

    let report = reconcile(&store, &gateway, &alerts, &[local]).await;

    assert_eq!(report.quantity_mismatches_adjusted, 0);
    assert_eq!(report.orphans_inserted, 0);
    assert_eq!(report.ghosts_closed, 0);
    assert_eq!(store.get(id).await.unwrap().quantity, dec!(0.02));
}
