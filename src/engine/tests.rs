//! Tests for the trading engine

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::audit::{AuditAction, AuditLog};
    use crate::config::{AccountConfig, Config, StorageBackend};
    use crate::error::EngineError;
    use crate::store::{FileStore, MemoryStore, MockLedgerStore};
    use crate::types::{PriceMap, Side, TradeRequest};
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    const KEY: &str = "paper_trading_state";

    fn account(initial_cash: Decimal) -> AccountConfig {
        AccountConfig {
            initial_cash,
            ..Default::default()
        }
    }

    fn engine_with(initial_cash: Decimal) -> TradingEngine {
        TradingEngine::open(Box::new(MemoryStore::new()), &account(initial_cash), KEY)
    }

    fn prices(entries: &[(&str, Decimal)]) -> PriceMap {
        entries.iter().map(|(s, p)| (s.to_string(), *p)).collect()
    }

    fn buy(
        engine: &mut TradingEngine,
        symbol: &str,
        side: Side,
        qty: Decimal,
        price: Decimal,
    ) -> Trade {
        engine
            .execute_trade(TradeRequest::new(symbol, side, qty, price))
            .unwrap()
    }

    // ============================================================================
    // Construction
    // ============================================================================

    #[test]
    fn test_fresh_engine() {
        let engine = engine_with(dec!(25000));

        assert_eq!(engine.cash(), dec!(25000));
        assert_eq!(engine.initial_cash(), dec!(25000));
        assert!(engine.positions().is_empty());
        assert!(engine.trade_history().is_empty());
        assert_eq!(engine.portfolio_history().len(), 1);
        assert_eq!(engine.total_portfolio_value(&PriceMap::new()), dec!(25000));
    }

    #[test]
    fn test_corrupt_blob_starts_fresh() {
        let mut store = MemoryStore::new();
        store.put(KEY, b"{\"cash\": \"oops\"").unwrap();

        let engine = TradingEngine::open(Box::new(store), &account(dec!(1000)), KEY);

        assert_eq!(engine.cash(), dec!(1000));
        assert!(engine.positions().is_empty());
        assert_eq!(engine.portfolio_history().len(), 1);
    }

    #[test]
    fn test_invalid_stored_state_starts_fresh() {
        let mut state = LedgerState::fresh(dec!(500));
        state.cash = dec!(-1);
        let mut store = MemoryStore::new();
        store.put(KEY, &serde_json::to_vec(&state).unwrap()).unwrap();

        let engine = TradingEngine::open(Box::new(store), &account(dec!(1000)), KEY);
        assert_eq!(engine.cash(), dec!(1000));
    }

    #[test]
    fn test_open_trims_oversized_history() {
        let mut state = LedgerState::fresh(dec!(1000));
        for _ in 0..10 {
            state.portfolio_history.push_back(state.portfolio_history[0].clone());
        }
        let mut store = MemoryStore::new();
        store.put(KEY, &serde_json::to_vec(&state).unwrap()).unwrap();

        let config = AccountConfig {
            initial_cash: dec!(1000),
            snapshot_limit: 4,
        };
        let engine = TradingEngine::open(Box::new(store), &config, KEY);
        assert_eq!(engine.portfolio_history().len(), 4);
    }

    #[test]
    fn test_from_config_memory_backend() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        config.account.initial_cash = dec!(777);

        let engine = TradingEngine::from_config(&config).unwrap();
        assert_eq!(engine.cash(), dec!(777));
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        config.account.initial_cash = dec!(0);

        assert!(matches!(
            TradingEngine::from_config(&config),
            Err(EngineError::Config(_))
        ));
    }

    // ============================================================================
    // execute_trade
    // ============================================================================

    #[test]
    fn test_buy_deducts_cash_and_opens_position() {
        let mut engine = engine_with(dec!(10000));
        let trade = buy(&mut engine, "aapl", Side::Long, dec!(10), dec!(150));

        assert_eq!(trade.symbol, "AAPL");
        assert_eq!(trade.realized_pnl, None);
        assert_eq!(engine.cash(), dec!(8500));
        assert_eq!(engine.positions().len(), 1);

        let pos = &engine.positions()[0];
        assert_eq!(pos.symbol, "AAPL");
        assert_eq!(pos.quantity, dec!(10));
        assert_eq!(pos.average_price, dec!(150));
        assert_eq!(pos.side, Side::Long);
        assert_eq!(engine.trade_history().len(), 1);
    }

    #[test]
    fn test_short_also_deducts_cash() {
        let mut engine = engine_with(dec!(1000));
        buy(&mut engine, "MSFT", Side::Short, dec!(2), dec!(300));
        assert_eq!(engine.cash(), dec!(400));
    }

    #[test]
    fn test_conservation_at_entry_prices() {
        let mut engine = engine_with(dec!(25000));
        buy(&mut engine, "AAPL", Side::Long, dec!(10), dec!(150));
        buy(&mut engine, "TSLA", Side::Short, dec!(5), dec!(200));
        buy(&mut engine, "AAPL", Side::Long, dec!(3), dec!(155.5));

        // Total value is unchanged by trades when marked at entry
        assert_eq!(engine.total_portfolio_value(&PriceMap::new()), dec!(25000));
    }

    #[test]
    fn test_insufficient_funds_leaves_state_unchanged() {
        let mut engine = engine_with(dec!(1000));
        buy(&mut engine, "AAPL", Side::Long, dec!(5), dec!(100));
        let before = engine.state().clone();

        let err = engine
            .execute_trade(TradeRequest::new("AAPL", Side::Long, dec!(6), dec!(100)))
            .unwrap_err();

        match err {
            EngineError::InsufficientFunds { required, available } => {
                assert_eq!(required, dec!(600));
                assert_eq!(available, dec!(500));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(engine.state(), &before);
    }

    #[test]
    fn test_exact_cash_is_allowed() {
        let mut engine = engine_with(dec!(1000));
        buy(&mut engine, "AAPL", Side::Long, dec!(10), dec!(100));
        assert_eq!(engine.cash(), dec!(0));
    }

    #[test]
    fn test_averaging_into_position() {
        let mut engine = engine_with(dec!(10000));
        buy(&mut engine, "AAPL", Side::Long, dec!(10), dec!(100));
        let original = engine.positions()[0].clone();

        buy(&mut engine, "AAPL", Side::Long, dec!(10), dec!(200));

        assert_eq!(engine.positions().len(), 1);
        let pos = &engine.positions()[0];
        assert_eq!(pos.quantity, dec!(20));
        assert_eq!(pos.average_price, dec!(150));
        assert_eq!(pos.id, original.id);
        assert_eq!(pos.opened_at, original.opened_at);
        assert_eq!(engine.trade_history().len(), 2);
    }

    #[test]
    fn test_sides_are_independent_positions() {
        let mut engine = engine_with(dec!(10000));
        buy(&mut engine, "AAPL", Side::Long, dec!(10), dec!(100));
        buy(&mut engine, "AAPL", Side::Short, dec!(5), dec!(110));

        assert_eq!(engine.positions().len(), 2);
        assert_eq!(engine.find_position("aapl", Side::Long).unwrap().quantity, dec!(10));
        assert_eq!(engine.find_position("AAPL", Side::Short).unwrap().quantity, dec!(5));
    }

    #[test]
    fn test_trade_history_newest_first() {
        let mut engine = engine_with(dec!(10000));
        buy(&mut engine, "AAPL", Side::Long, dec!(1), dec!(100));
        buy(&mut engine, "MSFT", Side::Long, dec!(1), dec!(100));

        assert_eq!(engine.trade_history()[0].symbol, "MSFT");
        assert_eq!(engine.trade_history()[1].symbol, "AAPL");
    }

    #[test]
    fn test_invalid_requests_rejected() {
        let mut engine = engine_with(dec!(10000));

        assert!(matches!(
            engine.execute_trade(TradeRequest::new("AAPL", Side::Long, dec!(0), dec!(100))),
            Err(EngineError::InvalidQuantity(_))
        ));
        assert!(matches!(
            engine.execute_trade(TradeRequest::new("AAPL", Side::Long, dec!(-1), dec!(100))),
            Err(EngineError::InvalidQuantity(_))
        ));
        assert!(matches!(
            engine.execute_trade(TradeRequest::new("AAPL", Side::Long, dec!(1), dec!(0))),
            Err(EngineError::InvalidPrice(_))
        ));
        assert!(matches!(
            engine.execute_trade(TradeRequest::new("  ", Side::Long, dec!(1), dec!(10))),
            Err(EngineError::EmptySymbol)
        ));
        assert!(matches!(
            engine.execute_trade(
                TradeRequest::new("AAPL", Side::Long, dec!(1), dec!(10)).with_stop_loss(dec!(-5))
            ),
            Err(EngineError::InvalidPrice(_))
        ));

        assert_eq!(engine.cash(), dec!(10000));
        assert!(engine.trade_history().is_empty());
    }

    #[test]
    fn test_trade_keeps_levels_and_notes() {
        let mut engine = engine_with(dec!(10000));
        let trade = engine
            .execute_trade(
                TradeRequest::new("NVDA", Side::Long, dec!(2), dec!(400))
                    .with_stop_loss(dec!(380))
                    .with_take_profit(dec!(450))
                    .with_notes("breakout"),
            )
            .unwrap();

        assert_eq!(trade.stop_loss, Some(dec!(380)));
        assert_eq!(trade.take_profit, Some(dec!(450)));
        assert_eq!(trade.notes, "breakout");
    }

    // ============================================================================
    // close_position
    // ============================================================================

    #[test]
    fn test_open_then_close_scenario() {
        let mut engine = engine_with(dec!(25000));
        buy(&mut engine, "TSLA", Side::Long, dec!(10), dec!(200));
        assert_eq!(engine.cash(), dec!(23000));

        let id = engine.positions()[0].id;
        let closed = engine.close_position(id, dec!(220)).unwrap();

        assert_eq!(engine.cash(), dec!(25200));
        assert!(engine.positions().is_empty());
        assert_eq!(closed.proceeds, dec!(2200));
        assert_eq!(closed.realized_pnl, dec!(200));

        let latest = &engine.trade_history()[0];
        assert_eq!(latest.side, Side::Short);
        assert_eq!(latest.quantity, dec!(10));
        assert_eq!(latest.price, dec!(220));
        assert_eq!(latest.realized_pnl, Some(dec!(200)));
        assert_eq!(engine.trade_history().len(), 2);
    }

    #[test]
    fn test_close_short_credits_market_value() {
        let mut engine = engine_with(dec!(1000));
        buy(&mut engine, "XYZ", Side::Short, dec!(5), dec!(100));
        let id = engine.positions()[0].id;

        let closed = engine.close_position(id, dec!(90)).unwrap();

        // Proceeds are quantity x price for either side
        assert_eq!(closed.proceeds, dec!(450));
        assert_eq!(closed.realized_pnl, dec!(50));
        assert_eq!(closed.trade.side, Side::Long);
        assert_eq!(engine.cash(), dec!(950));
    }

    #[test]
    fn test_close_unknown_position() {
        let mut engine = engine_with(dec!(1000));
        buy(&mut engine, "AAPL", Side::Long, dec!(1), dec!(100));
        let before = engine.state().clone();

        let missing = Uuid::new_v4();
        assert!(matches!(
            engine.close_position(missing, dec!(100)),
            Err(EngineError::PositionNotFound(id)) if id == missing
        ));
        assert_eq!(engine.state(), &before);
    }

    #[test]
    fn test_close_twice_fails_second_time() {
        let mut engine = engine_with(dec!(1000));
        buy(&mut engine, "AAPL", Side::Long, dec!(1), dec!(100));
        let id = engine.positions()[0].id;

        engine.close_position(id, dec!(100)).unwrap();
        assert!(engine.close_position(id, dec!(100)).is_err());
        assert_eq!(engine.cash(), dec!(1000));
    }

    #[test]
    fn test_close_rejects_non_positive_price() {
        let mut engine = engine_with(dec!(1000));
        buy(&mut engine, "AAPL", Side::Long, dec!(1), dec!(100));
        let id = engine.positions()[0].id;

        assert!(matches!(
            engine.close_position(id, dec!(0)),
            Err(EngineError::InvalidPrice(_))
        ));
        assert_eq!(engine.positions().len(), 1);
    }

    #[test]
    fn test_overflowing_trade_cost_is_rejected() {
        let mut engine = engine_with(dec!(25000));
        let before = engine.state().clone();
        let huge = Decimal::new(1_000_000_000_000_000, 0);

        let result = engine.execute_trade(TradeRequest::new("X", Side::Long, huge, huge));

        assert!(matches!(
            result,
            Err(EngineError::InsufficientFunds { required, available })
                if required == Decimal::MAX && available == dec!(25000)
        ));
        assert_eq!(engine.state(), &before);
    }

    #[test]
    fn test_close_at_overflowing_price_is_rejected() {
        let mut engine = engine_with(dec!(1000));
        buy(&mut engine, "X", Side::Long, dec!(10), dec!(100));
        let before = engine.state().clone();
        let id = engine.positions()[0].id;

        assert!(matches!(
            engine.close_position(id, Decimal::MAX),
            Err(EngineError::InvalidInput(_))
        ));
        assert_eq!(engine.state(), &before);
    }

    // ============================================================================
    // Valuation
    // ============================================================================

    #[test]
    fn test_valuation_with_live_and_stale_prices() {
        let mut engine = engine_with(dec!(10000));
        buy(&mut engine, "AAPL", Side::Long, dec!(10), dec!(100));
        buy(&mut engine, "TSLA", Side::Short, dec!(5), dec!(200));
        let live = prices(&[("AAPL", dec!(110))]);

        // TSLA has no live price and is valued at entry
        assert_eq!(engine.positions_value(&live), dec!(2100));
        assert_eq!(engine.total_portfolio_value(&live), dec!(10100));
        assert_eq!(engine.total_unrealized_pl(&live), dec!(100));
        assert_eq!(engine.total_return(&live), dec!(100));
        assert_eq!(engine.total_return_percent(&live), dec!(1));
    }

    #[test]
    fn test_unrealized_pl_by_side() {
        let mut engine = engine_with(dec!(10000));
        buy(&mut engine, "AAPL", Side::Long, dec!(10), dec!(100));
        buy(&mut engine, "TSLA", Side::Short, dec!(10), dec!(100));

        let long = engine.find_position("AAPL", Side::Long).unwrap().clone();
        let short = engine.find_position("TSLA", Side::Short).unwrap().clone();

        assert_eq!(engine.unrealized_pl(&long, dec!(90)), dec!(-100));
        assert_eq!(engine.unrealized_pl(&short, dec!(90)), dec!(100));
        assert_eq!(engine.unrealized_pl_percent(&long, dec!(90)), dec!(-10));
        assert_eq!(engine.unrealized_pl_percent(&short, dec!(90)), dec!(10));
    }

    #[test]
    fn test_summary_after_round_trip() {
        let mut engine = engine_with(dec!(10000));
        buy(&mut engine, "AAPL", Side::Long, dec!(10), dec!(100));
        let id = engine.positions()[0].id;
        engine.close_position(id, dec!(120)).unwrap();
        buy(&mut engine, "MSFT", Side::Long, dec!(1), dec!(300));

        let summary = engine.summary(&prices(&[("MSFT", dec!(310))]));
        assert_eq!(summary.realized_pnl, dec!(200));
        assert_eq!(summary.unrealized_pnl, dec!(10));
        assert_eq!(summary.total_value, dec!(10210));
        assert_eq!(summary.trade_count, 3);
        assert_eq!(summary.closed_trades, 1);
        assert_eq!(summary.win_rate, dec!(1));
        assert_eq!(summary.open_positions, 1);
    }

    #[test]
    fn test_huge_live_price_saturates_valuation() {
        let mut engine = engine_with(dec!(1000));
        buy(&mut engine, "X", Side::Long, dec!(10), dec!(10));
        let live = prices(&[("X", Decimal::MAX)]);

        assert_eq!(engine.positions_value(&live), Decimal::MAX);
        assert_eq!(engine.total_portfolio_value(&live), Decimal::MAX);
        assert_eq!(engine.total_unrealized_pl(&live), Decimal::MAX);
        assert!(engine.total_return_percent(&live) > dec!(0));
        assert_eq!(engine.summary(&live).total_value, Decimal::MAX);

        let snapshot = engine.update_portfolio_snapshot(&live);
        assert_eq!(snapshot.total_value, Decimal::MAX);
        assert_eq!(snapshot.cash, dec!(900));
        assert_eq!(engine.portfolio_history().len(), 2);
    }

    // ============================================================================
    // Snapshots and reset
    // ============================================================================

    #[test]
    fn test_snapshot_records_current_value() {
        let mut engine = engine_with(dec!(10000));
        buy(&mut engine, "AAPL", Side::Long, dec!(10), dec!(100));

        let snap = engine.update_portfolio_snapshot(&prices(&[("AAPL", dec!(105))]));
        assert_eq!(snap.cash, dec!(9000));
        assert_eq!(snap.positions_value, dec!(1050));
        assert_eq!(snap.total_value, dec!(10050));
        assert_eq!(engine.portfolio_history().len(), 2);
        assert_eq!(engine.portfolio_history().back(), Some(&snap));
    }

    #[test]
    fn test_snapshot_window_keeps_newest() {
        let mut engine = engine_with(dec!(25000));
        let ids: Vec<Uuid> = (0..400)
            .map(|_| engine.update_portfolio_snapshot(&PriceMap::new()).id)
            .collect();

        // The fresh snapshot plus the first 35 appended are evicted
        let kept: Vec<Uuid> = engine.portfolio_history().iter().map(|s| s.id).collect();
        assert_eq!(kept.len(), 365);
        assert_eq!(kept, ids[35..].to_vec());
    }

    #[test]
    fn test_reset_portfolio() {
        let mut engine = engine_with(dec!(5000));
        buy(&mut engine, "AAPL", Side::Long, dec!(10), dec!(100));
        engine.update_portfolio_snapshot(&PriceMap::new());

        engine.reset_portfolio();

        assert_eq!(engine.cash(), dec!(5000));
        assert!(engine.positions().is_empty());
        assert!(engine.trade_history().is_empty());
        assert_eq!(engine.portfolio_history().len(), 1);
        assert_eq!(engine.portfolio_history()[0].total_value, dec!(5000));
    }

    // ============================================================================
    // Persistence
    // ============================================================================

    #[test]
    fn test_state_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let before = {
            let mut engine = TradingEngine::open(
                Box::new(FileStore::single_file(&path)),
                &account(dec!(25000)),
                KEY,
            );
            buy(&mut engine, "AAPL", Side::Long, dec!(3), dec!(123.45));
            buy(&mut engine, "AAPL", Side::Long, dec!(2), dec!(130));
            engine
                .execute_trade(
                    TradeRequest::new("TSLA", Side::Short, dec!(1), dec!(250))
                        .with_stop_loss(dec!(275))
                        .with_take_profit(dec!(200))
                        .with_notes("fade the gap"),
                )
                .unwrap();
            buy(&mut engine, "MSFT", Side::Long, dec!(2), dec!(400));
            let msft = engine.find_position("MSFT", Side::Long).unwrap().id;
            engine.close_position(msft, dec!(410.5)).unwrap();
            engine.update_portfolio_snapshot(&prices(&[("AAPL", dec!(128))]));
            engine.state().clone()
        };

        let engine = TradingEngine::open(
            Box::new(FileStore::single_file(&path)),
            &account(dec!(25000)),
            KEY,
        );

        assert_eq!(engine.state(), &before);
        assert_eq!(engine.trade_history()[0].realized_pnl, Some(dec!(21)));
        assert_eq!(engine.trade_history()[2].notes, "fade the gap");
        assert_eq!(engine.trade_history()[2].stop_loss, Some(dec!(275)));
        assert_eq!(engine.positions()[0].average_price, dec!(126.07));
    }

    #[test]
    fn test_fresh_engine_is_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let _engine = TradingEngine::open(
            Box::new(FileStore::single_file(&path)),
            &account(dec!(100)),
            KEY,
        );

        assert!(path.exists());
    }

    #[test]
    fn test_persist_failure_keeps_memory_state() {
        let mut store = MockLedgerStore::new();
        store.expect_get().returning(|_| Ok(None));
        store
            .expect_put()
            .returning(|_, _| Err(EngineError::Storage("disk full".to_string())));

        let mut engine = TradingEngine::open(Box::new(store), &account(dec!(1000)), KEY);
        let trade = engine
            .execute_trade(TradeRequest::new("AAPL", Side::Long, dec!(2), dec!(100)))
            .unwrap();

        assert_eq!(trade.quantity, dec!(2));
        assert_eq!(engine.cash(), dec!(800));
        assert_eq!(engine.positions().len(), 1);
        assert!(engine.save().is_err());
    }

    #[test]
    fn test_read_failure_starts_fresh() {
        let mut store = MockLedgerStore::new();
        store
            .expect_get()
            .returning(|_| Err(EngineError::Storage("unavailable".to_string())));
        // The saved ledger may still be intact; opening must not replace it
        store.expect_put().times(0);

        let engine = TradingEngine::open(Box::new(store), &account(dec!(1000)), KEY);
        assert_eq!(engine.cash(), dec!(1000));
    }

    #[test]
    fn test_corrupt_blob_is_not_overwritten_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{\"cash\": \"oops\"").unwrap();

        let mut engine = TradingEngine::open(
            Box::new(FileStore::single_file(&path)),
            &account(dec!(1000)),
            KEY,
        );
        assert_eq!(engine.cash(), dec!(1000));
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"cash\": \"oops\"".to_vec());

        // The next mutation takes over the key
        buy(&mut engine, "AAPL", Side::Long, dec!(1), dec!(100));
        let saved = load(&FileStore::single_file(&path), KEY).unwrap().unwrap();
        assert_eq!(saved.cash, dec!(900));
    }

    #[test]
    fn test_every_mutation_writes_blob() {
        let mut store = MockLedgerStore::new();
        store.expect_get().returning(|_| Ok(None));
        // fresh open, trade, close, snapshot, reset
        store
            .expect_put()
            .withf(|key, bytes| key == KEY && !bytes.is_empty())
            .times(5)
            .returning(|_, _| Ok(()));

        let mut engine = TradingEngine::open(Box::new(store), &account(dec!(1000)), KEY);
        buy(&mut engine, "AAPL", Side::Long, dec!(1), dec!(100));
        let id = engine.positions()[0].id;
        engine.close_position(id, dec!(101)).unwrap();
        engine.update_portfolio_snapshot(&PriceMap::new());
        engine.reset_portfolio();
    }

    // ============================================================================
    // Audit trail
    // ============================================================================

    #[test]
    fn test_audit_records_mutations() {
        let dir = tempdir().unwrap();
        let audit_path = dir.path().join("audit.jsonl");

        let mut engine = engine_with(dec!(1000)).with_audit(AuditLog::new(&audit_path));
        buy(&mut engine, "AAPL", Side::Long, dec!(2), dec!(100));
        let id = engine.positions()[0].id;
        engine.close_position(id, dec!(110)).unwrap();
        engine.reset_portfolio();

        let entries = AuditLog::new(&audit_path).read_all().unwrap();
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].action, AuditAction::Trade);
        assert_eq!(entries[0].cash_before, dec!(1000));
        assert_eq!(entries[0].cash_after, dec!(800));

        assert_eq!(entries[1].action, AuditAction::Close);
        assert_eq!(entries[1].side, Some(Side::Short));
        assert_eq!(entries[1].pnl, Some(dec!(20)));
        assert_eq!(entries[1].cash_after, dec!(1020));

        assert_eq!(entries[2].action, AuditAction::Reset);
        assert_eq!(entries[2].cash_after, dec!(1000));
    }

    // ============================================================================
    // Exits
    // ============================================================================

    #[test]
    fn test_stop_loss_triggers_on_long() {
        let mut engine = engine_with(dec!(10000));
        engine
            .execute_trade(
                TradeRequest::new("AAPL", Side::Long, dec!(10), dec!(100))
                    .with_stop_loss(dec!(95))
                    .with_take_profit(dec!(120)),
            )
            .unwrap();

        assert!(engine.exit_triggers(&prices(&[("AAPL", dec!(100))])).is_empty());

        let triggers = engine.exit_triggers(&prices(&[("AAPL", dec!(94))]));
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].reason, ExitReason::StopLoss);
        assert_eq!(triggers[0].level, dec!(95));

        let closed = engine.apply_exit_triggers(&prices(&[("AAPL", dec!(94))]));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].1.realized_pnl, dec!(-60));
        assert!(engine.positions().is_empty());
        assert_eq!(engine.cash(), dec!(9940));
        assert!(engine.trade_history()[0].notes.contains("STOP_LOSS"));
    }

    #[test]
    fn test_take_profit_triggers_on_short() {
        let mut engine = engine_with(dec!(10000));
        engine
            .execute_trade(
                TradeRequest::new("TSLA", Side::Short, dec!(5), dec!(200))
                    .with_take_profit(dec!(180)),
            )
            .unwrap();

        assert!(engine.exit_triggers(&prices(&[("TSLA", dec!(210))])).is_empty());

        let triggers = engine.exit_triggers(&prices(&[("TSLA", dec!(179))]));
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].reason, ExitReason::TakeProfit);
    }

    #[test]
    fn test_exits_skip_missing_prices() {
        let mut engine = engine_with(dec!(10000));
        engine
            .execute_trade(
                TradeRequest::new("AAPL", Side::Long, dec!(1), dec!(100)).with_stop_loss(dec!(99)),
            )
            .unwrap();

        assert!(engine.apply_exit_triggers(&PriceMap::new()).is_empty());
        assert_eq!(engine.positions().len(), 1);
    }

    #[test]
    fn test_newest_level_wins_after_averaging() {
        let mut engine = engine_with(dec!(10000));
        engine
            .execute_trade(
                TradeRequest::new("AAPL", Side::Long, dec!(1), dec!(100)).with_stop_loss(dec!(90)),
            )
            .unwrap();
        engine
            .execute_trade(
                TradeRequest::new("AAPL", Side::Long, dec!(1), dec!(110))
                    .with_stop_loss(dec!(100)),
            )
            .unwrap();

        let position = engine.positions()[0].clone();
        let (stop, take) = protective_levels(&position, engine.trade_history());
        assert_eq!(stop, Some(dec!(100)));
        assert_eq!(take, None);
    }

    // ============================================================================
    // SharedEngine
    // ============================================================================

    #[test]
    fn test_shared_engine_across_threads() {
        let shared = SharedEngine::new(engine_with(dec!(10000)));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        shared
                            .with(|e| {
                                e.execute_trade(TradeRequest::new(
                                    "AAPL",
                                    Side::Long,
                                    dec!(1),
                                    dec!(10),
                                ))
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let engine = shared.lock();
        assert_eq!(engine.cash(), dec!(9800));
        assert_eq!(engine.positions()[0].quantity, dec!(20));
        assert_eq!(engine.trade_history().len(), 20);
    }
}
