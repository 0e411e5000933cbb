//! Paper Ledger CLI
//!
//! Drives a persistent paper-trading account from the command line.

use clap::{Parser, Subcommand};
use paper_ledger::{
    config::Config,
    engine::{SharedEngine, TradingEngine},
    error::EngineError,
    feed::{price_map_from_args, JsonFilePrices, PriceFeed},
    types::{PriceMap, Side, TradeRequest},
};
use rust_decimal::Decimal;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "paper-ledger")]
#[command(about = "Persistent paper-trading account")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "paper_ledger.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show cash, positions and returns
    Status {
        /// Live price as SYMBOL=PRICE, repeatable
        #[arg(long = "price")]
        prices: Vec<String>,
    },
    /// Open or add to a position
    Trade {
        symbol: String,
        /// long | short
        side: Side,
        quantity: Decimal,
        price: Decimal,
        #[arg(long)]
        stop_loss: Option<Decimal>,
        #[arg(long)]
        take_profit: Option<Decimal>,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Close a whole position
    Close {
        position_id: Uuid,
        price: Decimal,
    },
    /// Record a portfolio snapshot
    Snapshot {
        #[arg(long = "price")]
        prices: Vec<String>,
    },
    /// Show recent trades
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Wipe the account back to starting cash
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
    /// Poll a price file, snapshot and auto-close until Ctrl-C
    Watch {
        /// JSON object of SYMBOL -> price
        #[arg(long)]
        prices: String,
        /// Seconds between refreshes (defaults to config)
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let engine = TradingEngine::from_config(&config)?;

    if let Err(e) = run(cli.command, &config, engine).await {
        // Rejected requests are reported plainly; anything else bubbles up
        match e.downcast_ref::<EngineError>() {
            Some(rejected) if rejected.is_user_actionable() => {
                eprintln!("❌ {}", rejected);
                std::process::exit(2);
            }
            _ => return Err(e),
        }
    }
    Ok(())
}

async fn run(command: Commands, config: &Config, mut engine: TradingEngine) -> anyhow::Result<()> {
    match command {
        Commands::Status { prices } => show_status(&engine, &price_map_from_args(&prices)?),
        Commands::Trade {
            symbol,
            side,
            quantity,
            price,
            stop_loss,
            take_profit,
            notes,
        } => {
            let mut request = TradeRequest::new(symbol, side, quantity, price).with_notes(notes);
            if let Some(level) = stop_loss {
                request = request.with_stop_loss(level);
            }
            if let Some(level) = take_profit {
                request = request.with_take_profit(level);
            }
            let trade = engine.execute_trade(request)?;
            println!(
                "✅ {} {} {} @ ${:.2} (trade {})",
                trade.side, trade.quantity, trade.symbol, trade.price, trade.id
            );
            println!("Cash: ${:.2}", engine.cash());
            Ok(())
        }
        Commands::Close { position_id, price } => {
            let closed = engine.close_position(position_id, price)?;
            let icon = if closed.realized_pnl >= Decimal::ZERO { "🟢" } else { "🔴" };
            println!(
                "{} Closed {} {} x{} @ ${:.2}, P&L ${:.2}",
                icon,
                closed.position.side,
                closed.position.symbol,
                closed.position.quantity,
                price,
                closed.realized_pnl
            );
            println!("Cash: ${:.2}", engine.cash());
            Ok(())
        }
        Commands::Snapshot { prices } => {
            let snapshot = engine.update_portfolio_snapshot(&price_map_from_args(&prices)?);
            println!(
                "📸 {} total ${:.2} (cash ${:.2}, positions ${:.2})",
                snapshot.timestamp.format("%Y-%m-%d %H:%M:%S"),
                snapshot.total_value,
                snapshot.cash,
                snapshot.positions_value
            );
            Ok(())
        }
        Commands::History { limit } => {
            show_history(&engine, limit);
            Ok(())
        }
        Commands::Reset { yes } => {
            if !yes {
                anyhow::bail!("refusing to reset without --yes");
            }
            engine.reset_portfolio();
            println!("♻️ Portfolio reset to ${:.2}", engine.initial_cash());
            Ok(())
        }
        Commands::Watch { prices, interval } => {
            let secs = interval.unwrap_or(config.exits.refresh_interval_secs).max(1);
            watch(
                SharedEngine::new(engine),
                JsonFilePrices::new(prices),
                Duration::from_secs(secs),
                config.exits.auto_close,
            )
            .await
        }
    }
}

fn show_status(engine: &TradingEngine, prices: &PriceMap) -> anyhow::Result<()> {
    let summary = engine.summary(prices);

    println!("\n💰 Paper Account\n");
    println!("Cash:            ${:.2}", summary.cash);
    println!("Positions value: ${:.2}", summary.positions_value);
    println!("Total value:     ${:.2}", summary.total_value);
    println!(
        "Total return:    ${:.2} ({:.2}%)",
        summary.total_value.saturating_sub(summary.initial_cash),
        summary.total_return_pct
    );
    println!("Realized P&L:    ${:.2}", summary.realized_pnl);
    println!("Unrealized P&L:  ${:.2}", summary.unrealized_pnl);
    if summary.closed_trades > 0 {
        println!(
            "Win rate:        {:.1}% of {} closed",
            summary.win_rate * Decimal::ONE_HUNDRED,
            summary.closed_trades
        );
    }

    if engine.positions().is_empty() {
        println!("\nNo open positions");
        return Ok(());
    }

    println!(
        "\n{:<36} {:<8} {:<6} {:>10} {:>10} {:>12} {:>8}",
        "ID", "Symbol", "Side", "Qty", "Avg", "P&L", "P&L %"
    );
    println!("{}", "-".repeat(96));
    for pos in engine.positions() {
        let mark = pos.price_or_entry(prices);
        let stale = if prices.contains_key(&pos.symbol) { "" } else { " *" };
        println!(
            "{:<36} {:<8} {:<6} {:>10} {:>10.2} {:>12.2} {:>7.2}%{}",
            pos.id,
            pos.symbol,
            pos.side.to_string(),
            pos.quantity,
            pos.average_price,
            engine.unrealized_pl(pos, mark),
            engine.unrealized_pl_percent(pos, mark),
            stale
        );
    }
    if engine.positions().iter().any(|p| !prices.contains_key(&p.symbol)) {
        println!("\n* no live price, valued at entry");
    }
    Ok(())
}

fn show_history(engine: &TradingEngine, limit: usize) {
    if engine.trade_history().is_empty() {
        println!("No trades yet");
        return;
    }

    println!("\n📜 Last {} trades\n", limit.min(engine.trade_history().len()));
    for trade in engine.trade_history().iter().take(limit) {
        let pnl = trade
            .realized_pnl
            .map(|p| format!(" P&L ${:.2}", p))
            .unwrap_or_default();
        println!(
            "{} {:<5} {:<8} x{} @ ${:.2} = ${:.2}{} {}",
            trade.executed_at.format("%Y-%m-%d %H:%M:%S"),
            trade.side.to_string(),
            trade.symbol,
            trade.quantity,
            trade.price,
            trade.notional(),
            pnl,
            trade.notes
        );
    }
}

async fn watch(
    engine: SharedEngine,
    feed: JsonFilePrices,
    every: Duration,
    auto_close: bool,
) -> anyhow::Result<()> {
    tracing::info!(
        "👀 Watching {} feed every {:?} (auto-close: {})",
        feed.name(),
        every,
        auto_close
    );

    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let prices = match feed.prices() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!("Price refresh failed: {}", e);
                        continue;
                    }
                };

                let snapshot = engine.with(|e| {
                    if auto_close {
                        e.apply_exit_triggers(&prices);
                    }
                    e.update_portfolio_snapshot(&prices)
                });
                tracing::info!(
                    "📊 Total ${:.2} (cash ${:.2}, positions ${:.2})",
                    snapshot.total_value,
                    snapshot.cash,
                    snapshot.positions_value
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down watcher");
                break;
            }
        }
    }

    if let Err(e) = engine.lock().save() {
        tracing::warn!("Final save failed: {}", e);
    }
    Ok(())
}
