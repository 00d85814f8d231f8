use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tracing::info;

use matchbook::config::Config;
use matchbook::{Direction, MatchingEngine, Order};

/// Feeds a randomized order flow through the engine and reports the terminal
/// state of every book.
#[derive(Parser)]
#[command(name = "matchbook", about = "Continuous double-auction matching engine demo")]
struct Args {
    /// Orders submitted per instrument.
    #[arg(long, default_value_t = 50)]
    orders: usize,

    /// Seed for the demo order flow.
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Print the full JSON snapshot of every book at the end.
    #[arg(long)]
    dump: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = Config::from_env();
    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut engine = MatchingEngine::with_idle_wait(config.worker_idle);
    engine.run();

    let mut submitted = 0usize;
    let mut cancel_candidates: Vec<(String, u64, Direction)> = Vec::new();
    for instrument in &config.instruments {
        for _ in 0..args.orders {
            let direction = if rng.gen_bool(0.5) {
                Direction::Buy
            } else {
                Direction::Sell
            };
            let quantity = rng.gen_range(1..=10) * 10;
            let order = if rng.gen_bool(0.1) {
                Order::market(instrument.clone(), direction, quantity)?
            } else {
                let price = Decimal::from(rng.gen_range(95i64..=105));
                Order::limit(instrument.clone(), direction, quantity, price)
            };
            let order_id = engine.add_order(order)?;
            submitted += 1;
            if rng.gen_bool(0.15) {
                cancel_candidates.push((instrument.clone(), order_id, direction));
            }
        }
    }
    for (instrument, order_id, direction) in cancel_candidates {
        engine.add_order(Order::cancel(instrument, order_id, direction))?;
        submitted += 1;
    }
    info!(submitted, "order flow submitted");

    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.processed_orders().len() < submitted && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    engine.stop();

    for instrument in &config.instruments {
        let Some(snapshot) = engine.order_book(instrument) else {
            continue;
        };
        info!(
            instrument = %snapshot.instrument_id,
            trades = snapshot.trades.len(),
            complete_orders = snapshot.complete_orders.len(),
            resting_bids = snapshot.bids.len() + usize::from(snapshot.best_bid.is_some()),
            resting_asks = snapshot.asks.len() + usize::from(snapshot.best_ask.is_some()),
            "book state after drain"
        );
        if args.dump {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }
    Ok(())
}
