//! End-to-end scenarios driving the public engine surface, plus the
//! bookkeeping invariants that must hold after every drain.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use matchbook::{
    Direction, MatchingEngine, Order, OrderBook, OrderBookSnapshot, OrderStatus, OrderType,
};

/// Ten alternating limit orders: sells at 10 - i for even i, buys at 10 + i
/// for odd i. The two sides cross completely.
fn crossing_orders(instrument_id: &str, quantity: impl Fn(u64) -> u64) -> Vec<Order> {
    (0..10u64)
        .map(|i| {
            if i % 2 == 0 {
                Order::limit(
                    instrument_id,
                    Direction::Sell,
                    quantity(i),
                    Decimal::from(10 - i as i64),
                )
            } else {
                Order::limit(
                    instrument_id,
                    Direction::Buy,
                    quantity(i),
                    Decimal::from(10 + i as i64),
                )
            }
        })
        .collect()
}

/// Quantity conservation: everything submitted is accounted for by fills
/// (twice per trade, once per side), live remainders and cancelled remainders.
fn assert_conservation(snapshot: &OrderBookSnapshot) {
    let resting = snapshot
        .bids
        .iter()
        .chain(snapshot.asks.iter())
        .chain(snapshot.best_bid.iter())
        .chain(snapshot.best_ask.iter());
    let seen_quantity: u64 = resting
        .clone()
        .chain(snapshot.complete_orders.iter())
        .map(|o| o.quantity)
        .sum();

    let traded: u64 = snapshot.trades.iter().map(|t| t.quantity).sum();
    let live_unfilled: u64 = resting.map(|o| o.unfilled_quantity).sum();
    let cancelled_unfilled: u64 = snapshot
        .complete_orders
        .iter()
        .filter(|o| o.status == OrderStatus::Cancelled)
        .map(|o| o.unfilled_quantity)
        .sum();

    assert_eq!(
        seen_quantity,
        traded * 2 + live_unfilled + cancelled_unfilled,
        "quantity conservation violated for {}",
        snapshot.instrument_id
    );
}

/// At rest the book must not cross, and each best-of-side slot must dominate
/// its container.
fn assert_at_rest(snapshot: &OrderBookSnapshot) {
    assert!(!snapshot.attempt_match);
    if let (Some(best_bid), Some(best_ask)) = (&snapshot.best_bid, &snapshot.best_ask) {
        // A Market pair on a book with no trade yet has no price to execute
        // at and waits; every other top pairing must not cross at rest.
        let deferred = best_bid.order_type == OrderType::Market
            && best_ask.order_type == OrderType::Market;
        assert!(
            best_bid.price < best_ask.price || deferred,
            "book {} crossed at rest",
            snapshot.instrument_id
        );
    }
    if let Some(best_bid) = &snapshot.best_bid {
        assert!(snapshot.bids.iter().all(|o| o.price <= best_bid.price));
    }
    if let Some(best_ask) = &snapshot.best_ask {
        assert!(snapshot.asks.iter().all(|o| o.price >= best_ask.price));
    }
    for order in snapshot.bids.iter().chain(snapshot.asks.iter()) {
        assert_eq!(order.status, OrderStatus::Live);
        assert!(order.unfilled_quantity > 0);
    }
    for order in &snapshot.complete_orders {
        assert_ne!(order.status, OrderStatus::Live);
    }
}

#[test]
fn s1_full_cross_alternating_arrival() {
    let engine = MatchingEngine::new();
    for order in crossing_orders("AAPL", |_| 100) {
        engine.add_order(order).expect("submission should succeed");
    }
    engine.match_orders().expect("matching should succeed");

    let snapshot = engine.order_book("AAPL").expect("book exists");
    assert_eq!(snapshot.trades.len(), 5);
    assert_eq!(snapshot.complete_orders.len(), 10);
    assert!(snapshot.bids.is_empty());
    assert!(snapshot.asks.is_empty());
    assert!(snapshot.best_bid.is_none());
    assert!(snapshot.best_ask.is_none());
    assert!(!snapshot.attempt_match);
    assert_conservation(&snapshot);
}

#[test]
fn s2_no_cross_rests_both_sides() {
    let engine = MatchingEngine::new();
    for i in 0..10u64 {
        // Price offsets inverted relative to S1: the sides drift apart.
        let order = if i % 2 == 0 {
            Order::limit("AAPL", Direction::Sell, 100, Decimal::from(10 + i as i64))
        } else {
            Order::limit("AAPL", Direction::Buy, 100, Decimal::from(10 - i as i64))
        };
        engine.add_order(order).expect("submission should succeed");
    }
    engine.match_orders().expect("matching should succeed");

    let snapshot = engine.order_book("AAPL").expect("book exists");
    assert!(snapshot.trades.is_empty());
    assert_eq!(snapshot.bids.len(), 4);
    assert_eq!(snapshot.asks.len(), 4);
    let best_bid = snapshot.best_bid.as_ref().expect("best bid present");
    let best_ask = snapshot.best_ask.as_ref().expect("best ask present");
    assert!(best_bid.price < best_ask.price);
    assert_at_rest(&snapshot);
    assert_conservation(&snapshot);
}

#[test]
fn s3_partial_fills_with_shrinking_quantities() {
    // Batch placement exercises the multi-promotion path of one match pass.
    let mut book = OrderBook::new("AAPL".to_string());
    for (i, order) in crossing_orders("AAPL", |i| 100 - 10 * i).into_iter().enumerate() {
        let Order::Limit(mut book_order) = order else {
            panic!("expected limit orders");
        };
        book_order.order_id = i as u64 + 1;
        book.place(book_order).expect("place should succeed");
    }
    book.match_orders().expect("matching should succeed");

    assert!(book.trades().len() > 5);
    assert!(book.complete_orders().len() < 10);
    // One side must run completely dry.
    assert!(book.bids().is_empty() && book.best_bid().is_none());
    let snapshot = book.snapshot();
    assert_at_rest(&snapshot);
    assert_conservation(&snapshot);
}

#[test]
fn s4_market_sell_sweeps_the_ladder() {
    let engine = MatchingEngine::new();
    let quantities = [100u64, 90, 80, 70, 60];
    for (i, quantity) in quantities.into_iter().enumerate() {
        engine
            .add_order(Order::limit(
                "AAPL",
                Direction::Buy,
                quantity,
                Decimal::from(10 + i as i64),
            ))
            .expect("submission should succeed");
    }
    engine
        .add_order(Order::market("AAPL", Direction::Sell, 400).expect("valid direction"))
        .expect("submission should succeed");
    engine.match_orders().expect("matching should succeed");

    let snapshot = engine.order_book("AAPL").expect("book exists");
    assert_eq!(snapshot.trades.len(), 5);
    assert_eq!(snapshot.complete_orders.len(), 6);
    assert!(snapshot.bids.is_empty());
    assert!(snapshot.best_bid.is_none());

    let sweep = snapshot
        .complete_orders
        .iter()
        .find(|o| o.direction == Direction::Sell)
        .expect("market sell completed");
    assert_eq!(sweep.status, OrderStatus::Filled);
    assert_eq!(
        sweep.fill_info.iter().map(|t| t.quantity).sum::<u64>(),
        400
    );
    assert_conservation(&snapshot);
}

#[test]
fn s5_multi_instrument_isolation() {
    let engine = MatchingEngine::new();
    for order in crossing_orders("AAPL", |_| 100)
        .into_iter()
        .chain(crossing_orders("MSFT", |_| 100))
    {
        engine.add_order(order).expect("submission should succeed");
    }
    engine.match_orders().expect("matching should succeed");

    assert_eq!(
        engine.instruments(),
        vec!["AAPL".to_string(), "MSFT".to_string()]
    );
    for instrument in ["AAPL", "MSFT"] {
        let snapshot = engine.order_book(instrument).expect("book exists");
        assert_eq!(snapshot.trades.len(), 5);
        assert_eq!(snapshot.complete_orders.len(), 10);
        assert!(snapshot.bids.is_empty());
        assert!(snapshot.asks.is_empty());
        assert_conservation(&snapshot);
    }
}

#[test]
fn s6_cancel_top_of_book() {
    let engine = MatchingEngine::new();
    let order_id = engine
        .add_order(Order::limit("AAPL", Direction::Buy, 100, dec!(10)))
        .expect("submission should succeed");
    engine.match_orders().expect("matching should succeed");

    engine
        .add_order(Order::cancel("AAPL", order_id, Direction::Buy))
        .expect("submission should succeed");
    engine.match_orders().expect("matching should succeed");

    let snapshot = engine.order_book("AAPL").expect("book exists");
    assert!(snapshot.best_bid.is_none());
    assert!(snapshot.trades.is_empty());
    assert_eq!(snapshot.complete_orders.len(), 1);
    assert_eq!(snapshot.complete_orders[0].status, OrderStatus::Cancelled);

    let processed = engine.processed_orders();
    let Some(Order::Cancel(request)) = processed.last() else {
        panic!("expected the cancel to be logged last");
    };
    assert!(request.cancel_success);
    assert_conservation(&snapshot);
}

#[test]
fn cancel_of_absent_target_reports_failure() {
    let engine = MatchingEngine::new();
    engine
        .add_order(Order::cancel("AAPL", 41, Direction::Sell))
        .expect("submission should succeed");
    engine.match_orders().expect("matching should succeed");

    let processed = engine.processed_orders();
    let Some(Order::Cancel(request)) = processed.last() else {
        panic!("expected the cancel to be logged");
    };
    assert!(!request.cancel_success);
    // The cancel still created (an empty) book on first sight of the symbol.
    let snapshot = engine.order_book("AAPL").expect("book exists");
    assert!(snapshot.complete_orders.is_empty());
}

#[test]
fn randomized_flow_preserves_invariants() {
    let mut rng = StdRng::seed_from_u64(1729);
    let engine = MatchingEngine::new();
    let instruments = ["AAPL", "MSFT", "TSLA"];

    let mut live_ids: Vec<(String, u64, Direction)> = Vec::new();
    for _ in 0..400 {
        let instrument = instruments[rng.gen_range(0..instruments.len())];
        let direction = if rng.gen_bool(0.5) {
            Direction::Buy
        } else {
            Direction::Sell
        };
        if rng.gen_bool(0.1) && !live_ids.is_empty() {
            let (instrument, order_id, direction) =
                live_ids.swap_remove(rng.gen_range(0..live_ids.len()));
            engine
                .add_order(Order::cancel(instrument, order_id, direction))
                .expect("submission should succeed");
        } else if rng.gen_bool(0.1) {
            let quantity = rng.gen_range(1..=20) * 5;
            engine
                .add_order(Order::market(instrument, direction, quantity).expect("valid"))
                .expect("submission should succeed");
        } else {
            let quantity = rng.gen_range(1..=20) * 5;
            let price = Decimal::from(rng.gen_range(90i64..=110));
            let order_id = engine
                .add_order(Order::limit(instrument, direction, quantity, price))
                .expect("submission should succeed");
            live_ids.push((instrument.to_string(), order_id, direction));
        }
    }
    engine.match_orders().expect("matching should succeed");

    for instrument in instruments {
        let snapshot = engine.order_book(instrument).expect("book exists");
        assert_at_rest(&snapshot);
        assert_conservation(&snapshot);
    }
}
