//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements the limit order book for a single instrument. Resting
// orders live on two price-time priority sides; the best order of each side is
// held outside its container so the match loop works on a pair of owned handles.
//
// | Component     | Description                                                               |
// |---------------|---------------------------------------------------------------------------|
// | BookSide      | One side of the book: price levels with FIFO queues per level             |
// | OrderBook     | Placement, cancellation and the crossing/match loop                       |
// | Snapshot      | OrderBookSnapshot, the read-only view handed to observers                 |
//
//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name              | Description                                        | Key Methods          |
// |-------------------|----------------------------------------------------|----------------------|
// | BookSide          | Priority-sorted resting orders on one side         | enqueue, requeue     |
// |                   |                                                    | pop_top, remove      |
// |-------------------|----------------------------------------------------|----------------------|
// | OrderBook         | Per-instrument book                                | apply, match_orders  |
// |                   |                                                    | snapshot, order      |
// |-------------------|----------------------------------------------------|----------------------|
// | OrderBookSnapshot | Cloned view of the book state                      |                      |
//--------------------------------------------------------------------------------------------------

use std::collections::{BTreeMap, VecDeque};

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::types::{
    BookOrder, CancelRequest, Direction, EngineError, EngineResult, InstrumentId, Order, OrderId,
    OrderStatus, OrderType, Trade,
};

/// One side of an order book: resting orders grouped into price levels, FIFO
/// within each level.
///
/// The most eager order of the side is *not* stored here; the owning
/// [`OrderBook`] keeps it in a best-of-side slot and promotes from this
/// container when the slot empties.
#[derive(Debug)]
pub struct BookSide {
    /// Which direction rests here; decides whether the top is the highest
    /// (bids) or lowest (asks) price level.
    direction: Direction,
    /// Price levels keyed by price, each a FIFO queue of resting orders.
    levels: BTreeMap<Decimal, VecDeque<BookOrder>>,
}

impl BookSide {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            levels: BTreeMap::new(),
        }
    }

    /// Inserts an order behind every resident at its price level.
    pub fn enqueue(&mut self, order: BookOrder) {
        self.levels.entry(order.price).or_default().push_back(order);
    }

    /// Inserts an order ahead of every resident at its price level.
    ///
    /// Used when a best-of-side order is demoted by a more aggressive arrival:
    /// the demoted order predates everything resting at its price, so it
    /// re-enters at the level front.
    pub fn requeue(&mut self, order: BookOrder) {
        self.levels
            .entry(order.price)
            .or_default()
            .push_front(order);
    }

    /// Removes and returns the most eager resting order: the front of the
    /// highest price level for bids, of the lowest for asks.
    pub fn pop_top(&mut self) -> Option<BookOrder> {
        let price = self.top_price()?;
        let level = self.levels.get_mut(&price)?;
        let order = level.pop_front();
        if level.is_empty() {
            self.levels.remove(&price);
        }
        order
    }

    /// Removes the resting order with the given id, wherever it sits.
    pub fn remove(&mut self, order_id: OrderId) -> Option<BookOrder> {
        let mut location = None;
        for (price, level) in self.levels.iter() {
            if let Some(position) = level.iter().position(|o| o.order_id == order_id) {
                location = Some((*price, position));
                break;
            }
        }
        let (price, position) = location?;
        let level = self.levels.get_mut(&price)?;
        let order = level.remove(position);
        if level.is_empty() {
            self.levels.remove(&price);
        }
        order
    }

    /// Resting orders in priority order: best price first, FIFO within a price.
    pub fn orders(&self) -> Vec<&BookOrder> {
        let levels: Box<dyn Iterator<Item = (&Decimal, &VecDeque<BookOrder>)> + '_> =
            match self.direction {
                Direction::Buy => Box::new(self.levels.iter().rev()),
                _ => Box::new(self.levels.iter()),
            };
        levels.flat_map(|(_, level)| level.iter()).collect()
    }

    pub fn len(&self) -> usize {
        self.levels.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    fn top_price(&self) -> Option<Decimal> {
        match self.direction {
            Direction::Buy => self.levels.keys().next_back().copied(),
            _ => self.levels.keys().next().copied(),
        }
    }
}

/// The execution price for a crossing pair of tops.
///
/// Limit against Limit trades at the midpoint of the two prices. When one side
/// is a Market order its sentinel price carries no information, so the limit
/// side's price is used instead. Market against Market has no price of its
/// own; the book's last trade price stands in when one exists, otherwise no
/// price can be formed and the crossing is deferred.
fn execution_price(
    bid: &BookOrder,
    ask: &BookOrder,
    last_trade_price: Option<Decimal>,
) -> Option<Decimal> {
    match (bid.order_type, ask.order_type) {
        (OrderType::Limit, OrderType::Limit) => Some((bid.price + ask.price) / Decimal::TWO),
        (OrderType::Market, OrderType::Limit) => Some(ask.price),
        (OrderType::Limit, OrderType::Market) => Some(bid.price),
        (OrderType::Market, OrderType::Market) => last_trade_price,
    }
}

/// A limit order book for a single instrument.
///
/// Owns the two resting sides, the cached best-of-side handles, the
/// `attempt_match` hint consumed by the match loop, and the append-only trade
/// and completion logs.
#[derive(Debug)]
pub struct OrderBook {
    /// The instrument this book manages.
    instrument_id: InstrumentId,
    /// Resting buy orders below the best bid.
    bids: BookSide,
    /// Resting sell orders above the best ask.
    asks: BookSide,
    /// The buy order first in line to execute.
    best_bid: Option<BookOrder>,
    /// The sell order first in line to execute.
    best_ask: Option<BookOrder>,
    /// Set whenever an event may have created a cross; cleared by the match
    /// loop once no further progress is possible.
    attempt_match: bool,
    /// Every trade executed on this book, in temporal order.
    trades: Vec<Trade>,
    /// Orders that left the book as Filled or Cancelled.
    complete_orders: Vec<BookOrder>,
    /// Arrival counter handed to placed orders for time priority.
    next_sequence_id: u64,
}

impl OrderBook {
    pub fn new(instrument_id: InstrumentId) -> Self {
        Self {
            instrument_id,
            bids: BookSide::new(Direction::Buy),
            asks: BookSide::new(Direction::Sell),
            best_bid: None,
            best_ask: None,
            attempt_match: false,
            trades: Vec::new(),
            complete_orders: Vec::new(),
            next_sequence_id: 1,
        }
    }

    /// Applies one submission to the book: places a Limit/Market order or
    /// executes a Cancel, then runs the match loop.
    ///
    /// Returns the processed order reflecting its state after any crossings
    /// this submission triggered. A direction other than Buy or Sell is
    /// rejected before the book is touched.
    pub fn apply(&mut self, order: Order) -> EngineResult<Order> {
        if !matches!(order.direction(), Direction::Buy | Direction::Sell) {
            return Err(EngineError::InvalidOrderDirection);
        }
        match order {
            Order::Limit(book_order) | Order::Market(book_order) => {
                let order_id = book_order.order_id;
                self.place(book_order)?;
                self.match_orders()?;
                let processed = self.order(order_id).cloned().ok_or_else(|| {
                    EngineError::InvariantViolation {
                        order_id,
                        detail: "placed order missing from book and completion log".to_string(),
                    }
                })?;
                Ok(Order::from(processed))
            }
            Order::Cancel(mut request) => {
                self.cancel(&mut request);
                self.match_orders()?;
                Ok(Order::Cancel(request))
            }
        }
    }

    /// Places an order on its side without running the match loop;
    /// [`apply`](Self::apply) is the usual entry point.
    ///
    /// An empty best-of-side slot is taken directly. A strictly more
    /// aggressive arrival demotes the current best back into the container;
    /// anything else rests behind its price level. Only a new best can create
    /// a cross, so only that path raises `attempt_match`.
    pub fn place(&mut self, mut order: BookOrder) -> EngineResult<()> {
        if !matches!(order.direction, Direction::Buy | Direction::Sell) {
            return Err(EngineError::InvalidOrderDirection);
        }
        order.sequence_id = self.next_sequence_id;
        self.next_sequence_id += 1;

        let (best, side) = match order.direction {
            Direction::Buy => (&mut self.best_bid, &mut self.bids),
            _ => (&mut self.best_ask, &mut self.asks),
        };
        match best.take() {
            None => {
                *best = Some(order);
                self.attempt_match = true;
            }
            Some(top) => {
                let more_aggressive = match order.direction {
                    Direction::Buy => order.price > top.price,
                    _ => order.price < top.price,
                };
                if more_aggressive {
                    side.requeue(top);
                    *best = Some(order);
                    self.attempt_match = true;
                } else {
                    *best = Some(top);
                    side.enqueue(order);
                }
            }
        }
        Ok(())
    }

    /// Executes a cancel against the same side of the book.
    ///
    /// A best-of-side target is removed and the next resting order promoted;
    /// a deeper target is removed in place. An absent or non-live target is a
    /// silent no-op and leaves `cancel_success` false.
    fn cancel(&mut self, request: &mut CancelRequest) {
        let (best, side) = match request.direction {
            Direction::Buy => (&mut self.best_bid, &mut self.bids),
            _ => (&mut self.best_ask, &mut self.asks),
        };

        let target_is_best = best
            .as_ref()
            .is_some_and(|o| o.order_id == request.order_id && o.is_live());
        if target_is_best {
            if let Some(mut top) = best.take() {
                top.status = OrderStatus::Cancelled;
                request.cancel_success = true;
                *best = side.pop_top();
                self.attempt_match = true;
                debug!(
                    instrument = %self.instrument_id,
                    order_id = top.order_id,
                    "best-of-side order cancelled"
                );
                self.complete_orders.push(top);
            }
        } else if let Some(mut resting) = side.remove(request.order_id) {
            resting.status = OrderStatus::Cancelled;
            request.cancel_success = true;
            debug!(
                instrument = %self.instrument_id,
                order_id = resting.order_id,
                "resting order cancelled"
            );
            self.complete_orders.push(resting);
        }
    }

    /// Runs the match loop until the tops no longer cross.
    ///
    /// Each iteration trades the minimum unfilled quantity of the two tops at
    /// the execution price of the pair, then promotes replacements for
    /// whichever side(s) were exhausted. `attempt_match` is clear once the
    /// loop exits.
    pub fn match_orders(&mut self) -> EngineResult<()> {
        loop {
            if !self.attempt_match {
                break;
            }
            let last_trade_price = self.trades.last().map(|t| t.price);
            let (Some(bid), Some(ask)) = (self.best_bid.as_mut(), self.best_ask.as_mut()) else {
                break;
            };
            self.attempt_match = false;

            if bid.price < ask.price {
                break;
            }
            let Some(price) = execution_price(bid, ask, last_trade_price) else {
                break;
            };
            let quantity = bid.unfilled_quantity.min(ask.unfilled_quantity);
            let trade = Trade::new(price, quantity);
            bid.update_on_trade(&trade)?;
            ask.update_on_trade(&trade)?;
            debug!(
                instrument = %self.instrument_id,
                price = %trade.price,
                quantity = trade.quantity,
                "trade executed"
            );
            self.trades.push(trade);

            if self.best_bid.as_ref().is_some_and(|o| !o.is_live()) {
                if let Some(done) = self.best_bid.take() {
                    self.complete_orders.push(done);
                }
                self.best_bid = self.bids.pop_top();
                self.attempt_match = true;
            }
            if self.best_ask.as_ref().is_some_and(|o| !o.is_live()) {
                if let Some(done) = self.best_ask.take() {
                    self.complete_orders.push(done);
                }
                self.best_ask = self.asks.pop_top();
                self.attempt_match = true;
            }
        }
        self.attempt_match = false;
        Ok(())
    }

    /// Finds an order by id across the best slots, both sides and the
    /// completion log. Ids are unique under engine allocation; the first match
    /// wins.
    pub fn order(&self, order_id: OrderId) -> Option<&BookOrder> {
        self.best_bid
            .as_ref()
            .filter(|o| o.order_id == order_id)
            .or_else(|| self.best_ask.as_ref().filter(|o| o.order_id == order_id))
            .or_else(|| {
                self.bids
                    .orders()
                    .into_iter()
                    .find(|o| o.order_id == order_id)
            })
            .or_else(|| {
                self.asks
                    .orders()
                    .into_iter()
                    .find(|o| o.order_id == order_id)
            })
            .or_else(|| {
                self.complete_orders
                    .iter()
                    .rev()
                    .find(|o| o.order_id == order_id)
            })
    }

    pub fn instrument_id(&self) -> &InstrumentId {
        &self.instrument_id
    }

    pub fn bids(&self) -> &BookSide {
        &self.bids
    }

    pub fn asks(&self) -> &BookSide {
        &self.asks
    }

    pub fn best_bid(&self) -> Option<&BookOrder> {
        self.best_bid.as_ref()
    }

    pub fn best_ask(&self) -> Option<&BookOrder> {
        self.best_ask.as_ref()
    }

    pub fn attempt_match(&self) -> bool {
        self.attempt_match
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn complete_orders(&self) -> &[BookOrder] {
        &self.complete_orders
    }

    /// Clones the current book state into a read-only view.
    pub fn snapshot(&self) -> OrderBookSnapshot {
        OrderBookSnapshot {
            instrument_id: self.instrument_id.clone(),
            bids: self.bids.orders().into_iter().cloned().collect(),
            asks: self.asks.orders().into_iter().cloned().collect(),
            best_bid: self.best_bid.clone(),
            best_ask: self.best_ask.clone(),
            trades: self.trades.clone(),
            complete_orders: self.complete_orders.clone(),
            attempt_match: self.attempt_match,
        }
    }
}

/// A cloned, read-only view of one book, safe to hand to observers while the
/// engine keeps mutating the live book.
#[derive(Debug, Clone, Serialize)]
pub struct OrderBookSnapshot {
    pub instrument_id: InstrumentId,
    /// Resting bids below the best, in priority order.
    pub bids: Vec<BookOrder>,
    /// Resting asks above the best, in priority order.
    pub asks: Vec<BookOrder>,
    pub best_bid: Option<BookOrder>,
    pub best_ask: Option<BookOrder>,
    pub trades: Vec<Trade>,
    pub complete_orders: Vec<BookOrder>,
    pub attempt_match: bool,
}
