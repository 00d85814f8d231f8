//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module defines the core data types used throughout the matching engine:
// the order direction/type/status enums, the order sum type with its Limit, Market
// and Cancel shapes, and the Trade record produced by each crossing.
//
// | Section            | Description                                                      |
// |--------------------|------------------------------------------------------------------|
// | ENUMS              | Discrete sets of values (Direction, OrderType, OrderStatus).     |
// | STRUCTS            | BookOrder, CancelRequest and Trade.                              |
// | ORDER SUM          | The Order enum tying the three submission shapes together.       |
// | ERRORS             | EngineError, the library-wide error enum.                        |
// | TESTS              | Unit tests for construction and fill accounting.                 |
//--------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Opaque symbol identifier for a traded instrument.
pub type InstrumentId = String;

/// Order identifier, unique within a process run. Assigned by the engine for
/// Limit/Market orders; supplied by the submitter on a Cancel, where it names
/// the target order.
pub type OrderId = u64;

/// Price sentinel carried by Market Buy orders so that placement can compare
/// Limit and Market orders uniformly. Never used as an execution price.
pub const MARKET_BUY_PRICE: Decimal = Decimal::MAX;

/// Price sentinel carried by Market Sell orders. Never used as an execution price.
pub const MARKET_SELL_PRICE: Decimal = Decimal::ZERO;

/// The side of the market an order wants to trade on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// An order to purchase the instrument.
    Buy,
    /// An order to sell the instrument.
    Sell,
    /// A reserved tag that no normal constructor produces; it exists so the
    /// direction-validation error path can be exercised.
    Invalid,
}

/// How a resting order constrains its price.
///
/// Cancels are not an `OrderType`: a cancel is a request addressed at a resting
/// order, carried by its own [`CancelRequest`] shape inside [`Order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OrderType {
    /// Executes at the limit price or better.
    Limit,
    /// Executes at whatever the market offers; carries a price sentinel so
    /// placement treats it like an infinitely aggressive limit order.
    Market,
}

/// Lifecycle status of an order. Transitions are Live -> Filled or
/// Live -> Cancelled, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OrderStatus {
    /// In the book (or on its way there) with unfilled quantity remaining.
    Live,
    /// Completely executed; unfilled quantity is zero.
    Filled,
    /// Removed before complete execution.
    Cancelled,
}

/// One execution between a crossing bid and ask.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    /// Unique identifier for the trade.
    pub id: Uuid,
    /// When the crossing happened.
    pub executed_at: DateTime<Utc>,
    /// Execution price, the midpoint of the crossing tops (the limit side's
    /// price when the other side is a market order).
    pub price: Decimal,
    /// Executed quantity, always positive.
    pub quantity: u64,
}

impl Trade {
    pub fn new(price: Decimal, quantity: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            executed_at: Utc::now(),
            price,
            quantity,
        }
    }
}

/// A Limit or Market order as it rests in (or sweeps through) a book.
///
/// Identity fields are set at construction; the fill state (`unfilled_quantity`,
/// `status`, `fill_info`) mutates as the match loop executes against it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookOrder {
    /// The instrument this order trades.
    pub instrument_id: InstrumentId,
    /// Engine-assigned identifier; zero until the order is submitted.
    pub order_id: OrderId,
    /// Buy or Sell.
    pub direction: Direction,
    /// Limit or Market.
    pub order_type: OrderType,
    /// Limit price, or the market sentinel for Market orders.
    pub price: Decimal,
    /// Original size, strictly positive.
    pub quantity: u64,
    /// Remaining size; `0 <= unfilled_quantity <= quantity`.
    pub unfilled_quantity: u64,
    /// Live, Filled or Cancelled.
    pub status: OrderStatus,
    /// Trades that partially or fully filled this order, in fill order.
    pub fill_info: Vec<Trade>,
    /// Arrival number assigned by the book, used for time priority.
    pub sequence_id: u64,
}

impl BookOrder {
    fn new(
        instrument_id: InstrumentId,
        direction: Direction,
        order_type: OrderType,
        quantity: u64,
        price: Decimal,
    ) -> Self {
        Self {
            instrument_id,
            order_id: 0,
            direction,
            order_type,
            price,
            quantity,
            unfilled_quantity: quantity,
            status: OrderStatus::Live,
            fill_info: Vec::new(),
            sequence_id: 0,
        }
    }

    /// Records a trade against this order.
    ///
    /// Appends the trade to `fill_info`, reduces `unfilled_quantity` and marks
    /// the order Filled once nothing remains. A trade with non-positive
    /// quantity, or one larger than the remaining quantity, violates the fill
    /// accounting and is reported as [`EngineError::InvariantViolation`].
    pub fn update_on_trade(&mut self, trade: &Trade) -> EngineResult<()> {
        if trade.quantity == 0 {
            return Err(EngineError::InvariantViolation {
                order_id: self.order_id,
                detail: "trade quantity must be positive".to_string(),
            });
        }
        if trade.quantity > self.unfilled_quantity {
            return Err(EngineError::InvariantViolation {
                order_id: self.order_id,
                detail: format!(
                    "trade quantity {} exceeds unfilled quantity {}",
                    trade.quantity, self.unfilled_quantity
                ),
            });
        }

        self.fill_info.push(trade.clone());
        self.unfilled_quantity -= trade.quantity;
        if self.unfilled_quantity == 0 {
            self.status = OrderStatus::Filled;
        }
        Ok(())
    }

    /// Returns true while the order still has quantity to trade.
    pub fn is_live(&self) -> bool {
        self.status == OrderStatus::Live
    }
}

/// A request to remove a previously submitted resting order.
///
/// `order_id` names the target, not the request itself. A cancel never rests
/// in a book; `cancel_success` reports whether a live target was found and
/// removed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancelRequest {
    /// The instrument whose book is searched.
    pub instrument_id: InstrumentId,
    /// Identifier of the order to cancel.
    pub order_id: OrderId,
    /// Side of the book to search; cancels only look at their own side.
    pub direction: Direction,
    /// Whether a live resting order was found and cancelled.
    pub cancel_success: bool,
}

/// An order submission: a resting Limit order, an immediately aggressive
/// Market order, or a Cancel addressed at an earlier order. All three share
/// the `(instrument_id, order_id, direction)` header exposed by the accessors
/// below.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Order {
    Limit(BookOrder),
    Market(BookOrder),
    Cancel(CancelRequest),
}

impl Order {
    /// Creates a Limit order at the given price. The order id is assigned by
    /// the engine on submission.
    pub fn limit(
        instrument_id: impl Into<InstrumentId>,
        direction: Direction,
        quantity: u64,
        price: Decimal,
    ) -> Order {
        Order::Limit(BookOrder::new(
            instrument_id.into(),
            direction,
            OrderType::Limit,
            quantity,
            price,
        ))
    }

    /// Creates a Market order. The price sentinel depends on the direction,
    /// so a direction other than Buy or Sell is rejected here.
    pub fn market(
        instrument_id: impl Into<InstrumentId>,
        direction: Direction,
        quantity: u64,
    ) -> EngineResult<Order> {
        let price = match direction {
            Direction::Buy => MARKET_BUY_PRICE,
            Direction::Sell => MARKET_SELL_PRICE,
            Direction::Invalid => return Err(EngineError::InvalidOrderDirection),
        };
        Ok(Order::Market(BookOrder::new(
            instrument_id.into(),
            direction,
            OrderType::Market,
            quantity,
            price,
        )))
    }

    /// Creates a Cancel for the order identified by `target_order_id` on the
    /// given side of the instrument's book.
    pub fn cancel(
        instrument_id: impl Into<InstrumentId>,
        target_order_id: OrderId,
        direction: Direction,
    ) -> Order {
        Order::Cancel(CancelRequest {
            instrument_id: instrument_id.into(),
            order_id: target_order_id,
            direction,
            cancel_success: false,
        })
    }

    pub fn instrument_id(&self) -> &InstrumentId {
        match self {
            Order::Limit(o) | Order::Market(o) => &o.instrument_id,
            Order::Cancel(c) => &c.instrument_id,
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            Order::Limit(o) | Order::Market(o) => o.order_id,
            Order::Cancel(c) => c.order_id,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Order::Limit(o) | Order::Market(o) => o.direction,
            Order::Cancel(c) => c.direction,
        }
    }
}

impl From<BookOrder> for Order {
    fn from(order: BookOrder) -> Self {
        match order.order_type {
            OrderType::Limit => Order::Limit(order),
            OrderType::Market => Order::Market(order),
        }
    }
}

/// Errors surfaced by the matching engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The order direction is neither Buy nor Sell. Recoverable: the order is
    /// rejected and never enqueued.
    #[error("order direction must be Buy or Sell")]
    InvalidOrderDirection,

    /// Fill accounting was violated. Fatal: this indicates a bug, aborts the
    /// current batch and terminates the processing worker.
    #[error("invariant violation on order {order_id}: {detail}")]
    InvariantViolation { order_id: OrderId, detail: String },
}

/// Type alias for Result with EngineError.
pub type EngineResult<T> = Result<T, EngineError>;
