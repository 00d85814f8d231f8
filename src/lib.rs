// Expose the modules
pub mod config;
pub mod matching_engine;
pub mod orderbook;
pub mod types;

// Re-export key types for easier usage
pub use matching_engine::{IdAllocator, MatchingEngine};
pub use orderbook::{BookSide, OrderBook, OrderBookSnapshot};
pub use types::{
    BookOrder, CancelRequest, Direction, EngineError, EngineResult, InstrumentId, Order, OrderId,
    OrderStatus, OrderType, Trade,
};
