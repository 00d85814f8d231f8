//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// This module implements the engine that routes orders to per-instrument books.
// Producers push submissions onto an MPSC queue; a single worker (or a
// synchronous drain) consumes them in arrival order, creating books lazily and
// driving each book's match loop.
//
// | Component       | Description                                                             |
// |-----------------|-------------------------------------------------------------------------|
// | IdAllocator     | Engine-scoped monotonically increasing order id source                  |
// | MatchingEngine  | Inbound queue, keyed order books, processed log, worker lifecycle       |
//
//--------------------------------------------------------------------------------------------------
// FUNCTIONS
//--------------------------------------------------------------------------------------------------
// | Name              | Description                                       | Return Type          |
// |-------------------|---------------------------------------------------|----------------------|
// | add_order         | Validates, assigns an id and enqueues             | EngineResult<OrderId>|
// | match_orders      | Synchronously drains and processes the queue      | EngineResult<usize>  |
// | run / stop        | Background worker lifecycle                       | ()                   |
// | order_book        | Read-only snapshot of one book                    | Option<Snapshot>     |
//--------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::RwLock;
use tracing::{debug, error, info};

use crate::orderbook::{OrderBook, OrderBookSnapshot};
use crate::types::{Direction, EngineError, EngineResult, InstrumentId, Order, OrderId};

/// How long the worker waits on an empty queue before re-checking the live
/// flag.
const DEFAULT_IDLE_WAIT: Duration = Duration::from_millis(50);

/// Hands out order ids, monotonically increasing from 1.
///
/// Scoped to one engine so id allocation is deterministic per run and
/// independent engines never interfere.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> OrderId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the worker mutates, kept behind one lock so each order's effects
/// become observable atomically.
struct EngineState {
    /// One book per instrument, created on first sight.
    order_books: HashMap<InstrumentId, OrderBook>,
    /// Every order the engine has processed, in processing order. Entries echo
    /// the order's state right after its application, including unmatched
    /// rests and no-op cancels.
    processed_orders: Vec<Order>,
}

impl EngineState {
    fn process(&mut self, order: Order) -> EngineResult<()> {
        let book = self
            .order_books
            .entry(order.instrument_id().clone())
            .or_insert_with_key(|instrument_id| OrderBook::new(instrument_id.clone()));
        let processed = book.apply(order)?;
        debug!(
            instrument = %processed.instrument_id(),
            order_id = processed.order_id(),
            "order processed"
        );
        self.processed_orders.push(processed);
        Ok(())
    }
}

/// Routes orders to per-instrument books and drives their matching.
///
/// Producers may call [`add_order`](Self::add_order) from any thread; exactly
/// one consumer (the background worker, or a caller of
/// [`match_orders`](Self::match_orders)) applies them, strictly in submission
/// order. Submitted orders transfer ownership to the engine; observers get
/// cloned snapshots back.
pub struct MatchingEngine {
    inbound_tx: Sender<Order>,
    inbound_rx: Receiver<Order>,
    state: Arc<RwLock<EngineState>>,
    ids: IdAllocator,
    live: Arc<AtomicBool>,
    idle_wait: Duration,
    worker: Option<JoinHandle<()>>,
}

impl MatchingEngine {
    pub fn new() -> Self {
        Self::with_idle_wait(DEFAULT_IDLE_WAIT)
    }

    /// Creates an engine whose worker re-checks the live flag at the given
    /// interval when the queue is idle.
    pub fn with_idle_wait(idle_wait: Duration) -> Self {
        let (inbound_tx, inbound_rx) = unbounded();
        Self {
            inbound_tx,
            inbound_rx,
            state: Arc::new(RwLock::new(EngineState {
                order_books: HashMap::new(),
                processed_orders: Vec::new(),
            })),
            ids: IdAllocator::new(),
            live: Arc::new(AtomicBool::new(false)),
            idle_wait,
            worker: None,
        }
    }

    /// Submits an order without blocking.
    ///
    /// Limit and Market orders receive their engine-assigned id here; the id
    /// is returned so the submitter can cancel later. For a Cancel the
    /// returned id is the target it names. An order whose direction is
    /// neither Buy nor Sell is rejected and never enqueued.
    pub fn add_order(&self, mut order: Order) -> EngineResult<OrderId> {
        if !matches!(order.direction(), Direction::Buy | Direction::Sell) {
            return Err(EngineError::InvalidOrderDirection);
        }
        let order_id = match &mut order {
            Order::Limit(book_order) | Order::Market(book_order) => {
                book_order.order_id = self.ids.allocate();
                book_order.order_id
            }
            Order::Cancel(request) => request.order_id,
        };
        if self.inbound_tx.send(order).is_err() {
            // Unreachable while the engine holds its receiver.
            error!("inbound queue disconnected");
        }
        Ok(order_id)
    }

    /// Drains the inbound queue and processes every order, in submission
    /// order. Returns how many orders were applied.
    ///
    /// An [`EngineError::InvariantViolation`] aborts the batch and leaves the
    /// remaining queue untouched.
    pub fn match_orders(&self) -> EngineResult<usize> {
        let mut state = self.state.write();
        let mut processed = 0;
        while let Ok(order) = self.inbound_rx.try_recv() {
            state.process(order)?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Starts the background worker. A second call while the worker is alive
    /// is a no-op.
    ///
    /// The worker blocks on the inbound queue with a bounded wait, so an idle
    /// engine consumes no CPU, and exits after finishing its current batch
    /// once [`stop`](Self::stop) clears the live flag. An invariant violation
    /// terminates the worker.
    pub fn run(&mut self) {
        if self.worker.is_some() {
            return;
        }
        self.live.store(true, Ordering::Release);

        let inbound_rx = self.inbound_rx.clone();
        let state = Arc::clone(&self.state);
        let live = Arc::clone(&self.live);
        let idle_wait = self.idle_wait;

        let handle = thread::Builder::new()
            .name("matching-engine".to_string())
            .spawn(move || {
                info!("matching worker started");
                'worker: while live.load(Ordering::Acquire) {
                    match inbound_rx.recv_timeout(idle_wait) {
                        Ok(order) => {
                            let mut state = state.write();
                            if let Err(error) = state.process(order) {
                                error!(%error, "aborting batch, stopping worker");
                                break 'worker;
                            }
                            while let Ok(next) = inbound_rx.try_recv() {
                                if let Err(error) = state.process(next) {
                                    error!(%error, "aborting batch, stopping worker");
                                    break 'worker;
                                }
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("matching worker finished");
            })
            .expect("failed to spawn matching worker");
        self.worker = Some(handle);
    }

    /// Requests termination and waits for the worker to finish its current
    /// batch. Safe to call when the worker was never started.
    pub fn stop(&mut self) {
        self.live.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("matching worker panicked");
            }
        }
    }

    /// Whether the background worker has been asked to keep running.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Orders submitted but not yet processed.
    pub fn pending_orders(&self) -> usize {
        self.inbound_rx.len()
    }

    /// Read-only snapshot of the book for one instrument, if the engine has
    /// seen it.
    pub fn order_book(&self, instrument_id: &str) -> Option<OrderBookSnapshot> {
        self.state
            .read()
            .order_books
            .get(instrument_id)
            .map(OrderBook::snapshot)
    }

    /// The instruments with a book, sorted.
    pub fn instruments(&self) -> Vec<InstrumentId> {
        let mut instruments: Vec<InstrumentId> =
            self.state.read().order_books.keys().cloned().collect();
        instruments.sort();
        instruments
    }

    /// Every processed order, in processing order.
    pub fn processed_orders(&self) -> Vec<Order> {
        self.state.read().processed_orders.clone()
    }
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MatchingEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
