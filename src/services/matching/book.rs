//! In-memory order book index for one ticker.
//!
//! Bids and asks are price-keyed ordered maps of FIFO queues, plus an order-id
//! index for cancellation. The book is a derived cache of the store: the
//! matching engine mutates it only after the owning transaction commits, and
//! rebuilds it from the store on startup.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

use super::types::{BookEntry, BookLevel, BookOrderView, PriceLevel};
use crate::models::OrderSide;

pub struct Book {
    /// Best bid is the highest key.
    bids: RwLock<BTreeMap<PriceLevel, VecDeque<BookEntry>>>,
    /// Best ask is the lowest key.
    asks: RwLock<BTreeMap<PriceLevel, VecDeque<BookEntry>>>,
    /// order_id -> (side, level) for O(log n) cancel and reduce.
    index: DashMap<Uuid, (OrderSide, PriceLevel)>,
}

impl Default for Book {
    fn default() -> Self {
        Self::new()
    }
}

impl Book {
    pub fn new() -> Self {
        Self {
            bids: RwLock::new(BTreeMap::new()),
            asks: RwLock::new(BTreeMap::new()),
            index: DashMap::new(),
        }
    }

    fn side_map(&self, side: OrderSide) -> &RwLock<BTreeMap<PriceLevel, VecDeque<BookEntry>>> {
        match side {
            OrderSide::Buy => &self.bids,
            OrderSide::Sell => &self.asks,
        }
    }

    pub fn insert(&self, side: OrderSide, entry: BookEntry) {
        let level = entry.price;
        let order_id = entry.order_id;
        self.side_map(side)
            .write()
            .entry(level)
            .or_default()
            .push_back(entry);
        self.index.insert(order_id, (side, level));
    }

    /// Remove an order entirely. Returns the removed entry if present.
    pub fn remove(&self, order_id: Uuid) -> Option<BookEntry> {
        let (side, level) = self.index.remove(&order_id)?.1;
        let mut map = self.side_map(side).write();
        let queue = map.get_mut(&level)?;
        let pos = queue.iter().position(|e| e.order_id == order_id)?;
        let entry = queue.remove(pos);
        if queue.is_empty() {
            map.remove(&level);
        }
        entry
    }

    /// Reduce an order's remaining quantity, removing it when it reaches zero.
    /// Returns false if the order is not in the book.
    pub fn reduce(&self, order_id: Uuid, by: i64) -> bool {
        let Some(pair) = self.index.get(&order_id).map(|r| *r) else {
            return false;
        };
        let (side, level) = pair;
        let mut map = self.side_map(side).write();
        let Some(queue) = map.get_mut(&level) else {
            return false;
        };
        let Some(pos) = queue.iter().position(|e| e.order_id == order_id) else {
            return false;
        };
        let remaining = queue[pos].remaining - by;
        if remaining > 0 {
            queue[pos].remaining = remaining;
        } else {
            queue.remove(pos);
            if queue.is_empty() {
                map.remove(&level);
            }
            drop(map);
            self.index.remove(&order_id);
        }
        true
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.read().keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.read().keys().next().copied()
    }

    pub fn contains(&self, order_id: Uuid) -> bool {
        self.index.contains_key(&order_id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// True if the best bid crosses the best ask. Must never hold after a
    /// submit returns.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => false,
        }
    }

    /// Opposing resting orders a taker could fill against, in price-time
    /// order, limited to entries whose price crosses `limit` and stopping once
    /// `max_qty` is covered. Returns clones; the book itself is not mutated.
    pub fn matchable(
        &self,
        taker_side: OrderSide,
        limit: Option<PriceLevel>,
        max_qty: i64,
    ) -> Vec<BookEntry> {
        let mut out = Vec::new();
        let mut covered = 0_i64;

        match taker_side {
            OrderSide::Buy => {
                let asks = self.asks.read();
                for (level, queue) in asks.iter() {
                    if let Some(limit) = limit {
                        if *level > limit {
                            break;
                        }
                    }
                    for entry in queue {
                        out.push(entry.clone());
                        covered += entry.remaining;
                        if covered >= max_qty {
                            return out;
                        }
                    }
                }
            }
            OrderSide::Sell => {
                let bids = self.bids.read();
                for (level, queue) in bids.iter().rev() {
                    if let Some(limit) = limit {
                        if *level < limit {
                            break;
                        }
                    }
                    for entry in queue {
                        out.push(entry.clone());
                        covered += entry.remaining;
                        if covered >= max_qty {
                            return out;
                        }
                    }
                }
            }
        }
        out
    }

    /// Top `depth` levels per side with summed quantities.
    pub fn aggregate(&self, depth: usize) -> (Vec<BookLevel>, Vec<BookLevel>) {
        let bids = {
            let map = self.bids.read();
            map.iter()
                .rev()
                .take(depth)
                .map(|(level, queue)| BookLevel {
                    price: level.to_decimal(),
                    quantity: queue.iter().map(|e| e.remaining).sum(),
                    orders: queue.len(),
                })
                .collect()
        };
        let asks = {
            let map = self.asks.read();
            map.iter()
                .take(depth)
                .map(|(level, queue)| BookLevel {
                    price: level.to_decimal(),
                    quantity: queue.iter().map(|e| e.remaining).sum(),
                    orders: queue.len(),
                })
                .collect()
        };
        (bids, asks)
    }

    /// Every resting order per side in priority order, for the admin view.
    pub fn orders_view(&self) -> (Vec<BookOrderView>, Vec<BookOrderView>) {
        let view = |entry: &BookEntry| BookOrderView {
            order_id: entry.order_id,
            account_id: entry.account_id,
            price: entry.price.to_decimal(),
            remaining: entry.remaining,
            seq: entry.seq,
        };
        let bids = self
            .bids
            .read()
            .iter()
            .rev()
            .flat_map(|(_, queue)| queue.iter().map(view))
            .collect();
        let asks = self
            .asks
            .read()
            .iter()
            .flat_map(|(_, queue)| queue.iter().map(view))
            .collect();
        (bids, asks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(price: rust_decimal::Decimal, remaining: i64, seq: i64) -> BookEntry {
        BookEntry {
            order_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            price: PriceLevel::from_decimal(price).unwrap(),
            remaining,
            seq,
        }
    }

    #[test]
    fn insert_and_remove() {
        let book = Book::new();
        let e = entry(dec!(100), 5, 1);
        let id = e.order_id;
        book.insert(OrderSide::Buy, e);
        assert_eq!(book.len(), 1);
        assert!(book.contains(id));

        let removed = book.remove(id).unwrap();
        assert_eq!(removed.remaining, 5);
        assert!(book.is_empty());
        assert!(book.best_bid().is_none());
    }

    #[test]
    fn best_prices() {
        let book = Book::new();
        book.insert(OrderSide::Buy, entry(dec!(100), 1, 1));
        book.insert(OrderSide::Buy, entry(dec!(101), 1, 2));
        book.insert(OrderSide::Sell, entry(dec!(102), 1, 3));
        book.insert(OrderSide::Sell, entry(dec!(103), 1, 4));

        assert_eq!(book.best_bid().unwrap().to_decimal(), dec!(101));
        assert_eq!(book.best_ask().unwrap().to_decimal(), dec!(102));
        assert!(!book.is_crossed());
    }

    #[test]
    fn reduce_removes_at_zero() {
        let book = Book::new();
        let e = entry(dec!(100), 5, 1);
        let id = e.order_id;
        book.insert(OrderSide::Sell, e);

        assert!(book.reduce(id, 3));
        assert!(book.contains(id));
        assert!(book.reduce(id, 2));
        assert!(!book.contains(id));
        assert!(book.best_ask().is_none());
    }

    #[test]
    fn matchable_respects_price_and_fifo() {
        let book = Book::new();
        let first = entry(dec!(100), 5, 1);
        let second = entry(dec!(100), 5, 2);
        let worse = entry(dec!(101), 5, 3);
        let first_id = first.order_id;
        book.insert(OrderSide::Sell, first);
        book.insert(OrderSide::Sell, second);
        book.insert(OrderSide::Sell, worse);

        // Limit below 101 only reaches the 100 level, FIFO within it.
        let hits = book.matchable(
            OrderSide::Buy,
            PriceLevel::from_decimal(dec!(100)),
            100,
        );
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].order_id, first_id);

        // Quantity bound stops the walk early.
        let hits = book.matchable(OrderSide::Buy, None, 4);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].order_id, first_id);

        // Unbounded walks all three levels.
        let hits = book.matchable(OrderSide::Buy, None, 100);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[2].price.to_decimal(), dec!(101));
    }

    #[test]
    fn aggregate_sums_levels() {
        let book = Book::new();
        book.insert(OrderSide::Buy, entry(dec!(100), 1, 1));
        book.insert(OrderSide::Buy, entry(dec!(100), 2, 2));
        book.insert(OrderSide::Sell, entry(dec!(102), 4, 3));

        let (bids, asks) = book.aggregate(10);
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].quantity, 3);
        assert_eq!(bids[0].orders, 2);
        assert_eq!(asks[0].quantity, 4);
    }
}
