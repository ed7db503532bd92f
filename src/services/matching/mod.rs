//! Order matching with price-time priority.
//!
//! ```text
//! API handler
//!   -> MatchingEngine (per-ticker write lock)
//!        -> store transaction: pre-checks, fills, settlement, order rows
//!        -> Book (in-memory index, mutated after commit)
//! ```

mod book;
mod engine;
mod types;

pub use book::Book;
pub use engine::{MatchingEngine, TickerBook, TREASURY_ACCOUNT_ID};
pub use types::{
    BookEntry, BookLevel, BookOrderView, BookSnapshot, ExchangeError, Fill, PriceLevel,
    SubmitOutcome,
};
