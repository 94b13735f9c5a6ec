//! Shared registry of live order books.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use sirocco_book::OrderBook;
use sirocco_core::types::ExchangeId;

/// Map from venue tag to its live order book.
///
/// Workers register their book once it is initialized and unregister on
/// teardown, so the registry reflects the set of initialized books at any
/// moment. A venue that disconnects simply disappears from published
/// output; no last-known state is retained.
#[derive(Debug, Default)]
pub struct BookRegistry {
    books: DashMap<ExchangeId, Arc<OrderBook>>,
}

impl BookRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a book under its venue tag.
    pub fn register(&self, exchange: ExchangeId, book: Arc<OrderBook>) {
        self.books.insert(exchange, book);
        info!(exchange = %exchange, total = self.books.len(), "book registered");
    }

    /// Removes a venue's book.
    pub fn unregister(&self, exchange: ExchangeId) {
        if self.books.remove(&exchange).is_some() {
            info!(exchange = %exchange, total = self.books.len(), "book unregistered");
        }
    }

    /// Removes every book; used during a symbol-change cycle.
    pub fn clear(&self) {
        self.books.clear();
    }

    /// Returns the book for a venue, if registered.
    #[must_use]
    pub fn get(&self, exchange: ExchangeId) -> Option<Arc<OrderBook>> {
        self.books.get(&exchange).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the number of registered books.
    #[must_use]
    pub fn len(&self) -> usize {
        self.books.len()
    }

    /// Returns true when no books are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// Returns a stable copy of the current (venue, book) pairs.
    #[must_use]
    pub fn entries(&self) -> Vec<(ExchangeId, Arc<OrderBook>)> {
        self.books
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect()
    }
}
