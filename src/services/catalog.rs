//! Catalog management service

use std::sync::Arc;

use super::clock::Clock;
use crate::{
    error::AppResult,
    models::book::{Book, CreateBook, UpdateBook},
    repository::LibraryStore,
};

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn LibraryStore>,
    clock: Arc<dyn Clock>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn LibraryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Add a book; all copies start on the shelf
    pub async fn create_book(&self, data: CreateBook) -> AppResult<Book> {
        let book = self.store.create_book(&data, self.clock.now()).await?;
        tracing::info!(book_id = book.id, isbn = %book.isbn, "Book created");
        Ok(book)
    }

    /// Fails when the store cannot be reached
    pub async fn storage_ready(&self) -> AppResult<()> {
        self.store.ping().await
    }

    pub async fn get_book(&self, id: i32) -> AppResult<Book> {
        self.store.get_book(id).await
    }

    /// Admin edit of the catalog entry and its copy counts
    pub async fn update_book(&self, id: i32, data: UpdateBook) -> AppResult<Book> {
        self.store.update_book(id, &data, self.clock.now()).await
    }

    /// Soft delete
    pub async fn deactivate_book(&self, id: i32) -> AppResult<Book> {
        let book = self.store.deactivate_book(id, self.clock.now()).await?;
        tracing::info!(book_id = id, "Book deactivated");
        Ok(book)
    }
}
