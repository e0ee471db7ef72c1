//! Product knowledge base storage.
//!
//! `ProductStore` abstracts the vector-backed chunk and Q&A tables; the
//! primary implementation is `SqliteProductStore` in the `sqlite` module.

pub mod sqlite;
pub mod types;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::core::errors::ApiError;

pub use sqlite::SqliteProductStore;
pub use types::{ChunkHit, ProductChunk, ProductOverview, QnaEntry, QnaHit, Section, Topic};

#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Insert the chunks of one product. With `overwrite` set, existing
    /// chunks of that product are removed first (full replacement; chunks
    /// are never partially mutated).
    async fn insert_product_chunks(
        &self,
        product_id: &str,
        items: Vec<(ProductChunk, Vec<f32>)>,
        overwrite: bool,
    ) -> Result<(), ApiError>;

    /// Insert one Q&A entry with its question and answer embeddings.
    async fn insert_qna(
        &self,
        entry: QnaEntry,
        question_embedding: Vec<f32>,
        answer_embedding: Vec<f32>,
    ) -> Result<(), ApiError>;

    /// The single chunk of the given section closest to the query vector.
    async fn nearest_chunk(
        &self,
        section: Section,
        query: &[f32],
    ) -> Result<Option<ChunkHit>, ApiError>;

    /// The `limit` chunks of the given section closest to the query vector,
    /// ordered by (distance, insertion order).
    async fn nearest_chunks(
        &self,
        section: Section,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkHit>, ApiError>;

    /// All sections of one product, latest chunk per section.
    async fn sections_for_product(
        &self,
        product_id: &str,
    ) -> Result<BTreeMap<String, String>, ApiError>;

    /// First `limit` products in insertion order, aggregated over the
    /// overview sections (name, categories, short_description,
    /// reference_link).
    async fn product_overviews(&self, limit: usize) -> Result<Vec<ProductOverview>, ApiError>;

    /// Products whose categories text equals one of the given texts,
    /// aggregated like `product_overviews`.
    async fn products_with_category_text(
        &self,
        category_texts: &[String],
    ) -> Result<Vec<ProductOverview>, ApiError>;

    /// Distinct category texts in insertion order.
    async fn category_labels(&self) -> Result<Vec<String>, ApiError>;

    /// The Q&A entry within a topic whose question embedding is closest to
    /// the query vector.
    async fn nearest_question(
        &self,
        topic: Topic,
        query: &[f32],
    ) -> Result<Option<QnaHit>, ApiError>;

    /// Whether any chunk exists for the given product id.
    async fn has_product(&self, product_id: &str) -> Result<bool, ApiError>;
}
