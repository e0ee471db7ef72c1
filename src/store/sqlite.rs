//! SQLite-backed product store implementation.
//!
//! In-process vector store: embeddings are f32 little-endian BLOBs,
//! nearest-neighbor search is a brute-force squared-L2 scan. Equal
//! distances are ordered by rowid, so results are reproducible.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use async_trait::async_trait;
use ndarray::ArrayView1;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::types::{
    ChunkHit, ProductChunk, ProductOverview, QnaEntry, QnaHit, Section, Topic, OVERVIEW_SECTIONS,
};
use super::ProductStore;
use crate::core::config::AppPaths;
use crate::core::errors::ApiError;

pub struct SqliteProductStore {
    pool: SqlitePool,
}

impl SqliteProductStore {
    pub async fn new(paths: &AppPaths) -> Result<Self, ApiError> {
        Self::with_path(paths.catalog_db_path.clone()).await
    }

    pub async fn with_path(db_path: PathBuf) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS product_chunks (
                chunk_id TEXT PRIMARY KEY,
                product_id TEXT NOT NULL,
                section TEXT NOT NULL,
                chunk_text TEXT NOT NULL,
                embedding BLOB,
                metadata TEXT DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_product ON product_chunks(product_id)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_section ON product_chunks(section)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS q_and_a (
                id TEXT PRIMARY KEY,
                topic TEXT NOT NULL,
                question_text TEXT NOT NULL,
                answer_text TEXT NOT NULL,
                q_embedding BLOB,
                a_embedding BLOB,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_qna_topic ON q_and_a(topic)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    /// Squared L2 distance; `None` on empty or mismatched dimensionality.
    fn squared_l2(query: &[f32], candidate: &[f32]) -> Option<f32> {
        if query.is_empty() || query.len() != candidate.len() {
            return None;
        }
        let query = ArrayView1::from(query);
        let candidate = ArrayView1::from(candidate);
        let diff = &query - &candidate;
        Some(diff.dot(&diff))
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Option<ProductChunk> {
        let section_label: String = row.get("section");
        let Some(section) = Section::parse(&section_label) else {
            tracing::warn!(section = %section_label, "skipping chunk with unknown section");
            return None;
        };

        let metadata_str: String = row.get("metadata");
        let metadata = serde_json::from_str::<Value>(&metadata_str).ok();

        Some(ProductChunk {
            chunk_id: row.get("chunk_id"),
            product_id: row.get("product_id"),
            section,
            text: row.get("chunk_text"),
            metadata,
        })
    }

    /// All overview-section rows in insertion order.
    async fn overview_rows(&self) -> Result<Vec<(i64, String, String, String)>, ApiError> {
        let rows = sqlx::query(
            "SELECT rowid AS row_order, product_id, section, chunk_text
             FROM product_chunks
             WHERE section IN (?1, ?2, ?3, ?4)
             ORDER BY rowid",
        )
        .bind(OVERVIEW_SECTIONS[0].as_str())
        .bind(OVERVIEW_SECTIONS[1].as_str())
        .bind(OVERVIEW_SECTIONS[2].as_str())
        .bind(OVERVIEW_SECTIONS[3].as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get("row_order"),
                    row.get("product_id"),
                    row.get("section"),
                    row.get("chunk_text"),
                )
            })
            .collect())
    }

    /// Group overview rows per product, first-seen product order, latest
    /// chunk per section.
    fn aggregate_overviews(rows: Vec<(i64, String, String, String)>) -> Vec<ProductOverview> {
        let mut order: Vec<String> = Vec::new();
        let mut info: HashMap<String, BTreeMap<String, String>> = HashMap::new();

        for (_, product_id, section, text) in rows {
            if !info.contains_key(&product_id) {
                order.push(product_id.clone());
            }
            info.entry(product_id).or_default().insert(section, text);
        }

        order
            .into_iter()
            .filter_map(|product_id| {
                info.remove(&product_id).map(|sections| ProductOverview {
                    product_id,
                    info: sections,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ProductStore for SqliteProductStore {
    async fn insert_product_chunks(
        &self,
        product_id: &str,
        items: Vec<(ProductChunk, Vec<f32>)>,
        overwrite: bool,
    ) -> Result<(), ApiError> {
        if items.is_empty() {
            return Err(ApiError::BadRequest("no chunks to insert".to_string()));
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        if overwrite {
            sqlx::query("DELETE FROM product_chunks WHERE product_id = ?1")
                .bind(product_id)
                .execute(&mut *tx)
                .await
                .map_err(ApiError::internal)?;
        }

        for (chunk, embedding) in &items {
            if chunk.product_id != product_id {
                return Err(ApiError::BadRequest(format!(
                    "chunk {} belongs to product {}, not {}",
                    chunk.chunk_id, chunk.product_id, product_id
                )));
            }

            let blob = Self::serialize_embedding(embedding);
            let metadata_str = chunk
                .metadata
                .as_ref()
                .map(|m| serde_json::to_string(m).unwrap_or_default())
                .unwrap_or_else(|| "{}".to_string());

            sqlx::query(
                "INSERT OR REPLACE INTO product_chunks
                 (chunk_id, product_id, section, chunk_text, embedding, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.product_id)
            .bind(chunk.section.as_str())
            .bind(&chunk.text)
            .bind(&blob)
            .bind(&metadata_str)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        }

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn insert_qna(
        &self,
        entry: QnaEntry,
        question_embedding: Vec<f32>,
        answer_embedding: Vec<f32>,
    ) -> Result<(), ApiError> {
        let q_blob = Self::serialize_embedding(&question_embedding);
        let a_blob = Self::serialize_embedding(&answer_embedding);

        sqlx::query(
            "INSERT OR REPLACE INTO q_and_a
             (id, topic, question_text, answer_text, q_embedding, a_embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&entry.id)
        .bind(entry.topic.as_str())
        .bind(&entry.question_text)
        .bind(&entry.answer_text)
        .bind(&q_blob)
        .bind(&a_blob)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    async fn nearest_chunk(
        &self,
        section: Section,
        query: &[f32],
    ) -> Result<Option<ChunkHit>, ApiError> {
        Ok(self.nearest_chunks(section, query, 1).await?.pop())
    }

    async fn nearest_chunks(
        &self,
        section: Section,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkHit>, ApiError> {
        let rows = sqlx::query(
            "SELECT rowid AS row_order, chunk_id, product_id, section, chunk_text, metadata, embedding
             FROM product_chunks
             WHERE section = ?1",
        )
        .bind(section.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut scored: Vec<(f32, i64, ProductChunk)> = rows
            .iter()
            .filter_map(|row| {
                let embedding_bytes: Vec<u8> = row.get("embedding");
                if embedding_bytes.is_empty() {
                    return None;
                }
                let stored = Self::deserialize_embedding(&embedding_bytes);
                let distance = Self::squared_l2(query, &stored)?;
                let row_order: i64 = row.get("row_order");
                Some((distance, row_order, Self::row_to_chunk(row)?))
            })
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(limit.max(1));

        Ok(scored
            .into_iter()
            .map(|(distance, _, chunk)| ChunkHit { chunk, distance })
            .collect())
    }

    async fn sections_for_product(
        &self,
        product_id: &str,
    ) -> Result<BTreeMap<String, String>, ApiError> {
        let rows = sqlx::query(
            "SELECT section, chunk_text
             FROM product_chunks
             WHERE product_id = ?1
             ORDER BY rowid",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        // Later rows overwrite earlier ones: the latest chunk per section is
        // authoritative for current reads.
        let mut sections = BTreeMap::new();
        for row in rows {
            let section: String = row.get("section");
            let text: String = row.get("chunk_text");
            sections.insert(section, text);
        }

        Ok(sections)
    }

    async fn product_overviews(&self, limit: usize) -> Result<Vec<ProductOverview>, ApiError> {
        let rows = self.overview_rows().await?;
        let mut overviews = Self::aggregate_overviews(rows);
        overviews.truncate(limit.max(1));
        Ok(overviews)
    }

    async fn products_with_category_text(
        &self,
        category_texts: &[String],
    ) -> Result<Vec<ProductOverview>, ApiError> {
        if category_texts.is_empty() {
            return Ok(Vec::new());
        }

        let overviews = Self::aggregate_overviews(self.overview_rows().await?);
        Ok(overviews
            .into_iter()
            .filter(|overview| {
                overview
                    .info
                    .get(Section::Categories.as_str())
                    .is_some_and(|text| category_texts.contains(text))
            })
            .collect())
    }

    async fn category_labels(&self) -> Result<Vec<String>, ApiError> {
        let rows = sqlx::query(
            "SELECT chunk_text
             FROM product_chunks
             WHERE section = ?1
             ORDER BY rowid",
        )
        .bind(Section::Categories.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut labels: Vec<String> = Vec::new();
        for row in rows {
            let text: String = row.get("chunk_text");
            if !labels.contains(&text) {
                labels.push(text);
            }
        }

        Ok(labels)
    }

    async fn nearest_question(
        &self,
        topic: Topic,
        query: &[f32],
    ) -> Result<Option<QnaHit>, ApiError> {
        let rows = sqlx::query(
            "SELECT rowid AS row_order, id, topic, question_text, answer_text, q_embedding
             FROM q_and_a
             WHERE topic = ?1",
        )
        .bind(topic.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut scored: Vec<(f32, i64, QnaEntry)> = rows
            .iter()
            .filter_map(|row| {
                let embedding_bytes: Vec<u8> = row.get("q_embedding");
                if embedding_bytes.is_empty() {
                    return None;
                }
                let stored = Self::deserialize_embedding(&embedding_bytes);
                let distance = Self::squared_l2(query, &stored)?;
                let row_order: i64 = row.get("row_order");
                let topic_label: String = row.get("topic");

                Some((
                    distance,
                    row_order,
                    QnaEntry {
                        id: row.get("id"),
                        topic: Topic::parse(&topic_label)?,
                        question_text: row.get("question_text"),
                        answer_text: row.get("answer_text"),
                    },
                ))
            })
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        Ok(scored
            .into_iter()
            .next()
            .map(|(distance, _, entry)| QnaHit { entry, distance }))
    }

    async fn has_product(&self, product_id: &str) -> Result<bool, ApiError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM product_chunks WHERE product_id = ?1")
                .bind(product_id)
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::internal)?;

        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteProductStore {
        let tmp = std::env::temp_dir().join(format!(
            "impactflow-catalog-test-{}.db",
            uuid::Uuid::new_v4()
        ));
        SqliteProductStore::with_path(tmp).await.unwrap()
    }

    fn chunk(id: &str, product: &str, section: Section, text: &str) -> ProductChunk {
        ProductChunk {
            chunk_id: id.to_string(),
            product_id: product.to_string(),
            section,
            text: text.to_string(),
            metadata: None,
        }
    }

    async fn seed_product(
        store: &SqliteProductStore,
        product: &str,
        name: &str,
        name_vec: Vec<f32>,
        category: &str,
    ) {
        store
            .insert_product_chunks(
                product,
                vec![
                    (
                        chunk(&format!("{product}-name"), product, Section::Name, name),
                        name_vec,
                    ),
                    (
                        chunk(
                            &format!("{product}-cat"),
                            product,
                            Section::Categories,
                            category,
                        ),
                        vec![0.5, 0.5, 0.0],
                    ),
                    (
                        chunk(
                            &format!("{product}-desc"),
                            product,
                            Section::ShortDescription,
                            "Beschreibung",
                        ),
                        vec![0.0, 0.0, 1.0],
                    ),
                ],
                false,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn nearest_chunk_respects_section_filter() {
        let store = test_store().await;
        seed_product(&store, "p1", "Lung", vec![1.0, 0.0, 0.0], "Tibetische Rezeptur").await;
        seed_product(&store, "p2", "Sleep", vec![0.0, 1.0, 0.0], "Body & Clean").await;

        let hit = store
            .nearest_chunk(Section::Name, &[0.9, 0.1, 0.0])
            .await
            .unwrap()
            .unwrap();

        assert_eq!(hit.chunk.product_id, "p1");
        assert_eq!(hit.chunk.text, "Lung");
        assert_eq!(hit.chunk.section, Section::Name);
    }

    #[tokio::test]
    async fn equal_distances_break_ties_by_insertion_order() {
        let store = test_store().await;
        store
            .insert_product_chunks(
                "p1",
                vec![(chunk("c1", "p1", Section::Name, "Alpha"), vec![1.0, 0.0])],
                false,
            )
            .await
            .unwrap();
        store
            .insert_product_chunks(
                "p2",
                vec![(chunk("c2", "p2", Section::Name, "Beta"), vec![1.0, 0.0])],
                false,
            )
            .await
            .unwrap();

        for _ in 0..3 {
            let hits = store
                .nearest_chunks(Section::Name, &[0.0, 1.0], 2)
                .await
                .unwrap();
            let ids: Vec<&str> = hits.iter().map(|h| h.chunk.chunk_id.as_str()).collect();
            assert_eq!(ids, vec!["c1", "c2"]);
        }
    }

    #[tokio::test]
    async fn overwrite_replaces_all_chunks_of_a_product() {
        let store = test_store().await;
        seed_product(&store, "p1", "Lung", vec![1.0, 0.0, 0.0], "Tibetische Rezeptur").await;

        store
            .insert_product_chunks(
                "p1",
                vec![(
                    chunk("c-new", "p1", Section::Name, "Lung Formula"),
                    vec![1.0, 0.0, 0.0],
                )],
                true,
            )
            .await
            .unwrap();

        let sections = store.sections_for_product("p1").await.unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections.get("name").unwrap(), "Lung Formula");
    }

    #[tokio::test]
    async fn latest_chunk_per_section_wins() {
        let store = test_store().await;
        store
            .insert_product_chunks(
                "p1",
                vec![(chunk("c1", "p1", Section::Ingredients, "old"), vec![1.0])],
                false,
            )
            .await
            .unwrap();
        store
            .insert_product_chunks(
                "p1",
                vec![(chunk("c2", "p1", Section::Ingredients, "new"), vec![1.0])],
                false,
            )
            .await
            .unwrap();

        let sections = store.sections_for_product("p1").await.unwrap();
        assert_eq!(sections.get("ingredients").unwrap(), "new");
    }

    #[tokio::test]
    async fn product_overviews_keep_insertion_order_and_limit() {
        let store = test_store().await;
        seed_product(&store, "p1", "Lung", vec![1.0, 0.0, 0.0], "Tibetische Rezeptur").await;
        seed_product(&store, "p2", "Sleep", vec![0.0, 1.0, 0.0], "Body & Clean").await;
        seed_product(&store, "p3", "Calm", vec![0.0, 0.0, 1.0], "Body & Clean").await;

        let overviews = store.product_overviews(2).await.unwrap();
        assert_eq!(overviews.len(), 2);
        assert_eq!(overviews[0].product_id, "p1");
        assert_eq!(overviews[1].product_id, "p2");
        assert_eq!(overviews[0].info.get("name").unwrap(), "Lung");
        assert!(overviews[0].info.contains_key("short_description"));
    }

    #[tokio::test]
    async fn category_text_match_aggregates_products() {
        let store = test_store().await;
        seed_product(&store, "p1", "Lung", vec![1.0, 0.0, 0.0], "Tibetische Rezeptur").await;
        seed_product(&store, "p2", "Sleep", vec![0.0, 1.0, 0.0], "Body & Clean").await;
        seed_product(&store, "p3", "Calm", vec![0.0, 0.0, 1.0], "Body & Clean").await;

        let matches = store
            .products_with_category_text(&["Body & Clean".to_string()])
            .await
            .unwrap();

        let ids: Vec<&str> = matches.iter().map(|o| o.product_id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p3"]);
    }

    #[tokio::test]
    async fn category_labels_are_distinct_in_insertion_order() {
        let store = test_store().await;
        seed_product(&store, "p1", "Lung", vec![1.0, 0.0, 0.0], "Tibetische Rezeptur").await;
        seed_product(&store, "p2", "Sleep", vec![0.0, 1.0, 0.0], "Body & Clean").await;
        seed_product(&store, "p3", "Calm", vec![0.0, 0.0, 1.0], "Body & Clean").await;

        let labels = store.category_labels().await.unwrap();
        assert_eq!(labels, vec!["Tibetische Rezeptur", "Body & Clean"]);
    }

    #[tokio::test]
    async fn qna_search_is_partitioned_by_topic() {
        let store = test_store().await;
        store
            .insert_qna(
                QnaEntry {
                    id: "q1".to_string(),
                    topic: Topic::Disclaimer,
                    question_text: "Schwangerschaft?".to_string(),
                    answer_text: "Bitte Arzt fragen.".to_string(),
                },
                vec![1.0, 0.0],
                vec![0.0, 1.0],
            )
            .await
            .unwrap();
        store
            .insert_qna(
                QnaEntry {
                    id: "q2".to_string(),
                    topic: Topic::General,
                    question_text: "Wer seid ihr?".to_string(),
                    answer_text: "Wir sind ImpactFlow.".to_string(),
                },
                vec![1.0, 0.0],
                vec![0.0, 1.0],
            )
            .await
            .unwrap();

        let hit = store
            .nearest_question(Topic::General, &[1.0, 0.0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.entry.id, "q2");

        let disclaimer = store
            .nearest_question(Topic::Disclaimer, &[1.0, 0.0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(disclaimer.entry.id, "q1");
    }

    #[tokio::test]
    async fn empty_topic_partition_returns_none() {
        let store = test_store().await;
        let hit = store
            .nearest_question(Topic::Disclaimer, &[1.0, 0.0])
            .await
            .unwrap();
        assert!(hit.is_none());
    }

    #[tokio::test]
    async fn mismatched_dimensions_are_skipped() {
        let store = test_store().await;
        store
            .insert_product_chunks(
                "p1",
                vec![
                    (chunk("c1", "p1", Section::Name, "Short"), vec![1.0]),
                    (chunk("c2", "p1", Section::Name, "Full"), vec![1.0, 0.0]),
                ],
                false,
            )
            .await
            .unwrap();

        let hits = store
            .nearest_chunks(Section::Name, &[1.0, 0.0], 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.chunk_id, "c2");
    }
}
