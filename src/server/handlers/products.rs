//! Product ingestion and admin lookup.
//!
//! Ingestion takes all product sections as a metadata map, embeds each
//! section text, and stores one chunk per section. Overwrites are full
//! replacements of the product's chunks.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;
use crate::store::{ProductChunk, QnaEntry, Section, Topic};

#[derive(Debug, Deserialize)]
pub struct ProcessProductForm {
    pub id: Option<String>,
    pub metadata: HashMap<String, String>,
    #[serde(default = "default_overwrite")]
    pub overwrite: bool,
}

fn default_overwrite() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ProcessQnaForm {
    pub topic: String,
    pub question: String,
    pub answer: String,
}

/// Admin lookup of one product by (approximate) name.
pub async fn find_by_name(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let product_name = params
        .get("product_name")
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("product_name is required".to_string()))?;

    let vectors = state.provider.embed(&[product_name.clone()]).await?;
    let query = vectors
        .first()
        .ok_or_else(|| ApiError::Upstream("embedding service returned no vector".to_string()))?;

    let hit = state
        .store
        .nearest_chunk(Section::Name, query)
        .await?
        .ok_or_else(|| ApiError::NotFound("Product not found".to_string()))?;

    let sections = state
        .store
        .sections_for_product(&hit.chunk.product_id)
        .await?;

    Ok(Json(json!({
        "id": hit.chunk.product_id,
        "product": sections,
    })))
}

/// Ingest one product. All sections arrive as JSON metadata, one entry per
/// section, so sections stay individually addressable.
pub async fn process_product(
    State(state): State<Arc<AppState>>,
    Json(form): Json<ProcessProductForm>,
) -> Result<impl IntoResponse, ApiError> {
    if form.metadata.is_empty() {
        return Err(ApiError::BadRequest("metadata must not be empty".to_string()));
    }

    let mut sections: Vec<(Section, String)> = Vec::with_capacity(form.metadata.len());
    for (label, text) in &form.metadata {
        let Some(section) = Section::parse(label) else {
            return Err(ApiError::BadRequest(format!(
                "unknown section label: {}",
                label
            )));
        };
        sections.push((section, text.clone()));
    }

    let product_name = form
        .metadata
        .get(Section::Name.as_str())
        .cloned()
        .ok_or_else(|| ApiError::BadRequest("metadata requires a name section".to_string()))?;

    let product_id = form
        .id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    // Embeddings for all sections in one batch call.
    let texts: Vec<String> = sections
        .iter()
        .map(|(_, text)| text.replace('\n', " "))
        .collect();
    let embeddings = state.provider.embed(&texts).await?;

    let items: Vec<(ProductChunk, Vec<f32>)> = sections
        .into_iter()
        .zip(embeddings)
        .map(|((section, text), embedding)| {
            (
                ProductChunk {
                    chunk_id: uuid::Uuid::new_v4().to_string(),
                    product_id: product_id.clone(),
                    section,
                    text,
                    metadata: Some(json!({ "section": section.as_str() })),
                },
                embedding,
            )
        })
        .collect();

    state
        .store
        .insert_product_chunks(&product_id, items, form.overwrite)
        .await?;

    tracing::info!(product_id = %product_id, product_name = %product_name, "product ingested");

    Ok(Json(json!({
        "status": true,
        "product_name": product_name,
    })))
}

/// Ingest one Q&A entry with question and answer embeddings.
pub async fn process_qna(
    State(state): State<Arc<AppState>>,
    Json(form): Json<ProcessQnaForm>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(topic) = Topic::parse(&form.topic) else {
        return Err(ApiError::BadRequest(format!(
            "unknown topic: {}",
            form.topic
        )));
    };

    if form.question.trim().is_empty() || form.answer.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "question and answer must not be empty".to_string(),
        ));
    }

    let embeddings = state
        .provider
        .embed(&[form.question.clone(), form.answer.clone()])
        .await?;
    let mut embeddings = embeddings.into_iter();
    let question_embedding = embeddings
        .next()
        .ok_or_else(|| ApiError::Upstream("missing question embedding".to_string()))?;
    let answer_embedding = embeddings
        .next()
        .ok_or_else(|| ApiError::Upstream("missing answer embedding".to_string()))?;

    state
        .store
        .insert_qna(
            QnaEntry {
                id: uuid::Uuid::new_v4().to_string(),
                topic,
                question_text: form.question,
                answer_text: form.answer,
            },
            question_embedding,
            answer_embedding,
        )
        .await?;

    Ok(Json(json!({ "status": true })))
}
