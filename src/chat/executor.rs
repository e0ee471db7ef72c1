//! Retrieval execution.
//!
//! One arm per operation; all arms produce a `RetrievalResult` that the
//! composer can always render. Empty lookups degrade to literal fallback
//! payloads instead of errors.

use std::sync::Arc;

use serde_json::{json, Value};

use super::catalog::ProductProperty;
use super::context::ProductBinding;
use super::router::Operation;
use crate::core::config::service::AssistantSettings;
use crate::core::errors::ApiError;
use crate::llm::LlmProvider;
use crate::store::{ProductOverview, ProductStore, Section, Topic};

/// Literal payload used whenever a product lookup matches nothing.
pub const NOT_FOUND_FALLBACK: &str = "No matching product found in the database.";

/// Literal payload for an empty Q&A partition.
pub const QNA_FALLBACK: &str =
    "Zu dieser Frage liegt keine geprüfte Antwort vor. Bitte wenden Sie sich an unseren \
     Kundenservice.";

/// Instructional template chosen per operation and result cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    ProductList,
    ProductDetails,
    QnaAnswer,
    Undefined,
    NoContext,
}

impl PromptTemplate {
    pub fn instruction(&self) -> &'static str {
        match self {
            PromptTemplate::ProductList => {
                "Die folgenden Produkte wurden im Sortiment gefunden. Stelle sie übersichtlich \
                 als Liste vor und nenne zu jedem Produkt den Namen und die Kurzbeschreibung."
            }
            PromptTemplate::ProductDetails => {
                "Die folgenden Produktinformationen wurden gefunden. Beantworte die Frage des \
                 Kunden anhand dieser Details. Nenne den Produktnamen in einer eigenen Zeile im \
                 Format 'Produktname: <Name>' und verweise, falls vorhanden, auf den Produktlink."
            }
            PromptTemplate::QnaAnswer => {
                "Die folgende geprüfte Antwort wurde gefunden. Gib sie sinngemäß und vollständig \
                 wieder."
            }
            PromptTemplate::Undefined => {
                "Es konnte kein Produkt oder keine Eigenschaft zugeordnet werden. Bitte den \
                 Kunden um eine präzisere Angabe."
            }
            PromptTemplate::NoContext => {
                "Es liegen keine Datenbankinformationen vor. Beantworte die Frage zurückhaltend \
                 und verweise im Zweifel auf den Kundenservice."
            }
        }
    }
}

/// Material handed to the composer: the chosen template plus the retrieved
/// payload. Ephemeral, consumed once per turn.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub template: PromptTemplate,
    pub data: Value,
}

impl RetrievalResult {
    pub fn no_context() -> Self {
        Self {
            template: PromptTemplate::NoContext,
            data: Value::Null,
        }
    }
}

/// Result of one execution: the retrieval payload and, for property
/// lookups, a possible new product binding.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub retrieval: RetrievalResult,
    pub new_binding: Option<ProductBinding>,
}

impl ExecutionOutcome {
    fn plain(retrieval: RetrievalResult) -> Self {
        Self {
            retrieval,
            new_binding: None,
        }
    }
}

pub struct RetrievalExecutor {
    store: Arc<dyn ProductStore>,
    provider: Arc<dyn LlmProvider>,
    settings: AssistantSettings,
}

impl RetrievalExecutor {
    pub fn new(
        store: Arc<dyn ProductStore>,
        provider: Arc<dyn LlmProvider>,
        settings: AssistantSettings,
    ) -> Self {
        Self {
            store,
            provider,
            settings,
        }
    }

    pub async fn execute(
        &self,
        operation: &Operation,
        context: &ProductBinding,
    ) -> Result<ExecutionOutcome, ApiError> {
        match operation {
            Operation::ProductList => self.product_list().await,
            Operation::CategoryList => self.category_list().await,
            Operation::ProductsByCategory { category } => {
                self.products_by_category(category).await
            }
            Operation::ProductDetails { product_name } => {
                self.product_details(product_name).await
            }
            Operation::ProductProperty {
                property,
                product_name,
            } => {
                self.product_property(*property, product_name.as_deref(), context)
                    .await
            }
            Operation::Disclaimer { message } => {
                self.qna(Topic::Disclaimer, message, context).await
            }
            Operation::GeneralInfo { message } => self.qna(Topic::General, message, context).await,
        }
    }

    async fn product_list(&self) -> Result<ExecutionOutcome, ApiError> {
        let overviews = self
            .store
            .product_overviews(self.settings.product_page_size as usize)
            .await?;

        Ok(ExecutionOutcome::plain(shape_overviews(overviews)))
    }

    async fn category_list(&self) -> Result<ExecutionOutcome, ApiError> {
        let labels = self.store.category_labels().await?;

        if labels.is_empty() {
            return Ok(ExecutionOutcome::plain(RetrievalResult {
                template: PromptTemplate::ProductList,
                data: json!(NOT_FOUND_FALLBACK),
            }));
        }

        let template = if labels.len() == 1 {
            PromptTemplate::ProductDetails
        } else {
            PromptTemplate::ProductList
        };

        Ok(ExecutionOutcome::plain(RetrievalResult {
            template,
            data: json!({ "Kategorien": labels }),
        }))
    }

    async fn products_by_category(&self, category: &str) -> Result<ExecutionOutcome, ApiError> {
        let query = self.embed(category).await?;
        let hits = self
            .store
            .nearest_chunks(
                Section::Categories,
                &query,
                self.settings.category_neighbors as usize,
            )
            .await?;

        let mut category_texts: Vec<String> = Vec::new();
        for hit in hits {
            if !category_texts.contains(&hit.chunk.text) {
                category_texts.push(hit.chunk.text);
            }
        }

        let overviews = self.store.products_with_category_text(&category_texts).await?;
        Ok(ExecutionOutcome::plain(shape_overviews(overviews)))
    }

    async fn product_details(&self, product_name: &str) -> Result<ExecutionOutcome, ApiError> {
        let query = self.embed(product_name).await?;
        let Some(hit) = self.store.nearest_chunk(Section::Name, &query).await? else {
            return Ok(ExecutionOutcome::plain(RetrievalResult {
                template: PromptTemplate::ProductDetails,
                data: json!(NOT_FOUND_FALLBACK),
            }));
        };

        let sections = self.store.sections_for_product(&hit.chunk.product_id).await?;

        Ok(ExecutionOutcome::plain(RetrievalResult {
            template: PromptTemplate::ProductDetails,
            data: json!({
                "Product ID": hit.chunk.product_id,
                "Produktinformation": sections,
            }),
        }))
    }

    async fn product_property(
        &self,
        property: Option<ProductProperty>,
        product_name: Option<&str>,
        context: &ProductBinding,
    ) -> Result<ExecutionOutcome, ApiError> {
        // Both inputs must be resolvable before any store access.
        let (Some(property), Some(product_name)) = (property, product_name) else {
            return Ok(ExecutionOutcome::plain(RetrievalResult {
                template: PromptTemplate::Undefined,
                data: json!("undefined"),
            }));
        };

        let query = self.embed(product_name).await?;
        let Some(hit) = self.store.nearest_chunk(Section::Name, &query).await? else {
            return Ok(ExecutionOutcome::plain(RetrievalResult {
                template: PromptTemplate::ProductDetails,
                data: json!(NOT_FOUND_FALLBACK),
            }));
        };

        let resolved_name = hit.chunk.text.clone();
        let sections = self.store.sections_for_product(&hit.chunk.product_id).await?;

        let Some(value) = sections.get(property.section().as_str()) else {
            return Ok(ExecutionOutcome::plain(RetrievalResult {
                template: PromptTemplate::ProductDetails,
                data: json!(NOT_FOUND_FALLBACK),
            }));
        };

        let reference_link = sections
            .get(Section::ReferenceLink.as_str())
            .cloned()
            .unwrap_or_default();

        // Rebind only when the resolved product differs from the tracked one.
        let new_binding = if context.product_name() != Some(resolved_name.as_str()) {
            Some(ProductBinding::bound(
                resolved_name.clone(),
                reference_link.clone(),
            ))
        } else {
            None
        };

        let mut payload = serde_json::Map::new();
        payload.insert("Product ID".to_string(), json!(hit.chunk.product_id));
        payload.insert("Produktname".to_string(), json!(resolved_name));
        payload.insert(property.section().as_str().to_string(), json!(value));
        payload.insert("reference_link".to_string(), json!(reference_link));

        Ok(ExecutionOutcome {
            retrieval: RetrievalResult {
                template: PromptTemplate::ProductDetails,
                data: Value::Object(payload),
            },
            new_binding,
        })
    }

    async fn qna(
        &self,
        topic: Topic,
        message: &str,
        context: &ProductBinding,
    ) -> Result<ExecutionOutcome, ApiError> {
        let query = self.embed(message).await?;
        let Some(hit) = self.store.nearest_question(topic, &query).await? else {
            return Ok(ExecutionOutcome::plain(RetrievalResult {
                template: PromptTemplate::QnaAnswer,
                data: json!(QNA_FALLBACK),
            }));
        };

        // General questions, and any question asked without product context,
        // are answered in the brand's name rather than a product's.
        let attributed_to = match (topic, context.product_name()) {
            (Topic::General, _) | (_, None) => self.settings.brand_name.clone(),
            (_, Some(product)) => product.to_string(),
        };

        Ok(ExecutionOutcome::plain(RetrievalResult {
            template: PromptTemplate::QnaAnswer,
            data: json!({
                "Frage": hit.entry.question_text,
                "Antwort": hit.entry.answer_text,
                "attributed_to": attributed_to,
            }),
        }))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let mut vectors = self.provider.embed(&[text.to_string()]).await?;
        if vectors.is_empty() {
            return Err(ApiError::Upstream(
                "embedding service returned no vector".to_string(),
            ));
        }
        Ok(vectors.remove(0))
    }
}

/// Shape an aggregated product listing, applying the cardinality rule:
/// exactly one product reads like a detail view, several like a list.
fn shape_overviews(overviews: Vec<ProductOverview>) -> RetrievalResult {
    if overviews.is_empty() {
        return RetrievalResult {
            template: PromptTemplate::ProductList,
            data: json!(NOT_FOUND_FALLBACK),
        };
    }

    let template = if overviews.len() == 1 {
        PromptTemplate::ProductDetails
    } else {
        PromptTemplate::ProductList
    };

    let data: Vec<Value> = overviews
        .into_iter()
        .map(|overview| {
            json!({
                "Product ID": overview.product_id,
                "Produktinformation": overview.info,
            })
        })
        .collect();

    RetrievalResult {
        template,
        data: Value::Array(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::MockProvider;
    use crate::store::{ProductChunk, QnaEntry, SqliteProductStore};

    async fn test_store() -> SqliteProductStore {
        let tmp = std::env::temp_dir().join(format!(
            "impactflow-executor-test-{}.db",
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

    async fn seed_lung(store: &SqliteProductStore) {
        store
            .insert_product_chunks(
                "p-lung",
                vec![
                    (
                        chunk("l-name", "p-lung", Section::Name, "Lung"),
                        vec![1.0, 0.0, 0.0],
                    ),
                    (
                        chunk(
                            "l-cat",
                            "p-lung",
                            Section::Categories,
                            "Tibetische Rezeptur",
                        ),
                        vec![0.0, 1.0, 0.0],
                    ),
                    (
                        chunk(
                            "l-desc",
                            "p-lung",
                            Section::ShortDescription,
                            "Kräuterrezeptur für die Atemwege",
                        ),
                        vec![0.0, 0.0, 1.0],
                    ),
                    (
                        chunk(
                            "l-aud",
                            "p-lung",
                            Section::TargetAudience,
                            "Erwachsene mit empfindlichen Atemwegen",
                        ),
                        vec![0.2, 0.2, 0.2],
                    ),
                    (
                        chunk(
                            "l-link",
                            "p-lung",
                            Section::ReferenceLink,
                            "https://shop.example.com/products/lung",
                        ),
                        vec![0.1, 0.1, 0.1],
                    ),
                ],
                false,
            )
            .await
            .unwrap();
    }

    fn executor(
        store: Arc<SqliteProductStore>,
        provider: MockProvider,
    ) -> RetrievalExecutor {
        RetrievalExecutor::new(
            store,
            Arc::new(provider),
            AssistantSettings::from_config(&serde_json::json!({})),
        )
    }

    #[tokio::test]
    async fn product_details_aggregates_all_sections() {
        let store = Arc::new(test_store().await);
        seed_lung(&store).await;

        let provider = MockProvider::new().with_embedding("Lung", vec![0.9, 0.05, 0.05]);
        let outcome = executor(store, provider)
            .execute(
                &Operation::ProductDetails {
                    product_name: "Lung".to_string(),
                },
                &ProductBinding::Empty,
            )
            .await
            .unwrap();

        assert_eq!(outcome.retrieval.template, PromptTemplate::ProductDetails);
        let info = &outcome.retrieval.data["Produktinformation"];
        assert_eq!(info["name"], "Lung");
        assert_eq!(info["categories"], "Tibetische Rezeptur");
        assert!(outcome.new_binding.is_none());
    }

    #[tokio::test]
    async fn product_details_on_empty_store_degrades_to_fallback() {
        let store = Arc::new(test_store().await);
        let provider = MockProvider::new();

        let outcome = executor(store, provider)
            .execute(
                &Operation::ProductDetails {
                    product_name: "Lung".to_string(),
                },
                &ProductBinding::Empty,
            )
            .await
            .unwrap();

        assert_eq!(outcome.retrieval.data, json!(NOT_FOUND_FALLBACK));
    }

    #[tokio::test]
    async fn single_category_match_switches_to_details_template() {
        let store = Arc::new(test_store().await);
        seed_lung(&store).await;

        let provider =
            MockProvider::new().with_embedding("Tibetische Rezeptur", vec![0.0, 1.0, 0.0]);
        let outcome = executor(store, provider)
            .execute(
                &Operation::ProductsByCategory {
                    category: "Tibetische Rezeptur".to_string(),
                },
                &ProductBinding::Empty,
            )
            .await
            .unwrap();

        // Exactly one product in the category: cardinality rule picks the
        // details template.
        assert_eq!(outcome.retrieval.template, PromptTemplate::ProductDetails);
        assert_eq!(outcome.retrieval.data[0]["Produktinformation"]["name"], "Lung");
    }

    #[tokio::test]
    async fn several_products_use_the_list_template() {
        let store = Arc::new(test_store().await);
        seed_lung(&store).await;
        store
            .insert_product_chunks(
                "p-sleep",
                vec![
                    (
                        chunk("s-name", "p-sleep", Section::Name, "Sleep"),
                        vec![0.0, 1.0, 0.0],
                    ),
                    (
                        chunk(
                            "s-cat",
                            "p-sleep",
                            Section::Categories,
                            "Tibetische Rezeptur",
                        ),
                        vec![0.0, 1.0, 0.0],
                    ),
                ],
                false,
            )
            .await
            .unwrap();

        let provider = MockProvider::new();
        let outcome = executor(store, provider)
            .execute(&Operation::ProductList, &ProductBinding::Empty)
            .await
            .unwrap();

        assert_eq!(outcome.retrieval.template, PromptTemplate::ProductList);
        assert_eq!(outcome.retrieval.data.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn property_lookup_without_product_short_circuits() {
        let store = Arc::new(test_store().await);
        seed_lung(&store).await;

        let provider = MockProvider::new();
        let outcome = executor(store, provider)
            .execute(
                &Operation::ProductProperty {
                    property: Some(ProductProperty::TargetAudience),
                    product_name: None,
                },
                &ProductBinding::Empty,
            )
            .await
            .unwrap();

        assert_eq!(outcome.retrieval.template, PromptTemplate::Undefined);
        assert_eq!(outcome.retrieval.data, json!("undefined"));
        assert!(outcome.new_binding.is_none());
    }

    #[tokio::test]
    async fn property_lookup_resolves_and_rebinds() {
        let store = Arc::new(test_store().await);
        seed_lung(&store).await;

        let provider = MockProvider::new().with_embedding("Lung", vec![0.9, 0.05, 0.05]);
        let outcome = executor(store, provider)
            .execute(
                &Operation::ProductProperty {
                    property: Some(ProductProperty::TargetAudience),
                    product_name: Some("Lung".to_string()),
                },
                &ProductBinding::Empty,
            )
            .await
            .unwrap();

        assert_eq!(
            outcome.retrieval.data["target_audience"],
            "Erwachsene mit empfindlichen Atemwegen"
        );

        let binding = outcome.new_binding.unwrap();
        assert_eq!(binding.product_name(), Some("Lung"));
        assert_eq!(
            binding.product_url(),
            Some("https://shop.example.com/products/lung")
        );
    }

    #[tokio::test]
    async fn property_lookup_on_same_product_does_not_rebind() {
        let store = Arc::new(test_store().await);
        seed_lung(&store).await;

        let provider = MockProvider::new().with_embedding("Lung", vec![0.9, 0.05, 0.05]);
        let context = ProductBinding::bound("Lung", "https://shop.example.com/products/lung");
        let outcome = executor(store, provider)
            .execute(
                &Operation::ProductProperty {
                    property: Some(ProductProperty::TargetAudience),
                    product_name: Some("Lung".to_string()),
                },
                &context,
            )
            .await
            .unwrap();

        assert!(outcome.new_binding.is_none());
    }

    #[tokio::test]
    async fn missing_property_section_degrades_to_fallback() {
        let store = Arc::new(test_store().await);
        seed_lung(&store).await;

        let provider = MockProvider::new().with_embedding("Lung", vec![0.9, 0.05, 0.05]);
        let outcome = executor(store, provider)
            .execute(
                &Operation::ProductProperty {
                    property: Some(ProductProperty::History),
                    product_name: Some("Lung".to_string()),
                },
                &ProductBinding::Empty,
            )
            .await
            .unwrap();

        assert_eq!(outcome.retrieval.data, json!(NOT_FOUND_FALLBACK));
        assert!(outcome.new_binding.is_none());
    }

    #[tokio::test]
    async fn empty_disclaimer_partition_returns_customer_service_fallback() {
        let store = Arc::new(test_store().await);
        let provider = MockProvider::new();

        let outcome = executor(store, provider)
            .execute(
                &Operation::Disclaimer {
                    message: "Darf ich das während der Schwangerschaft nehmen?".to_string(),
                },
                &ProductBinding::Empty,
            )
            .await
            .unwrap();

        assert_eq!(outcome.retrieval.template, PromptTemplate::QnaAnswer);
        assert_eq!(outcome.retrieval.data, json!(QNA_FALLBACK));
    }

    #[tokio::test]
    async fn disclaimer_with_product_context_attributes_to_the_product() {
        let store = Arc::new(test_store().await);
        store
            .insert_qna(
                QnaEntry {
                    id: "q1".to_string(),
                    topic: Topic::Disclaimer,
                    question_text: "Schwangerschaft?".to_string(),
                    answer_text: "Bitte halten Sie Rücksprache mit Ihrem Arzt.".to_string(),
                },
                vec![1.0, 0.0],
                vec![0.0, 1.0],
            )
            .await
            .unwrap();

        let provider = MockProvider::new().with_embedding(
            "Darf ich das während der Schwangerschaft nehmen?",
            vec![1.0, 0.0],
        );
        let context = ProductBinding::bound("Lung", "https://shop.example.com/products/lung");

        let outcome = executor(store, provider)
            .execute(
                &Operation::Disclaimer {
                    message: "Darf ich das während der Schwangerschaft nehmen?".to_string(),
                },
                &context,
            )
            .await
            .unwrap();

        assert_eq!(outcome.retrieval.data["attributed_to"], "Lung");
    }

    #[tokio::test]
    async fn general_info_is_attributed_to_the_brand() {
        let store = Arc::new(test_store().await);
        store
            .insert_qna(
                QnaEntry {
                    id: "q2".to_string(),
                    topic: Topic::General,
                    question_text: "Wer seid ihr?".to_string(),
                    answer_text: "Ein Schweizer Naturprodukte-Anbieter.".to_string(),
                },
                vec![1.0, 0.0],
                vec![0.0, 1.0],
            )
            .await
            .unwrap();

        let provider = MockProvider::new().with_embedding("Wer seid ihr?", vec![1.0, 0.0]);
        let context = ProductBinding::bound("Lung", "https://shop.example.com/products/lung");

        let outcome = executor(store, provider)
            .execute(
                &Operation::GeneralInfo {
                    message: "Wer seid ihr?".to_string(),
                },
                &context,
            )
            .await
            .unwrap();

        assert_eq!(outcome.retrieval.data["attributed_to"], "ImpactFlow");
    }

    #[tokio::test]
    async fn category_list_returns_distinct_labels() {
        let store = Arc::new(test_store().await);
        seed_lung(&store).await;

        let provider = MockProvider::new();
        let outcome = executor(store, provider)
            .execute(&Operation::CategoryList, &ProductBinding::Empty)
            .await
            .unwrap();

        assert_eq!(
            outcome.retrieval.data["Kategorien"],
            json!(["Tibetische Rezeptur"])
        );
    }
}
