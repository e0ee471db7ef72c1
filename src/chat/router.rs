//! Operation selection.
//!
//! Runs the classification model over the latest conversation entries and
//! maps its output onto the closed `Operation` union. Parsing is total:
//! any response the strategies cannot make sense of degrades to the
//! `NoOperation` sentinel, never to an error.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::catalog::{classification_system_prompt, ProductProperty, ToolName};
use super::context::ProductBinding;
use crate::llm::{ChatMessage, ChatOutcome, ChatRequest, LlmProvider};

/// One retrieval operation with resolved arguments. Every catalog entry has
/// exactly one variant here; the executor matches exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    ProductList,
    CategoryList,
    ProductsByCategory {
        category: String,
    },
    ProductDetails {
        product_name: String,
    },
    /// Property lookups keep unresolvable parts as `None`; the executor
    /// answers those with an explicit "undefined" payload instead of
    /// querying.
    ProductProperty {
        property: Option<ProductProperty>,
        product_name: Option<String>,
    },
    Disclaimer {
        message: String,
    },
    GeneralInfo {
        message: String,
    },
}

impl Operation {
    pub fn label(&self) -> &'static str {
        match self {
            Operation::ProductList => "get_product_list",
            Operation::CategoryList => "get_category_list",
            Operation::ProductsByCategory { .. } => "get_products_by_category",
            Operation::ProductDetails { .. } => "get_product_details",
            Operation::ProductProperty { .. } => "get_product_property",
            Operation::Disclaimer { .. } => "get_disclaimer",
            Operation::GeneralInfo { .. } => "get_general_info",
        }
    }
}

/// Router outcome: a selected operation, or the sentinel telling the caller
/// to answer without retrieval context.
#[derive(Debug, Clone, PartialEq)]
pub enum Routing {
    Operation(Operation),
    NoOperation,
}

struct RawCall {
    name: String,
    arguments: Value,
}

pub struct ToolRouter {
    provider: Arc<dyn LlmProvider>,
    brand_name: String,
}

impl ToolRouter {
    pub fn new(provider: Arc<dyn LlmProvider>, brand_name: impl Into<String>) -> Self {
        Self {
            provider,
            brand_name: brand_name.into(),
        }
    }

    /// Select the operation for the latest user message.
    pub async fn select_operation(
        &self,
        history: &[ChatMessage],
        user_message: &str,
        context: &ProductBinding,
    ) -> Routing {
        let mut messages = vec![ChatMessage::system(classification_system_prompt(
            &self.brand_name,
        ))];

        if let Some(previous) = history.iter().rev().find(|m| m.role == "assistant") {
            messages.push(ChatMessage::assistant(previous.content.clone()));
        }
        messages.push(ChatMessage::user(user_message));

        let request = ChatRequest::new(messages).deterministic().json_format();

        let outcome = match self.provider.chat(request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!("classification call failed: {}", err);
                return Routing::NoOperation;
            }
        };

        match extract_call(&outcome) {
            Some(call) => self.resolve(call, user_message, context),
            None => {
                tracing::debug!("no tool call recognized in classifier output");
                Routing::NoOperation
            }
        }
    }

    fn resolve(&self, call: RawCall, user_message: &str, context: &ProductBinding) -> Routing {
        let Some(tool) = ToolName::parse(&call.name) else {
            tracing::debug!(tool = %call.name, "classifier picked an unknown tool");
            return Routing::NoOperation;
        };

        let args = call
            .arguments
            .as_object()
            .cloned()
            .unwrap_or_else(Map::new);

        // The brand itself is not a product. A classified call carrying the
        // brand literal as product name is redirected to general info, no
        // matter what was classified.
        if let Some(name) = string_arg(&args, &["name", "product_name"]) {
            if name.trim().eq_ignore_ascii_case(self.brand_name.trim()) {
                tracing::debug!("brand literal used as product name, rerouting to general info");
                return Routing::Operation(Operation::GeneralInfo {
                    message: user_message.to_string(),
                });
            }
        }

        let operation = match tool {
            ToolName::GetProductList => Operation::ProductList,
            ToolName::GetCategoryList => Operation::CategoryList,
            ToolName::GetProductsByCategory => {
                let Some(category) = string_arg(&args, &["category"]) else {
                    tracing::debug!("category argument missing");
                    return Routing::NoOperation;
                };
                Operation::ProductsByCategory { category }
            }
            ToolName::GetProductDetails => {
                let Some(product_name) = string_arg(&args, &["name", "product_name"]) else {
                    tracing::debug!("product name argument missing");
                    return Routing::NoOperation;
                };
                Operation::ProductDetails { product_name }
            }
            ToolName::GetProductProperty => {
                let property =
                    string_arg(&args, &["property"]).and_then(|p| ProductProperty::parse(&p));
                // product_name is optional in the schema: default to the
                // product currently being discussed.
                let product_name = string_arg(&args, &["product_name", "name"])
                    .or_else(|| context.product_name().map(String::from));
                Operation::ProductProperty {
                    property,
                    product_name,
                }
            }
            ToolName::GetDisclaimer => Operation::Disclaimer {
                message: string_arg(&args, &["message", "question"])
                    .unwrap_or_else(|| user_message.to_string()),
            },
            ToolName::GetGeneralInfo => Operation::GeneralInfo {
                message: string_arg(&args, &["message", "question"])
                    .unwrap_or_else(|| user_message.to_string()),
            },
        };

        tracing::info!(operation = operation.label(), "routed user message");
        Routing::Operation(operation)
    }
}

/// Ordered parse strategies over the classifier response: native tool call,
/// flat JSON body, then the single-wrapper deviation. First success wins.
fn extract_call(outcome: &ChatOutcome) -> Option<RawCall> {
    if let Some(call) = outcome.tool_calls.first() {
        return Some(RawCall {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        });
    }

    let value = serde_json::from_str::<Value>(outcome.content.trim()).ok()?;

    parse_flat(&value).or_else(|| parse_wrapped(&value))
}

/// `{"name": ..., "arguments": {...}}`, tolerating the original contract's
/// `function`/`parameters` spelling.
fn parse_flat(value: &Value) -> Option<RawCall> {
    let obj = value.as_object()?;

    let name = obj
        .get("name")
        .or_else(|| obj.get("function"))
        .and_then(|v| v.as_str())?;

    let arguments = obj
        .get("arguments")
        .or_else(|| obj.get("parameters"))
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));

    Some(RawCall {
        name: name.to_string(),
        arguments,
    })
}

/// The call object nested one level inside an arbitrary wrapper key.
fn parse_wrapped(value: &Value) -> Option<RawCall> {
    let obj = value.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    parse_flat(obj.values().next()?)
}

fn string_arg(args: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| args.get(*key))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}
