use serde_json::{Map, Value};

use crate::core::errors::ApiError;

pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 1, 65535)?;
        validate_string_array_field(server, "server.allowed_origins", "allowed_origins")?;
    }

    if let Some(ollama) = expect_optional_object(root, "ollama")? {
        validate_optional_string_field(ollama, "ollama.base_url", "base_url")?;
        validate_optional_string_field(ollama, "ollama.chat_model", "chat_model")?;
        validate_optional_string_field(ollama, "ollama.embedding_model", "embedding_model")?;
        validate_optional_string_field(ollama, "ollama.api_key", "api_key")?;
        validate_u64_field(
            ollama,
            "ollama.request_timeout_secs",
            "request_timeout_secs",
            1,
            3600,
        )?;
    }

    if let Some(assistant) = expect_optional_object(root, "assistant")? {
        validate_optional_string_field(assistant, "assistant.brand_name", "brand_name")?;
        validate_optional_string_field(assistant, "assistant.answer_prompt", "answer_prompt")?;
        validate_optional_string_field(assistant, "assistant.system_prompt", "system_prompt")?;
        validate_bool_field(
            assistant,
            "assistant.suppress_thinking",
            "suppress_thinking",
        )?;
        validate_u64_field(
            assistant,
            "assistant.generation_timeout_secs",
            "generation_timeout_secs",
            1,
            3600,
        )?;
        validate_u64_field(
            assistant,
            "assistant.context_reset_after_turns",
            "context_reset_after_turns",
            0,
            1000,
        )?;
        validate_u64_field(
            assistant,
            "assistant.product_page_size",
            "product_page_size",
            1,
            100,
        )?;
        validate_u64_field(
            assistant,
            "assistant.category_neighbors",
            "category_neighbors",
            1,
            10,
        )?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ApiError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_bool().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "boolean"))
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_str().is_none() {
        return Err(config_type_error(path, "string"));
    }
    Ok(())
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at '{}[{}]': value cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_basic_valid_shape() {
        let config = json!({
            "server": { "host": "127.0.0.1", "port": 8080 },
            "ollama": {
                "base_url": "http://localhost:11434",
                "chat_model": "phi4-mini",
                "embedding_model": "bge-m3",
                "request_timeout_secs": 30
            },
            "assistant": {
                "brand_name": "ImpactFlow",
                "suppress_thinking": false,
                "generation_timeout_secs": 30,
                "context_reset_after_turns": 0
            }
        });
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn rejects_wrong_typed_timeout() {
        let config = json!({
            "assistant": { "generation_timeout_secs": "soon" }
        });
        assert!(matches!(
            validate_config(&config),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_page_size() {
        let config = json!({
            "assistant": { "product_page_size": 0 }
        });
        assert!(matches!(
            validate_config(&config),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn rejects_non_object_section() {
        let config = json!({ "ollama": "local" });
        assert!(matches!(
            validate_config(&config),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn context_reset_zero_is_valid() {
        let config = json!({
            "assistant": { "context_reset_after_turns": 0 }
        });
        assert!(validate_config(&config).is_ok());
    }
}
