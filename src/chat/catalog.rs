//! Static tool catalog for the classification model.
//!
//! The catalog is defined once and read-only at runtime. Its JSON rendering
//! is embedded into the classification system prompt together with the
//! output contract and a handful of example exchanges.

use std::fmt::Write;

use serde_json::{json, Value};

use crate::store::Section;

/// Closed set of retrieval operations the classifier may pick from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    GetProductList,
    GetCategoryList,
    GetProductsByCategory,
    GetProductDetails,
    GetProductProperty,
    GetDisclaimer,
    GetGeneralInfo,
}

impl ToolName {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "get_product_list" => Some(ToolName::GetProductList),
            "get_category_list" => Some(ToolName::GetCategoryList),
            "get_products_by_category" => Some(ToolName::GetProductsByCategory),
            "get_product_details" => Some(ToolName::GetProductDetails),
            "get_product_property" => Some(ToolName::GetProductProperty),
            "get_disclaimer" => Some(ToolName::GetDisclaimer),
            "get_general_info" => Some(ToolName::GetGeneralInfo),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::GetProductList => "get_product_list",
            ToolName::GetCategoryList => "get_category_list",
            ToolName::GetProductsByCategory => "get_products_by_category",
            ToolName::GetProductDetails => "get_product_details",
            ToolName::GetProductProperty => "get_product_property",
            ToolName::GetDisclaimer => "get_disclaimer",
            ToolName::GetGeneralInfo => "get_general_info",
        }
    }
}

/// Product attribute addressable through `get_product_property`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductProperty {
    TargetAudience,
    IntakeRecommendation,
    ApplicationArea,
    Ingredients,
    FormulationOrigin,
    History,
    UserExperience,
}

impl ProductProperty {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "target_audience" => Some(ProductProperty::TargetAudience),
            "intake_recommendation" => Some(ProductProperty::IntakeRecommendation),
            "application_area" => Some(ProductProperty::ApplicationArea),
            "ingredients" => Some(ProductProperty::Ingredients),
            "formulation_origin" => Some(ProductProperty::FormulationOrigin),
            "history" => Some(ProductProperty::History),
            "user_experience" => Some(ProductProperty::UserExperience),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.section().as_str()
    }

    /// The chunk section this property reads from.
    pub fn section(&self) -> Section {
        match self {
            ProductProperty::TargetAudience => Section::TargetAudience,
            ProductProperty::IntakeRecommendation => Section::IntakeRecommendation,
            ProductProperty::ApplicationArea => Section::ApplicationArea,
            ProductProperty::Ingredients => Section::Ingredients,
            ProductProperty::FormulationOrigin => Section::FormulationOrigin,
            ProductProperty::History => Section::History,
            ProductProperty::UserExperience => Section::UserExperience,
        }
    }
}

const PROPERTY_LABELS: &str = "target_audience | intake_recommendation | application_area | \
                               ingredients | formulation_origin | history | user_experience";

pub struct ToolArgument {
    pub name: &'static str,
    pub kind: &'static str,
    pub description: &'static str,
    pub required: bool,
}

pub struct ToolDescriptor {
    pub name: ToolName,
    pub description: &'static str,
    pub arguments: &'static [ToolArgument],
}

static CATALOG: [ToolDescriptor; 7] = [
    ToolDescriptor {
        name: ToolName::GetProductList,
        description: "Fetches a list of all products. Use when the user asks which products are \
                      available.",
        arguments: &[],
    },
    ToolDescriptor {
        name: ToolName::GetCategoryList,
        description: "Fetches the list of product categories. Use when the user asks which \
                      categories exist.",
        arguments: &[],
    },
    ToolDescriptor {
        name: ToolName::GetProductsByCategory,
        description: "Fetches the products of one category. Use when the user asks about \
                      products in a particular category.",
        arguments: &[ToolArgument {
            name: "category",
            kind: "string",
            description: "Category name",
            required: true,
        }],
    },
    ToolDescriptor {
        name: ToolName::GetProductDetails,
        description: "Fetches detailed information about a product. Use when the user refers to \
                      a specific product by name.",
        arguments: &[ToolArgument {
            name: "name",
            kind: "string",
            description: "Product name",
            required: true,
        }],
    },
    ToolDescriptor {
        name: ToolName::GetProductProperty,
        description: "Fetches one property of a product, e.g. its target audience or \
                      ingredients. Use when the user asks about a single aspect of a product.",
        arguments: &[
            ToolArgument {
                name: "property",
                kind: "string",
                description: "One of: target_audience, intake_recommendation, application_area, \
                              ingredients, formulation_origin, history, user_experience",
                required: true,
            },
            ToolArgument {
                name: "product_name",
                kind: "string",
                description: "Product name; may be omitted when a product is already being \
                              discussed",
                required: false,
            },
        ],
    },
    ToolDescriptor {
        name: ToolName::GetDisclaimer,
        description: "Fetches a vetted disclaimer answer, e.g. about pregnancy, medication or \
                      side effects. Use for health and safety questions.",
        arguments: &[],
    },
    ToolDescriptor {
        name: ToolName::GetGeneralInfo,
        description: "Fetches general information about the brand and the shop. Use when the \
                      question is about the company rather than a single product.",
        arguments: &[],
    },
];

pub fn catalog() -> &'static [ToolDescriptor] {
    &CATALOG
}

/// JSON rendering of the catalog as embedded into the system prompt.
pub fn catalog_schema() -> Value {
    let tools: Vec<Value> = CATALOG
        .iter()
        .map(|tool| {
            let mut descriptor = json!({
                "name": tool.name.as_str(),
                "description": tool.description,
            });

            if !tool.arguments.is_empty() {
                let mut properties = serde_json::Map::new();
                let mut required = Vec::new();
                for arg in tool.arguments {
                    properties.insert(
                        arg.name.to_string(),
                        json!({ "type": arg.kind, "description": arg.description }),
                    );
                    if arg.required {
                        required.push(json!(arg.name));
                    }
                }
                descriptor["parameters"] = json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                });
            }

            descriptor
        })
        .collect();

    Value::Array(tools)
}

/// System instruction steering the classification model.
pub fn classification_system_prompt(brand_name: &str) -> String {
    let schema = serde_json::to_string(&catalog_schema()).unwrap_or_default();

    let mut prompt = format!(
        "You are the retrieval router of the {brand_name} product assistant.\n\n\
         You have access to the following tools:\n\
         <|tool|>{schema}</|tool|>\n\n"
    );

    prompt.push_str(
        "Pick exactly one tool for the latest user message and respond with exactly one JSON \
         object with the keys \"name\" (the tool) and \"arguments\" (the argument map). \
         No other top-level keys, no prose, no markdown.\n\n",
    );

    let _ = writeln!(prompt, "Property values: {}.", PROPERTY_LABELS);

    prompt.push_str(
        "\nExamples:\n\
         User: Welche Produkte hast du im Sortiment hier?\n\
         Assistant: {\"name\": \"get_product_list\", \"arguments\": {}}\n\n\
         User: Welche Produkte in der Kategorie Body & Clean hast du?\n\
         Assistant: {\"name\": \"get_products_by_category\", \"arguments\": {\"category\": \"Body & Clean\"}}\n\n\
         User: Was weisst du über das Lung Produkt?\n\
         Assistant: {\"name\": \"get_product_details\", \"arguments\": {\"name\": \"Lung\"}}\n\n\
         User: Welche Zielgruppe hat das Produkt?\n\
         Assistant: {\"name\": \"get_product_property\", \"arguments\": {\"property\": \"target_audience\"}}\n\n\
         User: Darf ich das während der Schwangerschaft nehmen?\n\
         Assistant: {\"name\": \"get_disclaimer\", \"arguments\": {}}\n",
    );

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_catalog_entry_has_a_parseable_name() {
        for tool in catalog() {
            assert_eq!(ToolName::parse(tool.name.as_str()), Some(tool.name));
        }
    }

    #[test]
    fn unknown_tool_names_are_rejected() {
        assert_eq!(ToolName::parse("get_price"), None);
        assert_eq!(ToolName::parse(""), None);
    }

    #[test]
    fn property_maps_to_its_section() {
        assert_eq!(
            ProductProperty::parse("target_audience").unwrap().section(),
            Section::TargetAudience
        );
        assert_eq!(
            ProductProperty::parse("ingredients").unwrap().section(),
            Section::Ingredients
        );
        assert_eq!(ProductProperty::parse("price"), None);
    }

    #[test]
    fn schema_marks_required_arguments() {
        let schema = catalog_schema();
        let details = schema
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["name"] == "get_product_details")
            .unwrap();
        assert_eq!(details["parameters"]["required"][0], "name");

        let property = schema
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["name"] == "get_product_property")
            .unwrap();
        let required = property["parameters"]["required"].as_array().unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0], "property");
    }

    #[test]
    fn system_prompt_embeds_catalog_and_contract() {
        let prompt = classification_system_prompt("ImpactFlow");
        assert!(prompt.contains("get_product_details"));
        assert!(prompt.contains("\"arguments\""));
        assert!(prompt.contains("ImpactFlow"));
        assert!(prompt.contains("exactly one JSON"));
    }
}
