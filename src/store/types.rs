use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Section label of a product chunk. The vocabulary is closed; ingestion
/// rejects anything it cannot parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Name,
    Tags,
    Categories,
    ShortDescription,
    ProductDetails,
    TargetAudience,
    Ingredients,
    IntakeRecommendation,
    ReferenceLink,
    ApplicationArea,
    UserExperience,
    FormulationOrigin,
    History,
    SimilarProducts,
    RecommendedProducts,
    SupportingProducts,
    CombinableWith,
}

impl Section {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "name" => Some(Section::Name),
            "tags" => Some(Section::Tags),
            "categories" => Some(Section::Categories),
            "short_description" => Some(Section::ShortDescription),
            "product_details" => Some(Section::ProductDetails),
            "target_audience" => Some(Section::TargetAudience),
            "ingredients" => Some(Section::Ingredients),
            "intake_recommendation" => Some(Section::IntakeRecommendation),
            "reference_link" => Some(Section::ReferenceLink),
            "application_area" => Some(Section::ApplicationArea),
            "user_experience" => Some(Section::UserExperience),
            "formulation_origin" => Some(Section::FormulationOrigin),
            "history" => Some(Section::History),
            "similar_products" => Some(Section::SimilarProducts),
            "recommended_products" => Some(Section::RecommendedProducts),
            "supporting_products" => Some(Section::SupportingProducts),
            "combinable_with" => Some(Section::CombinableWith),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Name => "name",
            Section::Tags => "tags",
            Section::Categories => "categories",
            Section::ShortDescription => "short_description",
            Section::ProductDetails => "product_details",
            Section::TargetAudience => "target_audience",
            Section::Ingredients => "ingredients",
            Section::IntakeRecommendation => "intake_recommendation",
            Section::ReferenceLink => "reference_link",
            Section::ApplicationArea => "application_area",
            Section::UserExperience => "user_experience",
            Section::FormulationOrigin => "formulation_origin",
            Section::History => "history",
            Section::SimilarProducts => "similar_products",
            Section::RecommendedProducts => "recommended_products",
            Section::SupportingProducts => "supporting_products",
            Section::CombinableWith => "combinable_with",
        }
    }
}

/// Sections aggregated for product listings.
pub const OVERVIEW_SECTIONS: [Section; 4] = [
    Section::Name,
    Section::Categories,
    Section::ShortDescription,
    Section::ReferenceLink,
];

/// Partition key for Q&A entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Disclaimer,
    General,
}

impl Topic {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "disclaimer" => Some(Topic::Disclaimer),
            "general" => Some(Topic::General),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Disclaimer => "disclaimer",
            Topic::General => "general",
        }
    }
}

/// One stored product section with metadata. The embedding travels
/// separately so rows can be shaped without dragging vectors along.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductChunk {
    pub chunk_id: String,
    pub product_id: String,
    pub section: Section,
    pub text: String,
    pub metadata: Option<Value>,
}

/// A chunk with its computed distance to the query vector.
#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub chunk: ProductChunk,
    pub distance: f32,
}

/// Aggregated listing row: one product with its overview sections keyed by
/// section label.
#[derive(Debug, Clone, Serialize)]
pub struct ProductOverview {
    pub product_id: String,
    pub info: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QnaEntry {
    pub id: String,
    pub topic: Topic,
    pub question_text: String,
    pub answer_text: String,
}

#[derive(Debug, Clone)]
pub struct QnaHit {
    pub entry: QnaEntry,
    pub distance: f32,
}
