// Models module - diagram graph received from the language model and the
// persisted request records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn is_false(v: &bool) -> bool {
    !*v
}

/// Diagram graph: the structured output of a prediction and the input to
/// rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub footer: String,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<Relation>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub with_legend: bool,
}

/// A single C4 container.
///
/// `system` groups containers into a `System_Boundary`; an empty value keeps
/// the container at the top level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub technology: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub system: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_user: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_queue: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_database: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_external: bool,
}

/// A directed relation between two containers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Relation {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub direction: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub technology: String,
}

/// User's prompt as persisted for analytics.
#[derive(Debug, Clone)]
pub struct UserInput {
    pub request_id: String,
    pub user_id: String,
    pub prompt: String,
    pub timestamp: DateTime<Utc>,
}

/// Model prediction as persisted for analytics.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub request_id: String,
    pub user_id: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
}
