//! Question category prompt and the reply shape it asks for.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Category labels the model is asked to return.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Classification {
    /// Broad subject area, e.g. "Mathematics".
    pub primary_category: String,
    /// Narrower topic within the primary category, e.g. "Algebra".
    pub secondary_category: String,
}

/// JSON schema of [`Classification`], embedded in the prompt.
pub fn classification_schema() -> serde_json::Value {
    let schema = schemars::schema_for!(Classification);
    serde_json::to_value(schema).unwrap_or_else(|_| {
        serde_json::json!({
            "type": "object",
            "properties": {
                "primary_category": {"type": "string"},
                "secondary_category": {"type": "string"}
            }
        })
    })
}

const TAXONOMY: &str = "\
- Mathematics: Algebra, Geometry, Number Theory, Combinatorics, Probability and Statistics, Calculus, Arithmetic
- Science: Physics, Chemistry, Biology, Earth Science
- Computer Science: Algorithms, Programming, Data Structures, Systems
- Logic: Deductive Reasoning, Puzzles
- Humanities: History, Philosophy, Literature, Language
- Other: General Knowledge";

/// Build the classification prompt for one question.
pub fn question_category_prompt(question: &str) -> String {
    let schema = serde_json::to_string(&classification_schema()).unwrap_or_default();
    format!(
        "\
You are classifying questions by subject. Pick the best primary category \
and one secondary category under it from this taxonomy:

{TAXONOMY}

Reply with a single JSON object and nothing else. It must match this schema:
{schema}

Question:
{question}"
    )
}
