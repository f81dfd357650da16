//! Intent classification and summarization helpers.
//!
//! Prompts sent to the model, parsing of its replies, and the keyword
//! heuristics used whenever the model is unavailable or answers with
//! something unusable.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Intents the gateway reports.
pub const INTENTS: &[&str] = &[
    "revenue_query",
    "forecast",
    "inventory",
    "product_info",
    "document_qa",
    "general",
];

/// Keyword table for the heuristic classifier, checked in order.
const KEYWORD_RULES: &[(&str, &[&str])] = &[
    ("revenue_query", &["doanh thu", "revenue", "sales"]),
    ("forecast", &["dự báo", "forecast", "predict"]),
    ("inventory", &["tồn kho", "inventory", "stock"]),
    ("document_qa", &["sản phẩm", "product", "là gì", "what is"]),
];

const KEYWORD_CONFIDENCE: f64 = 0.6;
const GENERAL_CONFIDENCE: f64 = 0.3;

/// Longest text kept by the heuristic summary.
const FALLBACK_SUMMARY_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentResult {
    pub intent: String,
    pub confidence: f64,
    pub entities: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ModelIntent {
    intent: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    entities: Option<Map<String, Value>>,
}

/// Prompt asking the model for a JSON intent classification.
pub fn intent_prompt(text: &str) -> String {
    format!(
        "Classify the intent of the user message below for a business analytics assistant.\n\
         Allowed intents: {}.\n\
         Reply with JSON only, in the form \
         {{\"intent\": \"...\", \"confidence\": 0.0, \"entities\": {{}}}}.\n\
         Entities may include product, period, amount or location when present.\n\n\
         Message: {text}",
        INTENTS.join(", ")
    )
}

/// Prompt asking the model to summarize `text` in `language`.
pub fn summary_prompt(text: &str, language: &str) -> String {
    format!("Summarize the following text concisely in {language}:\n\n{text}")
}

/// Parse the model's reply into an intent.
///
/// Accepts a bare JSON object or one wrapped in prose or a code fence.
/// Returns `None` for anything unparseable or naming an unknown intent.
pub fn parse_intent_reply(reply: &str) -> Option<IntentResult> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    let parsed: ModelIntent = serde_json::from_str(&reply[start..=end]).ok()?;

    let intent = parsed.intent.trim().to_lowercase();
    if !INTENTS.contains(&intent.as_str()) {
        return None;
    }
    let confidence = parsed
        .confidence
        .filter(|c| c.is_finite())
        .map_or(KEYWORD_CONFIDENCE, |c| c.clamp(0.0, 1.0));

    Some(IntentResult {
        intent,
        confidence,
        entities: parsed.entities.unwrap_or_default(),
    })
}

/// Keyword-based classification, in English and Vietnamese.
pub fn classify_by_keywords(text: &str) -> IntentResult {
    let lowered = text.to_lowercase();
    let matched = KEYWORD_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)));

    match matched {
        Some((intent, _)) => IntentResult {
            intent: (*intent).to_string(),
            confidence: KEYWORD_CONFIDENCE,
            entities: Map::new(),
        },
        None => IntentResult {
            intent: "general".to_string(),
            confidence: GENERAL_CONFIDENCE,
            entities: Map::new(),
        },
    }
}

/// Heuristic summary: the first sentence, capped at a fixed number of characters.
pub fn fallback_summary(text: &str) -> String {
    let trimmed = text.trim();
    let first_sentence = trimmed
        .find(['.', '!', '?', '\n'])
        .map_or(trimmed, |idx| &trimmed[..=idx])
        .trim();

    if first_sentence.chars().count() <= FALLBACK_SUMMARY_CHARS {
        return first_sentence.to_string();
    }
    let mut summary: String = first_sentence.chars().take(FALLBACK_SUMMARY_CHARS).collect();
    summary.push_str("...");
    summary
}
