//! Clarification dialogue for low-confidence topics.
//!
//! [`Disambiguator::generate`] turns an ambiguous topic into a short list
//! of candidate interpretations and a question for the user.
//! [`Disambiguator::resolve`] maps the user's free-text reply back onto
//! one of those candidates.
//!
//! Resolution is layered so that the common replies never reach the model:
//!
//! 1. local matching (a number, an ordinal, the label itself, or a unique
//!    best keyword overlap with label and description);
//! 2. the model, at temperature 0, asked for an index, a new topic, or a
//!    follow-up question;
//! 3. the configured [`SelectionFallback`].
//!
//! The first option is never picked just because nothing else matched.

use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::SelectionFallback;
use crate::error::{Component, LlmError, PipelineError, Result};
use crate::llm::{extract, ChatModel, ChatRequest};
use crate::models::{DisambiguationOption, DisambiguationResult};

pub const OPTIONS_SCHEMA: &str = "disambiguation_options_v1";
pub const SELECTION_SCHEMA: &str = "disambiguation_selection_v1";

const MAX_OPTIONS: usize = 8;

const GENERATE_PROMPT: &str = "You help users clarify ambiguous topics before an encyclopedia lookup.
Given a topic and the user's original query, list the distinct things the topic could refer to,
most likely first, each with a one-sentence description. Use the exact encyclopedia article title
as the option topic where one exists. Then write a short, friendly question asking which one the
user means.

Respond with a JSON object:
{\"options\": [{\"topic\": string, \"description\": string, \"confidence\": number}], \"conversation_prompt\": string}";

const SELECT_PROMPT: &str = "The user was shown a numbered list of options and replied in free text.
Decide what the reply means:
- if it clearly picks one option, set selected_index to that option's number;
- if it names a different subject altogether, set new_topic to that subject;
- otherwise set needs_clarification to true and write a short follow-up question.
Never guess. If the reply is unclear, ask.

Respond with a JSON object:
{\"selected_index\": number or null, \"new_topic\": string or null, \"needs_clarification\": boolean, \"question\": string or null}";

const ORDINALS: &[&str] = &[
    "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth", "tenth",
];

/// Words that carry no meaning in a selection reply.
const FILLER: &[&str] = &[
    "the", "one", "option", "choice", "number", "please", "i", "want", "pick", "choose", "mean",
    "meant", "a", "an", "that", "is", "it", "about",
];

/// Words that turn a mention into a rejection. Contractions arrive split,
/// so "isn't" is seen as "isn".
const NEGATORS: &[&str] = &[
    "not", "no", "none", "neither", "nor", "never", "except", "isn", "don", "doesn", "wasn",
    "aren", "nope",
];

/// Outcome of interpreting a user's reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Selected(DisambiguationOption),
    /// The user named something other than the offered options.
    NewTopic(String),
    NeedsMoreInput { question: String },
}

#[derive(Debug, Deserialize)]
struct GeneratedOptions {
    #[serde(default)]
    options: Vec<DisambiguationOption>,
    #[serde(default)]
    conversation_prompt: String,
}

#[derive(Debug, Deserialize)]
struct SelectionReply {
    #[serde(default)]
    selected_index: Option<i64>,
    #[serde(default)]
    new_topic: Option<String>,
    #[serde(default)]
    needs_clarification: bool,
    #[serde(default)]
    question: Option<String>,
}

fn options_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "options": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "topic": { "type": "string" },
                        "description": { "type": "string" },
                        "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
                    },
                    "required": ["topic", "description"]
                }
            },
            "conversation_prompt": { "type": "string" }
        },
        "required": ["options", "conversation_prompt"]
    })
}

fn selection_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "selected_index": { "type": ["integer", "null"] },
            "new_topic": { "type": ["string", "null"] },
            "needs_clarification": { "type": "boolean" },
            "question": { "type": ["string", "null"] }
        },
        "required": ["selected_index", "new_topic", "needs_clarification", "question"]
    })
}

pub struct Disambiguator {
    model: Arc<dyn ChatModel>,
    fallback: SelectionFallback,
}

impl Disambiguator {
    pub fn new(model: Arc<dyn ChatModel>, fallback: SelectionFallback) -> Self {
        Self { model, fallback }
    }

    /// Produces candidate interpretations of `topic` and a clarifying question.
    ///
    /// `context` is the user's original query. A reply without any usable
    /// option is a schema violation.
    pub async fn generate(&self, topic: &str, context: &str) -> Result<DisambiguationResult> {
        let user = format!("Topic: {}\nOriginal query: {}", topic, context);
        let request = ChatRequest::new(GENERATE_PROMPT, user).schema(OPTIONS_SCHEMA, options_schema());

        let generated: GeneratedOptions = extract(self.model.as_ref(), &request)
            .await
            .map_err(|e| PipelineError::model(Component::Disambiguator, "option_generation", e))?;

        let options = clean_options(generated.options);
        if options.is_empty() {
            return Err(PipelineError::model(
                Component::Disambiguator,
                "option_generation",
                LlmError::Malformed("no disambiguation options returned".into()),
            ));
        }

        let conversation_prompt = match generated.conversation_prompt.trim() {
            "" => default_question(topic, &options),
            q => q.to_string(),
        };

        tracing::debug!(topic, options = options.len(), "generated disambiguation options");
        Ok(DisambiguationResult {
            options,
            conversation_prompt,
            needs_clarification: true,
        })
    }

    /// Interprets the user's reply against the offered options.
    pub async fn resolve(&self, result: &DisambiguationResult, reply: &str) -> Result<Resolution> {
        let reply = reply.trim();
        if reply.is_empty() || result.options.is_empty() {
            return Ok(Resolution::NeedsMoreInput {
                question: result.conversation_prompt.clone(),
            });
        }

        if let Some(index) = match_locally(&result.options, reply) {
            tracing::debug!(index, "selection matched locally");
            return Ok(Resolution::Selected(result.options[index].clone()));
        }

        let question = match self.ask_model(result, reply).await? {
            Some(SelectionReply {
                selected_index: Some(i),
                ..
            }) if i >= 1 && (i as usize) <= result.options.len() => {
                tracing::debug!(index = i, "selection interpreted by model");
                return Ok(Resolution::Selected(result.options[i as usize - 1].clone()));
            }
            Some(SelectionReply {
                new_topic: Some(topic),
                needs_clarification: false,
                ..
            }) if !topic.trim().is_empty() => {
                return Ok(Resolution::NewTopic(topic.trim().to_string()));
            }
            Some(parsed) => parsed.question.filter(|q| !q.trim().is_empty()),
            None => None,
        };

        if self.fallback == SelectionFallback::HighestConfidence {
            if let Some(index) = highest_confidence(&result.options) {
                tracing::debug!(index, "selection fell back to highest confidence");
                return Ok(Resolution::Selected(result.options[index].clone()));
            }
        }

        Ok(Resolution::NeedsMoreInput {
            question: question.unwrap_or_else(|| result.conversation_prompt.clone()),
        })
    }

    /// Returns `None` when the model's reply could not be parsed.
    async fn ask_model(
        &self,
        result: &DisambiguationResult,
        reply: &str,
    ) -> Result<Option<SelectionReply>> {
        let listing = result
            .options
            .iter()
            .enumerate()
            .map(|(i, o)| match &o.description {
                Some(d) => format!("{}. {}: {}", i + 1, o.topic, d),
                None => format!("{}. {}", i + 1, o.topic),
            })
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "Question: {}\nOptions:\n{}\nUser reply: {}",
            result.conversation_prompt, listing, reply
        );
        let request = ChatRequest::new(SELECT_PROMPT, user)
            .temperature(0.0)
            .schema(SELECTION_SCHEMA, selection_schema());

        match extract::<SelectionReply>(self.model.as_ref(), &request).await {
            Ok(parsed) => Ok(Some(parsed)),
            Err(LlmError::Malformed(msg)) => {
                tracing::warn!(error = %msg, "unparseable selection reply");
                Ok(None)
            }
            Err(e) => Err(PipelineError::model(
                Component::Disambiguator,
                "option_selection",
                e,
            )),
        }
    }
}

fn clean_options(options: Vec<DisambiguationOption>) -> Vec<DisambiguationOption> {
    let mut seen = HashSet::new();
    options
        .into_iter()
        .filter_map(|mut o| {
            o.topic = o.topic.trim().to_string();
            if o.topic.is_empty() || !seen.insert(o.topic.to_lowercase()) {
                return None;
            }
            o.description = o.description.filter(|d| !d.trim().is_empty());
            o.confidence = o.confidence.filter(|c| c.is_finite()).map(|c| c.clamp(0.0, 1.0));
            Some(o)
        })
        .take(MAX_OPTIONS)
        .collect()
}

fn default_question(topic: &str, options: &[DisambiguationOption]) -> String {
    let labels = options
        .iter()
        .map(|o| o.topic.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!("\"{}\" could mean several things: {}. Which one did you mean?", topic, labels)
}

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn normalize(text: &str) -> String {
    tokens(text).join(" ")
}

/// Deterministic selection from the reply alone. `None` means "not sure".
pub fn match_locally(options: &[DisambiguationOption], reply: &str) -> Option<usize> {
    let words = tokens(reply);
    if words.is_empty() {
        return None;
    }
    // A mention may be a rejection; leave negated replies to the model.
    if words.iter().any(|w| NEGATORS.contains(&w.as_str())) {
        return None;
    }
    let content: Vec<&str> = words
        .iter()
        .map(|w| w.as_str())
        .filter(|w| !FILLER.contains(w))
        .collect();

    // "2", "#2", "option 2", "number 2"
    if content.len() == 1 {
        if let Ok(n) = content[0].parse::<usize>() {
            if n >= 1 && n <= options.len() {
                return Some(n - 1);
            }
        }
    }

    // "the second", "second one", "2nd", "the last"
    if content.len() == 1 {
        if let Some(index) = ordinal_index(content[0], options.len()) {
            return Some(index);
        }
    }

    let reply_norm = normalize(reply);
    let labels: Vec<String> = options.iter().map(|o| normalize(&o.topic)).collect();

    if let Some(i) = labels.iter().position(|l| !l.is_empty() && *l == reply_norm) {
        return Some(i);
    }

    // Label mentioned inside a longer reply; the longest mention wins.
    let padded = format!(" {} ", reply_norm);
    let mentioned: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|(_, l)| l.len() >= 3 && padded.contains(&format!(" {} ", l)))
        .map(|(i, _)| i)
        .collect();
    if let Some(&longest) = mentioned.iter().max_by_key(|&&i| labels[i].len()) {
        let len = labels[longest].len();
        if mentioned.iter().filter(|&&i| labels[i].len() == len).count() == 1 {
            return Some(longest);
        }
    }

    keyword_match(options, &content)
}

fn ordinal_index(word: &str, count: usize) -> Option<usize> {
    if word == "last" {
        return count.checked_sub(1);
    }
    let n = if let Some(i) = ORDINALS.iter().position(|o| *o == word) {
        i + 1
    } else {
        let digits = word
            .strip_suffix("st")
            .or_else(|| word.strip_suffix("nd"))
            .or_else(|| word.strip_suffix("rd"))
            .or_else(|| word.strip_suffix("th"))?;
        digits.parse::<usize>().ok()?
    };
    (n >= 1 && n <= count).then(|| n - 1)
}

/// Unique best overlap between reply words and each option's label and
/// description.
fn keyword_match(options: &[DisambiguationOption], content: &[&str]) -> Option<usize> {
    let reply: HashSet<&str> = content.iter().copied().filter(|w| w.len() >= 3).collect();
    if reply.is_empty() {
        return None;
    }

    let scores: Vec<usize> = options
        .iter()
        .map(|o| {
            let mut text = o.topic.clone();
            if let Some(d) = &o.description {
                text.push(' ');
                text.push_str(d);
            }
            let words: HashSet<String> = tokens(&text).into_iter().collect();
            reply.iter().filter(|w| words.contains(**w)).count()
        })
        .collect();

    let best = *scores.iter().max()?;
    if best == 0 || scores.iter().filter(|&&s| s == best).count() > 1 {
        return None;
    }
    scores.iter().position(|&s| s == best)
}

/// Index of the most confident option; ties keep the earlier one. `None`
/// when no option carries a confidence.
fn highest_confidence(options: &[DisambiguationOption]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, o) in options.iter().enumerate() {
        if let Some(c) = o.confidence {
            if best.map_or(true, |(_, b)| c > b) {
                best = Some((i, c));
            }
        }
    }
    best.map(|(i, _)| i)
}
