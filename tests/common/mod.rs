//! Scripted fakes shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use tempfile::TempDir;

use wiki_digest::config::Config;
use wiki_digest::error::LlmError;
use wiki_digest::pipeline::Pipeline;
use wiki_digest::store::Store;

pub use wiki_digest::testing::{FakeWiki, FnModel};

pub fn wiki_url(title: &str) -> String {
    FakeWiki::url_for(title)
}

pub fn test_config(dir: &TempDir, extra: &str) -> Config {
    let toml_text = format!(
        "[db]\npath = \"{}\"\n[server]\nbind = \"127.0.0.1:0\"\n{}",
        dir.path().join("data/wiki-digest.sqlite").display(),
        extra
    );
    toml::from_str(&toml_text).unwrap()
}

pub async fn build_pipeline(
    dir: &TempDir,
    extra_config: &str,
    model: Arc<FnModel>,
    wiki: FakeWiki,
) -> Pipeline {
    let config = test_config(dir, extra_config);
    let store = Store::open(&config).await.unwrap();
    Pipeline::new(model, Arc::new(wiki), store, &config)
}

pub fn json_reply(value: serde_json::Value) -> Result<String, LlmError> {
    Ok(value.to_string())
}

/// A long, repetitive article body.
pub fn long_article(chars: usize) -> String {
    let sentence = "Meryl Streep is an American actress known for her versatility and accents. ";
    sentence.repeat(chars / sentence.len() + 1)[..chars].to_string()
}

pub fn words(n: usize) -> String {
    vec!["digest"; n].join(" ")
}

/// A model that behaves like a well-prompted assistant for the Meryl and
/// Rust scenarios used across the integration tests.
pub fn meryl_model() -> FnModel {
    FnModel::new(|req| {
        let user = req.user.to_lowercase();
        match req.schema_name() {
            "topic_extraction_v1" => {
                if user.contains("actress") {
                    json_reply(serde_json::json!({
                        "topic": "Meryl Streep", "confidence": 0.95, "is_ambiguous": false
                    }))
                } else if user.contains("rust") {
                    json_reply(serde_json::json!({
                        "topic": "Rust (programming language)", "confidence": 0.93, "is_ambiguous": false
                    }))
                } else if user.contains("nonsense") || user.contains("xqz") {
                    json_reply(serde_json::json!({
                        "topic": "Xqzplorfniazz123 widget", "confidence": 0.9, "is_ambiguous": false
                    }))
                } else {
                    json_reply(serde_json::json!({
                        "topic": "Meryl", "confidence": 0.9, "is_ambiguous": false
                    }))
                }
            }
            "disambiguation_options_v1" => json_reply(serde_json::json!({
                "options": [
                    { "topic": "Meryl Streep", "description": "American actress", "confidence": 0.8 },
                    { "topic": "Meryl Davis", "description": "American ice dancer", "confidence": 0.5 }
                ],
                "conversation_prompt": "Which Meryl do you mean?"
            })),
            "disambiguation_selection_v1" => json_reply(serde_json::json!({
                "selected_index": null, "new_topic": null,
                "needs_clarification": true, "question": "Could you tell me more?"
            })),
            "chunk_summary_v1" => json_reply(serde_json::json!({ "summary": words(60) })),
            "digest_v1" => json_reply(serde_json::json!({ "summary": words(420) })),
            "article_fallback_v1" => Err(LlmError::Malformed("no article".into())),
            other => Err(LlmError::Malformed(format!("unexpected schema {}", other))),
        }
    })
}

pub fn meryl_wiki() -> FakeWiki {
    FakeWiki::new()
        .page(
            "Meryl Streep",
            "Mary Louise Streep is an American actress.",
            &long_article(50_000),
        )
        .page("Meryl Davis", "Meryl Davis is an ice dancer.", "Meryl Davis is an American ice dancer.")
        .page(
            "Rust (programming language)",
            "Rust is a programming language.",
            "Rust is a general-purpose programming language emphasizing performance and safety.",
        )
}
