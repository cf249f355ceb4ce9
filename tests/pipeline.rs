mod common;

use std::sync::Arc;
use tempfile::TempDir;

use common::*;
use wiki_digest::error::{Component, LlmError, PipelineError};
use wiki_digest::models::DisambiguationOption;
use wiki_digest::pipeline::Outcome;

#[tokio::test]
async fn test_meryl_end_to_end() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(meryl_model());
    let pipeline = build_pipeline(&dir, "", model.clone(), meryl_wiki()).await;

    let outcome = pipeline.process("Meryl").await.unwrap();
    let query_id = match &outcome {
        Outcome::NeedsDisambiguation {
            query_id,
            confidence,
            options,
            conversation_prompt,
            ..
        } => {
            assert!(*confidence < 0.7);
            assert!(!options.is_empty());
            assert!(!conversation_prompt.trim().is_empty());
            *query_id
        }
        other => panic!("expected needs_disambiguation, got {:?}", other),
    };

    let outcome = pipeline
        .disambiguate(query_id, "the actress", None)
        .await
        .unwrap();
    match &outcome {
        Outcome::Success {
            selected_topic,
            title,
            summary,
            verified,
            content_length,
            ..
        } => {
            assert_eq!(selected_topic, "Meryl Streep");
            assert_eq!(title, "Meryl Streep");
            assert!(*verified);
            assert_eq!(*content_length, 50_000);
            assert!(summary.split_whitespace().count() <= 300);
            assert!(summary.ends_with("..."));
        }
        other => panic!("expected success, got {:?}", other),
    }

    let store = pipeline.store();
    let results = store.results_for_query(query_id).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].query_id, query_id);
    assert_eq!(results[0].wikipedia_url, wiki_url("Meryl Streep"));

    let query = store.require_query(query_id).await.unwrap();
    assert_eq!(query.extracted_topic, "Meryl Streep");
    assert_eq!(query.original_query, "Meryl");
    assert!(!query.is_ambiguous);
    assert!(query.updated_at.is_some());

    // "the actress" matched locally, so the selection schema was never used.
    assert_eq!(model.schema_calls("disambiguation_selection_v1"), 0);
}

#[tokio::test]
async fn test_echoed_options_are_not_regenerated() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(meryl_model());
    let pipeline = build_pipeline(&dir, "", model.clone(), meryl_wiki()).await;

    let (query_id, options) = match pipeline.process("Meryl").await.unwrap() {
        Outcome::NeedsDisambiguation {
            query_id, options, ..
        } => (query_id, options),
        other => panic!("unexpected {:?}", other),
    };

    let outcome = pipeline
        .disambiguate(query_id, "2", Some(options))
        .await
        .unwrap();
    match outcome {
        Outcome::Success {
            selected_topic,
            content_length,
            ..
        } => {
            assert_eq!(selected_topic, "Meryl Davis");
            assert!(content_length > 0);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(model.schema_calls("disambiguation_options_v1"), 1);
}

#[tokio::test]
async fn test_unclear_reply_asks_again() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir, "", Arc::new(meryl_model()), meryl_wiki()).await;

    let query_id = pipeline.process("Meryl").await.unwrap().query_id();

    for _ in 0..2 {
        match pipeline.disambiguate(query_id, "whatever", None).await.unwrap() {
            Outcome::NeedsClarification {
                message, options, ..
            } => {
                assert_eq!(message, "Could you tell me more?");
                assert_eq!(options.len(), 2);
            }
            other => panic!("expected needs_clarification, got {:?}", other),
        }
    }

    let query = pipeline.store().require_query(query_id).await.unwrap();
    assert_eq!(query.extracted_topic, "Meryl");
    assert!(pipeline.store().results_for_query(query_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_confident_query_goes_straight_to_digest() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(meryl_model());
    let pipeline = build_pipeline(&dir, "", model.clone(), meryl_wiki()).await;

    let outcome = pipeline
        .process("Tell me about the Rust programming language")
        .await
        .unwrap();
    assert_eq!(outcome.status(), "success");
    assert_eq!(model.schema_calls("disambiguation_options_v1"), 0);
    assert_eq!(model.schema_calls("digest_v1"), 1);
}

#[tokio::test]
async fn test_require_confirmation_then_confirm_url() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(
        &dir,
        "[pipeline]\nrequire_confirmation = true\n",
        Arc::new(meryl_model()),
        meryl_wiki(),
    )
    .await;

    let (query_id, url) = match pipeline
        .process("Tell me about the Rust programming language")
        .await
        .unwrap()
    {
        Outcome::NeedsConfirmation {
            query_id,
            candidates,
            ..
        } => (query_id, candidates[0].url.clone()),
        other => panic!("expected needs_confirmation, got {:?}", other),
    };
    assert!(pipeline.store().results_for_query(query_id).await.unwrap().is_empty());

    match pipeline.confirm(query_id, &url).await.unwrap() {
        Outcome::Success { title, url: u, .. } => {
            assert_eq!(title, "Rust (programming language)");
            assert_eq!(u, url);
        }
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(pipeline.store().results_for_query(query_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_confirm_with_refinement_text() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir, "", Arc::new(meryl_model()), meryl_wiki()).await;

    let query_id = pipeline.process("Meryl").await.unwrap().query_id();
    match pipeline.confirm(query_id, "the actress").await.unwrap() {
        Outcome::NeedsConfirmation { topic, candidates, .. } => {
            assert_eq!(topic, "Meryl Streep");
            assert_eq!(candidates[0].url, wiki_url("Meryl Streep"));
        }
        other => panic!("expected needs_confirmation, got {:?}", other),
    }

    let query = pipeline.store().require_query(query_id).await.unwrap();
    assert_eq!(query.original_query, "Meryl the actress");
    assert_eq!(query.extracted_topic, "Meryl Streep");
}

#[tokio::test]
async fn test_confirm_unknown_url_is_not_found() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir, "", Arc::new(meryl_model()), meryl_wiki()).await;
    let query_id = pipeline.process("Meryl").await.unwrap().query_id();

    let err = pipeline
        .confirm(query_id, "https://en.wikipedia.org/wiki/Does_Not_Exist")
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ContentNotFound { .. }));
}

#[tokio::test]
async fn test_missing_query_id() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir, "", Arc::new(meryl_model()), meryl_wiki()).await;

    let err = pipeline.disambiguate(99, "the actress", None).await.unwrap_err();
    assert!(matches!(err, PipelineError::QueryNotFound(99)));
    let err = pipeline.confirm(99, "the actress").await.unwrap_err();
    assert!(matches!(err, PipelineError::QueryNotFound(99)));
}

#[tokio::test]
async fn test_empty_query_rejected() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir, "", Arc::new(meryl_model()), meryl_wiki()).await;
    let err = pipeline.process("  \n").await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
    assert_eq!(err.component(), Component::Pipeline);
}

#[tokio::test]
async fn test_nonsense_with_failed_fallback_is_combined_error() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir, "", Arc::new(meryl_model()), meryl_wiki()).await;

    let err = pipeline.process("xqz nonsense").await.unwrap_err();
    assert_eq!(err.component(), Component::KnowledgeRetriever);
    let msg = err.to_string();
    assert!(msg.contains("no article matched any search variant"), "{}", msg);
    assert!(msg.contains("LLM fallback also failed"), "{}", msg);
}

#[tokio::test]
async fn test_fabricated_article_is_stored_unverified() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(zorblax_model());
    let pipeline = build_pipeline(&dir, "", model, FakeWiki::new()).await;

    match pipeline.process("explain zorblax theory").await.unwrap() {
        Outcome::Success {
            query_id,
            verified,
            content_length,
            ..
        } => {
            assert!(!verified);
            assert_eq!(content_length, "Zorblax theory is a speculative framework.".len());
            let stored = pipeline.store().results_for_query(query_id).await.unwrap();
            assert!(!stored[0].verified);
            assert_eq!(stored[0].content, "Zorblax theory is a speculative framework.");
        }
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ambiguous_title_uses_first_candidate() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(FnModel::new(|req| match req.schema_name() {
        "topic_extraction_v1" => json_reply(serde_json::json!({
            "topic": "Mercury", "confidence": 0.85, "is_ambiguous": false
        })),
        _ => json_reply(serde_json::json!({ "summary": "Mercury is the smallest planet." })),
    }));
    let wiki = FakeWiki::new()
        .disambiguation("Mercury", &["Mercury (planet)", "Mercury (element)"])
        .page("Mercury (planet)", "The smallest planet.", "Mercury is the smallest planet.");
    let pipeline = build_pipeline(&dir, "", model, wiki).await;

    match pipeline.process("the planet mercury").await.unwrap() {
        Outcome::Success { title, verified, .. } => {
            assert_eq!(title, "Mercury (planet)");
            assert!(verified);
        }
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn test_model_timeout_surfaces_as_timeout() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(FnModel::new(|_| Err(LlmError::Timeout(60))));
    let pipeline = build_pipeline(&dir, "", model, meryl_wiki()).await;

    let err = pipeline.process("Meryl").await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.component(), Component::TopicResolver);
}

#[tokio::test]
async fn test_highest_confidence_fallback_configured() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(
        &dir,
        "[disambiguation]\nselection_fallback = \"highest_confidence\"\n",
        Arc::new(meryl_model()),
        meryl_wiki(),
    )
    .await;

    let query_id = pipeline.process("Meryl").await.unwrap().query_id();
    let options = vec![
        DisambiguationOption::new("Meryl Davis").with_confidence(0.4),
        DisambiguationOption::new("Meryl Streep").with_confidence(0.9),
    ];
    match pipeline
        .disambiguate(query_id, "whatever", Some(options))
        .await
        .unwrap()
    {
        Outcome::Success { selected_topic, .. } => assert_eq!(selected_topic, "Meryl Streep"),
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn test_digest_length_is_stable_across_runs() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir, "", Arc::new(meryl_model()), meryl_wiki()).await;

    let mut lengths = Vec::new();
    for _ in 0..2 {
        match pipeline.process("Rust programming language").await.unwrap() {
            Outcome::Success { summary, .. } => {
                assert!(summary.split_whitespace().count() <= 300);
                lengths.push(summary.len());
            }
            other => panic!("expected success, got {:?}", other),
        }
    }
    assert_eq!(lengths[0], lengths[1]);
}

fn zorblax_model() -> FnModel {
    FnModel::new(|req| match req.schema_name() {
        "topic_extraction_v1" => json_reply(serde_json::json!({
            "topic": "Zorblax theory", "confidence": 0.9, "is_ambiguous": false
        })),
        "article_fallback_v1" => json_reply(serde_json::json!({
            "title": "Zorblax theory",
            "summary": "Zorblax theory is a speculative framework.",
            "url": "https://en.wikipedia.org/wiki/Zorblax_theory"
        })),
        _ => json_reply(serde_json::json!({ "summary": "Zorblax theory is speculative." })),
    })
}

#[tokio::test]
async fn test_confirming_fabricated_candidate_uses_its_summary() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(
        &dir,
        "[pipeline]\nrequire_confirmation = true\n",
        Arc::new(zorblax_model()),
        FakeWiki::new(),
    )
    .await;

    let (query_id, candidate) = match pipeline.process("explain zorblax theory").await.unwrap() {
        Outcome::NeedsConfirmation {
            query_id,
            candidates,
            ..
        } => (query_id, candidates[0].clone()),
        other => panic!("expected needs_confirmation, got {:?}", other),
    };
    assert!(!candidate.is_verified());

    match pipeline.confirm(query_id, &candidate.url).await.unwrap() {
        Outcome::Success {
            verified,
            content_length,
            url,
            ..
        } => {
            assert!(!verified);
            assert_eq!(url, candidate.url);
            assert_eq!(content_length, candidate.summary.len());
        }
        other => panic!("expected success, got {:?}", other),
    }

    let stored = pipeline.store().results_for_query(query_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].verified);
    assert_eq!(stored[0].content, candidate.summary);
}

#[tokio::test]
async fn test_confirming_other_missing_url_is_not_found() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(
        &dir,
        "[pipeline]\nrequire_confirmation = true\n",
        Arc::new(zorblax_model()),
        FakeWiki::new(),
    )
    .await;

    let query_id = pipeline.process("explain zorblax theory").await.unwrap().query_id();
    let err = pipeline
        .confirm(query_id, "https://en.wikipedia.org/wiki/Something_else")
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ContentNotFound { .. }));
    assert!(pipeline.store().results_for_query(query_id).await.unwrap().is_empty());
}
