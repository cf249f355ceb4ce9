//! Command implementations for the `wiki-digest` binary.
//!
//! Each `run_*` function loads what it needs from the config, performs one
//! operation and prints the result to stdout, either as readable text or
//! as JSON with `--json`.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::models::DisambiguationOption;
use crate::pipeline::{Outcome, Pipeline};
use crate::store::Store;

pub async fn run_ask(config: &Config, query: &str, json: bool) -> Result<()> {
    let pipeline = Pipeline::from_config(config).await?;
    let outcome = pipeline.process(query).await;
    pipeline.store().close().await;
    print_outcome(outcome?, json)
}

pub async fn run_reply(config: &Config, query_id: i64, reply: &str, json: bool) -> Result<()> {
    let pipeline = Pipeline::from_config(config).await?;
    let outcome = pipeline.disambiguate(query_id, reply, None).await;
    pipeline.store().close().await;
    print_outcome(outcome?, json)
}

pub async fn run_confirm(config: &Config, query_id: i64, selection: &str, json: bool) -> Result<()> {
    let pipeline = Pipeline::from_config(config).await?;
    let outcome = pipeline.confirm(query_id, selection).await;
    pipeline.store().close().await;
    print_outcome(outcome?, json)
}

pub async fn run_queries(config: &Config, json: bool) -> Result<()> {
    let store = Store::open(config).await?;
    let queries = store.list_queries().await;
    store.close().await;
    let queries = queries?;

    if json {
        return print_json(&queries);
    }
    if queries.is_empty() {
        println!("No queries.");
        return Ok(());
    }
    for q in &queries {
        let marker = if q.is_ambiguous { " (ambiguous)" } else { "" };
        println!(
            "#{:<4} {}  \"{}\" -> {} [{:.2}]{}",
            q.id, q.created_at, q.original_query, q.extracted_topic, q.confidence, marker
        );
    }
    Ok(())
}

pub async fn run_show(config: &Config, query_id: i64, json: bool) -> Result<()> {
    let store = Store::open(config).await?;
    let query = store.get_query(query_id).await;
    let results = store.results_for_query(query_id).await;
    store.close().await;

    let query = match query? {
        Some(q) => q,
        None => {
            eprintln!("Error: query not found: {}", query_id);
            std::process::exit(1);
        }
    };
    let results = results?;

    if json {
        return print_json(&serde_json::json!({ "query": query, "results": results }));
    }

    println!("--- Query #{} ---", query.id);
    println!("original:   {}", query.original_query);
    println!("topic:      {}", query.extracted_topic);
    println!("confidence: {:.2}", query.confidence);
    println!("ambiguous:  {}", query.is_ambiguous);
    println!("created_at: {}", query.created_at);
    if let Some(ref updated) = query.updated_at {
        println!("updated_at: {}", updated);
    }
    println!();

    println!("--- Results ({}) ---", results.len());
    for r in &results {
        let tag = if r.verified { "" } else { " [unverified]" };
        println!("[{}] {}{}", r.id, r.title, tag);
        println!("    url: {}", r.wikipedia_url);
        println!("    content: {} chars", r.content.chars().count());
        println!("{}", r.summary);
        println!();
    }
    Ok(())
}

pub async fn run_health(config: &Config) -> Result<()> {
    let store = Store::open(config).await?;
    let ping = store.ping().await;
    store.close().await;

    match ping {
        Ok(()) => {
            println!("status:   healthy");
            println!("database: connected ({})", config.db.path.display());
            println!("version:  {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Err(e) => {
            eprintln!("status: unhealthy");
            eprintln!("error:  {}", e);
            std::process::exit(1);
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_options(options: &[DisambiguationOption]) {
    for (i, o) in options.iter().enumerate() {
        match &o.description {
            Some(d) => println!("  {}. {} - {}", i + 1, o.topic, d),
            None => println!("  {}. {}", i + 1, o.topic),
        }
    }
}

fn print_outcome(outcome: Outcome, json: bool) -> Result<()> {
    if json {
        return print_json(&outcome);
    }

    match outcome {
        Outcome::NeedsDisambiguation {
            query_id,
            extracted_topic,
            confidence,
            options,
            conversation_prompt,
        } => {
            println!(
                "Query #{}: \"{}\" is ambiguous (confidence {:.2}).",
                query_id, extracted_topic, confidence
            );
            println!("{}", conversation_prompt);
            print_options(&options);
            println!();
            println!("Answer with: wiki-digest reply {} \"<your answer>\"", query_id);
        }
        Outcome::NeedsClarification {
            query_id,
            message,
            options,
        } => {
            println!("{}", message);
            print_options(&options);
            println!();
            println!("Answer with: wiki-digest reply {} \"<your answer>\"", query_id);
        }
        Outcome::NeedsConfirmation {
            query_id,
            topic,
            candidates,
        } => {
            println!("Query #{}: found for \"{}\":", query_id, topic);
            for a in &candidates {
                let tag = if a.is_verified() { "" } else { " [unverified]" };
                println!("  {}{}", a.title, tag);
                println!("    {}", a.url);
            }
            println!();
            println!("Confirm with: wiki-digest confirm {} <url>", query_id);
        }
        Outcome::Success {
            query_id,
            title,
            url,
            summary,
            verified,
            content_length,
            ..
        } => {
            let tag = if verified { "" } else { " [unverified]" };
            println!("--- {}{} ---", title, tag);
            println!("url:    {}", url);
            println!("query:  #{}", query_id);
            println!("source: {} chars", content_length);
            println!();
            println!("{}", summary);
        }
    }
    Ok(())
}
