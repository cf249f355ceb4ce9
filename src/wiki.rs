//! Encyclopedia source abstraction and the MediaWiki implementation.
//!
//! A lookup has three outcomes, modelled as [`LookupOutcome`] rather than
//! errors: the page exists, the title is a disambiguation page listing
//! alternatives, or nothing matches. [`LookupError`] is reserved for
//! transport and protocol failures.
//!
//! [`MediaWiki`] talks to the Action API (`/w/api.php`) with
//! `formatversion=2`, follows redirects, and recognises disambiguation pages
//! through the `disambiguation` page property.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::EncyclopediaConfig;
use crate::error::LookupError;
use crate::models::{Article, ArticleOrigin};

/// Result of looking a title up.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Found(Article),
    /// The title names a disambiguation page; candidates in the order the
    /// page lists them.
    Ambiguous(Vec<String>),
    NotFound,
}

#[async_trait]
pub trait Encyclopedia: Send + Sync {
    /// Looks up a page. With `exact = false` the best search hit is used
    /// in place of the given title.
    async fn lookup(&self, title: &str, exact: bool) -> Result<LookupOutcome, LookupError>;

    /// Full-text search returning at most `max_results` titles.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>, LookupError>;

    /// Plain-text body of a page, `None` when the page does not exist.
    async fn content(&self, title: &str) -> Result<Option<String>, LookupError>;
}

/// Client for a MediaWiki Action API endpoint.
pub struct MediaWiki {
    client: reqwest::Client,
    api_url: String,
    timeout_secs: u64,
}

impl MediaWiki {
    pub fn new(config: &EncyclopediaConfig) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| LookupError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url(),
            timeout_secs: config.timeout_secs,
        })
    }

    async fn query(&self, params: &[(&str, &str)]) -> Result<Value, LookupError> {
        let mut all: Vec<(&str, &str)> = vec![
            ("action", "query"),
            ("format", "json"),
            ("formatversion", "2"),
        ];
        all.extend_from_slice(params);

        let response = self
            .client
            .get(&self.api_url)
            .query(&all)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LookupError::Timeout(self.timeout_secs)
                } else {
                    LookupError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LookupError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| LookupError::Malformed(e.to_string()))?;

        if let Some(err) = json.get("error") {
            return Err(LookupError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            });
        }

        Ok(json)
    }

    /// Candidates listed on a disambiguation page, in the order the page
    /// lists them. Read from the wikitext since `prop=links` comes back
    /// sorted by title.
    async fn disambiguation_links(&self, title: &str) -> Result<Vec<String>, LookupError> {
        let json = self
            .query(&[
                ("titles", title),
                ("prop", "revisions"),
                ("rvprop", "content"),
                ("rvslots", "main"),
                ("redirects", "1"),
            ])
            .await?;

        Ok(revision_content(&json)
            .map(disambiguation_candidates)
            .unwrap_or_default())
    }
}

#[async_trait]
impl Encyclopedia for MediaWiki {
    async fn lookup(&self, title: &str, exact: bool) -> Result<LookupOutcome, LookupError> {
        let title = if exact {
            title.to_string()
        } else {
            match self.search(title, 1).await?.into_iter().next() {
                Some(best) => best,
                None => return Ok(LookupOutcome::NotFound),
            }
        };

        let json = self
            .query(&[
                ("titles", title.as_str()),
                ("redirects", "1"),
                ("prop", "extracts|info|pageprops"),
                ("exintro", "1"),
                ("explaintext", "1"),
                ("inprop", "url"),
                ("ppprop", "disambiguation"),
            ])
            .await?;

        match parse_page(&json)? {
            PageKind::Missing => Ok(LookupOutcome::NotFound),
            PageKind::Disambiguation(resolved_title) => {
                let candidates = self.disambiguation_links(&resolved_title).await?;
                if candidates.is_empty() {
                    Ok(LookupOutcome::NotFound)
                } else {
                    Ok(LookupOutcome::Ambiguous(candidates))
                }
            }
            PageKind::Article(article) => Ok(LookupOutcome::Found(article)),
        }
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>, LookupError> {
        let limit = max_results.to_string();
        let json = self
            .query(&[
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", limit.as_str()),
                ("srprop", ""),
            ])
            .await?;
        Ok(parse_search(&json))
    }

    async fn content(&self, title: &str) -> Result<Option<String>, LookupError> {
        let json = self
            .query(&[
                ("titles", title),
                ("redirects", "1"),
                ("prop", "extracts"),
                ("explaintext", "1"),
            ])
            .await?;

        match first_page(&json) {
            Some(page) if !is_missing(page) => Ok(page
                .get("extract")
                .and_then(|e| e.as_str())
                .filter(|e| !e.trim().is_empty())
                .map(|e| e.to_string())),
            _ => Ok(None),
        }
    }
}

#[derive(Debug)]
enum PageKind {
    Missing,
    Disambiguation(String),
    Article(Article),
}

fn first_page(json: &Value) -> Option<&Value> {
    json.get("query")
        .and_then(|q| q.get("pages"))
        .and_then(|p| p.as_array())
        .and_then(|p| p.first())
}

fn is_missing(page: &Value) -> bool {
    page.get("missing").is_some() || page.get("invalid").is_some()
}

fn parse_page(json: &Value) -> Result<PageKind, LookupError> {
    let page = match first_page(json) {
        Some(p) => p,
        None => return Ok(PageKind::Missing),
    };
    if is_missing(page) {
        return Ok(PageKind::Missing);
    }

    let title = page
        .get("title")
        .and_then(|t| t.as_str())
        .ok_or_else(|| LookupError::Malformed("page without title".into()))?
        .to_string();

    let is_disambiguation = page
        .get("pageprops")
        .and_then(|p| p.get("disambiguation"))
        .is_some();
    if is_disambiguation {
        return Ok(PageKind::Disambiguation(title));
    }

    let url = page
        .get("fullurl")
        .and_then(|u| u.as_str())
        .ok_or_else(|| LookupError::Malformed(format!("page '{}' without fullurl", title)))?
        .to_string();
    let summary = page
        .get("extract")
        .and_then(|e| e.as_str())
        .unwrap_or("")
        .to_string();

    Ok(PageKind::Article(Article {
        title,
        url,
        summary,
        origin: ArticleOrigin::Confirmed,
    }))
}

fn revision_content(json: &Value) -> Option<&str> {
    first_page(json)?
        .get("revisions")?
        .as_array()?
        .first()?
        .get("slots")?
        .get("main")?
        .get("content")?
        .as_str()
}

/// Namespaces whose links never name an alternative article.
const SKIPPED_NAMESPACES: &[&str] = &[
    "file", "image", "category", "template", "help", "wikipedia", "wp", "portal", "special",
    "wikt", "wiktionary", "talk", "user",
];

/// First article link of every bullet line, stopping at "See also".
fn disambiguation_candidates(wikitext: &str) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();

    for line in wikitext.lines() {
        let line = line.trim();
        if line.starts_with("==") {
            if line.trim_matches('=').trim().eq_ignore_ascii_case("see also") {
                break;
            }
            continue;
        }
        if !line.starts_with('*') {
            continue;
        }
        let Some(target) = first_link_target(line) else {
            continue;
        };
        if !candidates.iter().any(|c| c.eq_ignore_ascii_case(&target)) {
            candidates.push(target);
        }
    }
    candidates
}

fn first_link_target(line: &str) -> Option<String> {
    let mut rest = line;
    while let Some(start) = rest.find("[[") {
        let after = &rest[start + 2..];
        let end = after.find("]]")?;
        let inner = &after[..end];
        rest = &after[end + 2..];

        let target = inner.split('|').next().unwrap_or("");
        let target = target
            .split('#')
            .next()
            .unwrap_or("")
            .trim()
            .trim_start_matches(':');
        if target.is_empty() {
            continue;
        }
        let namespaced = target.split_once(':').is_some_and(|(ns, _)| {
            SKIPPED_NAMESPACES.contains(&ns.trim().to_lowercase().as_str())
        });
        if namespaced {
            continue;
        }
        return Some(target.replace('_', " "));
    }
    None
}

fn parse_search(json: &Value) -> Vec<String> {
    json.get("query")
        .and_then(|q| q.get("search"))
        .and_then(|s| s.as_array())
        .map(|hits| {
            hits.iter()
                .filter_map(|h| h.get("title").and_then(|t| t.as_str()))
                .map(|t| t.to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Recovers the page title from an article URL
/// (`https://en.wikipedia.org/wiki/Meryl_Streep` → `Meryl Streep`).
pub fn title_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let segment = path.trim_end_matches('/').rsplit('/').next()?;
    if segment.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(segment).ok()?;
    let title = decoded.replace('_', " ");
    let title = title.trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_article_page() {
        let body = json!({
            "query": { "pages": [{
                "pageid": 1164,
                "title": "Artificial intelligence",
                "fullurl": "https://en.wikipedia.org/wiki/Artificial_intelligence",
                "extract": "Artificial intelligence (AI) is ..."
            }]}
        });
        match parse_page(&body).unwrap() {
            PageKind::Article(a) => {
                assert_eq!(a.title, "Artificial intelligence");
                assert_eq!(a.origin, ArticleOrigin::Confirmed);
                assert!(a.summary.starts_with("Artificial intelligence"));
            }
            other => panic!("expected article, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_missing_page() {
        let body = json!({ "query": { "pages": [{ "title": "Xqzplorfniazz123", "missing": true }]}});
        assert!(matches!(parse_page(&body).unwrap(), PageKind::Missing));
        assert!(matches!(parse_page(&json!({})).unwrap(), PageKind::Missing));
    }

    #[test]
    fn test_parse_disambiguation_page() {
        let body = json!({
            "query": { "pages": [{
                "title": "Mercury",
                "fullurl": "https://en.wikipedia.org/wiki/Mercury",
                "pageprops": { "disambiguation": "" }
            }]}
        });
        match parse_page(&body).unwrap() {
            PageKind::Disambiguation(t) => assert_eq!(t, "Mercury"),
            other => panic!("expected disambiguation, got {:?}", other),
        }
    }

    #[test]
    fn test_disambiguation_candidates_keep_page_order() {
        let wikitext = "'''Mercury''' commonly refers to:
* [[Mercury (planet)]], the closest planet to the Sun
* [[Mercury (element)|Mercury]], a chemical element
* [[Mercury (mythology)]], a Roman god
{{TOC right}}
== Arts ==
* ''[[Mercury (film)|Mercury]]'', a 2008 film
** [[File:Mercury.png]] [[Mercury_(band)]]
* A [[wikt:mercury|dictionary]] entry
* [[Mercury (planet)|Planet Mercury]] again
== See also ==
* [[Alchemy]]
";
        let body = json!({
            "query": { "pages": [{
                "title": "Mercury",
                "revisions": [{ "slots": { "main": { "content": wikitext } } }]
            }]}
        });
        let candidates = revision_content(&body)
            .map(disambiguation_candidates)
            .unwrap();
        assert_eq!(
            candidates,
            vec![
                "Mercury (planet)",
                "Mercury (element)",
                "Mercury (mythology)",
                "Mercury (film)",
                "Mercury (band)",
            ]
        );
    }

    #[test]
    fn test_disambiguation_candidates_without_content() {
        assert!(revision_content(&json!({ "query": { "pages": [{ "title": "X" }]}})).is_none());
        assert!(disambiguation_candidates("no bullets here").is_empty());
    }

    #[test]
    fn test_parse_search() {
        let body = json!({ "query": { "search": [
            { "ns": 0, "title": "Python (programming language)" },
            { "ns": 0, "title": "Pythonidae" }
        ]}});
        assert_eq!(
            parse_search(&body),
            vec!["Python (programming language)", "Pythonidae"]
        );
        assert!(parse_search(&json!({})).is_empty());
    }

    #[test]
    fn test_title_from_url() {
        assert_eq!(
            title_from_url("https://en.wikipedia.org/wiki/Meryl_Streep").as_deref(),
            Some("Meryl Streep")
        );
        assert_eq!(
            title_from_url("https://en.wikipedia.org/wiki/C%2B%2B#History").as_deref(),
            Some("C++")
        );
        assert_eq!(
            title_from_url("https://en.wikipedia.org/wiki/Caf%C3%A9/").as_deref(),
            Some("Café")
        );
        assert_eq!(title_from_url(""), None);
    }
}
