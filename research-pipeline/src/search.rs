//! Academic-index search collaborator.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{ConfigError, SearchError};
use crate::models::Paper;

pub const DEFAULT_ARXIV_URL: &str = "https://export.arxiv.org/api/query";
pub const DEFAULT_MAX_RESULTS: usize = 5;

const USER_AGENT: &str = concat!("research-pipeline/", env!("CARGO_PKG_VERSION"));

/// Finds candidate papers for a topic.
#[async_trait]
pub trait PaperSearch: Send + Sync {
    async fn search(&self, topic: &str) -> Result<Vec<Paper>, SearchError>;
}

/// Searches the arXiv Atom API.
#[derive(Debug, Clone)]
pub struct ArxivSearch {
    client: reqwest::Client,
    base_url: String,
    max_results: usize,
}

impl ArxivSearch {
    pub fn new(
        base_url: impl Into<String>,
        max_results: usize,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            max_results: max_results.max(1),
        })
    }

    pub fn search_url(&self, topic: &str) -> String {
        format!(
            "{}?search_query={}&start=0&max_results={}",
            self.base_url,
            urlencoding::encode(&format!("all:{}", topic.trim())),
            self.max_results,
        )
    }
}

#[async_trait]
impl PaperSearch for ArxivSearch {
    async fn search(&self, topic: &str) -> Result<Vec<Paper>, SearchError> {
        let url = self.search_url(topic);
        debug!(%url, "arXiv search");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        let mut papers = parse_atom_feed(&body)?;
        papers.truncate(self.max_results);
        info!(topic, papers = papers.len(), "arXiv search complete");
        Ok(papers)
    }
}

/// Parse an Atom feed into papers, deduplicated by id with the first occurrence kept.
pub fn parse_atom_feed(xml: &str) -> Result<Vec<Paper>, SearchError> {
    if !xml.contains("<feed") {
        return Err(SearchError::Malformed("response is not an Atom feed".into()));
    }

    let mut seen = HashSet::new();
    let papers = entries(xml)
        .filter_map(parse_entry)
        .filter(|paper| seen.insert(paper.id.clone()))
        .collect();
    Ok(papers)
}

fn entries(xml: &str) -> impl Iterator<Item = &str> {
    let mut from = 0;
    std::iter::from_fn(move || {
        let start = from + xml[from..].find("<entry")?;
        let end = start + xml[start..].find("</entry>")? + "</entry>".len();
        from = end;
        Some(&xml[start..end])
    })
}

fn parse_entry(entry: &str) -> Option<Paper> {
    let id_url = tag_text(entry, "id")?;
    let id = arxiv_id(&id_url);
    if id.is_empty() {
        return None;
    }

    let authors = blocks(entry, "author")
        .filter_map(|block| tag_text(block, "name"))
        .map(|name| normalize_whitespace(&name))
        .filter(|name| !name.is_empty())
        .collect();

    let categories: BTreeSet<String> = empty_tags(entry, "category")
        .filter_map(|tag| attribute(tag, "term"))
        .collect();

    let source_url = empty_tags(entry, "link")
        .find(|tag| attribute(tag, "rel").as_deref() == Some("alternate"))
        .and_then(|tag| attribute(tag, "href"))
        .unwrap_or(id_url);

    Some(Paper {
        id,
        title: normalize_whitespace(&tag_text(entry, "title").unwrap_or_default()),
        abstract_text: normalize_whitespace(&tag_text(entry, "summary").unwrap_or_default()),
        authors,
        published_date: tag_text(entry, "published").unwrap_or_default(),
        source_url,
        categories,
    })
}

/// Decoded text of the first `<tag>…</tag>`.
fn tag_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");

    let mut from = 0;
    let start = loop {
        let pos = from + xml[from..].find(&open)?;
        // `<id` must not match `<idx`
        let next = xml[pos + open.len()..].chars().next()?;
        if next == '>' || next.is_whitespace() {
            break pos;
        }
        from = pos + open.len();
    };
    let content_start = start + xml[start..].find('>')? + 1;
    let content_end = content_start + xml[content_start..].find(&close)?;
    Some(decode_entities(xml[content_start..content_end].trim()))
}

fn blocks<'a>(xml: &'a str, tag: &str) -> impl Iterator<Item = &'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut from = 0;
    std::iter::from_fn(move || {
        let start = from + xml[from..].find(&open)?;
        let end = start + xml[start..].find(&close)? + close.len();
        from = end;
        Some(&xml[start..end])
    })
}

/// Self-closing or attribute-only tags such as `<category term="cs.DB"/>`.
fn empty_tags<'a>(xml: &'a str, tag: &str) -> impl Iterator<Item = &'a str> {
    let open = format!("<{tag} ");
    let mut from = 0;
    std::iter::from_fn(move || {
        let start = from + xml[from..].find(&open)?;
        let end = start + xml[start..].find('>')? + 1;
        from = end;
        Some(&xml[start..end])
    })
}

fn attribute(tag: &str, name: &str) -> Option<String> {
    let needle = format!(" {name}=\"");
    let start = tag.find(&needle)? + needle.len();
    let end = start + tag[start..].find('"')?;
    Some(decode_entities(&tag[start..end]))
}

/// `http://arxiv.org/abs/2101.00001v2` → `2101.00001v2`
fn arxiv_id(url: &str) -> String {
    match url.rfind("/abs/") {
        Some(pos) => url[pos + "/abs/".len()..].trim().to_string(),
        None => url.trim().to_string(),
    }
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="html">ArXiv Query: search_query=all:graph databases</title>
  <id>http://arxiv.org/api/query-id</id>
  <entry>
    <id>http://arxiv.org/abs/2101.00001v1</id>
    <published>2021-01-01T00:00:00Z</published>
    <title>Graph Databases
      at Scale</title>
    <summary>  We study graph storage &amp; query
      processing.  </summary>
    <author><name>Ada Lovelace</name></author>
    <author><name>Dr. Smith</name></author>
    <link href="http://arxiv.org/abs/2101.00001v1" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2101.00001v1" rel="related" type="application/pdf"/>
    <category term="cs.DB" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.DS" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2101.00002v1</id>
    <published>2021-02-01T00:00:00Z</published>
    <title>Query Planning</title>
    <summary>Cost models for graph queries.</summary>
    <author><name>Dr. Smith</name></author>
    <category term="cs.DB" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2101.00001v1</id>
    <title>Duplicate</title>
  </entry>
</feed>"#;

    #[test]
    fn parses_entries_from_a_feed() {
        let papers = parse_atom_feed(FEED).unwrap();
        assert_eq!(papers.len(), 2);

        let first = &papers[0];
        assert_eq!(first.id, "2101.00001v1");
        assert_eq!(first.title, "Graph Databases at Scale");
        assert_eq!(first.abstract_text, "We study graph storage & query processing.");
        assert_eq!(first.authors, vec!["Ada Lovelace", "Dr. Smith"]);
        assert_eq!(first.published_date, "2021-01-01T00:00:00Z");
        assert_eq!(first.source_url, "http://arxiv.org/abs/2101.00001v1");
        assert_eq!(
            first.categories.iter().collect::<Vec<_>>(),
            vec!["cs.DB", "cs.DS"]
        );

        let second = &papers[1];
        assert_eq!(second.source_url, "http://arxiv.org/abs/2101.00002v1");
    }

    #[test]
    fn feed_without_entries_is_empty() {
        let papers = parse_atom_feed(r#"<feed xmlns="http://www.w3.org/2005/Atom"></feed>"#).unwrap();
        assert!(papers.is_empty());
    }

    #[test]
    fn non_feed_bodies_are_malformed() {
        assert!(matches!(
            parse_atom_feed("<html>rate limited</html>"),
            Err(SearchError::Malformed(_))
        ));
    }

    #[test]
    fn search_url_encodes_the_topic() {
        let search = ArxivSearch::new(DEFAULT_ARXIV_URL, 5, Duration::from_secs(5)).unwrap();
        assert_eq!(
            search.search_url(" graph databases "),
            "https://export.arxiv.org/api/query?search_query=all%3Agraph%20databases&start=0&max_results=5"
        );
    }
}
