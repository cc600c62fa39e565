use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use url::Url;

use super::prompts::SEARCH_INSTRUCTIONS;

const PERPLEXITY_CHAT_URL: &str = "https://api.perplexity.ai/chat/completions";
const MAX_TOKENS_PER_SOURCE: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default)]
    pub raw_content: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
}

/// Host names of the requested sources, usable as a search domain filter.
/// Entries that are not URLs are taken as bare domains.
pub fn source_domains(sources: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    sources
        .iter()
        .filter_map(|source| match Url::parse(source) {
            Ok(url) => url.host_str().map(|host| host.trim_start_matches("www.").to_string()),
            Err(_) => {
                let bare = source.trim().trim_matches('/');
                (!bare.is_empty() && !bare.contains(char::is_whitespace)).then(|| bare.to_string())
            }
        })
        .filter(|domain| seen.insert(domain.clone()))
        .collect()
}

pub fn deduplicate_and_format_sources(
    search_response: &SearchResponse,
    max_tokens_per_source: usize,
    include_raw_content: bool,
) -> String {
    let mut seen_urls = HashSet::new();

    let mut formatted_text = String::from("Sources:\n\n");
    for source in search_response
        .results
        .iter()
        .filter(|source| seen_urls.insert(source.url.as_str()))
    {
        formatted_text.push_str(&format!("Source {}:\n===\n", source.title));
        formatted_text.push_str(&format!("URL: {}\n===\n", source.url));
        formatted_text.push_str(&format!(
            "Most relevant content from source: {}\n===\n",
            source.content
        ));

        if include_raw_content {
            if let Some(raw_content) = &source.raw_content {
                let char_limit = max_tokens_per_source * 4;
                let truncated_content = if raw_content.chars().count() > char_limit {
                    let cut: String = raw_content.chars().take(char_limit).collect();
                    format!("{}... [truncated]", cut)
                } else {
                    raw_content.clone()
                };
                formatted_text.push_str(&format!(
                    "Full source content limited to {} tokens: {}\n\n",
                    max_tokens_per_source, truncated_content
                ));
            }
        }
    }

    formatted_text.trim().to_string()
}

pub fn format_sources(search_results: &SearchResponse) -> String {
    search_results
        .results
        .iter()
        .map(|source| format!("* {} : {}", source.title, source.url))
        .collect::<Vec<String>>()
        .join("\n")
}

/// Formats a search response into the context handed to the report writer.
pub fn research_context(search_response: &SearchResponse) -> String {
    format!(
        "{}\n\nSource list:\n{}",
        deduplicate_and_format_sources(search_response, MAX_TOKENS_PER_SOURCE, false),
        format_sources(search_response)
    )
}

/// Removes `<think>...</think>` blocks emitted by reasoning models.
pub fn strip_think_tags(text: &str) -> String {
    let mut cleaned = text.to_string();
    while let Some(start) = cleaned.find("<think>") {
        match cleaned[start..].find("</think>") {
            Some(offset) => cleaned.replace_range(start..start + offset + "</think>".len(), ""),
            None => break,
        }
    }
    cleaned.trim().to_string()
}

/// Turns a Perplexity chat-completions reply into search results, one per citation.
pub fn parse_perplexity_response(data: &Value) -> Result<SearchResponse> {
    let content = data["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| anyhow!("Failed to get content from Perplexity response"))?;

    let citations: Vec<&str> = data
        .get("citations")
        .and_then(|c| c.as_array())
        .map(|arr| arr.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut results = vec![SearchResult {
        title: "Perplexity Search, Source 1".to_string(),
        url: citations.first().copied().unwrap_or("https://perplexity.ai").to_string(),
        content: content.to_string(),
        raw_content: Some(content.to_string()),
    }];

    for (i, url) in citations.iter().skip(1).enumerate() {
        results.push(SearchResult {
            title: format!("Perplexity Search, Source {}", i + 2),
            url: url.to_string(),
            content: "See above for full content".to_string(),
            raw_content: None,
        });
    }

    Ok(SearchResponse { results })
}

pub async fn perplexity_search(
    client: &Client,
    api_key: &str,
    model: &str,
    query: &str,
    domains: &[String],
) -> Result<SearchResponse> {
    let mut body = json!({
        "model": model,
        "messages": [
            {
                "role": "system",
                "content": SEARCH_INSTRUCTIONS
            },
            {
                "role": "user",
                "content": query
            }
        ]
    });
    if !domains.is_empty() {
        body["search_domain_filter"] = json!(domains);
    }

    let response = client
        .post(PERPLEXITY_CHAT_URL)
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .context("Perplexity request failed")?
        .error_for_status()
        .context("Perplexity returned an error status")?;

    let data: Value = response.json().await?;
    parse_perplexity_response(&data)
}
