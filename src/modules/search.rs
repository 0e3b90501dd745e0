use std::sync::Arc;

use async_trait::async_trait;

use super::{CapabilityModule, ModuleDescriptor};
use crate::context::ConversationContext;
use crate::error::ModuleError;
use crate::search::{SearchResult, WebSearch};

const COMMAND: &str = "/search";

/// `/search <query>`: top web results as a numbered list
pub struct SearchModule {
    descriptor: ModuleDescriptor,
    search: Arc<dyn WebSearch>,
    max_results: usize,
}

impl SearchModule {
    pub fn new(search: Arc<dyn WebSearch>, max_results: usize) -> Self {
        Self {
            descriptor: ModuleDescriptor::new("Search", "/search <query>: search the web", 30),
            search,
            max_results: max_results.max(1),
        }
    }
}

/// The query following `/search`, or `None` if `text` is not a search command.
/// An empty query is `Some("")`.
fn parse_query(text: &str) -> Option<&str> {
    let text = text.trim();
    let rest = text.strip_prefix(COMMAND)?;
    let rest = match rest.strip_prefix('@') {
        Some(with_bot) => with_bot.find(char::is_whitespace).map_or("", |i| &with_bot[i..]),
        None => rest,
    };
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim())
}

fn format_results(query: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!("No results for \"{query}\".");
    }
    let mut out = format!("Results for \"{query}\":");
    for (i, r) in results.iter().enumerate() {
        out.push_str(&format!("\n\n{}. {}", i + 1, r.title));
        if !r.snippet.is_empty() {
            out.push_str(&format!("\n{}", r.snippet));
        }
        out.push_str(&format!("\n{}", r.link));
    }
    out
}

#[async_trait]
impl CapabilityModule for SearchModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn can_handle(&self, text: &str, _ctx: &ConversationContext) -> Result<bool, ModuleError> {
        Ok(parse_query(text).is_some())
    }

    async fn handle(&self, text: &str, _ctx: &ConversationContext) -> Result<String, ModuleError> {
        let query = parse_query(text).unwrap_or_default();
        if query.is_empty() {
            return Err(ModuleError::InvalidInput("empty search query".to_string()));
        }
        let results = self.search.search(query, self.max_results).await?;
        Ok(format_results(query, &results))
    }
}
