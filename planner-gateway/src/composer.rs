//! Response composition.
//!
//! Turns one user message plus the prior history into a reply. Per request
//! the composer takes exactly one of three paths:
//!
//! ```text
//! START → no provider configured ─────────────→ fixed configuration reply
//!       → "search:" / "/search " trigger ─────→ web search → generation (or fixed no-results reply)
//!       → anything else ──────────────────────→ generation
//! ```
//!
//! External failures never escape: search errors count as zero results and
//! generation errors become a fixed apology.

use crate::history::{HistoryEntry, Role};
use crate::provider::{ChatRequest, Message, Provider};
use crate::search::{SearchResult, WebSearch};
use std::sync::Arc;

/// Reply when no generation credential is configured.
pub const NOT_CONFIGURED_REPLY: &str = "AI service is not configured. Set GEMINI_API_KEY in your .env (local) or GitHub Secrets (EC2 deploy), then redeploy.";

/// Reply when a search trigger produced no usable results.
pub const NO_RESULTS_REPLY: &str = "I couldn't retrieve web results right now. Please try again.";

/// Reply when the generation call fails.
pub const GENERATION_ERROR_REPLY: &str = "Sorry — I hit an error while generating a response.";

/// Instruction prepended to search-augmented prompts.
pub const RESEARCH_INSTRUCTION: &str = "You are an AI research assistant. Use the provided web search results to answer the user query. Synthesize concisely, cite sources inline like [1], [2], and include a brief summary.";

/// Number of search results requested per query.
pub const DEFAULT_SEARCH_RESULTS: usize = 6;

/// Result of one composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedReply {
    pub reply: String,
    /// Input history plus the new user and assistant entries, untruncated.
    pub history: Vec<HistoryEntry>,
}

/// Which branch produced a reply, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposePath {
    Unconfigured,
    Search,
    Direct,
}

impl ComposePath {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Search => "search",
            Self::Direct => "direct",
        }
    }
}

/// Builds replies from the generation provider and web search.
pub struct ResponseComposer {
    provider: Option<Arc<dyn Provider>>,
    search: Arc<dyn WebSearch>,
    model: String,
    max_results: usize,
    temperature: Option<f64>,
    max_output_tokens: Option<i64>,
}

impl ResponseComposer {
    /// `provider` is `None` when generation is not configured.
    pub fn new(
        provider: Option<Arc<dyn Provider>>,
        search: Arc<dyn WebSearch>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            search,
            model: model.into(),
            max_results: DEFAULT_SEARCH_RESULTS,
            temperature: None,
            max_output_tokens: None,
        }
    }

    /// Sampling settings passed on every generation call.
    pub fn with_sampling(mut self, temperature: Option<f64>, max_output_tokens: Option<i64>) -> Self {
        self.temperature = temperature;
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Override how many search results are requested.
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Whether a generation provider is attached.
    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    /// Produce a reply for `user_message` and the updated history.
    pub async fn compose(&self, user_message: &str, history: Vec<HistoryEntry>) -> ComposedReply {
        let (reply, path) = self.reply_for(user_message, &history).await;
        tracing::info!(
            path = path.as_str(),
            history_len = history.len(),
            reply_len = reply.len(),
            "Reply composed"
        );

        let mut history = history;
        history.push(HistoryEntry::user(user_message));
        history.push(HistoryEntry::assistant(reply.clone()));
        ComposedReply { reply, history }
    }

    async fn reply_for(&self, user_message: &str, history: &[HistoryEntry]) -> (String, ComposePath) {
        let Some(provider) = &self.provider else {
            return (NOT_CONFIGURED_REPLY.to_string(), ComposePath::Unconfigured);
        };

        let text = user_message.trim();
        let prior = to_provider_messages(history);

        let Some(query) = extract_search_query(text) else {
            return (
                self.generate(provider.as_ref(), prior, text.to_string()).await,
                ComposePath::Direct,
            );
        };

        let results = match self.search.search(&query, self.max_results).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(error = %e, query = %query, "Web search failed");
                Vec::new()
            }
        };
        let results: Vec<SearchResult> = results
            .into_iter()
            .filter(|r| !r.title.is_empty() && !r.href.is_empty())
            .collect();

        if results.is_empty() {
            return (NO_RESULTS_REPLY.to_string(), ComposePath::Search);
        }

        let prompt = compose_search_prompt(&query, &results);
        (
            self.generate(provider.as_ref(), prior, prompt).await,
            ComposePath::Search,
        )
    }

    async fn generate(&self, provider: &dyn Provider, prior: Vec<Message>, turn: String) -> String {
        let request = ChatRequest::new(self.model.clone(), prior, turn)
            .with_sampling(self.temperature, self.max_output_tokens);
        match provider.chat(request).await {
            Ok(response) => {
                tracing::debug!(
                    provider = %response.provider,
                    model = %response.model,
                    latency_ms = response.latency_ms,
                    total_tokens = response.usage.total_tokens,
                    "Generation completed"
                );
                response.content
            }
            Err(e) => {
                tracing::warn!(error = %e, "Generation failed");
                GENERATION_ERROR_REPLY.to_string()
            }
        }
    }
}

/// Extract the query from a `search:<query>` or `/search <query>` message.
///
/// Matching is a case-insensitive prefix check on the trimmed message. An
/// empty query counts as no trigger.
pub fn extract_search_query(message: &str) -> Option<String> {
    let text = message.trim();
    let lower = text.to_lowercase();

    let query = if lower.starts_with("search:") {
        text.split_once(':').map(|(_, rest)| rest)
    } else if lower.starts_with("/search ") {
        text.split_once(' ').map(|(_, rest)| rest)
    } else {
        None
    }?;

    let query = query.trim();
    (!query.is_empty()).then(|| query.to_string())
}

/// Translate stored history into provider turns. Unknown roles are skipped.
pub fn to_provider_messages(history: &[HistoryEntry]) -> Vec<Message> {
    history
        .iter()
        .filter_map(|entry| match &entry.role {
            Role::User => Some(Message::user(entry.content.clone())),
            Role::Assistant => Some(Message::model(entry.content.clone())),
            Role::Other(_) => None,
        })
        .collect()
}

/// Numbered reference block: `[n] title — href` then the body, blank-line separated.
pub fn format_references(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(idx, r)| format!("[{}] {} — {}\n{}", idx + 1, r.title, r.href, r.body))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Full prompt for a search-augmented turn.
pub fn compose_search_prompt(query: &str, results: &[SearchResult]) -> String {
    format!(
        "<system>\n{RESEARCH_INSTRUCTION}\n</system>\n<user_query>\n{query}\n</user_query>\n<web_results>\n{}\n</web_results>",
        format_references(results)
    )
}
