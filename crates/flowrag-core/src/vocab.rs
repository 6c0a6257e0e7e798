//! Keyword tables driving query analysis, expansion, reranking and rules.
//!
//! A [`Vocabulary`] is immutable configuration injected into the analyzer,
//! retriever and assembler. [`Vocabulary::default`] ships a workflow-automation
//! catalog (n8n-style block ids); deployments can replace it wholesale with a
//! TOML file of the same shape.
//!
//! Terms are matched against word tokens, not raw substrings: `"ai"` does not
//! fire inside `"email"`, while light inflections (`received`, `webhooks`,
//! `sending`) still match their base term. Multi-word terms match contiguous
//! token runs.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::models::Intent;

/// Suffixes accepted when matching a token against a base term.
const INFLECTIONS: [&str; 8] = ["s", "es", "d", "ed", "ing", "er", "ers", "ly"];

/// One row of the intent table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRule {
    pub intent: Intent,
    pub keywords: Vec<String>,
    /// Blocks seeded into `required_blocks` when this intent wins.
    #[serde(default)]
    pub blocks: Vec<String>,
    /// Canned retrieval phrase added during query expansion.
    #[serde(default)]
    pub expansion: Option<String>,
}

/// One row of the service table: `(id, patterns, block, bonus)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRule {
    pub id: String,
    pub patterns: Vec<String>,
    pub block: String,
    /// Rerank bonus for hits whose block id names this service.
    pub bonus: f64,
}

/// A catch-all block penalized when a more specific service was requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackRule {
    pub block: String,
    pub penalty: f64,
    /// Service ids whose detection makes this block the wrong choice.
    pub superseded_by: Vec<String>,
}

/// A validation rule emitted when `block` is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRule {
    pub block: String,
    pub rule: String,
}

/// Immutable keyword and mapping tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    /// Scored in order; ties go to the earlier row.
    pub intents: Vec<IntentRule>,
    pub triggers: Vec<String>,
    pub actions: Vec<String>,
    pub data_types: Vec<String>,
    pub conditions: Vec<String>,
    pub services: Vec<ServiceRule>,
    /// Trigger words that select the schedule entry block over the webhook.
    pub schedule_words: Vec<String>,
    pub entry_blocks: Vec<String>,
    pub schedule_block: String,
    pub webhook_block: String,
    pub transform_block: String,
    pub fallbacks: Vec<FallbackRule>,
    /// Bonus per detected service mentioned in a hit's document text.
    pub content_bonus: f64,
    pub base_rules: Vec<String>,
    pub block_rules: Vec<BlockRule>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn intent(intent: Intent, keywords: &[&str], blocks: &[&str], expansion: Option<&str>) -> IntentRule {
    IntentRule {
        intent,
        keywords: words(keywords),
        blocks: words(blocks),
        expansion: expansion.map(str::to_string),
    }
}

fn service(id: &str, patterns: &[&str], block: &str, bonus: f64) -> ServiceRule {
    ServiceRule {
        id: id.to_string(),
        patterns: words(patterns),
        block: block.to_string(),
        bonus,
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        let webhook = "n8n-nodes-base.webhook";
        let schedule = "n8n-nodes-base.scheduleTrigger";
        let code = "n8n-nodes-base.code";
        let http = "n8n-nodes-base.httpRequest";
        let email = "n8n-nodes-base.emailSend";
        let openai = "@n8n/n8n-nodes-langchain.openAi";

        Self {
            intents: vec![
                intent(
                    Intent::WebhookTrigger,
                    &["webhook", "trigger", "receive", "endpoint", "listen", "http post", "incoming"],
                    &[webhook],
                    Some("webhook receiver http endpoint trigger"),
                ),
                intent(
                    Intent::Scheduling,
                    &[
                        "schedule", "cron", "timer", "interval", "daily", "weekly", "hourly",
                        "periodic", "recurring", "every", "every day", "every hour", "nightly",
                    ],
                    &[schedule],
                    Some("schedule trigger cron interval timer"),
                ),
                intent(
                    Intent::ApiIntegration,
                    &["api", "rest", "http", "request", "fetch", "get", "post", "external", "service"],
                    &[http],
                    Some("http request api call rest service"),
                ),
                intent(
                    Intent::DataTransformation,
                    &["transform", "convert", "process", "modify", "format", "parse", "extract", "filter"],
                    &[code],
                    Some("transform data javascript code function"),
                ),
                intent(
                    Intent::DatabaseOperation,
                    &["database", "db", "sql", "postgres", "mysql", "mongodb", "query", "insert", "update"],
                    &["n8n-nodes-base.postgres"],
                    Some("database query insert update rows"),
                ),
                intent(
                    Intent::AiAutomation,
                    &[
                        "ai", "gpt", "openai", "llm", "artificial intelligence", "ml", "summarize",
                        "summarise", "analyze", "analyse", "generate text", "completion",
                    ],
                    &[openai],
                    Some("ai agent llm automation gpt openai"),
                ),
                intent(
                    Intent::Notification,
                    &["notify", "alert", "email", "slack", "discord", "telegram", "send", "message"],
                    &["n8n-nodes-base.slack"],
                    Some("send notification message alert"),
                ),
                intent(
                    Intent::FileProcessing,
                    &["file", "csv", "excel", "pdf", "upload", "download", "read", "write", "storage"],
                    &["n8n-nodes-base.readBinaryFiles", "n8n-nodes-base.spreadsheetFile"],
                    Some("read binary file spreadsheet csv"),
                ),
                intent(
                    Intent::ErrorHandling,
                    &["error", "retry", "fail", "exception", "handle", "catch", "fallback", "recovery"],
                    &["n8n-nodes-base.errorTrigger", "n8n-nodes-base.stopAndError"],
                    Some("error trigger retry stop and error"),
                ),
            ],
            triggers: words(&["when", "on", "trigger", "receive", "schedule", "every", "whenever"]),
            actions: words(&[
                "send", "create", "update", "delete", "fetch", "transform", "notify", "store",
                "process", "analyze", "generate",
            ]),
            data_types: words(&["json", "csv", "xml", "pdf", "image", "file", "data", "message", "email"]),
            conditions: words(&["if", "when", "filter", "contains", "equals", "greater", "less"]),
            services: vec![
                service("slack", &["slack"], "n8n-nodes-base.slack", 0.3),
                service("gmail", &["gmail", "google mail"], "n8n-nodes-base.gmail", 0.5),
                service("email", &["email", "smtp", "mail server"], email, 0.2),
                service("discord", &["discord"], "n8n-nodes-base.discord", 0.3),
                service("telegram", &["telegram"], "n8n-nodes-base.telegram", 0.3),
                service("whatsapp", &["whatsapp", "whats app"], "n8n-nodes-base.whatsApp", 0.5),
                service("reddit", &["reddit", "subreddit"], "n8n-nodes-base.reddit", 0.5),
                service("github", &["github"], "n8n-nodes-base.github", 0.3),
                service("gitlab", &["gitlab"], "n8n-nodes-base.gitlab", 0.3),
                service("jira", &["jira"], "n8n-nodes-base.jira", 0.3),
                service("notion", &["notion"], "n8n-nodes-base.notion", 0.3),
                service("airtable", &["airtable"], "n8n-nodes-base.airtable", 0.3),
                service("googlesheets", &["google sheets", "google sheet", "spreadsheet"], "n8n-nodes-base.googleSheets", 0.3),
                service("salesforce", &["salesforce", "sfdc"], "n8n-nodes-base.salesforce", 0.3),
                service("hubspot", &["hubspot"], "n8n-nodes-base.hubspot", 0.3),
                service("http", &["api", "http", "rest", "url"], http, 0.2),
                service("postgres", &["postgres", "postgresql"], "n8n-nodes-base.postgres", 0.3),
                service("mysql", &["mysql"], "n8n-nodes-base.mysql", 0.3),
                service("mongodb", &["mongodb", "mongo"], "n8n-nodes-base.mongoDb", 0.3),
                service(
                    "openai",
                    &["openai", "open ai", "gpt", "chatgpt", "llm", "summarize", "summarise", "language model"],
                    openai,
                    0.5,
                ),
            ],
            schedule_words: words(&["schedule", "every", "daily", "weekly", "hourly", "cron", "nightly"]),
            entry_blocks: words(&[
                webhook,
                schedule,
                "n8n-nodes-base.cron",
                "n8n-nodes-base.manualTrigger",
                "n8n-nodes-base.errorTrigger",
            ]),
            schedule_block: schedule.to_string(),
            webhook_block: webhook.to_string(),
            transform_block: code.to_string(),
            fallbacks: vec![
                FallbackRule {
                    block: http.to_string(),
                    penalty: 0.3,
                    superseded_by: words(&[
                        "reddit", "github", "gitlab", "jira", "notion", "airtable", "salesforce",
                        "hubspot", "slack", "discord", "telegram", "whatsapp", "googlesheets",
                    ]),
                },
                FallbackRule {
                    block: email.to_string(),
                    penalty: 0.3,
                    superseded_by: words(&["gmail"]),
                },
            ],
            content_bonus: 0.1,
            base_rules: words(&[
                "Node IDs must be unique",
                "All node connections must reference existing nodes",
                "Every node must have a position array with [x, y] coordinates",
                "Workflow must have exactly one trigger node as its entry point",
            ]),
            block_rules: vec![
                BlockRule {
                    block: webhook.to_string(),
                    rule: "Webhook must have httpMethod and path parameters".to_string(),
                },
                BlockRule {
                    block: code.to_string(),
                    rule: "Code node must have valid JavaScript in the jsCode parameter".to_string(),
                },
                BlockRule {
                    block: http.to_string(),
                    rule: "HTTP Request node must have method and url parameters".to_string(),
                },
                BlockRule {
                    block: schedule.to_string(),
                    rule: "Schedule trigger must define a rule with an interval".to_string(),
                },
            ],
        }
    }
}

impl Vocabulary {
    /// Reject tables that would break reranking or entry-block invariants.
    pub fn validate(&self) -> Result<()> {
        if self.content_bonus < 0.0 {
            bail!("content_bonus must be >= 0");
        }
        for s in &self.services {
            if s.bonus <= self.content_bonus {
                bail!(
                    "service '{}' bonus ({}) must be positive and exceed content_bonus ({})",
                    s.id,
                    s.bonus,
                    self.content_bonus
                );
            }
            if s.patterns.is_empty() {
                bail!("service '{}' has no patterns", s.id);
            }
        }
        for f in &self.fallbacks {
            if f.penalty < 0.0 {
                bail!("fallback '{}' penalty must be >= 0", f.block);
            }
        }
        for block in [&self.schedule_block, &self.webhook_block] {
            if !self.entry_blocks.contains(block) {
                bail!("entry block '{}' must be listed in entry_blocks", block);
            }
        }
        let mut seen = Vec::new();
        for rule in &self.intents {
            if seen.contains(&rule.intent) {
                bail!("intent '{}' listed twice", rule.intent);
            }
            if rule.intent == Intent::MultiStepWorkflow {
                bail!("multi_step_workflow is the fallback and cannot carry keywords");
            }
            seen.push(rule.intent);
        }
        Ok(())
    }

    pub fn intent_rule(&self, intent: Intent) -> Option<&IntentRule> {
        self.intents.iter().find(|r| r.intent == intent)
    }

    pub fn is_entry_block(&self, block: &str) -> bool {
        self.entry_blocks.iter().any(|b| b == block)
    }

    pub fn service(&self, id: &str) -> Option<&ServiceRule> {
        self.services.iter().find(|s| s.id == id)
    }

    /// Rules emitted for a required block set, base rules first.
    pub fn rules_for(&self, blocks: &[String]) -> Vec<String> {
        let mut rules = self.base_rules.clone();
        for br in &self.block_rules {
            if blocks.contains(&br.block) && !rules.contains(&br.rule) {
                rules.push(br.rule.clone());
            }
        }
        rules
    }
}

/// Lowercase word tokens of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether `token` is `word` or a light inflection of it.
fn inflects(token: &str, word: &str) -> bool {
    if token == word {
        return true;
    }
    if let Some(rest) = token.strip_prefix(word) {
        return INFLECTIONS.contains(&rest);
    }
    // receive -> receiving
    if let Some(stem) = word.strip_suffix('e') {
        if let Some(rest) = token.strip_prefix(stem) {
            return rest == "ing";
        }
    }
    false
}

/// Whether a (possibly multi-word) term occurs in the token stream.
pub fn matches_term(tokens: &[String], term: &str) -> bool {
    let parts = tokenize(term);
    if parts.is_empty() || parts.len() > tokens.len() {
        return false;
    }
    tokens
        .windows(parts.len())
        .any(|w| w.iter().zip(&parts).all(|(t, p)| inflects(t, p)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        tokenize(s)
    }

    #[test]
    fn test_default_vocabulary_is_valid() {
        Vocabulary::default().validate().unwrap();
    }

    #[test]
    fn test_word_boundaries() {
        assert!(!matches_term(&toks("send an email"), "ai"));
        assert!(matches_term(&toks("use ai here"), "ai"));
    }

    #[test]
    fn test_inflections() {
        assert!(matches_term(&toks("when a webhook is received"), "receive"));
        assert!(matches_term(&toks("receiving webhooks"), "receive"));
        assert!(matches_term(&toks("receiving webhooks"), "webhook"));
        assert!(!matches_term(&toks("postgresql"), "post"));
    }

    #[test]
    fn test_multi_word_terms() {
        assert!(matches_term(&toks("every day at 7am"), "every day"));
        assert!(!matches_term(&toks("day every"), "every day"));
        assert!(matches_term(&toks("write to Google Sheets"), "google sheets"));
    }

    #[test]
    fn test_rejects_weak_service_bonus() {
        let mut vocab = Vocabulary::default();
        vocab.services[0].bonus = 0.05;
        assert!(vocab.validate().is_err());
    }

    #[test]
    fn test_rules_for_conditional() {
        let vocab = Vocabulary::default();
        let rules = vocab.rules_for(&["n8n-nodes-base.webhook".to_string()]);
        assert_eq!(rules.len(), vocab.base_rules.len() + 1);
        assert!(rules.iter().any(|r| r.contains("httpMethod")));
    }
}
