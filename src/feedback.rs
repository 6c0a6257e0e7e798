//! Durable feedback: generation history and per-id effectiveness.
//!
//! Every recorded outcome appends one immutable `generation_history` row and
//! folds the outcome into `block_effectiveness` (one row per distinct
//! required block) and `pattern_effectiveness` (one row per distinct pattern
//! in the assembled context). Scores are cumulative success ratios with no
//! decay.
//!
//! The updates run inside one transaction as SQL upserts that increment in
//! place, so concurrent recorders never lose an observation. Weight maps are
//! cached and rebuilt lazily; every `record` invalidates the cache.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

use flowrag_core::models::{AssembledContext, EffectivenessRecord, Intent, Outcome, QueryAnalysis};
use flowrag_core::retrieve::{WeightSource, Weights};

/// Minimum uses before a block is ranked in analytics.
const TOP_BLOCK_MIN_USES: i64 = 5;
const TOP_BLOCK_LIMIT: i64 = 10;
const COMMON_LIMIT: i64 = 5;

pub struct FeedbackStore {
    pool: SqlitePool,
    cache: RwLock<Option<Weights>>,
}

/// Overall feedback statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackAnalytics {
    pub total_generations: i64,
    pub successful_generations: i64,
    /// Percentage in `[0, 100]`.
    pub overall_success_rate: f64,
    pub success_by_intent: BTreeMap<String, f64>,
    pub top_blocks: Vec<EffectivenessRecord>,
    pub common_errors: Vec<ErrorCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorCount {
    pub errors: Vec<String>,
    pub count: i64,
}

/// History-derived advice for one intent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestions {
    pub intent: Intent,
    pub successful_block_combinations: Vec<Vec<String>>,
    pub common_errors: Vec<Vec<String>>,
    pub recommendations: Vec<String>,
}

#[derive(Clone, Copy)]
enum Table {
    Blocks,
    Patterns,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::Blocks => "block_effectiveness",
            Table::Patterns => "pattern_effectiveness",
        }
    }
}

impl FeedbackStore {
    /// Wraps a pool on which migrations have already run.
    pub fn open(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: RwLock::new(None),
        }
    }

    /// Record one generation outcome; returns the history row id.
    pub async fn record(
        &self,
        query: &str,
        analysis: &QueryAnalysis,
        context: &AssembledContext,
        outcome: &Outcome,
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let blocks: BTreeSet<&str> = analysis.required_blocks.iter().map(String::as_str).collect();
        let patterns: BTreeSet<&str> = context.patterns.iter().map(|p| p.pattern_id.as_str()).collect();

        let mut tx = self.pool.begin().await?;

        let history = sqlx::query(
            r#"
            INSERT INTO generation_history
                (query, intent, complexity, required_blocks_json, patterns_json,
                 success, validation_errors_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(query)
        .bind(analysis.intent.as_str())
        .bind(analysis.complexity.as_str())
        .bind(serde_json::to_string(&analysis.required_blocks)?)
        .bind(serde_json::to_string(&patterns)?)
        .bind(outcome.success)
        .bind(serde_json::to_string(&outcome.validation_errors)?)
        .bind(now)
        .execute(&mut *tx)
        .await
        .with_context(|| "Failed to insert generation history")?;
        let history_id = history.last_insert_rowid();

        for (table, ids) in [(Table::Blocks, &blocks), (Table::Patterns, &patterns)] {
            for id in ids {
                sqlx::query(&format!(
                    r#"
                    INSERT INTO {} (id, total_uses, successful_uses, score, updated_at)
                    VALUES (?, 1, ?, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        total_uses = total_uses + 1,
                        successful_uses = successful_uses + excluded.successful_uses,
                        score = CAST(successful_uses + excluded.successful_uses AS REAL)
                                / (total_uses + 1),
                        updated_at = excluded.updated_at
                    "#,
                    table.name()
                ))
                .bind(*id)
                .bind(outcome.success as i64)
                .bind(if outcome.success { 1.0 } else { 0.0 })
                .bind(now)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to update {} for {}", table.name(), id))?;
            }
        }

        tx.commit().await?;
        *self.cache.write().await = None;

        tracing::info!(
            history_id,
            intent = %analysis.intent,
            success = outcome.success,
            blocks = blocks.len(),
            patterns = patterns.len(),
            "recorded generation outcome"
        );
        Ok(history_id)
    }

    /// Current weights, rebuilding the cache if a record invalidated it.
    pub async fn weights(&self) -> Result<Weights> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            return Ok(cached.clone());
        }
        let mut slot = self.cache.write().await;
        if let Some(cached) = slot.as_ref() {
            return Ok(cached.clone());
        }
        let fresh = Weights {
            blocks: self.load_table(Table::Blocks).await?,
            patterns: self.load_table(Table::Patterns).await?,
        };
        *slot = Some(fresh.clone());
        Ok(fresh)
    }

    /// Full effectiveness record for one block id.
    pub async fn block_record(&self, id: &str) -> Result<Option<EffectivenessRecord>> {
        let row = sqlx::query(
            "SELECT id, total_uses, successful_uses, score FROM block_effectiveness WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| EffectivenessRecord {
            id: r.get("id"),
            total_uses: r.get("total_uses"),
            successful_uses: r.get("successful_uses"),
            score: r.get("score"),
        }))
    }

    async fn load_table(&self, table: Table) -> Result<BTreeMap<String, f64>> {
        let rows = sqlx::query(&format!(
            "SELECT id, total_uses, successful_uses, score FROM {}",
            table.name()
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut weights = BTreeMap::new();
        let mut skipped = 0usize;
        for row in &rows {
            let parsed = (
                row.try_get::<String, _>("id"),
                row.try_get::<i64, _>("total_uses"),
                row.try_get::<i64, _>("successful_uses"),
                row.try_get::<f64, _>("score"),
            );
            match parsed {
                (Ok(id), Ok(total), Ok(successful), Ok(score))
                    if total > 0
                        && (0..=total).contains(&successful)
                        && score.is_finite()
                        && (0.0..=1.0).contains(&score) =>
                {
                    weights.insert(id, score);
                }
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(table = table.name(), skipped, "skipped malformed effectiveness rows");
        }
        Ok(weights)
    }

    pub async fn analytics(&self) -> Result<FeedbackAnalytics> {
        let totals = sqlx::query(
            "SELECT COUNT(*) AS total, COALESCE(SUM(success), 0) AS successful FROM generation_history",
        )
        .fetch_one(&self.pool)
        .await?;
        let total_generations: i64 = totals.get("total");
        let successful_generations: i64 = totals.get("successful");

        let intent_rows = sqlx::query(
            r#"
            SELECT intent, COUNT(*) AS total, COALESCE(SUM(success), 0) AS successful
            FROM generation_history
            GROUP BY intent
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let success_by_intent = intent_rows
            .iter()
            .map(|r| {
                let total: i64 = r.get("total");
                let successful: i64 = r.get("successful");
                (r.get::<String, _>("intent"), percent(successful, total))
            })
            .collect();

        let top_rows = sqlx::query(
            r#"
            SELECT id, total_uses, successful_uses, score
            FROM block_effectiveness
            WHERE total_uses >= ?
            ORDER BY score DESC, id ASC
            LIMIT ?
            "#,
        )
        .bind(TOP_BLOCK_MIN_USES)
        .bind(TOP_BLOCK_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        let top_blocks = top_rows
            .iter()
            .map(|r| EffectivenessRecord {
                id: r.get("id"),
                total_uses: r.get("total_uses"),
                successful_uses: r.get("successful_uses"),
                score: r.get("score"),
            })
            .collect();

        let error_rows = sqlx::query(
            r#"
            SELECT validation_errors_json, COUNT(*) AS count
            FROM generation_history
            WHERE validation_errors_json != '[]'
            GROUP BY validation_errors_json
            ORDER BY count DESC, validation_errors_json ASC
            LIMIT ?
            "#,
        )
        .bind(COMMON_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        let common_errors = error_rows
            .iter()
            .filter_map(|r| {
                let errors = decode_list(&r.get::<String, _>("validation_errors_json"))?;
                Some(ErrorCount {
                    errors,
                    count: r.get("count"),
                })
            })
            .collect();

        Ok(FeedbackAnalytics {
            total_generations,
            successful_generations,
            overall_success_rate: percent(successful_generations, total_generations),
            success_by_intent,
            top_blocks,
            common_errors,
        })
    }

    pub async fn suggest_improvements(&self, intent: Intent) -> Result<Suggestions> {
        let combos = sqlx::query(
            r#"
            SELECT required_blocks_json, COUNT(*) AS count
            FROM generation_history
            WHERE intent = ? AND success = 1
            GROUP BY required_blocks_json
            ORDER BY count DESC, required_blocks_json ASC
            LIMIT ?
            "#,
        )
        .bind(intent.as_str())
        .bind(COMMON_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        let successful_block_combinations: Vec<Vec<String>> = combos
            .iter()
            .filter_map(|r| decode_list(&r.get::<String, _>("required_blocks_json")))
            .collect();

        let errors = sqlx::query(
            r#"
            SELECT validation_errors_json, COUNT(*) AS count
            FROM generation_history
            WHERE intent = ? AND success = 0 AND validation_errors_json != '[]'
            GROUP BY validation_errors_json
            ORDER BY count DESC, validation_errors_json ASC
            LIMIT ?
            "#,
        )
        .bind(intent.as_str())
        .bind(COMMON_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        let common_errors = errors
            .iter()
            .filter_map(|r| decode_list(&r.get::<String, _>("validation_errors_json")))
            .collect();

        let mut recommendations = Vec::new();
        if let Some(best) = successful_block_combinations.first() {
            recommendations.push(format!(
                "For {} workflows, consider using: {}",
                intent,
                best.join(", ")
            ));
        }
        if let Some(tip) = intent_tip(intent) {
            recommendations.push(tip.to_string());
        }

        Ok(Suggestions {
            intent,
            successful_block_combinations,
            common_errors,
            recommendations,
        })
    }
}

#[async_trait]
impl WeightSource for FeedbackStore {
    async fn block_weights(&self) -> Result<BTreeMap<String, f64>> {
        Ok(self.weights().await?.blocks)
    }

    async fn pattern_weights(&self) -> Result<BTreeMap<String, f64>> {
        Ok(self.weights().await?.patterns)
    }
}

fn intent_tip(intent: Intent) -> Option<&'static str> {
    match intent {
        Intent::WebhookTrigger => Some("Always include proper HTTP method and path parameters"),
        Intent::ApiIntegration => Some("Don't forget authentication configuration"),
        Intent::DataTransformation => Some("Code blocks are effective for complex transformations"),
        Intent::AiAutomation => Some("Ensure the AI agent has the tools it needs configured"),
        Intent::Notification => Some("Verify channel/recipient configuration"),
        Intent::Scheduling => Some("Set an explicit interval or cron expression on the schedule trigger"),
        Intent::ErrorHandling => Some("Route failures to a dedicated error branch"),
        _ => None,
    }
}

fn percent(part: i64, total: i64) -> f64 {
    if total > 0 {
        part as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}

fn decode_list(raw: &str) -> Option<Vec<String>> {
    match serde_json::from_str(raw) {
        Ok(list) => Some(list),
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed history row");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
    }

    #[test]
    fn test_decode_list() {
        assert_eq!(decode_list(r#"["a","b"]"#), Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(decode_list("not json"), None);
    }

    #[test]
    fn test_tips_cover_common_intents() {
        assert!(intent_tip(Intent::Notification).is_some());
        assert!(intent_tip(Intent::MultiStepWorkflow).is_none());
    }
}
