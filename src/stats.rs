//! Collection and feedback overview for `flowrag stats`.

use anyhow::Result;

use flowrag_core::error::CollaboratorError;

use crate::config::Config;
use crate::feedback::FeedbackAnalytics;
use crate::pipeline::Pipeline;

pub async fn run_stats(config: &Config, pipeline: &Pipeline) -> Result<()> {
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("flowrag stats");
    println!("===============");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Embeddings:  {}", config.embedding.provider);
    println!("  Backend:     {}", config.vector_store.backend);
    println!();
    println!("  Collections:");

    let roles = config.retrieval.collections.roles();
    for name in roles.all() {
        let display = match pipeline.store().count(name).await {
            Ok(n) => n.to_string(),
            Err(CollaboratorError::MissingCollection(_)) => "missing".to_string(),
            Err(e) => format!("unavailable ({})", e),
        };
        println!("  {:<16} {:>8}", name, display);
    }

    let analytics = pipeline.feedback().analytics().await?;
    print_analytics(&analytics);
    Ok(())
}

fn print_analytics(a: &FeedbackAnalytics) {
    println!();
    println!("  Feedback:");
    println!(
        "  Generations: {} ({} successful, {:.1}%)",
        a.total_generations, a.successful_generations, a.overall_success_rate
    );
    if !a.success_by_intent.is_empty() {
        println!();
        println!("  {:<24} {:>8}", "INTENT", "SUCCESS");
        println!("  {}", "-".repeat(33));
        for (intent, rate) in &a.success_by_intent {
            println!("  {:<24} {:>7.1}%", intent, rate);
        }
    }
    if !a.top_blocks.is_empty() {
        println!();
        println!("  Top blocks:");
        for r in &a.top_blocks {
            println!("  {:<40} {:.2} ({} uses)", r.id, r.score, r.total_uses);
        }
    }
    if !a.common_errors.is_empty() {
        println!();
        println!("  Common validation errors:");
        for e in &a.common_errors {
            println!("  {:>4}× {}", e.count, e.errors.join("; "));
        }
    }
    println!();
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
