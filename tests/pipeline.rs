use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use flowrag::config::{load_config, Config};
use flowrag::db;
use flowrag::feedback::FeedbackStore;
use flowrag::migrate;
use flowrag::pipeline::Pipeline;
use flowrag_core::models::{Intent, Outcome};

const SLACK: &str = "n8n-nodes-base.slack";
const WEBHOOK: &str = "n8n-nodes-base.webhook";
const QUERY: &str = "send a slack message when a webhook is received";

const CATALOG: &str = r#"{
    "blocks": [
        {
            "blockId": "n8n-nodes-base.slack",
            "displayName": "Slack",
            "category": "communication",
            "description": "Send a message to a Slack channel"
        },
        {
            "blockId": "n8n-nodes-base.webhook",
            "displayName": "Webhook",
            "category": "trigger",
            "description": "Start a workflow when an HTTP request is received",
            "isTrigger": true
        },
        {
            "blockId": "n8n-nodes-base.code",
            "displayName": "Code",
            "category": "transform",
            "description": "Run custom JavaScript over the incoming items"
        }
    ],
    "templates": [
        {
            "id": 42,
            "name": "Webhook to Slack",
            "description": "Post a Slack message for every webhook call",
            "nodes": [
                {"type": "n8n-nodes-base.webhook"},
                {"type": "n8n-nodes-base.slack"}
            ],
            "connections": {}
        }
    ]
}"#;

fn setup(backend: &str) -> (TempDir, Config) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("config")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/flowrag.sqlite"

[chunking]
chunk_size = 400
chunk_overlap = 40

[embedding]
provider = "hashing"
dims = 128

[vector_store]
backend = "{}"
"#,
        root.display(),
        backend
    );
    let config_path = root.join("config/flowrag.toml");
    fs::write(&config_path, config_content).unwrap();
    let config = load_config(&config_path).unwrap();
    (tmp, config)
}

fn write_catalog(tmp: &TempDir) -> PathBuf {
    let dir = tmp.path().join("catalog");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("catalog.json"), CATALOG).unwrap();
    fs::write(
        dir.join("notes.md"),
        "Post a Slack message to the alerts channel when an order webhook fires.",
    )
    .unwrap();
    dir
}

#[tokio::test]
async fn test_ingest_then_build_context() {
    let (tmp, config) = setup("sqlite");
    let catalog = write_catalog(&tmp);
    let pipeline = Pipeline::from_config(&config).await.unwrap();

    let report = pipeline.ingest(&catalog, false).await.unwrap();
    assert_eq!(report.files, 2);
    assert_eq!(report.chunks.get("blocks"), Some(&3));
    assert_eq!(report.chunks.get("patterns"), Some(&1));
    assert_eq!(report.chunks.get("tasks"), Some(&1));
    assert_eq!(report.upserted, report.total_chunks());

    let built = pipeline.build(QUERY).await;
    assert_eq!(built.analysis.intent, Intent::Notification);
    assert_eq!(built.retrieval.len(), 4);

    let ctx = &built.context;
    assert!(ctx.evidence_by_block.contains_key(SLACK));
    assert!(ctx.evidence_by_block.contains_key(WEBHOOK));
    assert!(ctx.instruction_text.contains("REQUEST:"));
    assert!(ctx.instruction_text.contains(SLACK));

    // Every score handed to the generator stays in range.
    for results in built.retrieval.values() {
        for r in results {
            assert!((0.0..=1.0).contains(&r.relevance_score));
        }
    }
    pipeline.close().await;
}

#[tokio::test]
async fn test_reingest_is_idempotent() {
    let (tmp, config) = setup("sqlite");
    let catalog = write_catalog(&tmp);
    let pipeline = Pipeline::from_config(&config).await.unwrap();

    pipeline.ingest(&catalog, false).await.unwrap();
    pipeline.ingest(&catalog, false).await.unwrap();
    assert_eq!(pipeline.store().count("blocks").await.unwrap(), 3);
    pipeline.close().await;
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let (tmp, config) = setup("sqlite");
    let catalog = write_catalog(&tmp);
    let pipeline = Pipeline::from_config(&config).await.unwrap();

    let report = pipeline.ingest(&catalog, true).await.unwrap();
    assert_eq!(report.upserted, 0);
    assert!(report.total_chunks() > 0);
    assert!(pipeline.store().collections().await.unwrap().is_empty());
    pipeline.close().await;
}

#[tokio::test]
async fn test_missing_collections_degrade_to_empty() {
    let (_tmp, config) = setup("sqlite");
    let pipeline = Pipeline::from_config(&config).await.unwrap();

    let built = pipeline.build(QUERY).await;
    assert_eq!(built.retrieval.len(), 4);
    assert!(built.retrieval.values().all(|r| r.is_empty()));
    assert!(built.context.evidence_by_block.is_empty());
    assert!(!built.context.required_blocks.is_empty());
    pipeline.close().await;
}

#[tokio::test]
async fn test_disabled_backend_still_assembles() {
    let (_tmp, config) = setup("disabled");
    let pipeline = Pipeline::from_config(&config).await.unwrap();

    let ctx = pipeline.build_context(QUERY).await;
    assert_eq!(ctx.intent, Intent::Notification);
    assert!(ctx.evidence_by_block.is_empty());
    assert!(!ctx.rules.is_empty());
    pipeline.close().await;
}

#[tokio::test]
async fn test_init_collections_is_idempotent() {
    let (_tmp, config) = setup("sqlite");
    let pipeline = Pipeline::from_config(&config).await.unwrap();

    pipeline.init_collections().await.unwrap();
    let created = pipeline.init_collections().await.unwrap();
    assert_eq!(created.len(), 4);
    let mut listed = pipeline.store().collections().await.unwrap();
    listed.sort();
    assert_eq!(listed, vec!["blocks", "connections", "patterns", "tasks"]);
    assert_eq!(pipeline.store().count("blocks").await.unwrap(), 0);
    pipeline.close().await;
}

#[tokio::test]
async fn test_feedback_weights_accumulate() {
    let (_tmp, config) = setup("sqlite");
    let pipeline = Pipeline::from_config(&config).await.unwrap();
    let built = pipeline.build(QUERY).await;
    let feedback = pipeline.feedback();

    let success = Outcome {
        success: true,
        validation_errors: vec![],
    };
    for _ in 0..10 {
        feedback
            .record(QUERY, &built.analysis, &built.context, &success)
            .await
            .unwrap();
    }
    let weights = feedback.weights().await.unwrap();
    assert_eq!(weights.blocks.get(SLACK), Some(&1.0));

    let failure = Outcome {
        success: false,
        validation_errors: vec!["Missing 'connections' field".to_string()],
    };
    feedback
        .record(QUERY, &built.analysis, &built.context, &failure)
        .await
        .unwrap();

    let record = feedback.block_record(SLACK).await.unwrap().unwrap();
    assert_eq!(record.total_uses, 11);
    assert_eq!(record.successful_uses, 10);
    let weight = feedback.weights().await.unwrap().blocks[SLACK];
    assert!((weight - 10.0 / 11.0).abs() < 1e-9);

    let analytics = feedback.analytics().await.unwrap();
    assert_eq!(analytics.total_generations, 11);
    assert_eq!(analytics.successful_generations, 10);
    assert!(analytics.top_blocks.iter().any(|r| r.id == SLACK));
    assert_eq!(analytics.common_errors.len(), 1);
    assert_eq!(analytics.common_errors[0].count, 1);

    let suggestions = feedback.suggest_improvements(Intent::Notification).await.unwrap();
    assert_eq!(suggestions.successful_block_combinations.len(), 1);
    assert_eq!(suggestions.common_errors.len(), 1);
    assert!(suggestions.recommendations[0].starts_with("For notification workflows"));
    pipeline.close().await;
}

#[tokio::test]
async fn test_record_outcome_returns_increasing_ids() {
    let (_tmp, config) = setup("memory");
    let pipeline = Pipeline::from_config(&config).await.unwrap();
    let outcome = Outcome {
        success: true,
        validation_errors: vec![],
    };
    let first = pipeline.record_outcome(QUERY, &outcome).await.unwrap();
    let second = pipeline.record_outcome(QUERY, &outcome).await.unwrap();
    assert!(second > first);
    pipeline.close().await;
}

#[tokio::test]
async fn test_malformed_effectiveness_rows_are_skipped() {
    let (_tmp, config) = setup("sqlite");
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();

    for (id, total, successful, score) in [
        ("good", "2", "1", "0.5"),
        ("bad", "0", "0", "0.0"),
        ("worse", "1", "1", "'abc'"),
    ] {
        sqlx::query(&format!(
            "INSERT INTO block_effectiveness (id, total_uses, successful_uses, score, updated_at) \
             VALUES ('{}', {}, {}, {}, 0)",
            id, total, successful, score
        ))
        .execute(&pool)
        .await
        .unwrap();
    }

    let feedback = FeedbackStore::open(pool.clone());
    let weights = feedback.weights().await.unwrap();
    assert_eq!(weights.blocks.len(), 1);
    assert_eq!(weights.blocks.get("good"), Some(&0.5));
    pool.close().await;
}

#[tokio::test]
async fn test_concurrent_records_keep_every_update() {
    let (_tmp, config) = setup("sqlite");
    let pipeline = Pipeline::from_config(&config).await.unwrap();
    let built = pipeline.build(QUERY).await;
    assert!(built.context.required_blocks.iter().any(|b| b == SLACK));

    let pool = db::connect(&config).await.unwrap();
    let feedback = Arc::new(FeedbackStore::open(pool.clone()));
    let analysis = Arc::new(built.analysis);
    let context = Arc::new(built.context);

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..40 {
        let feedback = feedback.clone();
        let analysis = analysis.clone();
        let context = context.clone();
        tasks.spawn(async move {
            let outcome = Outcome {
                success: i % 2 == 0,
                validation_errors: vec![],
            };
            feedback.record(QUERY, &analysis, &context, &outcome).await
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }

    let record = feedback.block_record(SLACK).await.unwrap().unwrap();
    assert_eq!(record.total_uses, 40);
    assert_eq!(record.successful_uses, 20);
    assert_eq!(feedback.analytics().await.unwrap().total_generations, 40);
    pool.close().await;
    pipeline.close().await;
}
