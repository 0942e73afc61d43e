//! Evaluation CLI for the hybrid HS classifier.
//!
//! Usage:
//!     eval classify "Laptop computer" --description "15 inch, Intel i7" --catalog catalog.json
//!     eval benchmark --test-file cases.json --catalog catalog.json
//!     eval analyze --feedback-log feedback.jsonl
//!     eval suggestions --feedback-log feedback.jsonl
//!     eval health

mod benchmark;

use anyhow::{Context, Result};
use benchmark::{BenchmarkFile, BenchmarkReport, Outcome};
use clap::{Parser, Subcommand, ValueEnum};
use hsclass_backend_manticore::{ManticoreConfig, ManticoreVectorIndex};
use hsclass_engine::Classifier;
use hsclass_features::{FeatureExtractor, Lexicon};
use hsclass_feedback::{FeedbackLog, FeedbackLoop, JsonlFeedbackLog, KpiMonitor, Ledger, Observation};
use hsclass_model::{
    Catalog, ClassificationResult, ClassifierConfig, EmbeddingProviderKind, InMemoryCatalog,
    RequestAttributes,
};
use hsclass_retrieval::{
    AnyEmbeddingProvider, EmbeddingProvider, HashingEmbedder, InMemoryVectorIndex, IndexError, IndexHit,
    VectorIndex,
};
use hsclass_rules::RuleBook;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "eval")]
#[command(about = "Classify products and evaluate HS classification quality")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Classifier configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Catalog of codes (JSON array of entries)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Rule book (JSON); the built-in book is used when absent
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    /// Lexicon (JSON); the built-in lexicon is used when absent
    #[arg(long, global = true)]
    lexicon: Option<PathBuf>,

    /// Where catalog vectors are searched
    #[arg(long, global = true, value_enum, default_value = "memory")]
    index: IndexKind,

    /// Manticore URL
    #[arg(long, global = true, default_value = "http://127.0.0.1:9308")]
    manticore_url: String,

    /// Append-only feedback log (JSON lines)
    #[arg(long, global = true)]
    feedback_log: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum IndexKind {
    Memory,
    Manticore,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify one product description
    Classify {
        /// Product title
        title: String,

        #[arg(short, long, default_value = "")]
        description: String,

        #[arg(long, default_value = "cli")]
        case_id: String,

        #[arg(long)]
        material: Option<String>,

        #[arg(long)]
        origin: Option<String>,

        #[arg(long)]
        brand: Option<String>,

        #[arg(long)]
        usage: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run a labelled benchmark file
    Benchmark {
        /// Path to test JSON file
        #[arg(short, long)]
        test_file: PathBuf,
    },

    /// Analyze pending feedback and print new suggestions and metrics
    Analyze,

    /// Print every suggestion recorded in the feedback log
    Suggestions,

    /// Check Manticore health
    Health,
}

/// Vector index chosen on the command line.
enum AnyIndex {
    Memory(InMemoryVectorIndex),
    Manticore(ManticoreVectorIndex),
}

impl VectorIndex for AnyIndex {
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<IndexHit>, IndexError> {
        match self {
            Self::Memory(index) => index.search(vector, k).await,
            Self::Manticore(index) => index.search(vector, k).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Memory(index) => index.name(),
            Self::Manticore(index) => index.name(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("hsclass=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Classify {
            title,
            description,
            case_id,
            material,
            origin,
            brand,
            usage,
            format,
        } => {
            let attrs = RequestAttributes {
                material: material.clone(),
                origin: origin.clone(),
                brand: brand.clone(),
                measurements: None,
                usage: usage.clone(),
            };
            let (classifier, feedback) = build_classifier(&cli).await?;
            let result = classifier.classify_text(case_id, title, description, attrs).await?;
            print_result(&result, format)?;
            if let Some(feedback) = feedback {
                feedback.flush().await?;
            }
        }
        Commands::Benchmark { test_file } => {
            run_benchmark(&cli, test_file).await?;
        }
        Commands::Analyze => {
            run_analyze(&cli).await?;
        }
        Commands::Suggestions => {
            run_suggestions(&cli).await?;
        }
        Commands::Health => {
            run_health(&cli).await?;
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<ClassifierConfig> {
    let config = match &cli.config {
        Some(path) => ClassifierConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ClassifierConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn load_catalog(cli: &Cli) -> Result<InMemoryCatalog> {
    match &cli.catalog {
        Some(path) => InMemoryCatalog::load(path).with_context(|| format!("loading catalog {}", path.display())),
        None => {
            warn!("No catalog given; only rule candidates can be produced");
            Ok(InMemoryCatalog::new(Vec::new()))
        }
    }
}

fn provider_for(config: &ClassifierConfig, extractor: &FeatureExtractor) -> Result<AnyEmbeddingProvider> {
    let api_key = match config.embedding_provider {
        EmbeddingProviderKind::OpenAi { .. } => std::env::var("OPENAI_API_KEY").ok(),
        EmbeddingProviderKind::Hashing { dimension } => {
            // Concept features follow the loaded lexicon.
            return Ok(AnyEmbeddingProvider::Hashing(HashingEmbedder::with_extractor(dimension, extractor)));
        }
        EmbeddingProviderKind::Disabled => None,
    };
    Ok(AnyEmbeddingProvider::from_kind(&config.embedding_provider, api_key)?)
}

async fn build_classifier(cli: &Cli) -> Result<(Classifier<AnyEmbeddingProvider, AnyIndex>, Option<FeedbackLoop>)> {
    let config = load_config(cli)?;
    let catalog = load_catalog(cli)?;

    let extractor = match &cli.lexicon {
        Some(path) => FeatureExtractor::new(
            Lexicon::load(path).with_context(|| format!("loading lexicon {}", path.display()))?,
        ),
        None => FeatureExtractor::default(),
    };

    let book = match &cli.rules {
        Some(path) => RuleBook::load(path).with_context(|| format!("loading rules {}", path.display()))?,
        None => RuleBook::builtin(),
    }
    .with_catalog_headings(&catalog);

    let provider = provider_for(&config, &extractor)?;
    let index = match cli.index {
        IndexKind::Memory => match InMemoryVectorIndex::build(&catalog, &provider, &extractor).await {
            Ok(index) => AnyIndex::Memory(index),
            Err(e) => {
                warn!(error = %e, provider = provider.name(), "Catalog could not be embedded; retrieval will be empty");
                AnyIndex::Memory(InMemoryVectorIndex::new())
            }
        },
        IndexKind::Manticore => AnyIndex::Manticore(ManticoreVectorIndex::new(ManticoreConfig {
            base_url: cli.manticore_url.clone(),
            ..Default::default()
        })),
    };
    info!(
        catalog = catalog.len(),
        rules = book.rules.len(),
        provider = provider.name(),
        index = index.name(),
        "Classifier ready"
    );

    let catalog: Arc<dyn Catalog> = Arc::new(catalog);
    let mut classifier = Classifier::new(Arc::new(config), extractor, &book, provider, index, catalog);

    if let Some(path) = &cli.feedback_log {
        classifier = classifier.with_feedback_log(JsonlFeedbackLog::new(path));
    }
    let feedback = classifier.feedback().cloned();
    Ok((classifier, feedback))
}

fn print_result(result: &ClassificationResult, format: &str) -> Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    if result.is_classified() {
        println!("{} {}", result.national_code, result.title);
    } else {
        println!("(unclassified)");
    }
    println!("   {}", result.rationale.decision);
    println!(
        "   Confidence: {:.2} | Coherence: {:?} | Suspect: {} | Review: {}",
        result.confidence,
        result.rationale.chapter_coherence,
        result.suspect_code(),
        result.requires_review()
    );
    for factor in &result.rationale.factores_clave {
        match factor.contribution {
            Some(c) => println!("   - {}: {} (+{:.3})", factor.kind, factor.value, c),
            None => println!("   - {}: {}", factor.kind, factor.value),
        }
    }
    for v in &result.rationale.validations {
        println!("   [{:?}] {}: {}", v.status, v.check, v.detail);
    }
    for reason in &result.degraded {
        println!("   degraded: {}", reason);
    }

    println!("\n---");
    for (i, entry) in result.top_k.iter().enumerate() {
        println!("{}. {} ({:.3})", i + 1, entry.code, entry.score);
    }
    println!("Response time: {:.3}s", result.response_time);
    Ok(())
}

async fn run_benchmark(cli: &Cli, test_file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(test_file)
        .with_context(|| format!("reading {}", test_file.display()))?;
    let file: BenchmarkFile = serde_json::from_str(&content)?;
    let (classifier, feedback) = build_classifier(cli).await?;
    let mut kpis = KpiMonitor::new(classifier.config().kpi);

    let mut outcomes = Vec::with_capacity(file.cases.len());
    let mut rejected = 0;
    for (i, case) in file.cases.iter().enumerate() {
        let case_id = case.case_id.clone().unwrap_or_else(|| format!("bench-{}", i + 1));
        match classifier
            .classify_text(&case_id, &case.title, &case.description, case.attrs.clone())
            .await
        {
            Ok(result) => {
                let outcome = Outcome::score(&result, &case.expected);
                println!(
                    "{} {:<12} expected {:<12} got {:<12} conf {:.2}",
                    if outcome.exact { "PASS" } else { "FAIL" },
                    case_id,
                    case.expected.digits(),
                    result.national_code,
                    result.confidence
                );
                for alert in kpis.record(Observation::from_result(&result)) {
                    println!("     alert {:?}: {:.2} (threshold {:.2})", alert.kind, alert.value, alert.threshold);
                }
                outcomes.push(outcome);
            }
            Err(e) => {
                println!("SKIP {:<12} {}", case_id, e);
                rejected += 1;
            }
        }
    }
    if let Some(feedback) = feedback {
        feedback.flush().await?;
    }

    let report = BenchmarkReport::from_outcomes(&outcomes, rejected);
    println!("\n---");
    println!("{}", serde_json::to_string_pretty(&report)?);

    kpis.flush_batch();
    println!("\n--- KPIs");
    println!("{}", serde_json::to_string_pretty(&kpis.summary(chrono::Duration::hours(24)))?);
    Ok(())
}

fn feedback_path(cli: &Cli) -> Result<&Path> {
    cli.feedback_log
        .as_deref()
        .context("--feedback-log is required for this command")
}

async fn run_analyze(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let feedback = FeedbackLoop::spawn(JsonlFeedbackLog::new(feedback_path(cli)?), &config);

    let suggestions = feedback.analyze().await?;
    println!("{} new suggestion(s)", suggestions.len());
    for s in &suggestions {
        println!(
            "- [{:?}] {}: {} ({} cases, confidence {:.2}-{:.2})",
            s.kind, s.code, s.proposed_change, s.frequency, s.confidence_range.0, s.confidence_range.1
        );
    }
    println!("\n---");
    println!("{}", serde_json::to_string_pretty(&feedback.metrics().await?)?);
    Ok(())
}

async fn run_suggestions(cli: &Cli) -> Result<()> {
    let entries = JsonlFeedbackLog::new(feedback_path(cli)?).load().await?;
    let ledger = Ledger::from_entries(entries);
    println!("{}", serde_json::to_string_pretty(ledger.suggestions())?);
    Ok(())
}

async fn run_health(cli: &Cli) -> Result<()> {
    let index = ManticoreVectorIndex::new(ManticoreConfig {
        base_url: cli.manticore_url.clone(),
        ..Default::default()
    });
    print!("Checking {} backend... ", index.name());

    match index.health_check().await {
        Ok(()) => {
            println!("OK");
            Ok(())
        }
        Err(e) => {
            println!("FAILED: {}", e);
            std::process::exit(1);
        }
    }
}
