//! DocuMind command line
//!
//! Run with: cargo run -p documind-rag --features cli --bin documind -- ask policy.txt "How long do refunds take?"

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use documind_rag::config::EmbeddingBackend;
use documind_rag::generation::{format_sources_markdown, truncate_snippet};
use documind_rag::{Answer, QueryError, RagConfig, RagEngine};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "documind")]
#[command(about = "Ask questions about a document and get cited answers")]
struct Cli {
    /// Configuration file (defaults to <config dir>/documind/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Embed with the built-in hashing embedder instead of a model server
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chunk and index a text file, then print chunking statistics
    Ingest {
        file: PathBuf,
        /// Document id (random when omitted)
        #[arg(long)]
        doc_id: Option<Uuid>,
        /// Print each chunk with its token count and character span
        #[arg(long)]
        chunks: bool,
    },
    /// Ingest a text file and answer one question about it
    Ask {
        file: PathBuf,
        question: Vec<String>,
        /// Print the answer as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ingest a text file and answer questions read from stdin
    Chat { file: PathBuf },
    /// Show configuration and provider summary
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "documind_rag=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().or_else(default_config_path);
    let mut config = RagConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    if cli.offline {
        config.embedding.provider = EmbeddingBackend::Hashing;
    }
    let engine = RagEngine::from_config(config).context("Failed to initialize engine")?;

    match cli.command {
        Command::Ingest { file, doc_id, chunks } => {
            let doc_id = doc_id.unwrap_or_else(Uuid::new_v4);
            ingest_file(&engine, doc_id, &file).await?;
            if chunks {
                for chunk in engine.document_chunks(&doc_id).unwrap_or_default() {
                    println!(
                        "{} {} tokens, chars {}..{}\n  {}",
                        style(format!("[{}]", chunk.source_ref())).cyan(),
                        chunk.token_count,
                        chunk.char_span.start,
                        chunk.char_span.end,
                        style(truncate_snippet(&chunk.text, 120)).dim()
                    );
                }
            }
        }
        Command::Ask {
            file,
            question,
            json,
        } => {
            let doc_id = Uuid::new_v4();
            ingest_file(&engine, doc_id, &file).await?;
            let question = question.join(" ");
            match ask(&engine, doc_id, &question).await {
                Ok(answer) if json => println!("{}", serde_json::to_string_pretty(&answer)?),
                Ok(answer) => print_answer(&answer),
                Err(e) => print_query_error(&e),
            }
        }
        Command::Chat { file } => {
            let doc_id = Uuid::new_v4();
            ingest_file(&engine, doc_id, &file).await?;
            println!("{}", style("Ask a question (empty line to quit)").dim());

            let stdin = std::io::stdin();
            loop {
                print!("{} ", style("?").cyan().bold());
                std::io::stdout().flush()?;
                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 || line.trim().is_empty() {
                    break;
                }
                match ask(&engine, doc_id, line.trim()).await {
                    Ok(answer) => print_answer(&answer),
                    Err(e) => print_query_error(&e),
                }
            }
        }
        Command::Info => {
            let info = engine.system_info().await;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }

    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("documind").join("config.toml"))
}

fn spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        bar.set_style(style);
    }
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

async fn ingest_file(engine: &RagEngine, doc_id: Uuid, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut metadata = HashMap::new();
    metadata.insert(
        "filename".to_string(),
        serde_json::Value::String(path.display().to_string()),
    );

    let bar = spinner(format!("Ingesting {}", path.display()));
    let result = engine.ingest_with_report(doc_id, &text, metadata).await;
    bar.finish_and_clear();

    let stats = result.with_context(|| format!("Failed to ingest {}", path.display()))?;
    println!(
        "{} {} ({} chunks, {} tokens, avg {:.0} tokens/chunk)",
        style("Indexed").green().bold(),
        path.display(),
        stats.total_chunks,
        stats.document_tokens,
        stats.avg_tokens
    );
    if stats.oversized > 0 || stats.undersized > 0 {
        println!(
            "  {} {} oversized, {} undersized chunks",
            style("note:").yellow(),
            stats.oversized,
            stats.undersized
        );
    }
    Ok(())
}

async fn ask(engine: &RagEngine, doc_id: Uuid, question: &str) -> Result<Answer, QueryError> {
    let bar = spinner("Thinking...".to_string());
    let result = engine.answer(doc_id, question).await;
    bar.finish_and_clear();
    result
}

fn print_answer(answer: &Answer) {
    println!("\n{}\n", answer.answer_text);
    if !answer.citations.is_empty() {
        println!("{}", format_sources_markdown(&answer.citations));
    }
    let stats = &answer.stats;
    println!(
        "{}",
        style(format!(
            "{} | {} retrieved, {} in context | {}ms{}",
            stats.generation_provider,
            stats.chunks_retrieved,
            stats.context_chunks,
            stats.timings.total_ms,
            if stats.cache_hit { " (cached)" } else { "" }
        ))
        .dim()
    );
}

fn print_query_error(error: &QueryError) {
    eprintln!("{} {}", style("error:").red().bold(), error);
    if let Some(degraded) = error.degraded_answer() {
        println!(
            "\n{}\n{}",
            style("Best matching passage:").yellow(),
            degraded.snippet
        );
    }
}
