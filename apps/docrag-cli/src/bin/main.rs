use std::env;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use docrag_core::config::Config;
use docrag_core::models::{list_available, EMBEDDING_MODELS, LLM_MODELS, RERANKING_MODELS};
use docrag_hybrid::RagPipeline;
use docrag_llm::GenerationEvent;

const USAGE: &str = "Usage: docrag <ingest|query|stream|clear|stats|models> [args...]
  ingest <path>... [--source NAME]   load files or directories into the collection
  query \"<question>\" [--top-k N]      answer with sources and stage timings
  stream \"<question>\" [--top-k N]     stream the answer as it is generated
  clear                              delete every stored chunk
  stats                              health, collection and metrics summary
  models                             list the model catalogs";

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }
    let cmd = args.remove(0);
    (cmd, args)
}

/// Positional arguments plus the value of `--top-k`, if any.
fn split_top_k(args: &[String]) -> anyhow::Result<(Vec<String>, Option<usize>)> {
    let mut positional = Vec::new();
    let mut top_k = None;
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--top-k" {
            let value = args.get(i + 1).context("--top-k requires a number")?;
            top_k = Some(value.parse::<usize>().context("--top-k requires a number")?);
            i += 1;
        } else {
            positional.push(args[i].clone());
        }
        i += 1;
    }
    Ok((positional, top_k))
}

fn question_from(positional: &[String], cmd: &str) -> String {
    if positional.is_empty() {
        eprintln!("Usage: docrag {cmd} \"<question>\" [--top-k N]");
        std::process::exit(1);
    }
    positional.join(" ")
}

async fn open_pipeline() -> anyhow::Result<RagPipeline> {
    let config = Config::load()?.rag()?;
    let pipeline = RagPipeline::from_config(config).await?;
    pipeline.initialize().await?;
    Ok(pipeline)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_target(false).init();
    let (cmd, args) = parse_args();

    match cmd.as_str() {
        "ingest" => {
            let mut paths: Vec<PathBuf> = Vec::new();
            let mut source = None;
            let mut i = 0;
            while i < args.len() {
                match args[i].as_str() {
                    "--source" => {
                        source = Some(args.get(i + 1).context("--source requires a name")?.clone());
                        i += 1;
                    }
                    other => paths.push(PathBuf::from(other)),
                }
                i += 1;
            }
            if paths.is_empty() {
                eprintln!("Usage: docrag ingest <path>... [--source NAME]");
                std::process::exit(1);
            }

            let pipeline = open_pipeline().await?;
            let bar = ProgressBar::new(paths.len() as u64);
            bar.set_style(
                ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
                    .context("progress template")?
                    .progress_chars("=> "),
            );
            let mut total_chunks = 0;
            for path in &paths {
                bar.set_message(path.display().to_string());
                let report = match &source {
                    Some(name) => {
                        let text = std::fs::read_to_string(path)
                            .with_context(|| format!("reading {}", path.display()))?;
                        pipeline.ingest_text(&text, name, None).await?
                    }
                    None => pipeline.ingest(path).await?,
                };
                total_chunks += report.chunk_stats.total_chunks;
                bar.println(format!(
                    "✅ {} (avg {:.0} tokens/chunk, load {:.0} ms, chunk {:.0} ms, index {:.0} ms)",
                    report.message(),
                    report.chunk_stats.avg_tokens_per_chunk,
                    report.timings.load_ms,
                    report.timings.chunk_ms,
                    report.timings.index_ms
                ));
                bar.inc(1);
            }
            bar.finish_and_clear();
            println!("📊 Ingested {} path(s), {} chunks", paths.len(), total_chunks);
        }
        "query" => {
            let (positional, top_k) = split_top_k(&args)?;
            let question = question_from(&positional, "query");
            let pipeline = open_pipeline().await?;
            let response = pipeline.query(&question, top_k).await?;

            println!("{}\n", response.answer);
            if let Some(reason) = &response.rerank_fallback {
                println!("⚠️  Reranking unavailable, using retrieval order: {reason}");
            }
            println!("📚 Sources ({} retrieved):", response.chunks_retrieved);
            for (i, source) in response.sources.iter().enumerate() {
                let name = source.metadata.get("source_name").and_then(|v| v.as_str()).unwrap_or("Unknown");
                let score = source.metadata.get("retrieval_score").and_then(serde_json::Value::as_f64).unwrap_or(0.0);
                println!("  {}. {} (score={:.4})", i + 1, name, score);
            }
            if let Some(metrics) = &response.metrics {
                let stages: Vec<String> = metrics.stages.iter().map(|(s, ms)| format!("{s}={ms:.0}ms")).collect();
                println!("⏱  {:.0} ms total ({})", metrics.total_ms, stages.join(", "));
            }
        }
        "stream" => {
            let (positional, top_k) = split_top_k(&args)?;
            let question = question_from(&positional, "stream");
            let pipeline = open_pipeline().await?;
            let mut events = pipeline.query_stream(&question, top_k).await?;
            let mut stdout = std::io::stdout();
            while let Some(event) = events.next().await {
                match event {
                    GenerationEvent::ContentDelta(delta) => {
                        print!("{delta}");
                        stdout.flush()?;
                    }
                    GenerationEvent::Sources { sources, chunks_retrieved } => {
                        println!("\n\n📚 {} sources ({} retrieved)", sources.len(), chunks_retrieved);
                    }
                    GenerationEvent::Done => {}
                    GenerationEvent::Error(message) => {
                        eprintln!("\n❌ Generation failed: {message}");
                        std::process::exit(2);
                    }
                }
            }
        }
        "clear" => {
            let pipeline = open_pipeline().await?;
            pipeline.clear().await?;
            println!("🗑  Collection '{}' cleared", pipeline.config().storage.collection_name);
        }
        "stats" => {
            let pipeline = open_pipeline().await?;
            let report = serde_json::json!({
                "health": pipeline.health(),
                "pipeline": pipeline.pipeline_stats().await?,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "models" => {
            for (kind, registry) in [("Embedding", EMBEDDING_MODELS), ("Reranking", RERANKING_MODELS), ("LLM", LLM_MODELS)] {
                println!("{kind} models:");
                for (key, model) in list_available(registry) {
                    println!("  {key:<24} {}  {}", model.model_id, model.description);
                }
            }
        }
        _ => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
    }
    Ok(())
}
