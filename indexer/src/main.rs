use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use search_core::{SearchConfig, SearchEngine};
use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct InputDoc {
    #[serde(default)]
    id: Option<String>,
    title: String,
    #[serde(alias = "content")]
    body: String,
    url: Option<String>,
}

impl InputDoc {
    fn url(&self) -> Option<String> {
        self.url.clone().or_else(|| self.id.as_ref().map(|id| format!("doc://{id}")))
    }
}

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Index documents and maintain the search data directory", long_about = None)]
struct Cli {
    /// Data directory (document database and index)
    #[arg(long, default_value = "./data")]
    data: PathBuf,
    /// Optional JSON search config
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index documents from a JSON (object or array) or JSONL file
    Build {
        /// Input file
        #[arg(long)]
        input: PathBuf,
    },
    /// Rebuild the index entry of every stored document
    Reindex,
    /// Merge index segments and drop deleted entries
    Optimize,
    /// Print document and index statistics as JSON
    Stats,
}

#[derive(Default)]
struct Tally {
    indexed: usize,
    failed: usize,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SearchConfig::load(path)?,
        None => SearchConfig::default(),
    };
    let engine = SearchEngine::open(&cli.data, config)?;

    match cli.command {
        Commands::Build { input } => build(&engine, &input)?,
        Commands::Reindex => {
            let report = engine.indexing().reindex_all().wait()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Optimize => engine.indexing().optimize()?,
        Commands::Stats => {
            let stats = engine.indexing().stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    engine.flush()?;
    Ok(())
}

fn build(engine: &SearchEngine, input: &Path) -> Result<()> {
    if !input.is_file() {
        bail!("input {} is not a file", input.display());
    }
    let mut tally = Tally::default();
    if input.extension().and_then(|s| s.to_str()) == Some("jsonl") {
        index_jsonl(engine, input, &mut tally)?;
    } else {
        index_json(engine, input, &mut tally)?;
    }
    tracing::info!(indexed = tally.indexed, failed = tally.failed, "index build complete");
    Ok(())
}

fn index_jsonl(engine: &SearchEngine, file: &Path, tally: &mut Tally) -> Result<()> {
    let f = File::open(file)?;
    let reader = BufReader::new(f);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        let doc: InputDoc = serde_json::from_str(&line)?;
        ingest_doc(engine, doc, tally);
    }
    Ok(())
}

fn index_json(engine: &SearchEngine, file: &Path, tally: &mut Tally) -> Result<()> {
    let f = File::open(file)?;
    let reader = BufReader::new(f);
    let json: serde_json::Value = serde_json::from_reader(reader)?;
    match json {
        serde_json::Value::Array(arr) => {
            for v in arr {
                let doc: InputDoc = serde_json::from_value(v)?;
                ingest_doc(engine, doc, tally);
            }
        }
        serde_json::Value::Object(_) => {
            let doc: InputDoc = serde_json::from_value(json)?;
            ingest_doc(engine, doc, tally);
        }
        _ => bail!("{} holds neither a document nor an array of documents", file.display()),
    }
    Ok(())
}

/// One bad document is logged and counted; it does not stop the build.
fn ingest_doc(engine: &SearchEngine, doc: InputDoc, tally: &mut Tally) {
    let Some(url) = doc.url() else {
        tracing::warn!(title = %doc.title, "skipping document without url or id");
        tally.failed += 1;
        return;
    };
    match engine.indexing().index_document(&doc.title, &doc.body, &url) {
        Ok(stored) => {
            tracing::debug!(doc_id = stored.id, %url, "ingested document");
            tally.indexed += 1;
        }
        Err(err) => {
            tracing::warn!(%url, error = %err, "failed to ingest document");
            tally.failed += 1;
        }
    }
}
