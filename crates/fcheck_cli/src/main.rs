//! `fcheck` - check claims in a paragraph against a local evidence store.
//!
//! ```bash
//! # Build or extend the evidence store from a plain-text corpus
//! fcheck --store data/evidence ingest history.txt
//!
//! # Check a paragraph
//! fcheck check "Napoleon died in 1820. He was exiled to Elba."
//!
//! # Score against a labelled dataset
//! fcheck evaluate labelled.json --json
//! ```
//!
//! Settings come from the environment (and `.env`); flags override them.
//! No coreference model is bundled, so each claim is checked as written.

mod commands;
mod output;

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fcheck_ai::vector::{IndexSpec, Metric};
use fcheck_core::config::FactCheckConfig;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use commands::{Runtime, StoreLayout};

#[derive(Parser)]
#[command(name = "fcheck", version, about)]
struct Cli {
    /// Evidence store path prefix (overrides STORAGE_PATH)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Index layout for a new store, e.g. "Flat" or "IVF100,Flat"
    #[arg(long, global = true, default_value = "IVF100,Flat")]
    index: IndexSpec,

    /// Similarity metric for a new store
    #[arg(long, global = true, value_enum, default_value_t = MetricArg::L2)]
    metric: MetricArg,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the local Ollama server answers
    Health,
    /// Clean a corpus into paragraphs and add them to the evidence store
    Ingest {
        corpus: PathBuf,
        /// Source label stored with every paragraph (default: the file path)
        #[arg(long)]
        source: Option<String>,
        /// First document id (default: one past the largest stored id)
        #[arg(long)]
        first_id: Option<i64>,
    },
    /// Report contradicted claims in a paragraph
    Check {
        /// Text to check; read from --file when omitted
        text: Option<String>,
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,
        /// Treat the input as one sentence
        #[arg(long)]
        sentence: bool,
    },
    /// Score the checker against labelled paragraphs
    Evaluate { dataset: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum MetricArg {
    L2,
    Ip,
    Cosine,
}

impl From<MetricArg> for Metric {
    fn from(m: MetricArg) -> Self {
        match m {
            MetricArg::L2 => Metric::L2,
            MetricArg::Ip => Metric::InnerProduct,
            MetricArg::Cosine => Metric::Cosine,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = FactCheckConfig::from_env()?;
    if let Some(store) = cli.store.clone() {
        config.storage_path = Some(store);
    }
    let runtime = Runtime::new(config)?;
    debug!(store = ?runtime.config().storage_path, index = %cli.index, "runtime ready");

    let layout = StoreLayout {
        spec: cli.index,
        metric: cli.metric.into(),
    };

    let rendered = match cli.command {
        Command::Health => {
            let status = commands::health(&runtime)?;
            if cli.json {
                output::format_json(&status)
            } else {
                status.message
            }
        }
        Command::Ingest {
            corpus,
            source,
            first_id,
        } => {
            let report = commands::ingest(&runtime, layout, &corpus, source.as_deref(), first_id)?;
            if cli.json {
                output::format_json(&report)
            } else {
                output::format_ingest(&report)
            }
        }
        Command::Check {
            text,
            file,
            sentence,
        } => {
            let text = match (text, file) {
                (Some(t), _) => t,
                (None, Some(path)) => fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => bail!("nothing to check: pass TEXT or --file"),
            };
            let found = commands::check(&runtime, layout, &text, sentence)?;
            if cli.json {
                output::format_json(&found)
            } else {
                output::format_suggestions(&text, &found)
            }
        }
        Command::Evaluate { dataset } => {
            let summary = commands::evaluate(&runtime, layout, &dataset)?;
            if cli.json {
                output::format_json(&summary)
            } else {
                output::format_evaluation(&summary)
            }
        }
    };

    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "fcheck", "check", "He died.", "--sentence", "--index", "Flat", "--metric", "cosine",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.index, IndexSpec::Flat);
        assert!(matches!(Metric::from(cli.metric), Metric::Cosine));
        match cli.command {
            Command::Check { text, sentence, .. } => {
                assert_eq!(text.as_deref(), Some("He died."));
                assert!(sentence);
            }
            _ => panic!("expected check"),
        }
    }

    #[test]
    fn text_and_file_are_exclusive() {
        assert!(Cli::try_parse_from(["fcheck", "check", "x", "--file", "y.txt"]).is_err());
    }

    #[test]
    fn check_takes_no_context() {
        assert!(Cli::try_parse_from(["fcheck", "check", "x", "--context", "y"]).is_err());
    }
}
