use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use locmatch::config::Config;
use locmatch::dictionary::ingest::{read_pairs, read_rows, write_tsv};
use locmatch::dictionary::{DictionaryId, PoolKind};
use locmatch::engine::Engine;
use locmatch::matcher::MatchOutcome;
use locmatch::progress::{CancelFlag, Job, ProgressSink, ProgressUpdate, Stage};

#[derive(Parser, Debug)]
#[command(name = "locmatch", version, about = "Translation matching for localization data")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a dictionary from a spreadsheet or tab-delimited file
    Create {
        /// Input table
        input: PathBuf,

        /// Dictionary identifier, e.g. BDO_EN
        #[arg(long)]
        id: String,
    },
    /// Look up the entries most similar to a query
    Search {
        #[arg(long)]
        id: String,

        query: String,

        #[arg(short, long)]
        threshold: Option<f32>,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Fill the target column of a table from a dictionary
    Translate {
        #[arg(long)]
        id: String,

        input: PathBuf,

        /// Output TSV path
        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Group near-duplicate dictionary entries
    Clusters {
        #[arg(long)]
        id: String,

        #[arg(short, long)]
        threshold: Option<f32>,

        /// Ignore entries shorter than this many characters
        #[arg(long, default_value = "0")]
        min_length: usize,

        /// Print singleton clusters too
        #[arg(long, default_value = "false")]
        all: bool,
    },
    /// List stored dictionaries
    List,
    /// Delete a stored dictionary
    Delete {
        #[arg(long)]
        id: String,
    },
}

/// Renders engine progress as one bar per stage.
struct BarSink {
    bar: ProgressBar,
    stage: Mutex<Option<Stage>>,
}

impl BarSink {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  {msg:12} {bar:40.cyan/blue} {pos}/{len} ({eta})")
                .expect("valid template")
                .progress_chars("█▓░"),
        );
        Self {
            bar,
            stage: Mutex::new(None),
        }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for BarSink {
    fn on_progress(&self, update: ProgressUpdate) {
        if let Ok(mut stage) = self.stage.lock() {
            if *stage != Some(update.stage) {
                *stage = Some(update.stage);
                self.bar.reset();
                self.bar.set_length(update.total as u64);
                self.bar.set_message(update.stage.as_str());
            }
        }
        self.bar.set_position(update.done as u64);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    config.validate().context("invalid configuration")?;

    // commands that never need the model
    match &cli.command {
        Command::List => {
            let store = locmatch::dictionary::store::DictionaryStore::new(&config.data_dir);
            for id in store.list()? {
                println!("{id}");
            }
            return Ok(());
        }
        Command::Delete { id } => {
            let store = locmatch::dictionary::store::DictionaryStore::new(&config.data_dir);
            let id = DictionaryId::new(id.as_str())?;
            if store.delete(&id)? {
                info!("Deleted {id}");
            } else {
                info!("Dictionary {id} does not exist");
            }
            return Ok(());
        }
        _ => {}
    }

    let engine = Engine::open(config).context("failed to initialize the embedding model")?;
    let matching = engine.config().matching.clone();
    let cancel = CancelFlag::new();
    let sink = BarSink::new();
    let job = Job::new(&sink, &cancel, matching.progress_interval);

    match cli.command {
        Command::Create { input, id } => {
            let id = DictionaryId::new(id)?;
            let ingested = read_pairs(&input, engine.config().columns)?;
            info!(
                "Read {} pairs from {} ({} rows skipped)",
                ingested.pairs.len(),
                input.display(),
                ingested.skipped
            );
            let (dict, summary) = engine.create_dictionary(&ingested.pairs, &id, job)?;
            sink.finish();
            println!(
                "{id}: {} split + {} whole entries, {} rows skipped, {} sources dropped",
                dict.dictionary().pool(PoolKind::Split).len(),
                dict.dictionary().pool(PoolKind::Whole).len(),
                summary.skipped + ingested.skipped,
                summary.dropped
            );
        }
        Command::Search {
            id,
            query,
            threshold,
            top_k,
        } => {
            let dict = engine.load_dictionary(&DictionaryId::new(id)?)?;
            let hits = engine.search(
                &dict,
                &query,
                threshold.unwrap_or(matching.threshold),
                top_k.unwrap_or(matching.top_k),
            )?;
            if hits.is_empty() {
                println!("no match");
            }
            for hit in hits {
                println!("{:.4}\t{}\t{}\t{}", hit.score, hit.pool, hit.source, hit.target);
            }
        }
        Command::Translate {
            id,
            input,
            output,
            threshold,
        } => {
            let dict = engine.load_dictionary(&DictionaryId::new(id)?)?;
            let rows = read_rows(&input)?;
            let report = engine.translate_file(
                &dict,
                &rows,
                threshold.unwrap_or(matching.threshold),
                job,
            )?;
            sink.finish();
            write_tsv(&output, &report.rows)?;
            let s = report.summary;
            println!(
                "processed {}, matched {}, unmatched {}, skipped {}",
                s.processed, s.matched, s.unmatched, s.skipped
            );
            let low: Vec<f32> = report
                .outcomes
                .iter()
                .flatten()
                .filter_map(|o| match o {
                    MatchOutcome::NoMatch { best_score } => *best_score,
                    MatchOutcome::Matched(_) => None,
                })
                .collect();
            if let Some(best) = low.iter().copied().reduce(f32::max) {
                info!("Closest rejected candidate scored {best:.4}");
            }
        }
        Command::Clusters {
            id,
            threshold,
            min_length,
            all,
        } => {
            let dict = engine.load_dictionary(&DictionaryId::new(id)?)?;
            let report = engine.extract_clusters(
                &dict,
                threshold.unwrap_or(matching.cluster_threshold),
                min_length,
                job,
            )?;
            sink.finish();
            for cluster in report.clusters.iter().filter(|c| all || !c.is_singleton()) {
                let pool = dict.dictionary().pool(cluster.pool);
                let rep = pool.entry(cluster.representative);
                let members: Vec<_> = cluster
                    .members
                    .iter()
                    .map(|&m| {
                        let e = pool.entry(m);
                        serde_json::json!({ "source": e.source, "target": e.target })
                    })
                    .collect();
                let line = serde_json::json!({
                    "pool": cluster.pool,
                    "representative": { "source": rep.source, "target": rep.target },
                    "members": members,
                });
                println!("{line}");
            }
            let s = report.summary;
            info!(
                "{} entries: {} grouped, {} singletons, {} skipped",
                s.processed, s.matched, s.unmatched, s.skipped
            );
        }
        Command::List | Command::Delete { .. } => {}
    }

    Ok(())
}
