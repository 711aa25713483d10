use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hippocampus::memory::encoding::EncodingContext;
use hippocampus::memory::{
    ForgetAction, Memory, MemoryLayer, MemoryRecord, MemorySystem, SearchOptions,
};
use hippocampus::{Config, memory};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// `Hippocampus` - associative memory store for autonomous agents.
#[derive(Parser, Debug)]
#[command(name = "hippocampus")]
#[command(version = "0.1.0")]
#[command(about = "Long-lived associative memory for agents.", long_about = None)]
pub struct Cli {
    /// Log at DEBUG instead of INFO
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Encode and store a memory, then link and activate it
    Add {
        content: String,

        /// Declared layer (working, episodic, semantic, procedural, reflective)
        #[arg(short, long, default_value = "episodic")]
        layer: MemoryLayer,

        /// Tag to attach (repeatable)
        #[arg(short, long)]
        tag: Vec<String>,

        /// The memory is expected to be needed again
        #[arg(long)]
        reuse: bool,
    },

    /// Show one memory by id
    Get { id: String },

    /// Keyword (BM25) search
    Search {
        query: String,

        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        #[arg(short, long)]
        layer: Option<MemoryLayer>,

        #[arg(short, long)]
        tag: Vec<String>,
    },

    /// Vector + keyword search
    Hybrid {
        query: String,

        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        #[arg(short, long)]
        layer: Option<MemoryLayer>,

        #[arg(short, long)]
        tag: Vec<String>,
    },

    /// List memories linked to an id, strongest first
    Related { id: String },

    /// Score memories for forgetting and apply the suggested actions
    Forget {
        /// Only print the assessment
        #[arg(long)]
        dry_run: bool,

        /// Cap on delete/consolidate/weaken actions
        #[arg(long)]
        max_actions: Option<usize>,
    },

    /// Run a full maintenance cycle (expiry, forgetting, retention)
    Sweep,

    /// Rebuild the keyword index and back-fill missing embeddings
    Reindex,

    /// Print store counters
    Stats,
}

fn search_options(limit: usize, layer: Option<MemoryLayer>, tags: Vec<String>) -> SearchOptions {
    let mut opts = SearchOptions::with_limit(limit);
    if let Some(layer) = layer {
        opts = opts.layer(layer);
    }
    if !tags.is_empty() {
        opts = opts.tags(tags);
    }
    opts
}

fn print_record(record: &MemoryRecord) {
    println!("{}  [{}] {}", record.id, record.layer, record.content);
    println!(
        "    importance={:.3} retention={:.3} accessed={} consolidated={}",
        record.importance, record.retention_score, record.access_count, record.consolidated
    );
    if !record.tags.is_empty() {
        println!("    tags: {}", record.tags.join(", "));
    }
}

pub async fn dispatch(cli: Cli, mut config: Config) -> Result<()> {
    if let Commands::Forget {
        max_actions: Some(max),
        ..
    } = &cli.command
    {
        config.memory.max_forget_actions = Some(*max);
    }

    let store = Arc::new(
        memory::create_memory(
            &config.memory,
            &config.workspace_dir,
            config.api_key.as_deref(),
        )
        .await
        .context("open memory store")?,
    );
    let system = MemorySystem::new(store.clone(), config.memory.clone());

    let outcome = run(cli.command, &system, store.as_ref()).await;
    store.close().await;
    outcome
}

async fn run(command: Commands, system: &MemorySystem, store: &dyn Memory) -> Result<()> {
    match command {
        Commands::Add {
            content,
            layer,
            tag,
            reuse,
        } => {
            let mut ctx = EncodingContext::default().with_tags(tag);
            ctx.expected_future_use = reuse;
            let out = system.remember(&content, layer, &ctx).await?;
            print_record(&out.record);
            println!(
                "    links: similar={} temporal={} thematic={}",
                out.links.similar, out.links.temporal, out.links.thematic
            );
        }
        Commands::Get { id } => match store.get(&id).await? {
            Some(record) => print_record(&record),
            None => println!("No memory with id {id}"),
        },
        Commands::Search {
            query,
            limit,
            layer,
            tag,
        } => {
            let hits = store.search(&query, &search_options(limit, layer, tag)).await?;
            if hits.is_empty() {
                println!("No matches.");
            }
            for hit in hits {
                println!("{:>8.3}  {}", hit.score, hit.record.content);
                println!("          {}", hit.record.id);
            }
        }
        Commands::Hybrid {
            query,
            limit,
            layer,
            tag,
        } => {
            let hits = store
                .hybrid_search(&query, &search_options(limit, layer, tag))
                .await?;
            if hits.is_empty() {
                println!("No matches.");
            }
            for hit in hits {
                println!(
                    "{:>6.3} (vec {} / kw {})  {}",
                    hit.combined_score,
                    hit.vector_score.map_or_else(|| "-".into(), |s| format!("{s:.3}")),
                    hit.lexical_score.map_or_else(|| "-".into(), |s| format!("{s:.3}")),
                    hit.record.content
                );
                println!("          {}", hit.record.id);
            }
        }
        Commands::Related { id } => {
            let linked = store.get_associated(&id).await?;
            if linked.is_empty() {
                println!("No associations for {id}");
            }
            for (record, edge) in linked {
                println!(
                    "{:.2} {:<12} {}  {}",
                    edge.strength, edge.association_type, record.id, record.content
                );
            }
        }
        Commands::Forget { dry_run, .. } => {
            let candidates = system.assess_forgetting_candidates().await?;
            for c in candidates
                .iter()
                .filter(|c| c.suggested_action != ForgetAction::Keep)
            {
                println!(
                    "{:.3} {:<11} {} (age {:.1}d, accessed {}, links {})",
                    c.forget_score,
                    c.suggested_action,
                    c.id,
                    c.age_days,
                    c.access_count,
                    c.association_count
                );
            }
            if dry_run {
                println!("Dry run: {} memories assessed, nothing changed.", candidates.len());
            } else {
                let report = system.execute_forgetting(&candidates).await?;
                println!(
                    "Deleted {}, consolidated {}, weakened {}, kept {}, deferred {}.",
                    report.deleted,
                    report.consolidated,
                    report.weakened,
                    report.kept,
                    report.deferred
                );
            }
        }
        Commands::Sweep => {
            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });
            let report = system.run_forgetting_cycle(&cancel).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Reindex => {
            let embedded = store.reindex().await?;
            println!("Keyword index rebuilt; {embedded} embeddings back-filled.");
        }
        Commands::Stats => {
            let stats = store.stats().await?;
            println!("live:          {}", stats.live);
            println!("deleted:       {}", stats.deleted);
            println!("consolidated:  {}", stats.consolidated);
            println!("embedded:      {}", stats.with_embedding);
            println!("associations:  {}", stats.associations);
        }
    }
    Ok(())
}
