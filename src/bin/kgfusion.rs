//! kgfusion command-line driver.
//!
//! Reads extracted entities (and optionally Wikipedia-linked entities),
//! fuses them against the checkpointed fusion groups and writes the
//! canonical entities as JSON.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use kgfusion::storage::CheckpointWorker;
use kgfusion::telemetry::init_tracing;
use kgfusion::{
    alias_mapping, Entity, EntityFusion, FusionConfig, FusionGroupStore, HttpLlmClient, JsonClassStore, NameMatcher,
    ValidationError,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON array of extracted entities
    entities: PathBuf,

    /// JSON array of entities already linked to Wikipedia
    #[arg(short, long)]
    linked: Option<PathBuf>,

    /// Where to write the canonical entities (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Where to write the alias -> canonical name mapping
    #[arg(long)]
    aliases: Option<PathBuf>,

    /// Checkpoint directory (overrides KGFUSION_CHECKPOINT_DIR)
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Kernel release for code-index lookups (overrides KGFUSION_KERNEL_VERSION)
    #[arg(long)]
    kernel_version: Option<String>,

    /// Rename each canonical entity to its preferred form
    #[arg(long)]
    preferred_names: bool,
}

fn read_entities(path: &Path) -> Result<Vec<Entity>, Box<dyn Error + Send + Sync>> {
    let bytes = std::fs::read(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let entities: Vec<Entity> =
        serde_json::from_slice(&bytes).map_err(|e| format!("{} is not an entity array: {e}", path.display()))?;
    for entity in &entities {
        entity.validate().map_err(|e: ValidationError| format!("{}: {e}", path.display()))?;
    }
    Ok(entities)
}

fn write_json<T: serde::Serialize>(path: Option<&Path>, value: &T) -> Result<(), Box<dyn Error + Send + Sync>> {
    let text = serde_json::to_string_pretty(value)?;
    match path {
        Some(path) => std::fs::write(path, text).map_err(|e| format!("cannot write {}: {e}", path.display()))?,
        None => println!("{text}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    init_tracing()?;
    let args = Args::parse();

    let mut cfg = FusionConfig::from_env()?;
    if let Some(dir) = args.checkpoint_dir {
        cfg.checkpoint.dir = Some(dir);
    }
    if let Some(version) = args.kernel_version {
        cfg.kernel_version = version;
    }
    let cfg = cfg.validate()?;

    let entities = read_entities(&args.entities)?;
    let linked = match &args.linked {
        Some(path) => read_entities(path)?,
        None => Vec::new(),
    };

    let (groups, worker) = match &cfg.checkpoint.dir {
        Some(dir) => {
            let store = Arc::new(JsonClassStore::open(dir)?);
            let groups = Arc::new(FusionGroupStore::load_from(store.as_ref())?);
            let worker = CheckpointWorker::spawn(Arc::clone(&groups), store, &cfg.checkpoint);
            (groups, Some(worker))
        }
        None => (Arc::new(FusionGroupStore::new()), None),
    };

    let llm = Arc::new(HttpLlmClient::new(&cfg.llm, cfg.retry.clone())?);
    let fusion = EntityFusion::from_config(&cfg, Arc::new(NameMatcher::new()), llm, groups)?;
    let (mut canonical, report) = fusion.process_fusion_with_report(entities, linked).await?;

    if let Some(worker) = &worker {
        match worker.flush() {
            Ok(written) => info!(classes = written, "checkpoint flushed"),
            Err(e) => warn!(error = %e, "final checkpoint failed"),
        }
        worker.shutdown();
    }
    if let Some(dir) = &cfg.cache_dir {
        if let Err(e) = fusion.resolver().flush_cache(dir) {
            warn!(error = %e, "failed to write reference cache");
        }
        if let Err(e) = fusion.variations().flush_cache(dir) {
            warn!(error = %e, "failed to write variation cache");
        }
    }

    if args.preferred_names {
        for entity in &mut canonical {
            let preferred = entity.preferred_name();
            entity.set_name(preferred);
        }
    }
    write_json(args.output.as_deref(), &canonical)?;
    if let Some(path) = &args.aliases {
        write_json(Some(path), &alias_mapping(&canonical))?;
    }

    eprintln!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
