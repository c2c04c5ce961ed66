//! docqa-server - document question-answering service
//!
//! Usage:
//!   docqa-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>   Path to configuration file (default: config.toml)
//!   --help, -h        Print this help message

use docqa_rag::api::{start_server, AppState};
use docqa_rag::config::AppConfig;
use docqa_rag::embedder::{Embedder, LocalEmbedder, RouterEmbedder};
use docqa_rag::llm::BackendRouter;
use docqa_rag::{Analytics, Chunker, ProgressHub, QueryPipeline, RagOrchestrator, Storage, VectorStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

struct Args {
    config_path: PathBuf,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config.toml"),
        }
    }
}

fn parse_args() -> Args {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                if let Some(path) = iter.next() {
                    args.config_path = PathBuf::from(path);
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                eprintln!("unknown argument: {other}");
                print_help();
                std::process::exit(1);
            }
        }
    }

    args
}

fn print_help() {
    println!("docqa-server - document question-answering service");
    println!();
    println!("USAGE:");
    println!("    docqa-server [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --config <PATH>   Path to configuration file (default: config.toml)");
    println!("    --help, -h        Print this help message");
}

fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,docqa_rag=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_embedder(config: &AppConfig, router: &BackendRouter) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.embedding.backend.as_str() {
        "hosted" => Ok(Arc::new(RouterEmbedder::new(router.clone(), config.embedding.dimension)) as Arc<dyn Embedder>),
        _ => Ok(Arc::new(LocalEmbedder::new(&config.embedding)?) as Arc<dyn Embedder>),
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = if args.config_path.exists() {
        info!("loading configuration from {:?}", args.config_path);
        AppConfig::from_file(&args.config_path)?
    } else {
        info!("no config file found at {:?}, using defaults", args.config_path);
        AppConfig::default()
    };
    config.apply_env_overrides();
    config.validate()?;

    let data_dir = PathBuf::from(&config.vector_store.data_dir)
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"));
    std::fs::create_dir_all(&data_dir)?;

    info!("connecting to database at {}", config.database.url);
    let storage = Storage::connect(&config.database.url).await?;

    let router = BackendRouter::from_config(&config.llm).await;
    let embedder = build_embedder(&config, &router)?;

    let store = VectorStore::open(
        &config.vector_store.data_dir,
        embedder,
        &config.embedding.model,
        config.embedding.use_gpu,
    )
    .await?;

    let chunker = Chunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap);
    let orchestrator = RagOrchestrator::new(chunker, Arc::new(store));
    let pipeline = QueryPipeline::new(orchestrator.clone(), router, storage.clone());
    let analytics = Analytics::new(storage.clone());
    let progress = ProgressHub::new(config.progress.queue_depth, config.progress.stream_interval_ms);

    let state = AppState {
        pipeline: Arc::new(pipeline),
        orchestrator: Arc::new(orchestrator),
        analytics: Arc::new(analytics),
        storage,
        progress: Arc::new(progress),
        data_dir,
    };

    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        tx.send(()).ok();
    });

    tokio::select! {
        result = start_server(state, &config) => {
            if let Err(e) = result {
                error!("server error: {e}");
                return Err(e.into());
            }
        }
        _ = &mut rx => {
            info!("shutting down gracefully");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging();
    let args = parse_args();
    run(args).await
}
