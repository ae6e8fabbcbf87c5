use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coin_feedback::{
    api, cli,
    client::{FeedbackClient, DEFAULT_URL},
    config::Settings,
    db::Database,
    knowledge::{Embedder, HashingEmbedder, KnowledgeStore, OpenAiEmbedder},
    llm::{LanguageModel, OpenAiChatModel},
    pipeline::Pipeline,
    report,
    session::FeedbackService,
    sync::SessionHub,
};

#[derive(Parser)]
#[command(name = "coin")]
#[command(about = "Standards-grounded COIN feedback for nursing preceptors")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the feedback server
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "17020")]
        port: u16,

        /// Knowledge base directory (overrides COIN_KNOWLEDGE_DIR)
        #[arg(short, long)]
        knowledge: Option<PathBuf>,

        /// Embed with the local hashing embedder instead of the embeddings API
        #[arg(long)]
        offline: bool,
    },
    /// Validate a knowledge directory and print chunk counts
    Ingest {
        dir: PathBuf,

        /// Embed with the embeddings API instead of the local hashing embedder
        #[arg(long)]
        online: bool,
    },
    /// Walk through a session interactively against a running server
    Client {
        #[arg(short, long, default_value = DEFAULT_URL)]
        url: String,
    },
    /// Print a session's report from the local database
    Report { session: String },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "coin_feedback=debug,tower_http=debug".into()),
    );

    // Logs go to stderr so the interactive client and reports own stdout.
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_database(settings: &Settings) -> anyhow::Result<Database> {
    let path = settings.resolved_database_path()?;
    let db = Database::open(path)?;
    db.migrate()?;
    Ok(db)
}

fn embedder(settings: &Settings, offline: bool) -> anyhow::Result<Arc<dyn Embedder>> {
    if offline {
        return Ok(Arc::new(HashingEmbedder::default()));
    }
    let key = settings
        .model
        .api_key
        .clone()
        .context("COIN_OPENAI_API_KEY is not set (use --offline for local embeddings)")?;
    Ok(Arc::new(OpenAiEmbedder::new(
        settings.model.base_url.clone(),
        key,
        settings.model.embedding_model.clone(),
        settings.model.request_timeout(),
    )?))
}

fn language_model(settings: &Settings) -> anyhow::Result<Arc<dyn LanguageModel>> {
    let key = settings
        .model
        .api_key
        .clone()
        .context("COIN_OPENAI_API_KEY is not set; a chat model is required to serve")?;
    Ok(Arc::new(OpenAiChatModel::new(
        settings.model.base_url.clone(),
        key,
        settings.model.chat_model.clone(),
        settings.model.request_timeout(),
    )?))
}

async fn load_store(
    settings: &Settings,
    dir: Option<&Path>,
    embedder: Arc<dyn Embedder>,
) -> anyhow::Result<KnowledgeStore> {
    let Some(dir) = dir else {
        tracing::warn!("No knowledge directory configured; every invocation will be degraded");
        return Ok(KnowledgeStore::empty(embedder));
    };
    let store = KnowledgeStore::load_dir(dir, embedder, settings.pipeline.chunk_config()).await?;
    let stats = store.stats();
    tracing::info!(
        documents = stats.documents,
        chunks = stats.chunks,
        "Loaded knowledge base from {}",
        dir.display()
    );
    for standard in &stats.missing_generic {
        tracing::warn!("No generic guidance document for standard {}", standard);
    }
    Ok(store)
}

async fn serve(
    settings: Settings,
    port: u16,
    knowledge: Option<PathBuf>,
    offline: bool,
) -> anyhow::Result<()> {
    let model = language_model(&settings)?;
    let embedder = embedder(&settings, offline)?;
    let knowledge_dir = knowledge.or_else(|| settings.knowledge_dir.clone());
    let store = Arc::new(load_store(&settings, knowledge_dir.as_deref(), embedder).await?);

    let pipeline = Pipeline::new(
        store,
        model,
        &settings.pipeline,
        settings.model.synthesis_temperature,
    );
    let db = open_database(&settings)?;
    let service = FeedbackService::new(db, pipeline, SessionHub::new(), &settings.pipeline);

    let app = api::create_router(service);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("COIN feedback server listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn ingest(settings: Settings, dir: PathBuf, online: bool) -> anyhow::Result<()> {
    let embedder = embedder(&settings, !online)?;
    let store = KnowledgeStore::load_dir(&dir, embedder, settings.pipeline.chunk_config()).await?;
    let stats = store.stats();

    println!("Knowledge base: {}", dir.display());
    println!("Documents: {}  Chunks: {}", stats.documents, stats.chunks);
    println!();
    println!("Standard  Reference  Strategies");
    for (standard, counts) in &stats.by_standard {
        println!("{:>8}  {:>9}  {:>10}", standard, counts.standards, counts.strategies);
    }
    for standard in &stats.missing_generic {
        println!("warning: no generic guidance for standard {}", standard);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let settings = Settings::load()?;

    match cli.command {
        Some(Commands::Serve {
            port,
            knowledge,
            offline,
        }) => serve(settings, port, knowledge, offline).await?,
        Some(Commands::Ingest { dir, online }) => ingest(settings, dir, online).await?,
        Some(Commands::Client { url }) => {
            let api_key = std::env::var("COIN_API_KEY").ok().filter(|k| !k.is_empty());
            let client = FeedbackClient::new(url, api_key);
            client
                .health()
                .await
                .with_context(|| format!("No server reachable at {}", client.base_url()))?;

            let mut input = tokio::io::BufReader::new(tokio::io::stdin());
            let mut output = tokio::io::stdout();
            cli::run_interactive(&client, &mut input, &mut output).await?;
        }
        Some(Commands::Report { session }) => {
            let db = open_database(&settings)?;
            let report = report::build_report(&db, &session)?;
            print!("{}", report::render_report(&report));
        }
        None => serve(settings, 17020, None, false).await?,
    }

    Ok(())
}
