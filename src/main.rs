use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;
use tracing_subscriber::EnvFilter;

use atomizer::adapters::{
    ChatTopicLabeler, KMeansClusterer, OpenRouterClient, OpenRouterEmbedder,
    StructuredMeetingExtractor, TwoPassExtractor,
};
use atomizer::compile::compile_docs;
use atomizer::consolidate::consolidate_project;
use atomizer::jsonl::read_atoms;
use atomizer::linearize::linearize_export;
use atomizer::topics::{load_topic_registry, save_topic_registry};
use atomizer::{
    build_conversation_documents, load_conversations, save_assignments, EmbeddingCache, Extraction,
    LlmClient, NonJsonKind, Pipeline, PipelineConfig, PipelineError, TopicAssigner, TopicDiscovery,
};

#[derive(Parser)]
#[command(
    name = "atomizer",
    about = "Distill chat exports and meeting notes into a topic-organized atom corpus"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum ArtifactKind {
    /// Treat .md/.txt inputs as meeting notes and transcripts.
    #[default]
    Meeting,
    /// Treat .md inputs as generic documents sliced by heading.
    Document,
}

impl From<ArtifactKind> for NonJsonKind {
    fn from(kind: ArtifactKind) -> NonJsonKind {
        match kind {
            ArtifactKind::Meeting => NonJsonKind::Meeting,
            ArtifactKind::Document => NonJsonKind::Document,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Flatten conversation exports into evidence markdown.
    Linearize {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long, default_value = "output/evidence")]
        out: PathBuf,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(long, value_enum, default_value_t)]
        non_json_kind: ArtifactKind,
    },
    /// Extract knowledge atoms from every conversation.
    Extract {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long, default_value = "output/atoms")]
        atoms: PathBuf,
        /// Only process this conversation id.
        #[arg(long)]
        conversation_id: Option<String>,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Re-extract conversations that already have output.
        #[arg(long)]
        force: bool,
        #[arg(long, value_enum, default_value_t)]
        non_json_kind: ArtifactKind,
    },
    /// Compile markdown docs from extracted atoms.
    Compile {
        #[arg(short, long, default_value = "output/atoms")]
        atoms: PathBuf,
        #[arg(short, long, default_value = "output/docs")]
        out: PathBuf,
    },
    /// Merge per-conversation atoms into the project-wide store.
    Consolidate {
        #[arg(short, long, default_value = "output/atoms")]
        atoms: PathBuf,
        #[arg(short, long, default_value = "output/docs")]
        docs: PathBuf,
        #[arg(short, long, default_value = "output")]
        out: PathBuf,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        include_docs: bool,
    },
    /// Cluster consolidated atoms into labeled topics.
    DiscoverTopics {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long, default_value = "output/project/atoms.jsonl")]
        atoms: PathBuf,
        #[arg(short, long, default_value = "output")]
        out: PathBuf,
        #[arg(long)]
        target_topics: Option<usize>,
        #[arg(long)]
        embedding_model: Option<String>,
        #[arg(long)]
        label_model: Option<String>,
        #[arg(long)]
        skip_labeling: bool,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Score conversations against a topic registry.
    AssignTopics {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long, default_value = "output/project/atoms.jsonl")]
        atoms: PathBuf,
        #[arg(short, long, default_value = "output/topic_registry.json")]
        registry: PathBuf,
        #[arg(short, long, default_value = "output")]
        out: PathBuf,
        #[arg(long)]
        embedding_model: Option<String>,
        #[arg(long)]
        primary_threshold: Option<f32>,
        #[arg(long)]
        secondary_threshold: Option<f32>,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Run the whole pipeline into one output directory.
    RunAll {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long, default_value = "output")]
        out: PathBuf,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(long, value_enum, default_value_t)]
        non_json_kind: ArtifactKind,
    },
}

fn api_key() -> Result<String, PipelineError> {
    std::env::var("OPENROUTER_API_KEY")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .map_err(|_| {
            PipelineError::UnsupportedInput(
                "OPENROUTER_API_KEY or OPENAI_API_KEY must be set".into(),
            )
        })
}

fn base_url() -> Option<String> {
    std::env::var("OPENROUTER_BASE_URL").ok()
}

fn build_llm(config: &PipelineConfig) -> Result<Arc<dyn LlmClient>, PipelineError> {
    let mut client = OpenRouterClient::new(api_key()?, config.llm_max_inflight).with_attribution(
        std::env::var("OPENROUTER_HTTP_REFERER").ok(),
        Some(
            std::env::var("OPENROUTER_X_TITLE").unwrap_or_else(|_| "atomizer".into()),
        ),
    );
    if let Some(url) = base_url() {
        client = client.with_base_url(url);
    }
    Ok(Arc::new(client))
}

fn build_embedder(config: &PipelineConfig) -> Result<OpenRouterEmbedder, PipelineError> {
    let mut embedder = OpenRouterEmbedder::new(api_key()?, &config.embedding_model);
    if let Some(url) = base_url() {
        embedder = embedder.with_base_url(url);
    }
    Ok(embedder)
}

/// Resolve the consolidated atoms file from either a file path or the
/// directory that holds it.
fn atoms_file(path: PathBuf) -> PathBuf {
    if path.is_dir() {
        path.join("atoms.jsonl")
    } else {
        path
    }
}

async fn run(command: Command) -> Result<(), PipelineError> {
    match command {
        Command::Linearize { input, out, limit, non_json_kind } => {
            linearize_export(&input, &out, limit, non_json_kind.into()).await
        }

        Command::Extract { input, atoms, conversation_id, limit, force, non_json_kind } => {
            let mut config = PipelineConfig::from_env();
            config.limit = limit;
            if force {
                config.skip_existing = false;
            }
            let llm = build_llm(&config)?;
            let extraction = Extraction::new(
                TwoPassExtractor::new(Arc::clone(&llm), &config.fast_model, &config.big_model),
                config.clone(),
            )
            .with_meeting_extractor(StructuredMeetingExtractor::new(
                Arc::clone(&llm),
                &config.big_model,
            ));
            extraction
                .run(
                    &input,
                    &atoms,
                    non_json_kind.into(),
                    conversation_id.as_deref(),
                    None,
                )
                .await?;
            Ok(())
        }

        Command::Compile { atoms, out } => compile_docs(&atoms, &out).await,

        Command::Consolidate { atoms, docs, out, include_docs } => {
            consolidate_project(&atoms, &docs, &out, include_docs).await?;
            Ok(())
        }

        Command::DiscoverTopics {
            input,
            atoms,
            out,
            target_topics,
            embedding_model,
            label_model,
            skip_labeling,
            limit,
        } => {
            let mut config = PipelineConfig::from_env();
            config.limit = limit;
            if let Some(n) = target_topics {
                config.target_topics = n;
            }
            if let Some(model) = embedding_model {
                config.embedding_model = model;
            }

            let conversations = load_conversations(&input, config.limit, NonJsonKind::Meeting)?;
            let consolidated = read_atoms(&atoms_file(atoms)).await?;
            let documents = build_conversation_documents(&conversations, &consolidated);

            let llm = build_llm(&config)?;
            let label_model = label_model.unwrap_or_else(|| config.fast_model.clone());
            let discovery = TopicDiscovery::new(
                Arc::new(build_embedder(&config)?),
                KMeansClusterer::new(),
                ChatTopicLabeler::new(llm, label_model),
                config.clone(),
            );

            let cache = EmbeddingCache::new(&config.embedding_cache_dir);
            let registry = discovery.discover(&documents, Some(&cache), skip_labeling).await?;
            save_topic_registry(&registry, &out.join("topic_registry.json")).await
        }

        Command::AssignTopics {
            input,
            atoms,
            registry,
            out,
            embedding_model,
            primary_threshold,
            secondary_threshold,
            limit,
        } => {
            let mut config = PipelineConfig::from_env();
            config.limit = limit;
            if let Some(model) = embedding_model {
                config.embedding_model = model;
            }
            if let Some(threshold) = primary_threshold {
                config.primary_threshold = threshold;
            }
            if let Some(threshold) = secondary_threshold {
                config.secondary_threshold = threshold;
            }

            let conversations = load_conversations(&input, config.limit, NonJsonKind::Meeting)?;
            let consolidated = read_atoms(&atoms_file(atoms)).await?;
            let documents = build_conversation_documents(&conversations, &consolidated);
            let topic_registry = load_topic_registry(&registry).await?;

            let assigner =
                TopicAssigner::new(Arc::new(build_embedder(&config)?), config.clone());
            let cache = EmbeddingCache::new(&config.embedding_cache_dir);
            let assignments = assigner.assign(&documents, &topic_registry, Some(&cache)).await?;
            save_assignments(
                &assignments,
                &out.join("assignments.jsonl"),
                config.primary_threshold,
            )
            .await
        }

        Command::RunAll { input, out, limit, non_json_kind } => {
            let mut config = PipelineConfig::from_env();
            config.limit = limit;

            let llm = build_llm(&config)?;
            let pipeline = Pipeline::new(
                TwoPassExtractor::new(Arc::clone(&llm), &config.fast_model, &config.big_model),
                Arc::new(build_embedder(&config)?),
                KMeansClusterer::new(),
                ChatTopicLabeler::new(Arc::clone(&llm), config.fast_model.clone()),
                config.clone(),
            )
            .with_meeting_extractor(StructuredMeetingExtractor::new(llm, &config.big_model));

            pipeline
                .run_all(&input, &out, non_json_kind.into(), None)
                .await?;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal error");
            ExitCode::FAILURE
        }
    }
}
