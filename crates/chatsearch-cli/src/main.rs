//! CLI entry point: build an index from a chat export, then search it.

use std::path::PathBuf;
use std::process::ExitCode;

use chatsearch_core::{
    app_data_dir, build_index_from_file, load_config, search, Config, EmbeddingClient,
    EmbeddingError, IndexError, IndexStore, SearchError, SearchOptions,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

const CONVERSATION_URL: &str = "https://chat.openai.com/c/";

#[derive(Parser)]
#[command(name = "chatsearch")]
#[command(about = "Semantic search over your exported ChatGPT history")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Index an export file (conversations.json). Only new conversations are embedded.
    BuildIndex {
        /// Export file to index.
        #[arg(value_name = "FILE", required_unless_present = "file_flag")]
        file: Option<PathBuf>,
        /// Same as the positional FILE.
        #[arg(long = "file", value_name = "FILE", conflicts_with = "file")]
        file_flag: Option<PathBuf>,
    },
    /// Search the index for conversations similar to a keyword or phrase.
    Search {
        #[arg(value_name = "KEYWORD")]
        keyword: String,
        /// Maximum number of results.
        #[arg(short = 'k', long = "top-k", value_name = "N")]
        top_k: Option<usize>,
        /// Minimum similarity score.
        #[arg(short, long, value_name = "T", conflicts_with = "no_threshold")]
        threshold: Option<f32>,
        /// Keep results regardless of score.
        #[arg(long)]
        no_threshold: bool,
        /// Only score entries containing the keyword verbatim (falls back to all if none do).
        #[arg(long)]
        exact: bool,
        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show the index location, its size and the embedding provider.
    Info,
    /// Show where chatsearch stores its config and index (app data directory).
    DataDir,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    let config = load_config();

    let result = match cli.command.unwrap_or(Commands::Info) {
        Commands::BuildIndex { file, file_flag } => {
            // clap guarantees exactly one of the two is set.
            match file.or(file_flag) {
                Some(path) => run_build_index(&config, path).await,
                None => Err("no export file given".to_string()),
            }
        }
        Commands::Search {
            keyword,
            top_k,
            threshold,
            no_threshold,
            exact,
            json,
        } => {
            let options = SearchOptions {
                threshold: if no_threshold {
                    None
                } else {
                    Some(threshold.unwrap_or(config.search.threshold))
                },
                top_n: top_k.unwrap_or(config.search.top_k),
                keyword_filter: exact,
            };
            run_search(&config, &keyword, &options, json).await
        }
        Commands::Info => run_info(&config),
        Commands::DataDir => match app_data_dir() {
            Some(p) => {
                println!("{}", p.display());
                Ok(())
            }
            None => Err("could not determine app data directory".to_string()),
        },
    };

    exit_code(result)
}

fn exit_code(result: Result<(), String>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("Error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_store(config: &Config) -> Result<IndexStore, String> {
    config
        .index_path()
        .map(IndexStore::new)
        .map_err(|e| format!("{e}; set CHATSEARCH_INDEX to choose an index location"))
}

fn embedding_client(config: &Config) -> Result<EmbeddingClient<chatsearch_core::ProviderBackend>, String> {
    EmbeddingClient::from_config(&config.embedding).map_err(|e| explain_embedding(&e))
}

async fn run_build_index(config: &Config, export: PathBuf) -> Result<(), String> {
    let store = open_store(config)?;
    let client = embedding_client(config)?;
    let summary = build_index_from_file(&export, &store, &client)
        .await
        .map_err(|e| explain_index(&e))?;
    println!(
        "Indexed {} new conversation(s); {} total in {}",
        summary.newly_indexed,
        summary.total,
        store.path().display()
    );
    Ok(())
}

async fn run_search(
    config: &Config,
    keyword: &str,
    options: &SearchOptions,
    json: bool,
) -> Result<(), String> {
    let store = open_store(config)?;
    let client = embedding_client(config)?;
    let outcome = search(keyword, &store, &client, options)
        .await
        .map_err(|e| explain_search(&e))?;

    if json {
        let s = serde_json::to_string_pretty(&outcome.hits)
            .map_err(|e| format!("failed to encode results: {e}"))?;
        println!("{s}");
        return Ok(());
    }
    if outcome.keyword_fallback {
        eprintln!("No entry contains \"{keyword}\" verbatim; showing semantic matches from the whole index.");
    }
    if outcome.hits.is_empty() {
        println!("No results. Try --no-threshold or a lower --threshold.");
        return Ok(());
    }
    for (i, hit) in outcome.hits.iter().enumerate() {
        println!("{}. [{:.4}] {}{}", i + 1, hit.score, CONVERSATION_URL, hit.conversation_id);
        println!("   {}", hit.text);
        println!("--------------------------------------");
    }
    Ok(())
}

fn run_info(config: &Config) -> Result<(), String> {
    let store = open_store(config)?;
    println!("Index: {}", store.path().display());
    if store.exists() {
        let records = store.load().map_err(|e| {
            format!("{e}; delete {} and run build-index again", store.path().display())
        })?;
        println!("  records: {}", records.len());
    } else {
        println!("  not built yet (run `chatsearch build-index <FILE>`)");
    }
    println!("Embedding provider: {:?}", config.embedding.provider);
    if let Some(model) = &config.embedding.model {
        println!("  model: {model}");
    }
    Ok(())
}

fn explain_index(e: &IndexError) -> String {
    match e {
        IndexError::Parse(e) => format!("{e}; check that FILE is the conversations.json from your export"),
        IndexError::Store(e) => format!("{e}; check permissions on the index location or set CHATSEARCH_INDEX"),
        IndexError::Embedding(e) => format!("{}; nothing was written, re-run once fixed", explain_embedding(e)),
    }
}

fn explain_search(e: &SearchError) -> String {
    match e {
        SearchError::IndexNotFound(path) => format!(
            "index not found at {}; run `chatsearch build-index <FILE>` first",
            path.display()
        ),
        SearchError::IndexCorrupt(reason) => {
            format!("index is corrupt ({reason}); delete it and run build-index again")
        }
        SearchError::Store(e) => format!("{e}; check permissions on the index location"),
        SearchError::Embedding(e) => explain_embedding(e),
    }
}

fn explain_embedding(e: &EmbeddingError) -> String {
    match e {
        EmbeddingError::MissingApiKey => {
            "no API key found; export OPENAI_API_KEY or set embedding.api_key in config.toml".to_string()
        }
        EmbeddingError::Unauthorized(_) => format!("{e}; check OPENAI_API_KEY and OPENAI_ORGANIZATION"),
        EmbeddingError::Request(_) | EmbeddingError::Ollama(_) => {
            format!("{e}; check your network and the embedding service URL")
        }
        _ => e.to_string(),
    }
}
