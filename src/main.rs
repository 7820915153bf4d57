mod ingest;

use std::io::IsTerminal;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use miette::{Context, IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

use loupe_core::traits::Embedder;
use loupe_core::{
    Chunk, LoupeConfig, LoupeError, Neighbors, OutputFormat, SearchMethod, SearchResults,
    SegmentOrder,
};
use loupe_search::embedding::EmbeddingClient;
use loupe_search::search::Retriever;
use loupe_search::store::SqliteIndex;

#[derive(Parser)]
#[command(
    name = "loupe",
    version,
    about = "Hybrid keyword + vector retrieval over chunked documents",
    long_about = "Loupe indexes chunked documents in SQLite and retrieves them with keyword search,\n\
                   embedding similarity, or both fused with Reciprocal Rank Fusion.\n\
                   Matched chunks can be widened into contiguous segments with their neighbors.\n\n\
                   Examples:\n  \
                     loupe init                                Create a .loupe.toml config file\n  \
                     loupe ingest chunks.jsonl                 Embed and index JSONL chunks\n  \
                     loupe search 'simultaneous events'        Hybrid search (default)\n  \
                     loupe search 'lightning' --method keyword Keyword-only search\n  \
                     loupe segments <id> <id> --before -2      Expand matches into segments\n  \
                     loupe doctor                              Check setup and environment"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .loupe.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text  Human-readable summaries (default)\n  \
                         json  Machine-readable JSON with camelCase keys"
    )]
    format: OutputFormat,

    /// Enable verbose (debug) logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    /// When to use colors
    #[arg(long, global = true, default_value = "auto")]
    color: ColorChoice,
}

#[derive(Subcommand)]
enum Command {
    /// Embed and index chunked documents from a JSONL file
    #[command(long_about = "Embed and index chunked documents from a JSONL file.\n\n\
        Each line is an object with document_id, content and an optional index.\n\
        Without indices, line order decides chunk order. Re-ingesting a document\n\
        replaces it. Use '-' to read from stdin.\n\n\
        Examples:\n  loupe ingest chunks.jsonl\n  cat chunks.jsonl | loupe ingest -")]
    Ingest {
        /// JSONL file to ingest ('-' for stdin)
        file: PathBuf,
    },
    /// Search indexed chunks
    #[command(long_about = "Search indexed chunks.\n\n\
        Methods:\n  keyword  FTS5 lexical ranking (no API key needed)\n  \
        vector   embedding similarity\n  hybrid   both, fused with Reciprocal Rank Fusion (default)\n\n\
        Examples:\n  loupe search 'What does it mean for two events to be simultaneous?'\n  \
        loupe search 'lightning' --method keyword --limit 3")]
    Search {
        /// Search query
        query: String,

        /// Search method: keyword, vector or hybrid
        #[arg(long, short, default_value = "hybrid")]
        method: SearchMethod,

        /// Maximum results to return (default: 10)
        #[arg(long, short, default_value = "10")]
        limit: usize,
    },
    /// Print chunks by id, in the order given
    Chunks {
        /// Chunk ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Expand chunk ids into contiguous segments with their neighbors
    #[command(long_about = "Expand chunk ids into contiguous segments with their neighbors.\n\n\
        Each chunk is widened by --before/--after chunks within its document;\n\
        overlapping or adjacent windows merge into one segment.\n\n\
        Examples:\n  loupe segments 3f2a... 9bc1...\n  loupe segments 3f2a... --before 0 --after 0")]
    Segments {
        /// Chunk ids
        #[arg(required = true)]
        ids: Vec<String>,

        /// Neighbors to include before each chunk (<= 0)
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        before: i64,

        /// Neighbors to include after each chunk (>= 0)
        #[arg(long, default_value_t = 1)]
        after: i64,

        /// Segment order (overrides search.segment_order)
        #[arg(long)]
        order: Option<OrderArg>,
    },
    /// Show index statistics
    Stats,
    /// Create a default .loupe.toml configuration file
    #[command(long_about = "Create a default .loupe.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .loupe.toml already exists.")]
    Init,
    /// Check your Loupe setup and environment
    #[command(long_about = "Check your Loupe setup and environment.\n\n\
        Runs diagnostics for the config file, embedding provider and API key,\n\
        the search index and its embedding dimensions. Use --format json for\n\
        machine-readable output.")]
    Doctor,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    /// By document, then position within it
    Position,
    /// By the rank of the matched chunks each segment holds
    Relevance,
}

impl From<OrderArg> for SegmentOrder {
    fn from(order: OrderArg) -> Self {
        match order {
            OrderArg::Position => SegmentOrder::Position,
            OrderArg::Relevance => SegmentOrder::Relevance,
        }
    }
}

#[derive(Clone, PartialEq, Eq, ValueEnum)]
enum ColorChoice {
    /// Auto-detect based on terminal
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

/// Stand-in embedder for commands that never embed a query.
struct NoEmbedder {
    reason: String,
}

#[async_trait]
impl Embedder for NoEmbedder {
    async fn embed_query(&self, _query: &str) -> std::result::Result<Vec<f32>, LoupeError> {
        Err(LoupeError::Embedding(self.reason.clone()))
    }

    async fn embed_documents(
        &self,
        _texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, LoupeError> {
        Err(LoupeError::Embedding(self.reason.clone()))
    }
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchOutput<'a> {
    query: &'a str,
    method: SearchMethod,
    #[serde(flatten)]
    results: &'a SearchResults,
    chunks: &'a [Chunk],
}

fn print_welcome(use_color: bool) {
    let version = env!("CARGO_PKG_VERSION");

    if use_color {
        println!("\x1b[1mloupe\x1b[0m v{version}: hybrid retrieval for chunked documents\n");

        println!("Quick start:");
        println!("  \x1b[36mloupe init\x1b[0m                   Create a .loupe.toml config file");
        println!("  \x1b[36mloupe ingest chunks.jsonl\x1b[0m    Embed and index your chunks");
        println!("  \x1b[36mloupe search 'query'\x1b[0m         Hybrid keyword + vector search\n");

        println!("All commands:");
        println!("  \x1b[32mingest\x1b[0m    Embed and index JSONL chunks");
        println!("  \x1b[32msearch\x1b[0m    Keyword, vector or hybrid search");
        println!("  \x1b[32mchunks\x1b[0m    Print chunks by id");
        println!("  \x1b[32msegments\x1b[0m  Expand matches into contiguous segments");
        println!("  \x1b[32mstats\x1b[0m     Show index statistics");
        println!("  \x1b[32mdoctor\x1b[0m    Check your setup and environment");
        println!("  \x1b[32minit\x1b[0m      Create default configuration\n");
    } else {
        println!("loupe v{version}: hybrid retrieval for chunked documents\n");

        println!("Quick start:");
        println!("  loupe init                   Create a .loupe.toml config file");
        println!("  loupe ingest chunks.jsonl    Embed and index your chunks");
        println!("  loupe search 'query'         Hybrid keyword + vector search\n");

        println!("All commands:");
        println!("  ingest    Embed and index JSONL chunks");
        println!("  search    Keyword, vector or hybrid search");
        println!("  chunks    Print chunks by id");
        println!("  segments  Expand matches into contiguous segments");
        println!("  stats     Show index statistics");
        println!("  doctor    Check your setup and environment");
        println!("  init      Create default configuration\n");
    }

    println!("Run 'loupe <command> --help' for details.");
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn read_input(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .into_diagnostic()
            .wrap_err("reading stdin")?;
        return Ok(input);
    }
    std::fs::read_to_string(file)
        .into_diagnostic()
        .wrap_err(format!("reading {}", file.display()))
}

fn open_existing_index(config: &LoupeConfig) -> Result<Arc<SqliteIndex>> {
    let path = &config.database.path;
    if !path.exists() {
        miette::bail!(miette::miette!(
            help = "Run 'loupe ingest <file.jsonl>' first, or set [database] path in .loupe.toml",
            "No index found at {}",
            path.display()
        ));
    }
    Ok(Arc::new(SqliteIndex::open(path)?))
}

/// Build a retriever over the configured index.
///
/// Commands that never embed a query get a [`NoEmbedder`] when no embedding
/// client can be configured, so keyword search and chunk lookups work without
/// an API key.
fn open_retriever(config: &LoupeConfig, needs_embedding: bool) -> Result<Retriever> {
    let index = open_existing_index(config)?;
    let embedder: Arc<dyn Embedder> = match EmbeddingClient::with_config(&config.embedding) {
        Ok(client) => Arc::new(client),
        Err(e) if !needs_embedding => Arc::new(NoEmbedder {
            reason: e.to_string(),
        }),
        Err(e) => return Err(e.into()),
    };
    Ok(Retriever::with_index(
        index,
        embedder,
        config.search.clone(),
    )?)
}

fn preview(content: &str, lines: usize) -> String {
    content
        .lines()
        .take(lines)
        .map(|l| format!("   {l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(serde::Serialize)]
struct CheckResult {
    name: &'static str,
    status: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: "pass",
            detail: detail.into(),
            hint: None,
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name,
            status: "fail",
            detail: detail.into(),
            hint: Some(hint.into()),
        }
    }

    fn info(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: "info",
            detail: detail.into(),
            hint: None,
        }
    }

    fn symbol(&self) -> &'static str {
        match self.status {
            "pass" => "\u{2713}",
            "fail" => "\u{2717}",
            _ => "~",
        }
    }

    fn colored_symbol(&self) -> String {
        match self.status {
            "pass" => "\x1b[32m\u{2713}\x1b[0m".into(),
            "fail" => "\x1b[31m\u{2717}\x1b[0m".into(),
            _ => "\x1b[33m~\x1b[0m".into(),
        }
    }
}

fn run_doctor(
    config: &LoupeConfig,
    config_path: &Path,
    format: OutputFormat,
    use_color: bool,
) -> Result<()> {
    let mut checks: Vec<CheckResult> = Vec::new();

    // 1. Config file
    if config_path.exists() {
        checks.push(CheckResult::pass(
            "config_file",
            format!("{} found", config_path.display()),
        ));
    } else {
        checks.push(CheckResult::fail(
            "config_file",
            format!("{} not found", config_path.display()),
            "run 'loupe init' to create a default config",
        ));
    }

    // 2. Embedding provider + API key
    let emb = &config.embedding;
    checks.push(CheckResult::pass(
        "embedding_provider",
        format!(
            "{} (model: {}, {} dims, {})",
            emb.provider, emb.model, emb.dimensions, emb.base_url
        ),
    ));
    if emb.resolve_api_key().is_some() {
        checks.push(CheckResult::pass("embedding_api_key", "API key available"));
    } else {
        checks.push(CheckResult::fail(
            "embedding_api_key",
            "no API key found",
            "export LOUPE_API_KEY=... (or OPENAI_API_KEY), or set api_key in .loupe.toml [embedding]",
        ));
    }

    // 3. Search index
    let index_path = &config.database.path;
    if index_path.exists() {
        match SqliteIndex::open(index_path).and_then(|index| index.stats()) {
            Ok(stats) => {
                checks.push(CheckResult::pass(
                    "search_index",
                    format!(
                        "{} ({} chunks in {} documents)",
                        index_path.display(),
                        stats.total_chunks,
                        stats.total_documents
                    ),
                ));
                match stats.embedding_dimensions {
                    Some(dims) if dims == emb.dimensions => {
                        checks.push(CheckResult::pass(
                            "index_dimensions",
                            format!("{dims} (matches embedding.dimensions)"),
                        ));
                    }
                    Some(dims) => checks.push(CheckResult::fail(
                        "index_dimensions",
                        format!("index stores {dims}, config says {}", emb.dimensions),
                        "set embedding.dimensions to match, or re-ingest into a fresh index",
                    )),
                    None => checks.push(CheckResult::info("index_dimensions", "index is empty")),
                }
            }
            Err(e) => checks.push(CheckResult::fail(
                "search_index",
                format!("{} unreadable: {e}", index_path.display()),
                "remove the file and re-ingest",
            )),
        }
    } else {
        checks.push(CheckResult::info(
            "search_index",
            format!(
                "{} not found (run 'loupe ingest' to create)",
                index_path.display()
            ),
        ));
    }

    // 4. Ranking settings
    let s = &config.search;
    checks.push(CheckResult::info(
        "search_settings",
        format!(
            "oversample {}, rrf_k {}, weights keyword {} / vector {}",
            s.oversample, s.rrf_k, s.keyword_weight, s.vector_weight
        ),
    ));

    // Output
    match format {
        OutputFormat::Json => {
            let version = env!("CARGO_PKG_VERSION");
            let json = serde_json::json!({
                "version": version,
                "checks": checks,
            });
            println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
        }
        OutputFormat::Text => {
            let version = env!("CARGO_PKG_VERSION");
            println!("Loupe v{version}: Environment Check\n");

            for check in &checks {
                let sym = if use_color {
                    check.colored_symbol()
                } else {
                    check.symbol().to_string()
                };
                // Pad the name for alignment
                let label = check.name.replace('_', " ");
                println!("  {sym} {label:<20} {}", check.detail);
                if let Some(hint) = &check.hint {
                    println!("    hint: {hint}");
                }
            }

            let passed = checks.iter().filter(|c| c.status == "pass").count();
            let failed = checks.iter().filter(|c| c.status == "fail").count();
            let info = checks.iter().filter(|c| c.status == "info").count();
            println!("\n{passed} checks passed, {failed} failed, {info} info");
        }
    }

    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# Loupe Configuration

[database]
# path = ".loupe/index.db"

[embedding]
# Any OpenAI-compatible /embeddings endpoint
# provider = "openai"
# model = "text-embedding-3-small"
# base_url = "https://api.openai.com/v1"
# dimensions = 1536
# batch_size = 64
# timeout_secs = 30
# api_key falls back to LOUPE_API_KEY, then OPENAI_API_KEY
# api_key = "sk-..."

[search]
# Candidates per method in hybrid search = limit * oversample
# oversample = 4
# Reciprocal Rank Fusion constant
# rrf_k = 60.0
# keyword_weight = 1.0
# vector_weight = 1.0
# segment_separator = "\n"
# "position" (document, start) or "relevance"
# segment_order = "position"
"#;

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let default_path = Path::new(".loupe.toml");
    let config_path = cli.config.as_deref().unwrap_or(default_path);
    let mut config = match &cli.config {
        Some(path) => LoupeConfig::from_file(path)?,
        None => {
            if default_path.exists() {
                LoupeConfig::from_file(default_path)?
            } else {
                LoupeConfig::default()
            }
        }
    };

    let use_color = match cli.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    };

    tracing::debug!(format = %cli.format, index = %config.database.path.display(), "configuration loaded");

    match cli.command {
        None => {
            print_welcome(use_color);
            return Ok(());
        }
        Some(Command::Ingest { ref file }) => {
            let input = read_input(file)?;
            let documents = ingest::parse_documents(&input)?;
            if documents.is_empty() {
                miette::bail!("no records found in {}", file.display());
            }

            let client = EmbeddingClient::with_config(&config.embedding)?;
            let index = SqliteIndex::open(&config.database.path)?;

            let total: usize = documents.iter().map(|d| d.chunks.len()).sum();
            let pb = if std::io::stderr().is_terminal() {
                let pb = indicatif::ProgressBar::new(total as u64);
                pb.set_style(
                    indicatif::ProgressStyle::with_template(
                        "{spinner:.cyan} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}",
                    )
                    .into_diagnostic()?
                    .progress_chars("#>-"),
                );
                pb
            } else {
                indicatif::ProgressBar::hidden()
            };

            for document in &documents {
                pb.set_message(document.document_id.clone());
                let embeddings = client
                    .embed_documents(&document.chunks)
                    .await
                    .wrap_err(format!("embedding document '{}'", document.document_id))?;
                let pairs: Vec<(String, Vec<f32>)> =
                    document.chunks.iter().cloned().zip(embeddings).collect();
                index.insert_document(&document.document_id, &pairs)?;
                pb.inc(document.chunks.len() as u64);
            }
            pb.finish_and_clear();

            let stats = index.stats()?;
            match cli.format {
                OutputFormat::Json => {
                    let json = serde_json::json!({
                        "ingestedDocuments": documents.len(),
                        "ingestedChunks": total,
                        "index": stats,
                    });
                    println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
                }
                OutputFormat::Text => {
                    println!(
                        "Ingested {total} chunks from {} documents. Index now has {} chunks in {} documents ({} bytes).",
                        documents.len(),
                        stats.total_chunks,
                        stats.total_documents,
                        stats.index_size_bytes,
                    );
                }
            }
        }
        Some(Command::Search {
            ref query,
            method,
            limit,
        }) => {
            let retriever = open_retriever(&config, method != SearchMethod::Keyword)?;
            let results = retriever.search(method, query, limit).await?;
            let chunks = retriever.retrieve_chunks(&results.chunk_ids)?;

            match cli.format {
                OutputFormat::Json => {
                    let output = SearchOutput {
                        query,
                        method,
                        results: &results,
                        chunks: &chunks,
                    };
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&output).into_diagnostic()?
                    );
                }
                OutputFormat::Text => {
                    if results.is_empty() {
                        println!("No results found.");
                    } else {
                        for (i, ((id, score), chunk)) in results.iter().zip(&chunks).enumerate() {
                            println!(
                                "{}. {} #{} (score: {score:.4}) {id}",
                                i + 1,
                                chunk.document_id,
                                chunk.index,
                            );
                            // Show a snippet preview (first 3 lines)
                            println!("{}\n", preview(&chunk.content, 3));
                        }
                    }
                }
            }
        }
        Some(Command::Chunks { ref ids }) => {
            let retriever = open_retriever(&config, false)?;
            let chunks = retriever.retrieve_chunks(ids)?;

            match cli.format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&chunks).into_diagnostic()?
                    );
                }
                OutputFormat::Text => {
                    for chunk in &chunks {
                        println!("── {} #{} ({})", chunk.document_id, chunk.index, chunk.id);
                        println!("{chunk}\n");
                    }
                }
            }
        }
        Some(Command::Segments {
            ref ids,
            before,
            after,
            order,
        }) => {
            let neighbors = Neighbors::new(before, after)?;
            if let Some(order) = order {
                config.search.segment_order = order.into();
            }
            let retriever = open_retriever(&config, false)?;
            let segments = retriever.assemble_segments(ids, neighbors)?;
            let separator = retriever.settings().segment_separator.as_str();

            match cli.format {
                OutputFormat::Json => {
                    let json: Vec<serde_json::Value> = segments
                        .iter()
                        .map(|s| {
                            serde_json::json!({
                                "documentId": s.document_id,
                                "start": s.start,
                                "end": s.end,
                                "text": s.render(separator),
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
                }
                OutputFormat::Text => {
                    for segment in &segments {
                        println!(
                            "── {} [{}..={}]",
                            segment.document_id, segment.start, segment.end
                        );
                        println!("{}\n", segment.render(separator));
                    }
                }
            }
        }
        Some(Command::Stats) => {
            let index = open_existing_index(&config)?;
            let stats = index.stats()?;

            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&stats).into_diagnostic()?);
                }
                OutputFormat::Text => {
                    println!("Index:      {}", config.database.path.display());
                    println!("Documents:  {}", stats.total_documents);
                    println!("Chunks:     {}", stats.total_chunks);
                    match stats.embedding_dimensions {
                        Some(dims) => println!("Dimensions: {dims}"),
                        None => println!("Dimensions: (none yet)"),
                    }
                    println!("Size:       {} bytes", stats.index_size_bytes);
                }
            }
        }
        Some(Command::Init) => {
            let path = Path::new(".loupe.toml");
            if path.exists() {
                miette::bail!(".loupe.toml already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created .loupe.toml with default configuration");
        }
        Some(Command::Doctor) => {
            run_doctor(&config, config_path, cli.format, use_color)?;
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "loupe", &mut std::io::stdout());
        }
    }

    Ok(())
}
