use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use atlas_core::{AtlasConfig, OutputFormat, Tier};
use atlas_repomap::cache::{CacheStore, SqliteStore, CACHE_DB_NAME};
use atlas_repomap::{MapOutcome, MapRequest};
use clap::{CommandFactory, Parser, Subcommand};
use miette::{Context, IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "atlas",
    version,
    about = "Ranked, token-budgeted repository maps",
    long_about = "Atlas condenses a repository into a ranked map of its most relevant definitions,\n\
                   sized to fit an LLM context budget.\n\n\
                   Examples:\n  \
                     atlas map                              Map the current directory\n  \
                     atlas map --chat src/lib.rs            Focus on the file being edited\n  \
                     atlas map --ident Parser --max-tokens 2048\n  \
                     atlas cache prune                      Drop cache entries for deleted files\n  \
                     atlas init                             Write a default .atlas.toml"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: <root>/.atlas.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for the map.\n\n\
                       Formats:\n  \
                         text      Path headers with excerpted source lines (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  One fenced block per file"
    )]
    format: OutputFormat,

    /// Show debug logs and run statistics
    #[arg(long, short, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only print the map and errors
    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a ranked map of the repository
    #[command(long_about = "Generate a ranked map of the repository.\n\n\
        Extracts definitions and references with tree-sitter, ranks files with personalized\n\
        PageRank, and renders as many top-ranked definitions as fit in the token budget.\n\
        Chat files are always shown; warnings and statistics go to stderr.\n\n\
        Examples:\n  atlas map src tests\n  atlas map --chat src/main.rs --mentioned src/config.rs\n  atlas map --ident parse_args --format json")]
    Map {
        /// Files or directories to map (default: the root)
        paths: Vec<PathBuf>,

        /// Repository root; map paths are shown relative to it
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Files being edited (highest priority, always shown)
        #[arg(long)]
        chat: Vec<PathBuf>,

        /// Files mentioned in the conversation
        #[arg(long)]
        mentioned: Vec<PathBuf>,

        /// Identifiers mentioned in the conversation
        #[arg(long = "ident")]
        idents: Vec<String>,

        /// Token budget (default: map.max_tokens from config, 1024)
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Model whose tokenizer measures the budget (default: gpt-4)
        #[arg(long)]
        model: Option<String>,

        /// Context window of the consuming model; without chat files the map
        /// may grow up to 8x the token budget within it
        #[arg(long)]
        max_context_window: Option<usize>,

        /// Re-extract every file and overwrite its cache entry
        #[arg(long)]
        force_refresh: bool,

        /// Do not read or write the on-disk tag cache
        #[arg(long)]
        no_cache: bool,
    },
    /// Manage the on-disk tag cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,

        /// Repository root holding the cache directory
        #[arg(long, default_value = ".", global = true)]
        root: PathBuf,
    },
    /// Create a default .atlas.toml in the current directory
    Init,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Clone, Copy)]
enum CacheAction {
    /// Remove every cached entry
    Clear,
    /// Remove entries for files that no longer exist
    Prune,
}

const DEFAULT_CONFIG: &str = r#"# Atlas configuration
# Every key is optional; the values shown are the defaults.

[map]
# max_tokens = 1024
# model = "gpt-4"
# context_lines = 1
# max_line_width = 100
# max_context_window = 128000
# no_chat_multiplier = 8

[ranking]
# mentioned_ident_weight = 10.0
# mentioned_file_weight = 10.0
# chat_file_weight = 50.0
# long_ident_weight = 10.0
# long_ident_min_len = 8
# private_ident_weight = 0.1
# generic_ident_weight = 0.1
# generic_def_threshold = 5
# chat_prior = 100.0
# mentioned_prior = 10.0
# base_prior = 1.0
# damping = 0.85
# tolerance = 1e-6
# max_iterations = 100
# unreferenced_floor = 1e-3

[cache]
# enabled = true
# dir = ".atlas.cache"

[walk]
# max_file_size = 1048576
# exclude = ["*.min.js", "vendor/**"]
"#;

fn init_tracing(verbose: bool) {
    // Warnings reach the user through the map outcome; library logs are
    // only interesting when debugging.
    let default = if verbose { "debug" } else { "error" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(explicit: Option<&Path>, root: &Path) -> Result<AtlasConfig> {
    match explicit {
        Some(path) => AtlasConfig::from_file(path)
            .wrap_err_with(|| format!("failed to load {}", path.display())),
        None => {
            let default_path = root.join(".atlas.toml");
            if default_path.exists() {
                AtlasConfig::from_file(&default_path)
                    .wrap_err_with(|| format!("failed to load {}", default_path.display()))
            } else {
                Ok(AtlasConfig::default())
            }
        }
    }
}

fn spinner(enabled: bool, message: &'static str) -> Option<indicatif::ProgressBar> {
    if !enabled || !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = indicatif::ProgressBar::new_spinner();
    if let Ok(style) = indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})")
    {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    Some(pb)
}

fn print_outcome(outcome: &MapOutcome, format: OutputFormat, quiet: bool, verbose: bool) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", outcome.text),
        OutputFormat::Text | OutputFormat::Markdown => print!("{}", outcome.text),
    }

    if !quiet {
        for warning in &outcome.warnings {
            eprintln!("warning: {warning}");
        }
    }
    if verbose {
        let stats = serde_json::to_string_pretty(&outcome.stats).into_diagnostic()?;
        eprintln!("--- Map Stats ---\n{stats}");
    }
    Ok(())
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .expect("miette handler");
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Map {
            paths,
            root,
            chat,
            mentioned,
            idents,
            max_tokens,
            model,
            max_context_window,
            force_refresh,
            no_cache,
        } => {
            let mut config = load_config(cli.config.as_deref(), &root)?;
            if let Some(max_tokens) = max_tokens {
                config.map.max_tokens = max_tokens;
            }
            if let Some(model) = model {
                config.map.model = model;
            }
            if let Some(window) = max_context_window {
                config.map.max_context_window = Some(window);
            }
            if no_cache {
                config.cache.enabled = false;
            }

            let mut request = MapRequest::new(config.map.max_tokens)
                .add_files(mentioned, Tier::Mentioned)
                .add_files(chat, Tier::Chat)
                .format(cli.format)
                .force_refresh(force_refresh);
            request.mentioned_idents = idents.into_iter().collect();

            let pb = spinner(!cli.quiet, "Mapping repository...");
            let result = atlas_repomap::generate_map(&root, &paths, request, &config);
            if let Some(pb) = pb {
                pb.finish_and_clear();
            }
            let outcome = result?;

            print_outcome(&outcome, cli.format, cli.quiet, cli.verbose)?;
        }
        Command::Cache { action, root } => {
            let config = load_config(cli.config.as_deref(), &root)?;
            let db = root.join(&config.cache.dir).join(CACHE_DB_NAME);
            if !db.exists() {
                println!("No tag cache at {}", db.display());
                return Ok(());
            }
            let mut store = SqliteStore::open(&db)?;
            match action {
                CacheAction::Clear => {
                    let count = store.len()?;
                    store.invalidate_all()?;
                    println!("Cleared {count} cached files");
                }
                CacheAction::Prune => {
                    let removed = store.prune()?;
                    println!("Pruned {removed} entries for deleted files");
                }
            }
            Box::new(store).close()?;
        }
        Command::Init => {
            let path = Path::new(".atlas.toml");
            if path.exists() {
                miette::bail!(".atlas.toml already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created .atlas.toml with default configuration");
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "atlas", &mut std::io::stdout());
        }
    }

    Ok(())
}
