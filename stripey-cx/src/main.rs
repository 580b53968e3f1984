//! stripey-cx - witness collation tool
//!
//! Loads TEI witness transcriptions, collates them verse by verse with a
//! CollateX service, and exports the resulting stripes as NEXUS matrices.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use stripey_common::config::{
    init_tracing, load_config, user_config_path, write_starter_config, RootFolderInitializer, RootFolderResolver,
    TomlConfig,
};
use stripey_common::db::init_database;
use stripey_cx::config::{build_oracle, export_options, CollateOverrides, ExportOverrides};
use stripey_cx::db::{drop_apparatus, find_uncollated, load_export_scope, ChapterScope, ExportRange};
use stripey_cx::nexus::{build_matrix, render};
use stripey_cx::oracle::{AlignmentOracle, Algorithm};
use stripey_cx::services::{load_folder, run_selftest, CollateSettings, Collator};
use stripey_cx::witness::Manuscript;
use stripey_cx::CollateError;

/// Command-line arguments for stripey-cx
#[derive(Parser, Debug)]
#[command(name = "stripey-cx")]
#[command(about = "Collate manuscript witnesses and export their stripes")]
#[command(version)]
struct Args {
    /// Root folder holding the database
    #[arg(short, long, env = "STRIPEY_ROOT_FOLDER", global = true)]
    root_folder: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long, env = "STRIPEY_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load every *.xml transcription in a folder
    Load {
        folder: PathBuf,
    },

    /// Collate all uncollated verses
    Collate {
        /// dekker, needleman-wunsch, medite or all
        #[arg(short, long, default_value = "dekker")]
        algorithm: String,

        /// Only collate this book:chapter, e.g. 04:11
        #[arg(long)]
        chapter: Option<ChapterScope>,

        /// Drop the existing apparatus first
        #[arg(long)]
        clean: bool,

        /// Don't ask before dropping
        #[arg(long, requires = "clean")]
        force: bool,

        /// Parallel verse workers
        #[arg(short = 'j', long)]
        workers: Option<usize>,

        /// Oracle request timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Oracle port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Drop the apparatus of an algorithm
    Drop {
        #[arg(short, long)]
        algorithm: String,

        /// Only drop this book:chapter, e.g. 04:11
        #[arg(long)]
        chapter: Option<ChapterScope>,

        /// Don't ask for confirmation
        #[arg(long)]
        force: bool,
    },

    /// List verses not yet collated
    Uncollated {
        #[arg(short, long, default_value = "all")]
        algorithm: String,
    },

    /// Export a NEXUS character matrix
    Nexus {
        #[arg(short, long)]
        algorithm: Algorithm,

        /// Book number
        #[arg(long)]
        book: i64,

        #[arg(long)]
        chapter: Option<i64>,

        #[arg(long, requires = "chapter")]
        verse: Option<i64>,

        /// Use digits instead of letters for readings
        #[arg(long)]
        digits: bool,

        /// Exclude witnesses whose reference matches (repeatable)
        #[arg(long)]
        exclude: Vec<String>,

        /// Drop witnesses attested in less than this fraction of units
        #[arg(long)]
        fragmentary: Option<f64>,

        output: PathBuf,
    },

    /// Check the oracle against known alignments
    Selftest {
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the resolved hand texts of one transcription
    Extract {
        file: PathBuf,
    },

    /// Write a config file holding the defaults
    InitConfig {
        /// Target file; defaults to --config, then the user config folder
        path: Option<PathBuf>,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging).context("Failed to initialize logging")?;

    info!("stripey-cx {}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Extract { file } => extract(&file),
        Command::Selftest { port } => selftest(config, port).await,
        Command::InitConfig { path, force } => {
            let path = path
                .or(args.config)
                .or_else(user_config_path)
                .context("No config folder on this platform, pass a path")?;
            write_starter_config(&path, force)?;
            Ok(())
        }
        command => {
            let pool = open_database(&config, args.root_folder).await?;
            match command {
                Command::Load { folder } => {
                    let summary = load_folder(&pool, &folder)
                        .await
                        .with_context(|| format!("Failed to load {}", folder.display()))?;
                    info!(
                        loaded = summary.loaded.len(),
                        skipped = summary.skipped.len(),
                        failed = summary.failed.len(),
                        "Load finished"
                    );
                    for (file, reason) in &summary.failed {
                        error!("{}: {}", file, reason);
                    }
                    Ok(())
                }
                Command::Collate {
                    algorithm,
                    chapter,
                    clean,
                    force,
                    workers,
                    timeout,
                    port,
                } => {
                    let algorithms = Algorithm::parse_selection(&algorithm)?;
                    if clean {
                        for &algo in &algorithms {
                            drop_algorithm(&pool, algo, chapter, force).await?;
                        }
                    }
                    let overrides = CollateOverrides {
                        workers,
                        timeout_secs: timeout,
                        port,
                    };
                    // Only a running collation drains on a signal; everything else exits at once
                    let cancel_token = cancel_on_shutdown();
                    collate(&pool, config, &overrides, &algorithms, chapter, cancel_token).await
                }
                Command::Drop {
                    algorithm,
                    chapter,
                    force,
                } => {
                    let algorithm: Algorithm = algorithm.parse()?;
                    drop_algorithm(&pool, algorithm, chapter, force).await
                }
                Command::Uncollated { algorithm } => {
                    for algo in Algorithm::parse_selection(&algorithm)? {
                        let verses = find_uncollated(&pool, algo).await?;
                        println!("{}: {} uncollated verses", algo, verses.len());
                        for v in verses {
                            println!("  {} {}:{}", v.book, v.chapter, v.verse);
                        }
                    }
                    Ok(())
                }
                Command::Nexus {
                    algorithm,
                    book,
                    chapter,
                    verse,
                    digits,
                    exclude,
                    fragmentary,
                    output,
                } => {
                    let overrides = ExportOverrides {
                        digits,
                        exclude,
                        fragmentary_threshold: fragmentary,
                    };
                    let options = export_options(&config.export, &overrides)?;
                    let range = ExportRange {
                        book_num: book,
                        chapter,
                        verse,
                    };
                    let scope = load_export_scope(&pool, algorithm, range).await?;
                    let matrix = build_matrix(&scope, &options)?;
                    std::fs::write(&output, render(&matrix))
                        .with_context(|| format!("Failed to write {}", output.display()))?;
                    info!(
                        taxa = matrix.rows.len(),
                        nchar = matrix.nchar,
                        output = %output.display(),
                        "Wrote NEXUS matrix"
                    );
                    Ok(())
                }
                Command::Extract { .. } | Command::Selftest { .. } | Command::InitConfig { .. } => Ok(()),
            }
        }
    }
}

async fn open_database(config: &TomlConfig, root_folder: Option<PathBuf>) -> Result<sqlx::SqlitePool> {
    let root_folder = RootFolderResolver::new("stripey-cx")
        .with_cli_arg(root_folder)
        .with_toml(config)
        .resolve();

    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open {}", db_path.display()))
}

async fn collate(
    pool: &sqlx::SqlitePool,
    mut config: TomlConfig,
    overrides: &CollateOverrides,
    algorithms: &[Algorithm],
    chapter: Option<ChapterScope>,
    cancel_token: CancellationToken,
) -> Result<()> {
    overrides.apply(&mut config.oracle, &mut config.collate);
    let settings = CollateSettings::from_config(&config.oracle, &config.collate);
    let oracle: Arc<dyn AlignmentOracle> = Arc::new(build_oracle(&config.oracle, settings.workers)?);

    let collator = Collator::new(pool.clone(), oracle, settings, cancel_token);
    match collator.run(algorithms, chapter).await {
        Ok(summaries) => {
            for (algorithm, summary) in summaries {
                info!(
                    algorithm = %algorithm,
                    collated = summary.collated,
                    failed = summary.failed,
                    "Collation summary"
                );
            }
            if collator.restarts() > 0 {
                warn!(restarts = collator.restarts(), "CollateX was restarted during the run");
            }
            Ok(())
        }
        Err(CollateError::Cancelled) => {
            warn!("Collation cancelled, uncollated verses will be picked up next run");
            Ok(())
        }
        Err(e) => Err(e).context("Collation failed"),
    }
}

async fn drop_algorithm(
    pool: &sqlx::SqlitePool,
    algorithm: Algorithm,
    chapter: Option<ChapterScope>,
    force: bool,
) -> Result<()> {
    let what = match chapter {
        Some(c) => format!("{} apparatus for {}:{}", algorithm, c.book_num, c.chapter),
        None => format!("all {} apparatus", algorithm),
    };
    if !force && !confirm(&format!("Delete {}?", what))? {
        bail!("Aborted");
    }
    let deleted = drop_apparatus(pool, algorithm, chapter).await?;
    warn!(algorithm = %algorithm, deleted, "Dropped {}", what);
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

async fn selftest(mut config: TomlConfig, port: Option<u16>) -> Result<()> {
    if let Some(port) = port {
        config.oracle.port = port;
    }
    let oracle = build_oracle(&config.oracle, config.collate.workers)?;
    oracle.start().await.context("Failed to start CollateX")?;

    let result = run_selftest(&oracle, config.oracle.fuzzy_edit_distance).await;

    if let Err(e) = oracle.stop().await {
        warn!(error = %e, "Failed to stop CollateX cleanly");
    }
    result.context("Self-test failed")
}

fn extract(file: &Path) -> Result<()> {
    let name = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("witness");
    let ms = Manuscript::from_file(name, file)?;

    let mut out = std::io::stdout().lock();
    for chapter in ms.chapters.values() {
        for (num, occurrences) in &chapter.verses {
            for verse in occurrences {
                writeln!(out, "{}:{}", chapter.num, num)?;
                for text in verse.get_texts(&ms.order_of_hands)? {
                    writeln!(out, "{}\t{}", text.hand, text.text)?;
                }
            }
        }
    }
    Ok(())
}

/// Token cancelled by the first Ctrl+C or SIGTERM from now on
fn cancel_on_shutdown() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });
    token
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, finishing in-flight verses");
        },
        _ = terminate => {
            info!("Received terminate signal, finishing in-flight verses");
        },
    }
}
