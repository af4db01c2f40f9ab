use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use soundalike::config::{is_supported_extension, DEFAULT_N_MFCC};
use soundalike::report::{ComparisonRow, Summary};
use soundalike::serve::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_TIMEOUT_SECS};
use soundalike::{Analyzer, FusionWeights, Risk, ScorePolicy};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(name = "soundalike")]
#[command(author, version, about = "Score how similar recordings are to a reference track")]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Reference recording
    reference: Option<PathBuf>,

    /// Recording or directory of recordings to compare against the reference
    path: Option<PathBuf>,

    /// Output report file (.csv, .json)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of parallel workers (default: number of CPUs)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// MFCC coefficients per frame (13-20)
    #[arg(long, default_value_t = DEFAULT_N_MFCC)]
    n_mfcc: usize,

    /// Score on chroma only (cover-song style comparison)
    #[arg(long)]
    chroma_only: bool,

    /// Report the unclamped weighted score
    #[arg(long)]
    raw_score: bool,

    /// Sakoe-Chiba band half-width for DTW (default: unconstrained)
    #[arg(long)]
    dtw_window: Option<usize>,

    /// Include 200-point waveform previews in the report
    #[arg(long)]
    waveform: bool,

    /// Show per-metric breakdown and debug logs
    #[arg(short, long)]
    verbose: bool,

    /// Only show summary
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP comparison endpoint
    Serve {
        /// Address to bind (use 0.0.0.0 to expose beyond this machine)
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Per-request analysis timeout in seconds
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout_secs: u64,

        /// Debug logging
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() {
    let args = Args::parse();

    if let Some(Command::Serve {
        host,
        port,
        timeout_secs,
        verbose,
    }) = &args.command
    {
        init_logging(if *verbose { "debug" } else { "info" });
        if let Err(e) = soundalike::serve::start(host, *port, *timeout_secs) {
            eprintln!("Server error: {}", e);
            std::process::exit(1);
        }
        return;
    }

    init_logging(if args.verbose { "debug" } else { "warn" });

    let (reference, path) = match (args.reference.clone(), args.path.clone()) {
        (Some(r), Some(p)) => (r, p),
        _ => {
            eprintln!("Usage: soundalike <REFERENCE> <PATH>");
            eprintln!("Run 'soundalike --help' for more options.");
            std::process::exit(1);
        }
    };

    if !reference.is_file() {
        eprintln!("Reference not found: {}", reference.display());
        std::process::exit(1);
    }

    // Set up thread pool
    if let Some(jobs) = args.jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
            .ok();
    }

    let files = collect_files(&path, &reference);

    if files.is_empty() {
        eprintln!(
            "No audio files found (supported: {})",
            soundalike::config::SUPPORTED_EXTENSIONS.join(", ")
        );
        std::process::exit(1);
    }

    if !args.quiet {
        eprintln!("\x1b[1msoundalike - Audio Similarity\x1b[0m");
        eprintln!("{}", "─".repeat(70));
        eprintln!("Reference: {}", reference.display());
        eprintln!("Comparing {} file(s)\n", files.len());
    }

    // Set up progress bar
    let pb = if !args.quiet && files.len() > 1 {
        let pb = ProgressBar::new(files.len() as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }
        Some(pb)
    } else {
        None
    };

    let analyzer = build_analyzer(&args);
    if let Err(e) = analyzer.config.validate() {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    let reference_str = reference.display().to_string();
    let mut rows: Vec<ComparisonRow> = files
        .par_iter()
        .map(|candidate| {
            let name = candidate
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let (record, error) = match analyzer.compare_files(&reference, candidate) {
                Ok(record) => (Some(record), None),
                Err(e) => (None, Some(e.to_string())),
            };
            if let Some(ref pb) = pb {
                pb.inc(1);
                pb.set_message(name.clone());
            }
            ComparisonRow {
                reference: reference_str.clone(),
                candidate: candidate.display().to_string(),
                candidate_name: name,
                record,
                error,
            }
        })
        .collect();

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    rows.sort_by(|a, b| b.sort_key().total_cmp(&a.sort_key()));

    if !args.quiet {
        for row in &rows {
            print_row(row, args.verbose);
        }
    }

    let summary = Summary::from_rows(&rows);

    if !args.quiet {
        eprintln!("\n{}", "─".repeat(70));
        eprintln!("\x1b[1mSummary:\x1b[0m");
        eprintln!("  \x1b[32m✓ Low:\x1b[0m     {}", summary.low);
        eprintln!("  \x1b[33m? Medium:\x1b[0m  {}", summary.medium);
        eprintln!("  \x1b[31m✗ High:\x1b[0m    {}", summary.high);
        if summary.low_confidence > 0 {
            eprintln!("  \x1b[90mLow confidence:\x1b[0m {}", summary.low_confidence);
        }
        if summary.error > 0 {
            eprintln!("  \x1b[90mErrors:\x1b[0m  {}", summary.error);
        }
    }

    if let Some(ref output_path) = args.output {
        if let Err(e) = soundalike::report::generate(output_path, &rows) {
            eprintln!("Failed to write report: {}", e);
            std::process::exit(1);
        }
        if !args.quiet {
            eprintln!("\n\x1b[32mReport saved: {}\x1b[0m", output_path.display());
        }
    }

    // Exit with appropriate code
    if summary.high > 0 {
        std::process::exit(2);
    } else if summary.medium > 0 {
        std::process::exit(1);
    }
}

/// `RUST_LOG` wins over the flag-derived default.
fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_analyzer(args: &Args) -> Analyzer {
    let weights = if args.chroma_only {
        FusionWeights::chroma_only()
    } else {
        FusionWeights::default()
    };
    let policy = if args.raw_score {
        ScorePolicy::Raw
    } else {
        ScorePolicy::Clamped
    };

    Analyzer::new()
        .with_n_mfcc(args.n_mfcc)
        .with_weights(weights)
        .with_score_policy(policy)
        .with_dtw_window(args.dtw_window)
        .with_waveform(args.waveform)
}

/// Audio files under `path`, excluding the reference itself.
fn collect_files(path: &Path, reference: &Path) -> Vec<PathBuf> {
    let reference = reference.canonicalize().unwrap_or_else(|_| reference.to_path_buf());

    let mut files: Vec<PathBuf> = if path.is_dir() {
        WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(is_supported_extension)
                    .unwrap_or(false)
            })
            .map(|e| e.path().to_path_buf())
            .filter(|p| p.canonicalize().map(|c| c != reference).unwrap_or(true))
            .collect()
    } else {
        vec![path.to_path_buf()]
    };

    files.sort();
    files
}

fn print_row(row: &ComparisonRow, verbose: bool) {
    let reset = "\x1b[0m";

    let Some(ref r) = row.record else {
        println!(
            "\x1b[90m{:<10}{} {:>7}  {}  ({})",
            "[ERROR]",
            reset,
            "-",
            &row.candidate_name,
            row.error.as_deref().unwrap_or("unknown error")
        );
        return;
    };

    let color = match r.risk {
        Risk::Low => "\x1b[32m",    // Green
        Risk::Medium => "\x1b[33m", // Yellow
        Risk::High => "\x1b[31m",   // Red
    };
    let marker = if r.fallback_used { " (low confidence)" } else { "" };

    println!(
        "{}{:<10}{} {:>6.2}%  {}{}",
        color,
        format!("[{}]", r.risk),
        reset,
        r.similarity_percent,
        truncate(&row.candidate_name, 50),
        marker
    );

    if verbose {
        eprintln!(
            "    Cosine: mfcc={:.4} chroma={:.4} spectral={:.4}",
            r.cosine_mfcc, r.cosine_chroma, r.cosine_spectral
        );
        eprintln!(
            "    DTW: mfcc={:.1} ({:.4}) chroma={:.1} ({:.4}) | raw score={:.2}",
            r.dtw_mfcc_distance, r.dtw_mfcc_norm, r.dtw_chroma_distance, r.dtw_chroma_norm, r.raw_score
        );
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
