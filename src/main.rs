//! codestat command line front end.
//!
//! Maps command line flags onto an analysis request, runs it on a
//! single-threaded runtime and renders the result with `colored`.

use std::env;
use std::fmt::Write as FmtWrite;
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::Duration;
use clap::{ArgAction, Parser};
use colored::*;
use directories::ProjectDirs;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use codestat::history::{FileTypeChangeKind, HistoryDelta};
use codestat::options::{
    DEFAULT_MAX_FILES_PER_DIRECTORY, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_RECURSION_DEPTH,
    DEFAULT_STREAMING_THRESHOLD,
};
use codestat::stats::group_thousands;
use codestat::{
    AnalysisError, AnalysisOptions, AnalysisOutput, AnalysisRequest, AnalysisResult, Analyzer,
    Comparison, ProgressCallback, ProgressEvent, ProgressStage,
};

const TYPE_WIDTH: usize = 12;
const RULE_WIDTH: usize = 64;
const PATH_WIDTH: usize = 56;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Count code, comment and blank lines with a persistent result cache",
    color = clap::ColorChoice::Auto
)]
struct Args {
    #[arg(default_value = ".")]
    path: String,

    /// File extensions to analyze (repeatable or comma separated); all files when omitted.
    #[arg(short, long = "ext", action = ArgAction::Append, value_delimiter = ',')]
    extensions: Vec<String>,

    #[arg(short, long, action = ArgAction::Append)]
    ignore: Vec<String>,

    #[arg(long, default_value_t = DEFAULT_MAX_FILE_SIZE)]
    max_file_size: u64,

    #[arg(long, default_value_t = DEFAULT_STREAMING_THRESHOLD)]
    streaming_threshold: u64,

    #[arg(short = 'd', long, default_value_t = DEFAULT_MAX_RECURSION_DEPTH)]
    max_depth: usize,

    /// Entries read from a single directory before the rest are dropped.
    #[arg(short, long, default_value_t = DEFAULT_MAX_FILES_PER_DIRECTORY)]
    max_entries: usize,

    #[arg(long)]
    show_hidden: bool,

    /// Count binary-looking files as text instead of skipping them.
    #[arg(long)]
    include_binary: bool,

    #[arg(long)]
    no_cache: bool,

    /// Do not update usage statistics or history.
    #[arg(long)]
    no_stats: bool,

    #[arg(short, long)]
    verbose: bool,

    #[arg(short, long)]
    progress: bool,

    /// Number of largest files to list.
    #[arg(short, long, default_value_t = 10)]
    top: usize,

    /// Analyze a single file instead of a directory.
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Where cache entries, statistics and history are kept.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[arg(long)]
    clear_cache: bool,

    #[arg(long)]
    cache_info: bool,
}

impl Args {
    fn options(&self) -> AnalysisOptions {
        AnalysisOptions {
            max_file_size: self.max_file_size,
            streaming_threshold: self.streaming_threshold,
            max_recursion_depth: self.max_depth,
            max_files_per_directory: self.max_entries,
            skip_binary_files: !self.include_binary,
            show_hidden: self.show_hidden,
            use_cache: !self.no_cache,
            track_stats: !self.no_stats,
            verbose: self.verbose,
            ..AnalysisOptions::default()
        }
    }

    fn request(&self) -> AnalysisRequest {
        AnalysisRequest::new(&self.path, &self.extensions, &self.ignore)
    }

    fn state_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_state_dir)
    }
}

/// `~/.cache/codestat` on Linux, `~/Library/Caches/codestat` on macOS.
fn default_state_dir() -> PathBuf {
    match ProjectDirs::from("", "", "codestat") {
        Some(dirs) => dirs.cache_dir().to_path_buf(),
        None => env::temp_dir().join("codestat"),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}

fn fatal(err: AnalysisError) -> io::Error {
    eprintln!("{} {}", "Error:".red().bold(), err);
    let kind = match err.code() {
        "FILE_NOT_FOUND" => io::ErrorKind::NotFound,
        "ACCESS_DENIED" => io::ErrorKind::PermissionDenied,
        "NOT_A_FILE" | "NOT_A_DIRECTORY" | "FILE_TOO_LARGE" | "BINARY_FILE" => {
            io::ErrorKind::InvalidInput
        }
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err.to_string())
}

fn safe_percentage(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        (numerator as f64 / denominator as f64) * 100.0
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.num_seconds().max(0);
    let (days, hours, minutes) = (seconds / 86_400, seconds / 3_600 % 24, seconds / 60 % 60);
    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Keep the tail of `path`, the part that identifies a file.
fn elide_front(path: &str, width: usize) -> String {
    let len = path.chars().count();
    if len <= width || width <= 3 {
        return path.to_string();
    }
    let tail: String = path.chars().skip(len - (width - 3)).collect();
    format!("...{}", tail)
}

fn progress_printer() -> ProgressCallback {
    ProgressCallback::new(|event: &ProgressEvent| {
        let mut stderr = io::stderr();
        let label = match event.stage {
            ProgressStage::Counting => "Counting files",
            ProgressStage::Analyzing => "Analyzing",
        };
        let _ = write!(stderr, "\r{}... {:>3}%", label, event.progress);
        if let (Some(done), Some(total)) = (event.files_processed, event.total_files) {
            let _ = write!(stderr, " ({}/{} files)", done, total);
        }
        let _ = stderr.flush();
    })
}

fn format_line_stat(label: &str, value: u64, total: u64) -> String {
    format!(
        "{:<15}{} ({})",
        label,
        group_thousands(value).bright_yellow(),
        format!("{:.1}%", safe_percentage(value, total)).bright_yellow()
    )
}

fn build_result_report(result: &AnalysisResult, top: usize) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "\n{}", "Overall Summary:".blue().bold());
    let _ = writeln!(output, "Path:          {}", result.root_path);
    let _ = writeln!(
        output,
        "Files:         {}",
        group_thousands(result.total_files).bright_yellow()
    );
    let _ = writeln!(
        output,
        "Directories:   {}",
        group_thousands(result.total_directories).bright_yellow()
    );
    let _ = writeln!(
        output,
        "Total lines:   {}",
        group_thousands(result.total_lines).bright_yellow()
    );
    let _ = writeln!(
        output,
        "{}",
        format_line_stat("Code lines:", result.code_lines, result.total_lines)
    );
    let _ = writeln!(
        output,
        "{}",
        format_line_stat("Comment lines:", result.comment_lines, result.total_lines)
    );
    let _ = writeln!(
        output,
        "{}",
        format_line_stat("Blank lines:", result.blank_lines, result.total_lines)
    );

    if !result.by_file_type.is_empty() {
        let _ = writeln!(output, "\n{}", "By file type:".blue().bold());
        let _ = writeln!(
            output,
            "{:<width$} {:>8} {:>10} {:>10} {:>10} {:>10}",
            "Type",
            "Files",
            "Lines",
            "Code",
            "Comments",
            "Blank",
            width = TYPE_WIDTH
        );
        let _ = writeln!(output, "{}", "-".repeat(RULE_WIDTH));
        let mut types: Vec<_> = result.by_file_type.iter().collect();
        types.sort_by(|(a_ext, a), (b_ext, b)| {
            b.total_lines.cmp(&a.total_lines).then(a_ext.cmp(b_ext))
        });
        for (ext, stats) in types {
            let _ = writeln!(
                output,
                "{:<width$} {:>8} {:>10} {:>10} {:>10} {:>10}",
                ext,
                stats.files,
                stats.total_lines,
                stats.code_lines,
                stats.comment_lines,
                stats.blank_lines,
                width = TYPE_WIDTH
            );
        }
    }

    if top > 0 && !result.largest_files.is_empty() {
        let _ = writeln!(output, "\n{}", "Largest files:".blue().bold());
        for file in result.largest_files.iter().take(top) {
            let _ = writeln!(
                output,
                "{:>10}  {}  ({})",
                group_thousands(file.lines),
                elide_front(&file.path, PATH_WIDTH),
                format_size(file.size)
            );
        }
    }

    let skipped = &result.skipped_files;
    if skipped.total() > 0 {
        let _ = writeln!(
            output,
            "\n{} {} (too large: {}, binary: {}, access denied: {}, other: {})",
            "Skipped files:".blue().bold(),
            skipped.total().to_string().bright_yellow(),
            skipped.too_large,
            skipped.binary,
            skipped.access_denied,
            skipped.other
        );
    }

    output
}

fn signed(value: i64) -> String {
    format!("{:+}", value)
}

fn build_comparison_report(delta: &HistoryDelta) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "\n{} ({} ago)",
        "Changes since previous analysis:".blue().bold(),
        format_elapsed(delta.time_since_previous)
    );

    let changes = &delta.changes;
    let percentages = &delta.percentage_changes;
    let rows = [
        ("Files", changes.total_files, &percentages.total_files),
        ("Lines", changes.total_lines, &percentages.total_lines),
        ("Code", changes.code_lines, &percentages.code_lines),
        ("Comments", changes.comment_lines, &percentages.comment_lines),
        ("Blank", changes.blank_lines, &percentages.blank_lines),
    ];
    for (label, change, percentage) in rows {
        let value = match percentage {
            Some(pct) if pct.starts_with('-') => format!("{} ({}%)", signed(change), pct),
            Some(pct) => format!("{} (+{}%)", signed(change), pct),
            None => signed(change),
        };
        let value = match change {
            c if c > 0 => value.green(),
            c if c < 0 => value.red(),
            _ => value.normal(),
        };
        let _ = writeln!(output, "  {:<10}{}", label, value);
    }

    for (ext, change) in &delta.file_type_changes {
        if change.kind == FileTypeChangeKind::Changed && change.files == 0 && change.lines == 0 {
            continue;
        }
        let kind = match change.kind {
            FileTypeChangeKind::Added => "added".green(),
            FileTypeChangeKind::Removed => "removed".red(),
            FileTypeChangeKind::Changed => "changed".normal(),
        };
        let _ = writeln!(
            output,
            "  {:<10}{} ({} files, {} lines)",
            ext,
            kind,
            signed(change.files),
            signed(change.lines)
        );
    }
    output
}

fn build_report(output: &AnalysisOutput, top: usize, verbose: bool) -> String {
    let meta = &output.meta;
    let mut report = build_result_report(&output.result, top);

    if meta.from_cache {
        let _ = writeln!(report, "\n{}", "Result served from cache.".cyan());
    }
    if meta.cancelled {
        let _ = writeln!(
            report,
            "\n{}",
            "Analysis cancelled: totals cover only the files visited so far.".yellow()
        );
    }

    if !meta.warnings.is_empty() {
        let _ = writeln!(
            report,
            "\n{}: {}",
            "Warning".red().bold(),
            meta.warnings.len().to_string().bright_yellow()
        );
        if verbose {
            for warning in &meta.warnings {
                let _ = writeln!(report, "  {}", warning);
            }
        }
    }

    if let Some(Comparison::Changed(delta)) = &meta.comparison {
        report.push_str(&build_comparison_report(delta));
    }

    for milestone in &meta.milestones {
        let _ = writeln!(
            report,
            "\n{} {}",
            "Milestone reached:".green().bold(),
            milestone.description
        );
    }

    if let Some(stats) = &meta.user_stats {
        let _ = writeln!(
            report,
            "\nLifetime: {} lines in {} files across {} projects ({} analyses, {} cache hits)",
            group_thousands(stats.total_lines_analyzed),
            group_thousands(stats.total_files_analyzed),
            stats.total_projects_analyzed,
            stats.analyses_completed,
            stats.cache_hits
        );
    }
    report
}

fn print_cache_info(analyzer: &Analyzer) {
    let stats = analyzer.cache().stats();
    println!("\n{}", "Cache:".blue().bold());
    println!("Directory:     {}", stats.cache_dir.display());
    println!(
        "Entries:       {} ({} valid)",
        stats.total_entries.to_string().bright_yellow(),
        stats.valid_entries.to_string().bright_yellow()
    );
    println!("Size:          {}", format_size(stats.total_size).bright_yellow());
}

async fn run(args: Args) -> io::Result<()> {
    println!(
        "{} {}",
        env!("CARGO_PKG_NAME").bright_cyan().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_yellow()
    );

    let analyzer = Analyzer::new(args.state_dir()).map_err(fatal)?;

    if args.clear_cache {
        let removed = analyzer.cache().clear();
        println!("Removed {} cache entries.", removed.to_string().bright_yellow());
        return Ok(());
    }
    if args.cache_info {
        print_cache_info(&analyzer);
        return Ok(());
    }

    let mut options = args.options();

    if let Some(file) = &args.file {
        let result = analyzer.analyze_file(file, &options).await.map_err(fatal)?;
        print!("{}", build_result_report(&result, args.top));
        return Ok(());
    }

    let cancellation = options.cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancellation.cancel();
        }
    });
    if args.progress {
        options.progress = Some(progress_printer());
    }

    println!("Starting source code analysis...");
    let output = analyzer
        .analyze(&args.request(), &options)
        .await
        .map_err(fatal)?;
    if args.progress {
        eprintln!();
    }

    print!("{}", build_report(&output, args.top, args.verbose));
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> io::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    run(args).await
}
