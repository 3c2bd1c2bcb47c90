//! apksift: scan APK, JAR and other Java artifacts for secrets after
//! decompiling.
//!
//! Usage:
//!   apksift app.apk                         # jadx + bundled default rules
//!   apksift app.apk --cfr --procyon         # fan out over more decompilers
//!   apksift app.apk -r gitleaks.toml -g locator -f yaml

use apksift::decompiler::{Decompiler, DecompilerConfig, EnjarifyChoice, ToolKind};
use apksift::executor::{ConcurrencyMode, ExecutorConfig, ResultsOrder};
use apksift::output::{GroupBy, OutputFormat};
use apksift::pipeline::{PipelineConfig, ScanPipeline};
use apksift::rules;
use apksift::scanner::SecretScanner;
use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "apksift")]
#[command(about = "Scan APK, JAR and other Java artifacts for secrets after decompiling")]
#[command(version)]
struct Cli {
    /// Artifacts to decompile and scan (.apk, .xapk, .dex, .jar, ...).
    #[arg(value_name = "FILES_TO_SCAN")]
    files: Vec<PathBuf>,

    /// Secret locator rule files: paths, or bundled set names.
    /// Accepted layouts: SecretLocator JSON, secrets-patterns-db YAML,
    /// Gitleaks TOML, or a simple name-to-pattern mapping.
    #[arg(short, long, value_name = "RULES", default_values_t = [rules::catalog::DEFAULT_RULE_SET.to_string()])]
    rules: Vec<String>,

    /// Output file for secrets found [default: ./secrets_output.<format>]
    #[arg(short, long, help_heading = "Output Options")]
    output: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "json", value_parser = OutputFormat::from_str, help_heading = "Output Options")]
    format: OutputFormat,

    /// Group secrets by input file, locator, or both.
    #[arg(short, long, default_value = "both", value_parser = GroupBy::from_str, help_heading = "Output Options")]
    groupby: GroupBy,

    /// Suppress status lines and per-secret console output.
    #[arg(short, long, help_heading = "Output Options")]
    quiet: bool,

    /// Remove decompiled output directories after scanning.
    #[arg(short, long, overrides_with = "no_cleanup", help_heading = "Decompiler Options")]
    cleanup: bool,

    /// Keep decompiled output directories (default).
    #[arg(long, overrides_with = "cleanup", help_heading = "Decompiler Options")]
    no_cleanup: bool,

    /// Ask decompilers that support it to deobfuscate (default).
    #[arg(short, long, overrides_with = "no_deobfuscate", help_heading = "Decompiler Options")]
    deobfuscate: bool,

    /// Do not pass deobfuscation flags.
    #[arg(long, overrides_with = "deobfuscate", help_heading = "Decompiler Options")]
    no_deobfuscate: bool,

    /// Decompile with jadx, optionally from an explicit binary path.
    #[arg(long, value_name = "PATH", num_args = 0..=1, require_equals = true, help_heading = "Decompiler Options")]
    jadx: Option<Option<PathBuf>>,

    /// Decompile with apktool.
    #[arg(long, value_name = "PATH", num_args = 0..=1, require_equals = true, help_heading = "Decompiler Options")]
    apktool: Option<Option<PathBuf>>,

    /// Decompile with cfr (jar/class input; apk/dex via enjarify).
    #[arg(long, value_name = "PATH", num_args = 0..=1, require_equals = true, help_heading = "Decompiler Options")]
    cfr: Option<Option<PathBuf>>,

    /// Decompile with procyon (jar/class input; apk/dex via enjarify).
    #[arg(long, value_name = "PATH", num_args = 0..=1, require_equals = true, help_heading = "Decompiler Options")]
    procyon: Option<Option<PathBuf>>,

    /// Decompile with krakatau (jar/class input; apk/dex via enjarify).
    #[arg(long, value_name = "PATH", num_args = 0..=1, require_equals = true, help_heading = "Decompiler Options")]
    krakatau: Option<Option<PathBuf>>,

    /// Decompile with fernflower (jar/class input; apk/dex via enjarify).
    #[arg(long, value_name = "PATH", num_args = 0..=1, require_equals = true, help_heading = "Decompiler Options")]
    fernflower: Option<Option<PathBuf>>,

    /// When to convert .apk/.dex inputs to jars for class-input tools.
    #[arg(long, default_value = "auto", value_parser = EnjarifyChoice::from_str, help_heading = "Decompiler Options")]
    enjarify_choice: EnjarifyChoice,

    /// Explicit enjarify binary path.
    #[arg(long, value_name = "PATH", help_heading = "Decompiler Options")]
    enjarify: Option<PathBuf>,

    /// Working directory where output trees are created.
    #[arg(short = 'w', long, default_value = ".", help_heading = "Decompiler Options")]
    decompiler_working_dir: PathBuf,

    /// Suffix for per-input output directory names.
    #[arg(long, default_value = "-decompiled", help_heading = "Decompiler Options")]
    decompiler_output_suffix: String,

    /// Additional arguments passed to every decompiler invocation.
    #[arg(long, value_name = "ARG", num_args = 1.., help_heading = "Decompiler Options")]
    decompiler_extra_args: Vec<String>,

    /// Re-run decompilers even when the output directory already exists.
    #[arg(long, help_heading = "Decompiler Options")]
    overwrite: bool,

    /// Concurrency for decompilation.
    #[arg(long, default_value = "thread", value_parser = ConcurrencyMode::from_str, help_heading = "Decompiler Concurrency")]
    decompiler_concurrency_type: ConcurrencyMode,

    /// Order to consume decompile outcomes.
    #[arg(long, default_value = "completed", value_parser = ResultsOrder::from_str, help_heading = "Decompiler Concurrency")]
    decompiler_results_order: ResultsOrder,

    /// Worker count for decompilation.
    #[arg(long, default_value_t = 6, help_heading = "Decompiler Concurrency")]
    decompiler_max_workers: usize,

    /// Inputs decompiled per worker dispatch.
    #[arg(long, default_value_t = 1, help_heading = "Decompiler Concurrency")]
    decompiler_chunksize: usize,

    /// Per-decompile timeout in seconds.
    #[arg(long, value_name = "SECONDS", help_heading = "Decompiler Concurrency")]
    decompiler_timeout: Option<u64>,

    /// Concurrency for scanning.
    #[arg(long, default_value = "process", value_parser = ConcurrencyMode::from_str, help_heading = "Scanner Concurrency")]
    scanner_concurrency_type: ConcurrencyMode,

    /// Order to consume scan results.
    #[arg(long, default_value = "completed", value_parser = ResultsOrder::from_str, help_heading = "Scanner Concurrency")]
    scanner_results_order: ResultsOrder,

    /// Worker count for scanning [default: host CPU count]
    #[arg(long, help_heading = "Scanner Concurrency")]
    scanner_max_workers: Option<usize>,

    /// Files scanned per worker dispatch.
    #[arg(long, default_value_t = 1, help_heading = "Scanner Concurrency")]
    scanner_chunksize: usize,

    /// Per-file scan timeout in seconds.
    #[arg(long, value_name = "SECONDS", help_heading = "Scanner Concurrency")]
    scanner_timeout: Option<u64>,
}

impl Cli {
    fn selected_tools(&self) -> Vec<(ToolKind, Option<PathBuf>)> {
        let flags = [
            (ToolKind::Jadx, &self.jadx),
            (ToolKind::Apktool, &self.apktool),
            (ToolKind::Cfr, &self.cfr),
            (ToolKind::Procyon, &self.procyon),
            (ToolKind::Krakatau, &self.krakatau),
            (ToolKind::Fernflower, &self.fernflower),
        ];
        let mut tools: Vec<(ToolKind, Option<PathBuf>)> = flags
            .into_iter()
            .filter_map(|(kind, flag)| flag.as_ref().map(|path| (kind, path.clone())))
            .collect();
        if tools.is_empty() {
            tools.push((ToolKind::Jadx, None));
        }
        tools
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Status lines go to stdout; diagnostics stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("apksift=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cleanup = cli.cleanup && !cli.no_cleanup;
    let deobfuscate = !cli.no_deobfuscate;

    let decompiler = Decompiler::new(DecompilerConfig {
        tools: cli.selected_tools(),
        enjarify_choice: cli.enjarify_choice,
        enjarify_path: cli.enjarify.clone(),
        deobfuscate,
        working_dir: cli.decompiler_working_dir.clone(),
        output_suffix: cli.decompiler_output_suffix.clone(),
        extra_args: cli.decompiler_extra_args.clone(),
        overwrite: cli.overwrite,
        suppress_output: true,
        remove_failed_output_dirs: cleanup,
    })?;

    let sources = rules::resolve_sources(&cli.rules);
    let scanner = SecretScanner::new(sources);

    let mut pipeline = ScanPipeline::new(
        decompiler,
        scanner,
        PipelineConfig {
            output_file: cli.output.clone(),
            format: cli.format,
            groupby: cli.groupby,
            cleanup,
            quiet: cli.quiet,
            decompiler_executor: ExecutorConfig {
                mode: cli.decompiler_concurrency_type,
                order: cli.decompiler_results_order,
                max_workers: Some(cli.decompiler_max_workers),
                chunksize: cli.decompiler_chunksize,
                timeout: cli.decompiler_timeout.map(Duration::from_secs),
            },
            scanner_executor: ExecutorConfig {
                mode: cli.scanner_concurrency_type,
                order: cli.scanner_results_order,
                max_workers: cli.scanner_max_workers,
                chunksize: cli.scanner_chunksize,
                timeout: cli.scanner_timeout.map(Duration::from_secs),
            },
        },
    );
    pipeline.banner();

    let cancel = pipeline.cancel_token();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received; writing output and cleaning up...");
        cancel.store(true, std::sync::atomic::Ordering::Relaxed);
    })?;

    pipeline.run(&cli.files);
    let write_result = pipeline.write_output();
    pipeline.cleanup();
    write_result?;

    // Exit code signals whether anything was found.
    std::process::exit(i32::from(!pipeline.found_secrets()));
}
