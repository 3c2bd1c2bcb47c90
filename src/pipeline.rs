//! Two-stage decompile-and-scan orchestration.
//!
//! The decompile stream fans out `(input, tool)` jobs through one
//! executor; a lazy adapter flat-maps each successful outcome's file set
//! into the scan stage, which runs through a second executor. Files
//! therefore start scanning while later decompiles are still running.
//!
//! Shared progress lives in [`PipelineState`]: atomic counters plus
//! small mutex-guarded maps, mutated by whichever stage observes the
//! event. Workers themselves only return values.

use crate::decompiler::{self, Decompiler};
use crate::error::{OutputError, Result};
use crate::executor::{ConcurrentExecutor, ExecutorConfig, ResultStream};
use crate::fmt::Reporter;
use crate::output::{self, GroupBy, OutputFormat};
use crate::scanner::SecretScanner;
use crate::types::{DecompileOutcome, SecretResult};
use ahash::{AHashMap, AHashSet};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Defaults to `./secrets_output.<format>`.
    pub output_file: Option<PathBuf>,
    pub format: OutputFormat,
    pub groupby: GroupBy,
    /// Remove decompile output trees after the run.
    pub cleanup: bool,
    pub quiet: bool,
    pub decompiler_executor: ExecutorConfig,
    pub scanner_executor: ExecutorConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        use crate::executor::ConcurrencyMode;
        Self {
            output_file: None,
            format: OutputFormat::default(),
            groupby: GroupBy::default(),
            cleanup: true,
            quiet: false,
            decompiler_executor: ExecutorConfig::with_mode(ConcurrencyMode::Threaded),
            scanner_executor: ExecutorConfig::with_mode(ConcurrencyMode::Processed),
        }
    }
}

/// Point-in-time view of the run counters. All counters are
/// monotonically non-decreasing during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub num_files: u64,
    pub num_decompiled: u64,
    pub num_decompile_success: u64,
    pub num_decompile_errors: u64,
    pub num_scanning: u64,
    pub num_scanned: u64,
    pub num_secrets: u64,
    pub num_unique_secrets: u64,
}

/// Progress shared between the stage adapter and the driver.
#[derive(Default)]
pub struct PipelineState {
    num_files: AtomicU64,
    num_decompiled: AtomicU64,
    num_decompile_success: AtomicU64,
    num_decompile_errors: AtomicU64,
    num_scanning: AtomicU64,
    num_scanned: AtomicU64,
    num_secrets: AtomicU64,
    num_unique_secrets: AtomicU64,
    /// Remaining decompile jobs per input stem.
    decompiling: Mutex<AHashMap<String, usize>>,
    /// Decompiled files queued for scanning and not yet scanned.
    scanning: Mutex<AHashSet<PathBuf>>,
    /// Every outcome seen, for by-file output attribution.
    outcomes: Mutex<Vec<DecompileOutcome>>,
}

impl PipelineState {
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            num_files: self.num_files.load(Ordering::Relaxed),
            num_decompiled: self.num_decompiled.load(Ordering::Relaxed),
            num_decompile_success: self.num_decompile_success.load(Ordering::Relaxed),
            num_decompile_errors: self.num_decompile_errors.load(Ordering::Relaxed),
            num_scanning: self.num_scanning.load(Ordering::Relaxed),
            num_scanned: self.num_scanned.load(Ordering::Relaxed),
            num_secrets: self.num_secrets.load(Ordering::Relaxed),
            num_unique_secrets: self.num_unique_secrets.load(Ordering::Relaxed),
        }
    }
}

/// Drives decompile and scan stages over a set of input artifacts,
/// accumulating results and writing grouped output.
pub struct ScanPipeline {
    decompiler: Decompiler,
    scanner: SecretScanner,
    config: PipelineConfig,
    state: Arc<PipelineState>,
    results: Vec<SecretResult>,
    unique_secrets: AHashSet<Vec<u8>>,
    cancel: Arc<AtomicBool>,
    decompiler_executor: ConcurrentExecutor,
    scanner_executor: ConcurrentExecutor,
    reporter: Reporter,
    output_written: bool,
    cleaned_up: bool,
}

impl ScanPipeline {
    #[must_use]
    pub fn new(decompiler: Decompiler, scanner: SecretScanner, config: PipelineConfig) -> Self {
        let decompiler_executor = ConcurrentExecutor::new(config.decompiler_executor.clone());
        let scanner_executor = ConcurrentExecutor::new(config.scanner_executor.clone());
        let reporter = Reporter::new(config.quiet);
        Self {
            decompiler,
            scanner,
            config,
            state: Arc::new(PipelineState::default()),
            results: Vec::new(),
            unique_secrets: AHashSet::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            decompiler_executor,
            scanner_executor,
            reporter,
            output_written: false,
            cleaned_up: false,
        }
    }

    /// Token observed between results; setting it stops the run and
    /// cancels pending work in both pools.
    #[must_use]
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    #[must_use]
    pub fn counters(&self) -> CounterSnapshot {
        self.state.snapshot()
    }

    #[must_use]
    pub fn results(&self) -> &[SecretResult] {
        &self.results
    }

    #[must_use]
    pub fn found_secrets(&self) -> bool {
        !self.results.is_empty()
    }

    /// Where output will be (or was) written.
    #[must_use]
    pub fn output_file(&self) -> PathBuf {
        self.config
            .output_file
            .clone()
            .unwrap_or_else(|| output::default_output_path(self.config.format))
    }

    /// Prints the startup banner.
    pub fn banner(&self) {
        self.reporter.banner(
            &self.decompiler.binaries(),
            self.scanner.sources(),
            self.scanner.locators().len(),
            &self.output_file(),
        );
    }

    /// Runs decompile and scan over `inputs`, accumulating results.
    ///
    /// Returns normally on completion or cancellation; call
    /// [`write_output`](Self::write_output) and
    /// [`cleanup`](Self::cleanup) afterwards in either case.
    pub fn run(&mut self, inputs: &[PathBuf]) {
        self.register_inputs(inputs);

        let outcomes =
            self.decompiler
                .decompile_stream(inputs, &mut self.decompiler_executor);
        let feed = ScanFeed {
            outcomes,
            state: Arc::clone(&self.state),
            queue: VecDeque::new(),
            cancel: Arc::clone(&self.cancel),
        };
        let scan_results = self.scanner.scan_stream(feed, &mut self.scanner_executor);

        for (file_path, file_results) in scan_results {
            if self.cancel.load(Ordering::Relaxed) {
                tracing::info!("cancelled; draining and shutting down");
                break;
            }
            {
                let mut scanning = lock(&self.state.scanning);
                if scanning.remove(&file_path) {
                    self.state.num_scanned.fetch_add(1, Ordering::Relaxed);
                }
            }
            for result in file_results {
                self.state.num_secrets.fetch_add(1, Ordering::Relaxed);
                if self.unique_secrets.insert(result.secret.clone()) {
                    self.state.num_unique_secrets.fetch_add(1, Ordering::Relaxed);
                    self.reporter.secret_found(&result);
                }
                self.results.push(result);
            }
            self.reporter.status(&self.state.snapshot(), false);
        }

        let cancelled = self.cancel.load(Ordering::Relaxed);
        self.decompiler_executor.shutdown(cancelled);
        self.scanner_executor.shutdown(cancelled);
        self.reporter.summary(&self.state.snapshot(), Some(&self.output_file()));
    }

    fn register_inputs(&self, inputs: &[PathBuf]) {
        let mut decompiling = lock(&self.state.decompiling);
        for input in inputs {
            self.state.num_files.fetch_add(1, Ordering::Relaxed);
            let ext = decompiler::extension_of(input);
            let pending = self.decompiler.num_tools_for(&ext);
            if pending == 0 {
                tracing::warn!(
                    "no configured decompiler accepts '.{ext}' ({}); skipping",
                    input.display()
                );
                self.state.num_decompiled.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            decompiling.insert(decompiler::stem_of(input), pending);
        }
    }

    /// Groups accumulated results and writes them in the configured
    /// format. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `OutputError` when the file cannot be written.
    pub fn write_output(&mut self) -> std::result::Result<PathBuf, OutputError> {
        let path = self.output_file();
        if self.output_written {
            return Ok(path);
        }
        let outcomes = lock(&self.state.outcomes);
        let grouped = output::group_results(&self.results, &outcomes, self.config.groupby);
        drop(outcomes);
        output::write_output(&path, self.config.format, &grouped)?;
        self.output_written = true;
        tracing::info!("output written to {}", path.display());
        Ok(path)
    }

    /// Removes decompile output trees when cleanup is enabled, then
    /// releases both worker pools. Idempotent.
    pub fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        if self.config.cleanup {
            self.decompiler.cleanup(&mut self.decompiler_executor);
        }
        self.decompiler_executor.shutdown(true);
        self.scanner_executor.shutdown(true);
        self.cleaned_up = true;
    }

    /// Convenience wrapper: run, write output, clean up, and report
    /// whether any secret was found.
    ///
    /// # Errors
    ///
    /// Returns the output error, if any, after cleanup has run.
    pub fn execute(&mut self, inputs: &[PathBuf]) -> Result<bool> {
        self.run(inputs);
        let write_result = self.write_output();
        self.cleanup();
        write_result?;
        Ok(self.found_secrets())
    }
}

/// Lazy flat-map from decompile outcomes to scannable files.
///
/// Consumed by the scan executor's submitter, so outcome bookkeeping
/// happens as soon as each outcome arrives, not after the stage ends.
struct ScanFeed {
    outcomes: ResultStream<DecompileOutcome>,
    state: Arc<PipelineState>,
    queue: VecDeque<PathBuf>,
    cancel: Arc<AtomicBool>,
}

impl ScanFeed {
    fn record(&mut self, outcome: DecompileOutcome) {
        if outcome.scannable() {
            self.state
                .num_decompile_success
                .fetch_add(1, Ordering::Relaxed);
            if let Some(files) = &outcome.decompiled_files {
                let mut scanning = lock(&self.state.scanning);
                for file in files {
                    self.state.num_scanning.fetch_add(1, Ordering::Relaxed);
                    scanning.insert(file.clone());
                    self.queue.push_back(file.clone());
                }
            }
        } else {
            self.state
                .num_decompile_errors
                .fetch_add(1, Ordering::Relaxed);
        }

        let stem = decompiler::stem_of(&outcome.input_path);
        let mut decompiling = lock(&self.state.decompiling);
        if let Some(pending) = decompiling.get_mut(&stem) {
            *pending = pending.saturating_sub(1);
            if *pending == 0 {
                decompiling.remove(&stem);
                self.state.num_decompiled.fetch_add(1, Ordering::Relaxed);
            }
        }
        drop(decompiling);

        lock(&self.state.outcomes).push(outcome);
    }
}

impl Iterator for ScanFeed {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            if let Some(file) = self.queue.pop_front() {
                return Some(file);
            }
            if self.cancel.load(Ordering::Relaxed) {
                return None;
            }
            let outcome = self.outcomes.next()?;
            self.record(outcome);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_starts_at_zero() {
        let state = PipelineState::default();
        assert_eq!(state.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn test_scan_feed_flattens_scannable_outcomes() {
        let state = Arc::new(PipelineState::default());
        lock(&state.decompiling).insert("app".to_string(), 2);

        let outcome_ok = DecompileOutcome {
            input_path: PathBuf::from("app.apk"),
            output_dir: PathBuf::from("/out/app-decompiled/jadx"),
            decompiled_files: Some(vec![PathBuf::from("/out/a.java"), PathBuf::from("/out/b.java")]),
            success: true,
        };
        let outcome_err = DecompileOutcome {
            input_path: PathBuf::from("app.apk"),
            output_dir: PathBuf::from("/out/app-decompiled/apktool"),
            decompiled_files: None,
            success: false,
        };

        let mut exec = ConcurrentExecutor::new(ExecutorConfig::with_mode(
            crate::executor::ConcurrencyMode::Serial,
        ));
        let stream = exec.map(|o: DecompileOutcome| o, vec![outcome_ok, outcome_err]);
        let feed = ScanFeed {
            outcomes: stream,
            state: Arc::clone(&state),
            queue: VecDeque::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        };

        let files: Vec<PathBuf> = feed.collect();
        assert_eq!(files.len(), 2);

        let c = state.snapshot();
        assert_eq!(c.num_decompile_success, 1);
        assert_eq!(c.num_decompile_errors, 1);
        assert_eq!(c.num_scanning, 2);
        // Both jobs for "app" finished, so the input is done.
        assert_eq!(c.num_decompiled, 1);
        assert!(lock(&state.decompiling).is_empty());
    }

    #[test]
    fn test_cancelled_feed_stops_pulling() {
        let state = Arc::new(PipelineState::default());
        let mut exec = ConcurrentExecutor::new(ExecutorConfig::with_mode(
            crate::executor::ConcurrencyMode::Serial,
        ));
        let outcome = DecompileOutcome {
            input_path: PathBuf::from("app.apk"),
            output_dir: PathBuf::from("/out"),
            decompiled_files: Some(vec![PathBuf::from("/out/a.java")]),
            success: true,
        };
        let stream = exec.map(|o: DecompileOutcome| o, vec![outcome]);
        let mut feed = ScanFeed {
            outcomes: stream,
            state,
            queue: VecDeque::new(),
            cancel: Arc::new(AtomicBool::new(true)),
        };
        assert_eq!(feed.next(), None);
    }
}
