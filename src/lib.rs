//! apksift: decompile Android/Java artifacts and sweep them for secrets.
//!
//! This library drives external decompilers over `.apk`/`.dex`/`.jar` and
//! related artifacts, then runs a corpus of regex secret locators over
//! every produced file, in parallel:
//! - Multi-format rule loading (four schemas, one locator model)
//! - A worker-pool executor with serial/threaded/processed modes and
//!   completion- or submission-ordered results
//! - A two-stage pipeline where scanning starts as soon as the first
//!   decompile finishes
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 CLI (clap)                   │
//! └───────────────────┬──────────────────────────┘
//!                     │
//! ┌───────────────────▼──────────────────────────┐
//! │              ScanPipeline                    │
//! │  counters · uniqueness · grouping · cleanup  │
//! └──────┬────────────────────────────┬──────────┘
//!        │                            │
//! ┌──────▼─────────┐        ┌─────────▼─────────┐
//! │   Decompiler   │  lazy  │   SecretScanner   │
//! │ jadx, apktool, │  flat  │ regex::bytes over │
//! │ cfr, procyon…  │ ─map──▶│   byte lines      │
//! └──────┬─────────┘        └─────────┬─────────┘
//!        │                            │
//! ┌──────▼────────────────────────────▼──────────┐
//! │          ConcurrentExecutor (one per stage)  │
//! │     worker pool over crossbeam channels      │
//! └──────────────────────────────────────────────┘
//! ```

pub mod decompiler;
pub mod error;
pub mod executor;
pub mod fmt;
pub mod output;
pub mod pipeline;
pub mod rules;
pub mod scanner;
pub mod types;

pub use decompiler::{Decompiler, DecompilerConfig, EnjarifyChoice, ToolKind};
pub use error::{Result, SiftError};
pub use executor::{ConcurrencyMode, ConcurrentExecutor, ExecutorConfig, ResultsOrder};
pub use output::{GroupBy, OutputFormat};
pub use pipeline::{CounterSnapshot, PipelineConfig, ScanPipeline};
pub use scanner::SecretScanner;
pub use types::{DecompileOutcome, SecretGroup, SecretLocator, SecretResult};
