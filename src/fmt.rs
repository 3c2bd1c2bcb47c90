//! Human-friendly console reporting.
//!
//! The reporter owns everything written to stdout: the startup banner, a
//! live status line, per-secret highlight lines, and the final summary.
//! ANSI color is emitted via `owo_colors` only when stdout is a TTY.
//! `--quiet` silences the reporter entirely; `tracing` diagnostics on
//! stderr are unaffected.

use crate::decompiler::ToolKind;
use crate::pipeline::CounterSnapshot;
use crate::rules::RuleSource;
use crate::types::SecretResult;
use owo_colors::OwoColorize;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};

/// Longest secret prefix shown on the console.
const SECRET_PREVIEW_LEN: usize = 100;

pub struct Reporter {
    quiet: bool,
    color: bool,
}

impl Reporter {
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            color: std::io::stdout().is_terminal(),
        }
    }

    /// Prints the run configuration before work starts.
    pub fn banner(
        &self,
        binaries: &[(ToolKind, PathBuf)],
        rule_sources: &[RuleSource],
        num_locators: usize,
        output_file: &Path,
    ) {
        if self.quiet {
            return;
        }
        println!("Decompiler binaries:");
        for (kind, path) in binaries {
            println!("- {kind}: {}", path.display());
        }
        println!("Secret locator sources ({num_locators} locators):");
        for source in rule_sources {
            println!("- {source}");
        }
        println!("Output file:\n- {}\n", output_file.display());
    }

    /// Redraws the one-line progress status.
    pub fn status(&self, c: &CounterSnapshot, newline: bool) {
        if self.quiet {
            return;
        }
        let decompiling = c.num_decompiled < c.num_files;
        let scanning = c.num_scanned < c.num_scanning;
        let phase = match (decompiling, scanning) {
            (true, false) => "Decompiling",
            (true, true) => "Decompiling and Scanning",
            (false, true) => "Scanning",
            (false, false) => "COMPLETE",
        };

        let mut line = format!("Status: {phase} | ");
        if c.num_files > 0 {
            line.push_str(&format!(
                "Decompiled: {}/{} | ",
                c.num_decompiled, c.num_files
            ));
        }
        if c.num_scanning > 0 {
            line.push_str(&format!("Scanned: {}/{} | ", c.num_scanned, c.num_scanning));
        }
        if c.num_secrets > 0 {
            line.push_str(&format!(
                "Secrets: {} ({} unique) | ",
                c.num_secrets, c.num_unique_secrets
            ));
        }

        let end = if newline { "\n" } else { "\r" };
        print!("{line}{end}");
        let _ = std::io::stdout().flush();
    }

    /// Announces a first-seen secret.
    pub fn secret_found(&self, result: &SecretResult) {
        if self.quiet {
            return;
        }
        let mut secret = result.secret_string();
        if secret.len() > SECRET_PREVIEW_LEN {
            let mut cut = SECRET_PREVIEW_LEN;
            while !secret.is_char_boundary(cut) {
                cut -= 1;
            }
            secret.truncate(cut);
        }
        if self.color {
            println!(
                "Found {}: {} in {}:{}\n",
                result.locator.name,
                secret.green(),
                result.file_path.display(),
                result.line_number
            );
        } else {
            println!(
                "Found {}: {} in {}:{}\n",
                result.locator.name,
                secret,
                result.file_path.display(),
                result.line_number
            );
        }
    }

    /// Prints the end-of-run summary.
    pub fn summary(&self, c: &CounterSnapshot, output_file: Option<&Path>) {
        if self.quiet {
            return;
        }
        self.status(c, true);
        println!(
            "Decompiled {} inputs with {} errors. Scanned {} files and found {} secrets ({} unique).",
            c.num_decompiled,
            c.num_decompile_errors,
            c.num_scanned,
            c.num_secrets,
            c.num_unique_secrets
        );
        match output_file {
            Some(path) if c.num_secrets > 0 => {
                println!("Secrets saved to {}", path.display());
            }
            _ => println!("No secrets found."),
        }
    }
}
