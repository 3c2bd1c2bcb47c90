//! External decompiler driving.
//!
//! A static catalogue describes the six supported decompilers: how each
//! names its output-directory flag, whether it can deobfuscate, its
//! default arguments, and which artifact extensions it accepts. Inputs
//! fan out over every configured tool that accepts their extension; tools
//! that only read class files get `.apk`/`.dex` inputs converted through
//! enjarify first.

use crate::error::ConfigError;
use crate::executor::{ConcurrentExecutor, ResultStream};
use crate::types::DecompileOutcome;
use ahash::{AHashMap, AHashSet};
use ignore::WalkBuilder;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

/// Extensions that enjarify can convert to a jar.
const CONVERTIBLE: &[&str] = &["apk", "dex"];

/// The six supported decompilers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Jadx,
    Apktool,
    Cfr,
    Procyon,
    Krakatau,
    Fernflower,
}

impl ToolKind {
    pub const ALL: &'static [ToolKind] = &[
        Self::Jadx,
        Self::Apktool,
        Self::Cfr,
        Self::Procyon,
        Self::Krakatau,
        Self::Fernflower,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        self.spec().name
    }

    fn spec(self) -> &'static ToolSpec {
        match self {
            Self::Jadx => &JADX,
            Self::Apktool => &APKTOOL,
            Self::Cfr => &CFR,
            Self::Procyon => &PROCYON,
            Self::Krakatau => &KRAKATAU,
            Self::Fernflower => &FERNFLOWER,
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static description of one decompiler's command line and inputs.
struct ToolSpec {
    name: &'static str,
    /// Flag preceding the output directory; `None` means the directory is
    /// passed positionally after the input.
    output_flag: Option<&'static str>,
    deobf_flag: Option<&'static str>,
    extra_args: &'static [&'static str],
    /// Extensions consumed directly.
    extensions: &'static [&'static str],
    /// Reads jar/class input only; dalvik artifacts reach it via enjarify.
    needs_class_input: bool,
}

impl ToolSpec {
    fn accepts(&self, ext: &str, enjarify_active: bool) -> bool {
        self.extensions.contains(&ext)
            || (self.needs_class_input && enjarify_active && CONVERTIBLE.contains(&ext))
    }
}

static JADX: ToolSpec = ToolSpec {
    name: "jadx",
    output_flag: Some("--output-dir"),
    deobf_flag: Some("--deobf"),
    extra_args: &[],
    extensions: &[
        "apk", "xapk", "dex", "jar", "class", "smali", "zip", "aar", "arsc", "aab",
    ],
    needs_class_input: false,
};

static APKTOOL: ToolSpec = ToolSpec {
    name: "apktool",
    output_flag: Some("-o"),
    deobf_flag: None,
    extra_args: &["d", "-f"],
    extensions: &["apk", "xapk"],
    needs_class_input: false,
};

static CFR: ToolSpec = ToolSpec {
    name: "cfr",
    output_flag: Some("--outputdir"),
    deobf_flag: None,
    extra_args: &[],
    extensions: &["jar", "class", "zip"],
    needs_class_input: true,
};

static PROCYON: ToolSpec = ToolSpec {
    name: "procyon",
    output_flag: Some("-o"),
    deobf_flag: None,
    extra_args: &[],
    extensions: &["jar", "class"],
    needs_class_input: true,
};

static KRAKATAU: ToolSpec = ToolSpec {
    name: "krakatau",
    output_flag: Some("-out"),
    deobf_flag: None,
    extra_args: &["-skip"],
    extensions: &["jar", "class", "zip"],
    needs_class_input: true,
};

static FERNFLOWER: ToolSpec = ToolSpec {
    name: "fernflower",
    output_flag: None,
    deobf_flag: None,
    extra_args: &[],
    extensions: &["jar", "class", "zip"],
    needs_class_input: true,
};

/// Whether `.apk`/`.dex` inputs may be converted to jars for class-input
/// decompilers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnjarifyChoice {
    /// Convert when a configured tool needs class input.
    #[default]
    Auto,
    /// Never convert; configuring a class-input tool is a fatal error.
    Never,
    /// Always resolve the converter, even if no configured tool needs it.
    Always,
}

impl FromStr for EnjarifyChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "never" => Ok(Self::Never),
            "always" => Ok(Self::Always),
            other => Err(format!("unknown enjarify choice '{other}'")),
        }
    }
}

/// Decompiler driver configuration.
#[derive(Debug, Clone)]
pub struct DecompilerConfig {
    /// Requested tools with optional explicit binary overrides; names
    /// without overrides resolve via `PATH`.
    pub tools: Vec<(ToolKind, Option<PathBuf>)>,
    pub enjarify_choice: EnjarifyChoice,
    pub enjarify_path: Option<PathBuf>,
    pub deobfuscate: bool,
    /// Output trees are created under here, one per input stem.
    pub working_dir: PathBuf,
    pub output_suffix: String,
    /// User-supplied arguments appended to every tool invocation.
    pub extra_args: Vec<String>,
    /// Re-run even when the output directory already exists.
    pub overwrite: bool,
    /// Route tool stdout/stderr to the null device.
    pub suppress_output: bool,
    pub remove_failed_output_dirs: bool,
}

impl Default for DecompilerConfig {
    fn default() -> Self {
        Self {
            tools: vec![(ToolKind::Jadx, None)],
            enjarify_choice: EnjarifyChoice::Auto,
            enjarify_path: None,
            deobfuscate: false,
            working_dir: PathBuf::from("."),
            output_suffix: "-decompiled".to_string(),
            extra_args: Vec::new(),
            overwrite: false,
            suppress_output: true,
            remove_failed_output_dirs: true,
        }
    }
}

#[derive(Debug)]
struct ResolvedTool {
    kind: ToolKind,
    binary: PathBuf,
}

#[derive(Debug)]
struct Inner {
    tools: Vec<ResolvedTool>,
    /// Resolved converter binary; `Some` exactly when conversion is active.
    enjarify: Option<PathBuf>,
    deobfuscate: bool,
    working_dir: PathBuf,
    output_suffix: String,
    extra_args: Vec<String>,
    overwrite: bool,
    suppress_output: bool,
    remove_failed_output_dirs: bool,
    /// Top-level output trees (one per input stem), tracked for cleanup.
    output_dirs: Mutex<AHashSet<PathBuf>>,
    /// Conversion results per input, so one jar serves every tool.
    jar_cache: Mutex<AHashMap<PathBuf, Option<PathBuf>>>,
}

/// Drives the configured decompilers over input artifacts.
#[derive(Debug)]
pub struct Decompiler {
    inner: Arc<Inner>,
}

impl Decompiler {
    /// Validates the requested binaries and the enjarify decision.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when no requested binary is usable, when
    /// enjarify is needed but forbidden or missing, or when the working
    /// directory cannot be created.
    pub fn new(config: DecompilerConfig) -> Result<Self, ConfigError> {
        let requested: Vec<String> = config.tools.iter().map(|(k, _)| k.name().to_string()).collect();

        let mut tools = Vec::new();
        for (kind, override_path) in config.tools {
            match resolve_binary(kind.name(), override_path.as_deref()) {
                Some(binary) => tools.push(ResolvedTool { kind, binary }),
                None => tracing::warn!("{kind}: binary not found or not executable; dropping"),
            }
        }
        if tools.is_empty() {
            return Err(ConfigError::NoValidBinaries {
                requested: requested.join(", "),
            });
        }

        let class_input_tools: Vec<&str> = tools
            .iter()
            .filter(|t| t.kind.spec().needs_class_input)
            .map(|t| t.kind.name())
            .collect();
        let needed = !class_input_tools.is_empty();
        let active = match config.enjarify_choice {
            EnjarifyChoice::Auto => needed,
            EnjarifyChoice::Always => true,
            EnjarifyChoice::Never if needed => {
                return Err(ConfigError::EnjarifyForbidden {
                    tools: class_input_tools.join(", "),
                })
            }
            EnjarifyChoice::Never => false,
        };
        let enjarify = if active {
            Some(
                resolve_binary("enjarify", config.enjarify_path.as_deref())
                    .ok_or(ConfigError::EnjarifyMissing)?,
            )
        } else {
            None
        };

        std::fs::create_dir_all(&config.working_dir).map_err(|source| ConfigError::WorkingDir {
            path: config.working_dir.clone(),
            source,
        })?;

        Ok(Self {
            inner: Arc::new(Inner {
                tools,
                enjarify,
                deobfuscate: config.deobfuscate,
                working_dir: config.working_dir,
                output_suffix: config.output_suffix,
                extra_args: config.extra_args,
                overwrite: config.overwrite,
                suppress_output: config.suppress_output,
                remove_failed_output_dirs: config.remove_failed_output_dirs,
                output_dirs: Mutex::new(AHashSet::new()),
                jar_cache: Mutex::new(AHashMap::new()),
            }),
        })
    }

    /// Resolved `(tool, binary)` pairs, for banner output.
    #[must_use]
    pub fn binaries(&self) -> Vec<(ToolKind, PathBuf)> {
        self.inner
            .tools
            .iter()
            .map(|t| (t.kind, t.binary.clone()))
            .collect()
    }

    /// How many configured tools will run on an input with this extension.
    #[must_use]
    pub fn num_tools_for(&self, ext: &str) -> usize {
        let enjarify_active = self.inner.enjarify.is_some();
        self.inner
            .tools
            .iter()
            .filter(|t| t.kind.spec().accepts(ext, enjarify_active))
            .count()
    }

    /// The Cartesian product of inputs with accepting tools.
    #[must_use]
    pub fn jobs_for(&self, inputs: &[PathBuf]) -> Vec<(PathBuf, usize)> {
        let enjarify_active = self.inner.enjarify.is_some();
        let mut jobs = Vec::new();
        for input in inputs {
            let ext = extension_of(input);
            for (idx, tool) in self.inner.tools.iter().enumerate() {
                if tool.kind.spec().accepts(&ext, enjarify_active) {
                    jobs.push((input.clone(), idx));
                }
            }
        }
        jobs
    }

    /// Runs every `(input, tool)` job through the executor, yielding
    /// outcomes as they complete.
    pub fn decompile_stream(
        &self,
        inputs: &[PathBuf],
        executor: &mut ConcurrentExecutor,
    ) -> ResultStream<DecompileOutcome> {
        let jobs = self.jobs_for(inputs);
        let inner = Arc::clone(&self.inner);
        executor.map(
            move |(input, tool_idx): (PathBuf, usize)| inner.decompile(&input, tool_idx),
            jobs,
        )
    }

    /// Decompiles one input with one configured tool. Exposed for direct
    /// (non-pipelined) use.
    #[must_use]
    pub fn decompile(&self, input: &Path, tool_idx: usize) -> DecompileOutcome {
        self.inner.decompile(input, tool_idx)
    }

    /// Removes every tracked output tree in parallel. Idempotent.
    pub fn cleanup(&self, executor: &mut ConcurrentExecutor) {
        let dirs: Vec<PathBuf> = lock(&self.inner.output_dirs).iter().cloned().collect();
        if dirs.is_empty() {
            return;
        }
        tracing::info!("removing {} decompile output trees", dirs.len());
        for dir in executor.map(
            |dir: PathBuf| {
                remove_tree(&dir);
                dir
            },
            dirs,
        ) {
            tracing::debug!("removed {}", dir.display());
        }
    }

    /// Top-level output trees created so far.
    #[must_use]
    pub fn output_dirs(&self) -> Vec<PathBuf> {
        lock(&self.inner.output_dirs).iter().cloned().collect()
    }
}

impl Inner {
    fn decompile(&self, input: &Path, tool_idx: usize) -> DecompileOutcome {
        let tool = &self.tools[tool_idx];
        let spec = tool.kind.spec();
        let stem = stem_of(input);
        let top_dir = self.working_dir.join(format!("{stem}{}", self.output_suffix));
        let output_dir = top_dir.join(spec.name);
        lock(&self.output_dirs).insert(top_dir.clone());

        // Class-input tools get a converted jar instead of the artifact.
        let ext = extension_of(input);
        let effective_input = if spec.needs_class_input && CONVERTIBLE.contains(&ext.as_str()) {
            match self.ensure_jar(input, &top_dir) {
                Some(jar) => jar,
                None => {
                    return DecompileOutcome {
                        input_path: input.to_path_buf(),
                        output_dir,
                        decompiled_files: None,
                        success: false,
                    }
                }
            }
        } else {
            input.to_path_buf()
        };

        if output_dir.is_dir() && !self.overwrite {
            tracing::debug!("reusing existing output {}", output_dir.display());
            return DecompileOutcome {
                input_path: input.to_path_buf(),
                decompiled_files: Some(index_files(&output_dir)),
                output_dir,
                success: true,
            };
        }
        if let Err(e) = std::fs::create_dir_all(&output_dir) {
            tracing::warn!("cannot create {}: {e}", output_dir.display());
            return DecompileOutcome {
                input_path: input.to_path_buf(),
                output_dir,
                decompiled_files: None,
                success: false,
            };
        }

        tracing::debug!("running {} on {}", tool.kind, effective_input.display());
        let mut cmd = Command::new(&tool.binary);
        cmd.args(command_args(
            spec,
            &self.extra_args,
            &output_dir,
            self.deobfuscate,
            &effective_input,
        ));
        if self.suppress_output {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let success = match cmd.status() {
            Ok(status) => status.success(),
            Err(e) => {
                tracing::warn!("failed to run {}: {e}", tool.kind);
                false
            }
        };

        let decompiled_files = if success || !self.remove_failed_output_dirs {
            Some(index_files(&output_dir))
        } else {
            remove_tree(&output_dir);
            None
        };

        DecompileOutcome {
            input_path: input.to_path_buf(),
            output_dir,
            decompiled_files,
            success,
        }
    }

    /// Converts an `.apk`/`.dex` input to a jar, once per input.
    ///
    /// The cache lock is held across the conversion: the first job for an
    /// input converts while peers for the same input wait on the result.
    fn ensure_jar(&self, input: &Path, top_dir: &Path) -> Option<PathBuf> {
        let Some(enjarify) = &self.enjarify else {
            return None;
        };
        let mut cache = lock(&self.jar_cache);
        if let Some(cached) = cache.get(input) {
            return cached.clone();
        }

        let jar_dir = top_dir.join("enjarify");
        let jar_path = jar_dir.join(format!("{}.jar", stem_of(input)));
        let converted = if jar_path.is_file() {
            Some(jar_path)
        } else {
            self.run_enjarify(enjarify, input, &jar_dir, jar_path)
        };
        cache.insert(input.to_path_buf(), converted.clone());
        converted
    }

    fn run_enjarify(
        &self,
        enjarify: &Path,
        input: &Path,
        jar_dir: &Path,
        jar_path: PathBuf,
    ) -> Option<PathBuf> {
        if let Err(e) = std::fs::create_dir_all(jar_dir) {
            tracing::warn!("cannot create {}: {e}", jar_dir.display());
            return None;
        }
        tracing::debug!("enjarify {} -> {}", input.display(), jar_path.display());
        let mut cmd = Command::new(enjarify);
        cmd.arg(input).arg("-o").arg(&jar_path);
        if self.suppress_output {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let ok = match cmd.status() {
            Ok(status) => status.success(),
            Err(e) => {
                tracing::warn!("failed to run enjarify: {e}");
                false
            }
        };
        if ok && jar_path.is_file() {
            Some(jar_path)
        } else {
            tracing::warn!("enjarify failed for {}; skipping", input.display());
            let _ = std::fs::remove_file(&jar_path);
            None
        }
    }
}

/// Builds the argv tail for one invocation:
/// `[extra_args…, output_flag, output_dir, deobf_flag?, input]`, with a
/// positional output directory appended after the input for tools that
/// have no output flag.
fn command_args(
    spec: &ToolSpec,
    user_extra: &[String],
    output_dir: &Path,
    deobfuscate: bool,
    input: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = spec.extra_args.iter().map(OsString::from).collect();
    args.extend(user_extra.iter().map(OsString::from));
    if let Some(flag) = spec.output_flag {
        args.push(flag.into());
        args.push(output_dir.into());
    }
    if deobfuscate {
        if let Some(deobf) = spec.deobf_flag {
            args.push(deobf.into());
        }
    }
    args.push(input.into());
    if spec.output_flag.is_none() {
        args.push(output_dir.into());
    }
    args
}

/// Recursively lists regular files under an output directory.
fn index_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkBuilder::new(dir)
        .standard_filters(false)
        .build()
        .flatten()
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .map(ignore::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

fn remove_tree(dir: &Path) {
    if dir.is_dir() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            tracing::warn!("cannot remove {}: {e}", dir.display());
        }
    }
}

fn resolve_binary(name: &str, override_path: Option<&Path>) -> Option<PathBuf> {
    let candidate = match override_path {
        Some(path) => path.to_path_buf(),
        None => which::which(name).ok()?,
    };
    (candidate.is_file() && is_executable(&candidate)).then_some(candidate)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}

pub(crate) fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

pub(crate) fn stem_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("input")
        .to_string()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_extension_sets() {
        assert!(JADX.accepts("apk", false));
        assert!(JADX.accepts("smali", false));
        assert!(APKTOOL.accepts("xapk", false));
        assert!(!APKTOOL.accepts("jar", false));
        assert!(CFR.accepts("jar", false));
        // Dalvik input reaches class-input tools only through enjarify.
        assert!(!CFR.accepts("apk", false));
        assert!(CFR.accepts("apk", true));
        assert!(PROCYON.accepts("dex", true));
        assert!(!FERNFLOWER.accepts("smali", true));
    }

    #[test]
    fn test_flagged_command_args() {
        let args = command_args(
            &JADX,
            &["--no-res".to_string()],
            Path::new("/out/app-decompiled/jadx"),
            true,
            Path::new("/in/app.apk"),
        );
        let args: Vec<&str> = args.iter().filter_map(|a| a.to_str()).collect();
        assert_eq!(
            args,
            vec![
                "--no-res",
                "--output-dir",
                "/out/app-decompiled/jadx",
                "--deobf",
                "/in/app.apk",
            ]
        );
    }

    #[test]
    fn test_deobf_omitted_when_unsupported() {
        let args = command_args(&APKTOOL, &[], Path::new("/out"), true, Path::new("/in/a.apk"));
        let args: Vec<&str> = args.iter().filter_map(|a| a.to_str()).collect();
        assert_eq!(args, vec!["d", "-f", "-o", "/out", "/in/a.apk"]);
    }

    #[test]
    fn test_positional_output_dir() {
        let args = command_args(&FERNFLOWER, &[], Path::new("/out"), false, Path::new("/in/a.jar"));
        let args: Vec<&str> = args.iter().filter_map(|a| a.to_str()).collect();
        assert_eq!(args, vec!["/in/a.jar", "/out"]);
    }

    #[test]
    fn test_missing_binaries_are_fatal() {
        let config = DecompilerConfig {
            tools: vec![(ToolKind::Jadx, Some(PathBuf::from("/no/such/jadx")))],
            ..DecompilerConfig::default()
        };
        let err = Decompiler::new(config).unwrap_err();
        assert!(matches!(err, ConfigError::NoValidBinaries { .. }));
    }

    #[test]
    fn test_enjarify_never_with_class_tool_is_fatal() {
        // A class-input tool plus `never` must fail fast, before binary
        // resolution can mask the conflict.
        let dir = tempfile::TempDir::new().unwrap();
        let cfr = fake_binary(dir.path(), "cfr");
        let config = DecompilerConfig {
            tools: vec![(ToolKind::Cfr, Some(cfr))],
            enjarify_choice: EnjarifyChoice::Never,
            working_dir: dir.path().join("work"),
            ..DecompilerConfig::default()
        };
        let err = Decompiler::new(config).unwrap_err();
        assert!(matches!(err, ConfigError::EnjarifyForbidden { .. }));
    }

    #[test]
    fn test_invalid_binary_dropped_valid_kept() {
        let dir = tempfile::TempDir::new().unwrap();
        let jadx = fake_binary(dir.path(), "jadx");
        let config = DecompilerConfig {
            tools: vec![
                (ToolKind::Jadx, Some(jadx)),
                (ToolKind::Apktool, Some(dir.path().join("missing-apktool"))),
            ],
            working_dir: dir.path().join("work"),
            ..DecompilerConfig::default()
        };
        let decompiler = Decompiler::new(config).unwrap();
        assert_eq!(decompiler.binaries().len(), 1);
        assert_eq!(decompiler.binaries()[0].0, ToolKind::Jadx);
    }

    #[test]
    fn test_fanout_respects_extensions() {
        let dir = tempfile::TempDir::new().unwrap();
        let jadx = fake_binary(dir.path(), "jadx");
        let apktool = fake_binary(dir.path(), "apktool");
        let config = DecompilerConfig {
            tools: vec![(ToolKind::Jadx, Some(jadx)), (ToolKind::Apktool, Some(apktool))],
            working_dir: dir.path().join("work"),
            ..DecompilerConfig::default()
        };
        let decompiler = Decompiler::new(config).unwrap();

        assert_eq!(decompiler.num_tools_for("apk"), 2);
        assert_eq!(decompiler.num_tools_for("jar"), 1);
        assert_eq!(decompiler.num_tools_for("txt"), 0);

        let jobs = decompiler.jobs_for(&[PathBuf::from("a.apk"), PathBuf::from("b.jar")]);
        assert_eq!(jobs.len(), 3);
    }

    #[cfg(unix)]
    fn fake_binary(dir: &Path, name: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[cfg(not(unix))]
    fn fake_binary(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "").unwrap();
        path
    }
}
