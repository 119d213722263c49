//! Code Context
//!
//! Tracks which files ride along with each request (the active editor file
//! plus any pinned project files) and renders them into the system prompt.

use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

/// Contents of one file plus its editor language id
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileText {
    /// File contents
    pub text: String,
    /// Language id used to tag the fenced block
    pub language_id: String,
}

/// Source of file contents
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Read a file
    async fn read_file(&self, path: &str) -> std::io::Result<FileText>;

    /// Whether a file exists
    async fn exists(&self, path: &str) -> bool;
}

/// Reads files from the local filesystem
#[derive(Clone, Copy, Debug, Default)]
pub struct FsContextProvider;

impl FsContextProvider {
    /// Create a provider
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ContextProvider for FsContextProvider {
    async fn read_file(&self, path: &str) -> std::io::Result<FileText> {
        let raw = tokio::fs::read(path).await?;
        Ok(FileText {
            text: String::from_utf8_lossy(&raw).into_owned(),
            language_id: language_id_for(path).to_string(),
        })
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }
}

/// Editor language id for a path
#[must_use]
pub fn language_id_for(path: &str) -> &'static str {
    let path = Path::new(path);

    match path.file_name().and_then(|n| n.to_str()) {
        Some("Dockerfile") => return "dockerfile",
        Some("Makefile" | "makefile") => return "makefile",
        _ => {}
    }

    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return "plaintext";
    };

    match ext.to_ascii_lowercase().as_str() {
        "rs" => "rust",
        "ts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "py" => "python",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "scala" => "scala",
        "lua" => "lua",
        "dart" => "dart",
        "sh" | "bash" | "zsh" => "shellscript",
        "json" => "json",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "md" => "markdown",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "sql" => "sql",
        "xml" => "xml",
        _ => "plaintext",
    }
}

/// Lexically normalise a path
///
/// Backslashes become `/`, repeated separators collapse, `.` segments drop
/// and `..` pops the previous segment. Never touches the filesystem.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    if unified.is_empty() {
        return ".".to_string();
    }

    let absolute = unified.starts_with('/');
    let trailing = unified.ends_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    let mut normalized = segments.join("/");
    if absolute {
        normalized.insert(0, '/');
    }
    if normalized.is_empty() {
        return ".".to_string();
    }
    if trailing && !normalized.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

const FENCE: &str = "```";

/// A character (not a line terminator) followed by a run of `\x01`
static CONTROL_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([^\n\r\x{2028}\x{2029}])\x01+").expect("control run pattern is valid")
});

/// Clean project file text before it is embedded in a fenced block
///
/// A character followed by a run of `\x01` collapses to the character, and
/// an unbalanced code fence is closed at the end.
#[must_use]
pub fn sanitize_markdown_text(text: &str) -> String {
    let mut cleaned = CONTROL_RUN.replace_all(text, "$1").into_owned();

    if cleaned.matches(FENCE).count() % 2 == 1 {
        if !cleaned.ends_with('\n') {
            cleaned.push('\n');
        }
        cleaned.push_str(FENCE);
    }
    cleaned
}

/// Files attached to the conversation
///
/// All stored paths are normalised. The current file is never duplicated in
/// the visible list and project files are unique.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileContext {
    current_file: Option<String>,
    project_files: Vec<String>,
}

impl FileContext {
    /// Create an empty context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted values, normalising and deduplicating
    ///
    /// A pinned file that was also the current file stays pinned, so it is
    /// still listed after the editor moves on.
    #[must_use]
    pub fn from_saved(current_file: Option<&str>, project_files: &[String]) -> Self {
        let mut pinned: Vec<String> = Vec::with_capacity(project_files.len());
        for normalized in project_files.iter().map(|p| normalize_path(p)) {
            if !pinned.contains(&normalized) {
                pinned.push(normalized);
            }
        }

        Self {
            current_file: current_file.map(normalize_path),
            project_files: pinned,
        }
    }

    /// Active editor file
    #[must_use]
    pub fn current_file(&self) -> Option<&str> {
        self.current_file.as_deref()
    }

    /// Pinned project files
    #[must_use]
    pub fn project_files(&self) -> &[String] {
        &self.project_files
    }

    /// Change the active editor file
    pub fn set_current_file(&mut self, path: Option<&str>) {
        self.current_file = path.map(normalize_path);
    }

    /// Pin files, returning how many were new
    ///
    /// The current file and already pinned files are skipped.
    pub fn add_files<S: AsRef<str>>(&mut self, paths: &[S]) -> usize {
        let mut added = 0;
        for path in paths {
            let normalized = normalize_path(path.as_ref());
            if self.current_file.as_deref() == Some(normalized.as_str())
                || self.project_files.contains(&normalized)
            {
                continue;
            }
            self.project_files.push(normalized);
            added += 1;
        }
        added
    }

    /// Drop a file from the context
    ///
    /// Clears the current file too when it matches. Returns whether anything
    /// was removed.
    pub fn remove_file(&mut self, path: &str) -> bool {
        let normalized = normalize_path(path);
        let before = self.project_files.len();
        self.project_files.retain(|f| *f != normalized);
        let mut removed = self.project_files.len() != before;

        if self.current_file.as_deref() == Some(normalized.as_str()) {
            self.current_file = None;
            removed = true;
        }
        removed
    }

    /// Whether `path` is the current file or a pinned one
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        let normalized = normalize_path(path);
        self.current_file.as_deref() == Some(normalized.as_str())
            || self.project_files.contains(&normalized)
    }

    /// Unpin every project file
    pub fn clear_pinned(&mut self) {
        self.project_files.clear();
    }

    /// Keep only the most recently pinned `max` project files
    pub fn cap_project_files(&mut self, max: usize) {
        if self.project_files.len() > max {
            let excess = self.project_files.len() - max;
            self.project_files.drain(..excess);
        }
    }

    /// List shown to the user: current file first, then the pinned ones
    #[must_use]
    pub fn files_to_show(&self) -> Vec<String> {
        self.current_file
            .iter()
            .chain(self.other_project_files())
            .cloned()
            .collect()
    }

    fn other_project_files(&self) -> impl Iterator<Item = &String> + '_ {
        let current = self.current_file.as_deref();
        self.project_files
            .iter()
            .filter(move |f| Some(f.as_str()) != current)
    }

    /// Drop files that no longer exist, returning how many were removed
    pub async fn retain_existing(&mut self, provider: &dyn ContextProvider) -> usize {
        let mut removed = 0;

        if let Some(current) = self.current_file.as_deref() {
            if !provider.exists(current).await {
                tracing::debug!(path = current, "Current file no longer exists");
                self.current_file = None;
                removed += 1;
            }
        }

        let mut kept = Vec::with_capacity(self.project_files.len());
        for path in std::mem::take(&mut self.project_files) {
            if provider.exists(&path).await {
                kept.push(path);
            } else {
                tracing::debug!(path = %path, "Project file no longer exists");
                removed += 1;
            }
        }
        self.project_files = kept;

        removed
    }
}

/// Render the attached files as prompt text
///
/// Files that cannot be read are logged and left out.
pub async fn build_code_context(files: &FileContext, provider: &dyn ContextProvider) -> String {
    let mut code_context = String::new();

    if let Some(current) = files.current_file() {
        match provider.read_file(current).await {
            Ok(file) => push_file_block(
                &mut code_context,
                "Current File",
                current,
                &file.language_id,
                &file.text,
            ),
            Err(e) => tracing::warn!(path = current, error = %e, "Error reading current file"),
        }
    }

    for path in files.other_project_files() {
        match provider.read_file(path).await {
            Ok(file) => {
                let text = sanitize_markdown_text(&file.text);
                push_file_block(&mut code_context, "Project File", path, &file.language_id, &text);
            }
            Err(e) => tracing::warn!(path = %path, error = %e, "Error reading project file"),
        }
    }

    code_context
}

fn push_file_block(out: &mut String, label: &str, path: &str, language_id: &str, text: &str) {
    out.push_str(label);
    out.push_str(": ");
    out.push_str(path);
    out.push('\n');
    out.push_str(FENCE);
    out.push_str(language_id);
    out.push('\n');
    out.push_str(text);
    out.push('\n');
    out.push_str(FENCE);
    out.push_str("\n\n");
}

/// System prompt carrying the code context
#[must_use]
pub fn build_system_prompt(code_context: &str) -> String {
    format!(
        "You are an expert programming assistant. Follow these rules:\n\
         1. Provide concise, professional answers\n\
         2. Always format code blocks with syntax highlighting\n\
         3. Always answer in language of user\n\
         4. Current code context:\n{code_context}"
    )
}
