//! Hierarchical incremental summarization.
//!
//! Three phases per snapshot, strictly ordered because each phase's
//! `source_hash` is derived from the previous phase's `content_hash`es:
//!
//! 1. **Files** — one summary per file, keyed on the file's content hash.
//! 2. **Directories** — deepest first down to the root, keyed on the
//!    sorted content hashes of direct file and subdirectory summaries.
//! 3. **Architecture** — four angles (overview, tech stack, data flow,
//!    components), keyed on all directory summary hashes.
//!
//! A summary whose `source_hash` is unchanged is skipped, so running the
//! engine twice without source changes performs no LLM calls, and editing
//! one file regenerates exactly that file's summary, its ancestor
//! directories, and the architecture set.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::clients::{Embedder, LlmClient};
use crate::models::{
    content_hash, source_hash_of, ArchType, FileRecord, Summary, SummaryEmbedding, SummaryType,
};
use crate::store::Store;

/// Character budget for file content fed to the LLM.
const FILE_CONTENT_CHAR_LIMIT: usize = 8000;
/// Target length for directory summaries.
const DIRECTORY_CHAR_TARGET: usize = 300;

#[derive(Debug, Clone)]
pub struct SummaryConfig {
    /// Parallel LLM calls per phase (per depth in phase 2).
    pub concurrency: usize,
    /// Abort a phase when more than this share of its items fail.
    pub max_failure_ratio: f64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_failure_ratio: 0.3,
        }
    }
}

/// Counts of what each phase did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryStats {
    pub files_generated: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    pub directories_generated: u64,
    pub directories_skipped: u64,
    pub directories_failed: u64,
    pub architecture_generated: u64,
    pub architecture_skipped: u64,
}

enum Outcome {
    Generated,
    Skipped,
}

/// State of a summary slot before generation.
enum Existing {
    /// Current row matches the source hash; nothing to do.
    UpToDate,
    /// Current row exists but is stale; update in place.
    Stale(Summary),
    /// No current row, but the previous snapshot's row matched and was
    /// copied forward; nothing to do.
    Carried,
    /// No usable row anywhere; generate fresh.
    Absent,
}

pub struct SummaryEngine {
    store: Arc<dyn Store>,
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn Embedder>,
    config: SummaryConfig,
}

impl SummaryEngine {
    pub fn new(
        store: Arc<dyn Store>,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn Embedder>,
        config: SummaryConfig,
    ) -> Self {
        Self {
            store,
            llm,
            embedder,
            config,
        }
    }

    /// Run all three phases for a snapshot.
    pub async fn run(&self, snapshot_id: Uuid) -> Result<SummaryStats> {
        let mut stats = SummaryStats::default();
        let files = self.store.list_files(snapshot_id).await?;

        // Previous indexed snapshot of the same source: summaries whose
        // inputs are unchanged are copied forward from it instead of
        // being regenerated.
        let baseline = self.resolve_baseline(snapshot_id).await?;

        self.run_file_phase(snapshot_id, baseline, &files, &mut stats)
            .await?;
        self.run_directory_phase(snapshot_id, baseline, &files, &mut stats)
            .await?;
        self.run_architecture_phase(snapshot_id, baseline, &mut stats)
            .await?;

        tracing::info!(
            files_generated = stats.files_generated,
            files_skipped = stats.files_skipped,
            directories_generated = stats.directories_generated,
            architecture_generated = stats.architecture_generated,
            "summary engine finished"
        );
        Ok(stats)
    }

    async fn resolve_baseline(&self, snapshot_id: Uuid) -> Result<Option<Uuid>> {
        let Some(snapshot) = self.store.get_snapshot_by_id(snapshot_id).await? else {
            bail!("snapshot {snapshot_id} not found");
        };
        let previous = self
            .store
            .list_snapshots(snapshot.source_id)
            .await?
            .into_iter()
            .find(|s| s.id != snapshot_id && s.indexed && s.created_at <= snapshot.created_at);
        Ok(previous.map(|s| s.id))
    }

    /// Decide what to do with a summary slot given its computed source
    /// hash, copying a still-valid baseline row forward when possible.
    async fn resolve_existing(
        &self,
        snapshot_id: Uuid,
        baseline: Option<Uuid>,
        summary_type: SummaryType,
        target_path: &str,
        arch_type: Option<ArchType>,
        source_hash: &str,
    ) -> Result<Existing> {
        if let Some(current) = self
            .store
            .get_summary(snapshot_id, summary_type, target_path, arch_type)
            .await?
        {
            if current.source_hash == source_hash {
                return Ok(Existing::UpToDate);
            }
            return Ok(Existing::Stale(current));
        }
        if let Some(baseline_id) = baseline {
            if let Some(previous) = self
                .store
                .get_summary(baseline_id, summary_type, target_path, arch_type)
                .await?
            {
                if previous.source_hash == source_hash {
                    self.carry_forward(snapshot_id, &previous).await?;
                    return Ok(Existing::Carried);
                }
            }
        }
        Ok(Existing::Absent)
    }

    /// Copy an unchanged summary (and its embedding) from the previous
    /// snapshot into the current one.
    async fn carry_forward(&self, snapshot_id: Uuid, previous: &Summary) -> Result<()> {
        let now = Utc::now();
        let mut copied = previous.clone();
        copied.id = Uuid::new_v4();
        copied.snapshot_id = snapshot_id;
        copied.created_at = now;
        copied.updated_at = now;
        self.store.create_summary(&copied).await?;
        if let Some(embedding) = self.store.get_summary_embedding(previous.id).await? {
            self.store
                .upsert_summary_embedding(&SummaryEmbedding {
                    summary_id: copied.id,
                    vector: embedding.vector,
                    model: embedding.model,
                    created_at: now,
                })
                .await?;
        }
        tracing::debug!(
            path = %previous.target_path,
            kind = previous.summary_type.as_str(),
            "carried summary forward"
        );
        Ok(())
    }

    // ── phase 1: files ─────────────────────────────────────────────────

    async fn run_file_phase(
        &self,
        snapshot_id: Uuid,
        baseline: Option<Uuid>,
        files: &[FileRecord],
        stats: &mut SummaryStats,
    ) -> Result<()> {
        let outcomes: Vec<Result<Outcome>> = stream::iter(files.iter().map(|file| async move {
            self.summarize_file(snapshot_id, baseline, file).await
        }))
        .buffer_unordered(self.config.concurrency.max(1))
        .collect()
        .await;

        for outcome in outcomes {
            match outcome {
                Ok(Outcome::Generated) => stats.files_generated += 1,
                Ok(Outcome::Skipped) => stats.files_skipped += 1,
                Err(e) => {
                    stats.files_failed += 1;
                    tracing::warn!(error = %e, "file summary failed");
                }
            }
        }
        self.check_failure_ratio(files.len(), stats.files_failed, "file summary phase")
    }

    async fn summarize_file(
        &self,
        snapshot_id: Uuid,
        baseline: Option<Uuid>,
        file: &FileRecord,
    ) -> Result<Outcome> {
        // The file's raw-bytes hash is the staleness key.
        let source_hash = file.content_hash.clone();
        let existing = match self
            .resolve_existing(
                snapshot_id,
                baseline,
                SummaryType::File,
                &file.path,
                None,
                &source_hash,
            )
            .await?
        {
            Existing::UpToDate | Existing::Carried => return Ok(Outcome::Skipped),
            Existing::Stale(summary) => Some(summary),
            Existing::Absent => None,
        };

        let chunks = self.store.list_chunks_by_file(file.id).await?;
        let content: String = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let content = truncate_chars(&content, FILE_CONTENT_CHAR_LIMIT);
        let language = file.language.as_deref().unwrap_or("unknown");

        let prompt = file_prompt(&file.path, language, &content);
        let text = self
            .llm
            .generate_completion(&prompt)
            .await
            .with_context(|| format!("summarizing {}", file.path))?;

        let metadata = json!({
            "llm_model": self.llm.model_name(),
            "embedder_model": self.embedder.model_name(),
            "chunk_count": chunks.len(),
            "language": language,
        });
        let summary_id = self
            .upsert_summary(
                existing,
                snapshot_id,
                SummaryType::File,
                &file.path,
                None,
                parent_dir(&file.path),
                None,
                &text,
                &source_hash,
                metadata,
            )
            .await?;
        self.embed_summary(summary_id, &text).await?;
        Ok(Outcome::Generated)
    }

    // ── phase 2: directories ───────────────────────────────────────────

    async fn run_directory_phase(
        &self,
        snapshot_id: Uuid,
        baseline: Option<Uuid>,
        files: &[FileRecord],
        stats: &mut SummaryStats,
    ) -> Result<()> {
        let paths: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
        let tree = derive_directories(&paths);

        let max_depth = tree.values().map(|d| d.depth).max().unwrap_or(0);
        // Deepest first: a directory's source hash needs its
        // subdirectories' summaries to exist already.
        for depth in (0..=max_depth).rev() {
            let level: Vec<&DirNode> = tree.values().filter(|d| d.depth == depth).collect();
            if level.is_empty() {
                continue;
            }
            let total = level.len();

            let outcomes: Vec<Result<Outcome>> =
                stream::iter(level.into_iter().map(|dir| async move {
                    self.summarize_directory(snapshot_id, baseline, dir).await
                }))
                .buffer_unordered(self.config.concurrency.max(1))
                .collect()
                .await;

            let mut failed_at_depth = 0u64;
            for outcome in outcomes {
                match outcome {
                    Ok(Outcome::Generated) => stats.directories_generated += 1,
                    Ok(Outcome::Skipped) => stats.directories_skipped += 1,
                    Err(e) => {
                        failed_at_depth += 1;
                        stats.directories_failed += 1;
                        tracing::warn!(error = %e, depth, "directory summary failed");
                    }
                }
            }
            self.check_failure_ratio(total, failed_at_depth, "directory summary phase")?;
        }
        Ok(())
    }

    async fn summarize_directory(
        &self,
        snapshot_id: Uuid,
        baseline: Option<Uuid>,
        dir: &DirNode,
    ) -> Result<Outcome> {
        // One-liners for the prompt, hashes for the staleness key.
        let mut child_hashes = Vec::new();
        let mut file_lines = Vec::new();
        let mut subdir_lines = Vec::new();

        for path in &dir.files {
            match self
                .store
                .get_summary(snapshot_id, SummaryType::File, path, None)
                .await?
            {
                Some(summary) => {
                    child_hashes.push(summary.content_hash.clone());
                    file_lines.push(format!("- {}: {}", basename(path), first_line(&summary.content)));
                }
                None => {
                    tracing::debug!(path = %path, "missing file summary, skipping child");
                }
            }
        }
        for path in &dir.subdirs {
            match self
                .store
                .get_summary(snapshot_id, SummaryType::Directory, path, None)
                .await?
            {
                Some(summary) => {
                    child_hashes.push(summary.content_hash.clone());
                    subdir_lines
                        .push(format!("- {}: {}", basename(path), first_line(&summary.content)));
                }
                None => {
                    tracing::debug!(path = %path, "missing directory summary, skipping child");
                }
            }
        }

        if child_hashes.is_empty() {
            return Ok(Outcome::Skipped);
        }
        let source_hash = source_hash_of(child_hashes);

        let existing = match self
            .resolve_existing(
                snapshot_id,
                baseline,
                SummaryType::Directory,
                &dir.path,
                None,
                &source_hash,
            )
            .await?
        {
            Existing::UpToDate | Existing::Carried => return Ok(Outcome::Skipped),
            Existing::Stale(summary) => Some(summary),
            Existing::Absent => None,
        };

        let prompt = directory_prompt(&dir.path, &file_lines, &subdir_lines);
        let text = self
            .llm
            .generate_completion(&prompt)
            .await
            .with_context(|| format!("summarizing directory '{}'", dir.path))?;

        let metadata = json!({
            "file_count": dir.files.len(),
            "subdir_count": dir.subdirs.len(),
        });
        let summary_id = self
            .upsert_summary(
                existing,
                snapshot_id,
                SummaryType::Directory,
                &dir.path,
                Some(dir.depth),
                dir.parent.clone(),
                None,
                &text,
                &source_hash,
                metadata,
            )
            .await?;
        self.embed_summary(summary_id, &text).await?;
        Ok(Outcome::Generated)
    }

    // ── phase 3: architecture ──────────────────────────────────────────

    async fn run_architecture_phase(
        &self,
        snapshot_id: Uuid,
        baseline: Option<Uuid>,
        stats: &mut SummaryStats,
    ) -> Result<()> {
        let directories = self
            .store
            .list_summaries(snapshot_id, Some(SummaryType::Directory))
            .await?;
        if directories.is_empty() {
            return Ok(());
        }
        let source_hash =
            source_hash_of(directories.iter().map(|s| s.content_hash.clone()).collect());

        // The four angles regenerate together: skip the phase only when
        // every one is present (or carried forward) and current.
        let mut all_current = true;
        for arch in ArchType::ALL {
            match self
                .resolve_existing(
                    snapshot_id,
                    baseline,
                    SummaryType::Architecture,
                    "",
                    Some(arch),
                    &source_hash,
                )
                .await?
            {
                Existing::UpToDate | Existing::Carried => {}
                Existing::Stale(_) | Existing::Absent => {
                    all_current = false;
                }
            }
        }
        if all_current {
            stats.architecture_skipped = ArchType::ALL.len() as u64;
            return Ok(());
        }

        let mut overview_lines: Vec<String> = directories
            .iter()
            .map(|s| {
                let label = if s.target_path.is_empty() {
                    "(root)"
                } else {
                    &s.target_path
                };
                format!("- {}: {}", label, first_line(&s.content))
            })
            .collect();
        overview_lines.sort();

        for arch in ArchType::ALL {
            let existing = self
                .store
                .get_summary(snapshot_id, SummaryType::Architecture, "", Some(arch))
                .await?;
            let prompt = architecture_prompt(arch, &overview_lines);
            let text = self
                .llm
                .generate_completion(&prompt)
                .await
                .with_context(|| format!("generating {} summary", arch.as_str()))?;
            let summary_id = self
                .upsert_summary(
                    existing,
                    snapshot_id,
                    SummaryType::Architecture,
                    "",
                    None,
                    None,
                    Some(arch),
                    &text,
                    &source_hash,
                    json!({ "directory_count": directories.len() }),
                )
                .await?;
            self.embed_summary(summary_id, &text).await?;
            stats.architecture_generated += 1;
        }
        Ok(())
    }

    // ── shared helpers ─────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn upsert_summary(
        &self,
        existing: Option<Summary>,
        snapshot_id: Uuid,
        summary_type: SummaryType,
        target_path: &str,
        depth: Option<u32>,
        parent_path: Option<String>,
        arch_type: Option<ArchType>,
        content: &str,
        source_hash: &str,
        metadata: serde_json::Value,
    ) -> Result<Uuid> {
        let now = Utc::now();
        let text_hash = content_hash(content.as_bytes());
        match existing {
            Some(mut summary) => {
                summary.content = content.to_string();
                summary.content_hash = text_hash;
                summary.source_hash = source_hash.to_string();
                summary.metadata = metadata;
                summary.depth = depth;
                summary.parent_path = parent_path;
                summary.updated_at = now;
                let id = summary.id;
                self.store.update_summary(&summary).await?;
                Ok(id)
            }
            None => {
                let summary = Summary {
                    id: Uuid::new_v4(),
                    snapshot_id,
                    summary_type,
                    target_path: target_path.to_string(),
                    depth,
                    parent_path,
                    arch_type,
                    content: content.to_string(),
                    content_hash: text_hash,
                    source_hash: source_hash.to_string(),
                    metadata,
                    created_at: now,
                    updated_at: now,
                };
                self.store.create_summary(&summary).await?;
                Ok(summary.id)
            }
        }
    }

    async fn embed_summary(&self, summary_id: Uuid, text: &str) -> Result<()> {
        let vector = self.embedder.embed(text).await.context("embedding summary")?;
        self.store
            .upsert_summary_embedding(&SummaryEmbedding {
                summary_id,
                vector,
                model: self.embedder.model_name().to_string(),
                created_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    fn check_failure_ratio(&self, total: usize, failed: u64, phase: &str) -> Result<()> {
        if total == 0 {
            return Ok(());
        }
        let ratio = failed as f64 / total as f64;
        if ratio > self.config.max_failure_ratio {
            bail!("{phase} aborted: {failed}/{total} items failed");
        }
        Ok(())
    }
}

// ── directory tree derivation ───────────────────────────────────────────

/// One directory of the snapshot's closure, including the empty-string
/// root at depth 0.
#[derive(Debug, Clone)]
pub struct DirNode {
    pub path: String,
    pub depth: u32,
    pub parent: Option<String>,
    pub subdirs: BTreeSet<String>,
    pub files: Vec<String>,
}

/// Depth of a directory path: root is 0, otherwise separators + 1.
pub fn dir_depth(path: &str) -> u32 {
    if path.is_empty() {
        0
    } else {
        path.matches('/').count() as u32 + 1
    }
}

fn parent_dir(path: &str) -> Option<String> {
    match path.rsplit_once('/') {
        Some((parent, _)) => Some(parent.to_string()),
        None => {
            if path.is_empty() {
                None
            } else {
                Some(String::new())
            }
        }
    }
}

fn basename(path: &str) -> &str {
    if path.is_empty() {
        return path;
    }
    path.rsplit('/').next().unwrap_or(path)
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Closure of directories over a set of file paths: every ancestor of
/// every file, with direct files and immediate subdirectories attached.
pub fn derive_directories(paths: &[String]) -> BTreeMap<String, DirNode> {
    let mut tree: BTreeMap<String, DirNode> = BTreeMap::new();
    let mut ensure = |path: String, tree: &mut BTreeMap<String, DirNode>| {
        if !tree.contains_key(&path) {
            let node = DirNode {
                depth: dir_depth(&path),
                parent: parent_dir(&path),
                path: path.clone(),
                subdirs: BTreeSet::new(),
                files: Vec::new(),
            };
            tree.insert(path, node);
        }
    };

    for file_path in paths {
        let dir = parent_dir(file_path).unwrap_or_default();
        // Materialize the ancestor chain up to the root.
        let mut current = dir.clone();
        loop {
            ensure(current.clone(), &mut tree);
            match parent_dir(&current) {
                Some(parent) => {
                    ensure(parent.clone(), &mut tree);
                    tree.get_mut(&parent)
                        .expect("parent just inserted")
                        .subdirs
                        .insert(current.clone());
                    current = parent;
                }
                None => break,
            }
        }
        tree.get_mut(&dir)
            .expect("dir just inserted")
            .files
            .push(file_path.clone());
    }
    tree
}

// ── prompts ─────────────────────────────────────────────────────────────

fn file_prompt(path: &str, language: &str, content: &str) -> String {
    format!(
        "Summarize the following source file for a developer knowledge base.\n\
         Path: {path}\n\
         Language: {language}\n\n\
         Describe the file's purpose, its main declarations, and how it fits \
         into the wider codebase. Keep it under 120 words.\n\n\
         {content}"
    )
}

fn directory_prompt(path: &str, file_lines: &[String], subdir_lines: &[String]) -> String {
    let label = if path.is_empty() { "(root)" } else { path };
    let mut prompt = format!(
        "Summarize the directory '{label}' of a source repository in at most \
         {DIRECTORY_CHAR_TARGET} characters. Focus on what the directory is for.\n"
    );
    if !file_lines.is_empty() {
        prompt.push_str("\nFiles:\n");
        prompt.push_str(&file_lines.join("\n"));
        prompt.push('\n');
    }
    if !subdir_lines.is_empty() {
        prompt.push_str("\nSubdirectories:\n");
        prompt.push_str(&subdir_lines.join("\n"));
        prompt.push('\n');
    }
    prompt
}

fn architecture_prompt(arch: ArchType, directory_lines: &[String]) -> String {
    let focus = match arch {
        ArchType::Overview => {
            "Give a high-level overview of what this system does and how it is organized."
        }
        ArchType::TechStack => {
            "Describe the technology stack: languages, frameworks, and notable libraries."
        }
        ArchType::DataFlow => {
            "Describe how data flows through the system, from inputs to persisted outputs."
        }
        ArchType::Components => {
            "List the major components and the responsibility of each."
        }
    };
    format!(
        "{focus}\n\nDirectory summaries:\n{}\n",
        directory_lines.join("\n")
    )
}
