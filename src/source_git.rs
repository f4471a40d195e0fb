//! Git source provider.
//!
//! Clones or updates a repository into a local cache directory, resolves
//! the commit hash that becomes the snapshot's version identifier, and
//! walks the work tree into [`SourceDocument`]s with per-file commit
//! metadata from `git log`.
//!
//! # Cache directory
//!
//! Each URL gets a cache slot keyed by a hash of the URL. The first fetch
//! clones (shallow by default); later fetches `git fetch && reset`.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::clients::{default_ignore_globs, FetchParams, SourceProvider};
use crate::models::{SourceDocument, SourceType};

/// Upper bound on ingested file size; larger files are skipped.
const MAX_FILE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct GitProviderConfig {
    /// Where clones are cached.
    pub cache_dir: PathBuf,
    /// Globs for files to ingest; empty means everything.
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    /// Shallow clone (`--depth 1`) to save space and time.
    pub shallow: bool,
}

impl Default for GitProviderConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("data/.git-cache"),
            include_globs: Vec::new(),
            exclude_globs: Vec::new(),
            shallow: true,
        }
    }
}

pub struct GitProvider {
    config: GitProviderConfig,
    ignore_set: GlobSet,
}

impl GitProvider {
    pub fn new(config: GitProviderConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in default_ignore_globs() {
            builder.add(Glob::new(pattern)?);
        }
        for pattern in &config.exclude_globs {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            config,
            ignore_set: builder.build()?,
        })
    }

    fn repo_cache_dir(&self, url: &str) -> PathBuf {
        self.config.cache_dir.join(short_hash(url))
    }

    fn include_set(&self) -> Result<Option<GlobSet>> {
        if self.config.include_globs.is_empty() {
            return Ok(None);
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.config.include_globs {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Some(builder.build()?))
    }

    fn scan(&self, params: &FetchParams) -> Result<(Vec<SourceDocument>, String)> {
        let repo_dir = self.repo_cache_dir(&params.identifier);

        if repo_dir.join(".git").exists() {
            git_update(&repo_dir, params.reference.as_deref())?;
        } else {
            git_clone(
                &params.identifier,
                params.reference.as_deref(),
                self.config.shallow,
                &repo_dir,
            )?;
        }
        if let Some(reference) = &params.reference {
            git_checkout(&repo_dir, reference)?;
        }
        let head = git_head_sha(&repo_dir)?;

        let include = self.include_set()?;
        let mut docs = Vec::new();
        for entry in WalkDir::new(&repo_dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.metadata().map(|m| m.len()).unwrap_or(0) > MAX_FILE_BYTES {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&repo_dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            if let Some(include) = &include {
                if !include.is_match(&rel) {
                    continue;
                }
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue; // binary files carry no ingestible text
            };

            let (author, updated_at) = git_file_meta(&repo_dir, &rel);
            let mut doc = SourceDocument::new(rel, content);
            doc.commit_hash = Some(head.clone());
            doc.author = author;
            doc.updated_at = updated_at;
            docs.push(doc);
        }
        docs.sort_by(|a, b| a.path.cmp(&b.path));
        Ok((docs, head))
    }
}

#[async_trait]
impl SourceProvider for GitProvider {
    fn source_type(&self) -> SourceType {
        SourceType::Git
    }

    /// Repository name from the URL: `https://host/org/repo.git` → `repo`.
    fn extract_source_name(&self, identifier: &str) -> String {
        identifier
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .rsplit(|c| c == '/' || c == ':')
            .next()
            .unwrap_or(identifier)
            .to_string()
    }

    async fn fetch_documents(
        &self,
        params: &FetchParams,
    ) -> Result<(Vec<SourceDocument>, String)> {
        if params.identifier.trim().is_empty() {
            bail!("git URL must not be empty");
        }
        self.scan(params)
    }

    fn create_metadata(&self, params: &FetchParams) -> serde_json::Value {
        serde_json::json!({
            "url": params.identifier,
            "ref": params.reference,
        })
    }

    fn should_ignore(&self, doc: &SourceDocument) -> bool {
        self.ignore_set.is_match(&doc.path)
    }
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

fn run_git(dir: Option<&Path>, args: &[&str]) -> Result<String> {
    let mut cmd = Command::new("git");
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    let output = cmd
        .args(args)
        .output()
        .with_context(|| format!("running git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn git_clone(url: &str, reference: Option<&str>, shallow: bool, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let target_str = target.to_string_lossy().to_string();
    let mut args: Vec<&str> = vec!["clone"];
    if shallow {
        args.extend(["--depth", "1"]);
    }
    if let Some(reference) = reference {
        args.extend(["--branch", reference]);
    }
    args.push(url);
    args.push(&target_str);
    run_git(None, &args)?;
    Ok(())
}

fn git_update(repo_dir: &Path, reference: Option<&str>) -> Result<()> {
    run_git(Some(repo_dir), &["fetch", "--all", "--tags", "--prune"])?;
    match reference {
        Some(reference) => {
            // Best effort: a tag or commit needs no reset to origin.
            let remote = format!("origin/{reference}");
            if run_git(Some(repo_dir), &["rev-parse", "--verify", &remote]).is_ok() {
                run_git(Some(repo_dir), &["reset", "--hard", &remote])?;
            }
        }
        None => {
            run_git(Some(repo_dir), &["reset", "--hard", "@{u}"])
                .or_else(|_| run_git(Some(repo_dir), &["reset", "--hard", "HEAD"]))?;
        }
    }
    Ok(())
}

fn git_checkout(repo_dir: &Path, reference: &str) -> Result<()> {
    run_git(Some(repo_dir), &["checkout", reference])?;
    Ok(())
}

fn git_head_sha(repo_dir: &Path) -> Result<String> {
    run_git(Some(repo_dir), &["rev-parse", "HEAD"])
}

/// Last-commit author and timestamp for one file. Best effort; missing
/// history yields `None`s.
fn git_file_meta(repo_dir: &Path, rel_path: &str) -> (Option<String>, Option<DateTime<Utc>>) {
    let author = run_git(
        Some(repo_dir),
        &["log", "-1", "--format=%an", "--", rel_path],
    )
    .ok()
    .filter(|s| !s.is_empty());
    let updated_at = run_git(
        Some(repo_dir),
        &["log", "-1", "--format=%ct", "--", rel_path],
    )
    .ok()
    .and_then(|s| s.parse::<i64>().ok())
    .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
    (author, updated_at)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> GitProvider {
        GitProvider::new(GitProviderConfig::default()).unwrap()
    }

    #[test]
    fn test_source_name_extraction() {
        let p = provider();
        assert_eq!(
            p.extract_source_name("https://github.com/acme/orders.git"),
            "orders"
        );
        assert_eq!(
            p.extract_source_name("git@github.com:acme/orders.git"),
            "orders"
        );
        assert_eq!(p.extract_source_name("https://host/acme/orders/"), "orders");
    }

    #[test]
    fn test_ignore_defaults() {
        let p = provider();
        let vendored = SourceDocument::new("vendor/lib/x.go", "package x");
        assert!(p.should_ignore(&vendored));
        let generated = SourceDocument::new("api/service.pb.go", "package api");
        assert!(p.should_ignore(&generated));
        let normal = SourceDocument::new("cmd/main.go", "package main");
        assert!(!p.should_ignore(&normal));
    }

    #[test]
    fn test_cache_dir_is_stable_per_url() {
        let p = provider();
        let a = p.repo_cache_dir("https://example.com/a.git");
        let b = p.repo_cache_dir("https://example.com/a.git");
        let c = p.repo_cache_dir("https://example.com/c.git");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_metadata_shape() {
        let p = provider();
        let meta = p.create_metadata(&FetchParams {
            identifier: "https://example.com/a.git".to_string(),
            reference: Some("main".to_string()),
        });
        assert_eq!(meta["url"], "https://example.com/a.git");
        assert_eq!(meta["ref"], "main");
    }
}
