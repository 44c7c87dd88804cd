//! Front-door rewrite rules for the static store.
//!
//! The static store is only half useful when every request still reaches
//! the application. The directive rendered here tells an Apache-style front
//! door to answer cacheable GET requests straight from
//! `{static_root}/{path}/index.html` when that file exists.
//!
//! Installation is best effort. A block is appended once to the target file,
//! guarded by [`BEGIN_MARKER`]; failures are logged once and the application
//! keeps serving through the capture path.

use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::keys::ROOT_SEGMENT;
use super::lock::{rw_read, rw_write};
use super::static_files::PAGE_FILE;
use super::transient::TransientStore;

const SOURCE: &str = "cache::rewrite";

pub const BEGIN_MARKER: &str = "# BEGIN pagecache static cache";
pub const END_MARKER: &str = "# END pagecache static cache";

/// Transient-store key that suppresses re-checking the target.
pub const REWRITE_CHECK_KEY: &str = "pagecache_rewrite_check";

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("rewrite target `{path}` is not writable: {reason}")]
    UnsafeTarget { path: String, reason: String },
    #[error("static root `{root}` is not inside document root `{document_root}`")]
    OutsideDocumentRoot { root: String, document_root: String },
    #[error("rewrite target io error: {0}")]
    Io(#[from] io::Error),
}

/// Result of one installation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteOutcome {
    Installed,
    AlreadyPresent,
}

/// What the application currently knows about the front-door rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum RewriteStatus {
    /// No attempt has been made yet.
    Pending,
    Installed,
    /// Rules are not in place; every request goes through the application.
    Unavailable(String),
}

/// Renders the directive block.
#[derive(Debug, Clone)]
pub struct RewriteRules {
    relative_root: String,
    control_prefixes: Vec<String>,
    auth_cookie_prefixes: Vec<String>,
}

impl RewriteRules {
    /// `static_root` must live inside `document_root`; the rules address the
    /// page files by their path relative to it.
    pub fn new(
        document_root: &Path,
        static_root: &Path,
        control_prefixes: &[String],
        auth_cookie_prefixes: &[String],
    ) -> Result<Self, RewriteError> {
        let outside = || RewriteError::OutsideDocumentRoot {
            root: static_root.display().to_string(),
            document_root: document_root.display().to_string(),
        };

        let relative = static_root.strip_prefix(document_root).map_err(|_| outside())?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(segment) => {
                    segments.push(segment.to_str().ok_or_else(outside)?.to_string())
                }
                Component::CurDir => {}
                _ => return Err(outside()),
            }
        }

        Ok(Self {
            relative_root: segments.join("/"),
            control_prefixes: control_prefixes.to_vec(),
            auth_cookie_prefixes: auth_cookie_prefixes.to_vec(),
        })
    }

    /// URL prefix under which page files are reachable, with a leading slash.
    fn url_root(&self) -> String {
        if self.relative_root.is_empty() {
            String::new()
        } else {
            format!("/{}", self.relative_root)
        }
    }

    fn common_conditions(&self, out: &mut String) {
        out.push_str("RewriteCond %{REQUEST_METHOD} GET\n");
        for prefix in &self.control_prefixes {
            out.push_str(&format!(
                "RewriteCond %{{REQUEST_URI}} !^{}\n",
                escape_regex(prefix)
            ));
        }
        if !self.auth_cookie_prefixes.is_empty() {
            let alternatives: Vec<String> = self
                .auth_cookie_prefixes
                .iter()
                .map(|prefix| escape_regex(prefix))
                .collect();
            out.push_str(&format!(
                "RewriteCond %{{HTTP_COOKIE}} !({}) [NC]\n",
                alternatives.join("|")
            ));
        }
        out.push_str("RewriteCond %{HTTP:Authorization} ^$\n");
    }

    /// Render the rules without markers.
    pub fn render(&self) -> String {
        let url_root = self.url_root();
        let mut out = String::from("RewriteEngine On\n");

        self.common_conditions(&mut out);
        out.push_str("RewriteCond %{REQUEST_URI} ^/?$\n");
        out.push_str(&format!(
            "RewriteCond %{{DOCUMENT_ROOT}}{url_root}/{ROOT_SEGMENT}/{PAGE_FILE} -f\n"
        ));
        out.push_str(&format!(
            "RewriteRule ^ {url_root}/{ROOT_SEGMENT}/{PAGE_FILE} [L]\n"
        ));

        self.common_conditions(&mut out);
        out.push_str(&format!(
            "RewriteCond %{{DOCUMENT_ROOT}}{url_root}%{{REQUEST_URI}}/{PAGE_FILE} -f\n"
        ));
        out.push_str(&format!(
            "RewriteRule ^ {url_root}%{{REQUEST_URI}}/{PAGE_FILE} [L]"
        ));
        out
    }

    /// Render the rules between the begin and end markers.
    pub fn render_block(&self) -> String {
        format!("{BEGIN_MARKER}\n{}\n{END_MARKER}\n", self.render())
    }
}

fn escape_regex(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for ch in literal.chars() {
        if matches!(
            ch,
            '.' | '^' | '$' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '\\'
        ) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Installs the directive block into the front-door configuration file.
pub struct RewriteInstaller {
    rules: RewriteRules,
    target: PathBuf,
    gate: Arc<TransientStore>,
    check_interval: Duration,
    status: RwLock<RewriteStatus>,
    warned: AtomicBool,
}

impl RewriteInstaller {
    pub fn new(
        rules: RewriteRules,
        target: impl Into<PathBuf>,
        gate: Arc<TransientStore>,
        check_interval: Duration,
    ) -> Self {
        Self {
            rules,
            target: target.into(),
            gate,
            check_interval,
            status: RwLock::new(RewriteStatus::Pending),
            warned: AtomicBool::new(false),
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn status(&self) -> RewriteStatus {
        rw_read(&self.status, SOURCE, "status").clone()
    }

    /// Install the block unless a check ran within the check interval.
    ///
    /// The gate is set whether or not installation succeeds, so an
    /// unwritable target is probed at most once per interval.
    pub fn ensure_installed(&self) -> RewriteStatus {
        if self.gate.get(REWRITE_CHECK_KEY).is_some() {
            return self.status();
        }

        let status = match self.install() {
            Ok(_) => RewriteStatus::Installed,
            Err(err) => {
                if !self.warned.swap(true, Ordering::SeqCst) {
                    warn!(
                        target_file = %self.target.display(),
                        error = %err,
                        "rewrite rules unavailable; pages will be served through the application"
                    );
                }
                RewriteStatus::Unavailable(err.to_string())
            }
        };

        self.gate.set(
            REWRITE_CHECK_KEY,
            Bytes::from_static(b"done"),
            Some(self.check_interval),
        );
        *rw_write(&self.status, SOURCE, "ensure_installed") = status.clone();
        status
    }

    /// Install the block now, ignoring the check gate.
    ///
    /// Idempotent: a target that already contains [`BEGIN_MARKER`] is left
    /// untouched.
    pub fn install(&self) -> Result<RewriteOutcome, RewriteError> {
        let outcome = install_block(&self.target, &self.rules.render_block())?;
        match outcome {
            RewriteOutcome::Installed => {
                info!(target_file = %self.target.display(), "rewrite rules installed")
            }
            RewriteOutcome::AlreadyPresent => {
                info!(target_file = %self.target.display(), "rewrite rules already present")
            }
        }
        *rw_write(&self.status, SOURCE, "install") = RewriteStatus::Installed;
        Ok(outcome)
    }
}

fn install_block(target: &Path, block: &str) -> Result<RewriteOutcome, RewriteError> {
    let unsafe_target = |reason: String| RewriteError::UnsafeTarget {
        path: target.display().to_string(),
        reason,
    };

    let dir = match target.parent() {
        Some(dir) if dir.as_os_str().is_empty() => Path::new("."),
        Some(dir) => dir,
        None => return Err(unsafe_target("target has no parent directory".to_string())),
    };
    if !dir.is_dir() {
        return Err(unsafe_target("parent directory does not exist".to_string()));
    }

    let existing = match std::fs::read_to_string(target) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err.into()),
    };
    if existing.contains(BEGIN_MARKER) {
        return Ok(RewriteOutcome::AlreadyPresent);
    }
    if let Ok(metadata) = std::fs::metadata(target)
        && metadata.permissions().readonly()
    {
        return Err(unsafe_target("file is read-only".to_string()));
    }

    let mut contents = existing;
    if !contents.is_empty() {
        if !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push('\n');
    }
    contents.push_str(block);

    let write = || -> io::Result<()> {
        let mut staged = tempfile::Builder::new()
            .prefix(".rewrite-")
            .tempfile_in(dir)?;
        staged.write_all(contents.as_bytes())?;
        staged.persist(target).map_err(|err| err.error)?;
        Ok(())
    };
    write().map_err(|err| match err.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
            unsafe_target(err.to_string())
        }
        _ => RewriteError::Io(err),
    })?;

    Ok(RewriteOutcome::Installed)
}
