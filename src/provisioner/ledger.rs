//! Quota and Mount Ledgers
//!
//! Flat host files recording quota projects and bind mounts:
//! - projects file: `id:path`
//! - projid file: `name:id`
//! - fstab: `path path none bind 0 0`
//!
//! A file is loaded into an ordered index keyed by record, mutated by exact
//! key and persisted through a sibling temporary file renamed over the
//! original. Lines that are not managed records stay untouched, so adding and
//! then removing a record leaves the file byte-for-byte as it was.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

// =============================================================================
// Records
// =============================================================================

/// One managed line type
pub trait LedgerRecord: Clone + Debug {
    type Key: Clone + Debug + Eq + Hash;

    fn parse(line: &str) -> Option<Self>;
    fn key(&self) -> Self::Key;
    fn render(&self) -> String;
}

/// `id:path` in the projects file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectEntry {
    pub id: u32,
    pub path: String,
}

impl LedgerRecord for ProjectEntry {
    type Key = String;

    fn parse(line: &str) -> Option<Self> {
        let (id, path) = line.split_once(':')?;
        let id = id.trim().parse().ok()?;
        let path = path.trim();
        (!path.is_empty()).then(|| Self {
            id,
            path: path.to_string(),
        })
    }

    fn key(&self) -> String {
        self.path.clone()
    }

    fn render(&self) -> String {
        format!("{}:{}", self.id, self.path)
    }
}

/// `name:id` in the projid file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjidEntry {
    pub name: String,
    pub id: u32,
}

impl LedgerRecord for ProjidEntry {
    type Key = String;

    fn parse(line: &str) -> Option<Self> {
        let (name, id) = line.rsplit_once(':')?;
        let name = name.trim();
        let id = id.trim().parse().ok()?;
        (!name.is_empty() && !name.starts_with('#')).then(|| Self {
            name: name.to_string(),
            id,
        })
    }

    fn key(&self) -> String {
        self.name.clone()
    }

    fn render(&self) -> String {
        format!("{}:{}", self.name, self.id)
    }
}

/// Self bind mount line in the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMountEntry {
    pub path: String,
}

impl LedgerRecord for BindMountEntry {
    type Key = String;

    fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [source, target, "none", "bind", _, _] if source == target => Some(Self {
                path: source.to_string(),
            }),
            _ => None,
        }
    }

    fn key(&self) -> String {
        self.path.clone()
    }

    fn render(&self) -> String {
        format!("{0} {0} none bind 0 0", self.path)
    }
}

// =============================================================================
// Ledger File
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LineKey<K> {
    Record(K),
    /// Unmanaged line, keyed by its position at load time
    Other(usize),
}

#[derive(Debug, Clone)]
struct Line<R> {
    record: Option<R>,
    text: String,
}

/// In-memory image of one ledger file
#[derive(Debug)]
pub struct LedgerFile<R: LedgerRecord> {
    path: PathBuf,
    lines: IndexMap<LineKey<R::Key>, Line<R>>,
    trailing_newline: bool,
}

fn ledger_error(path: &Path, reason: impl ToString) -> Error {
    Error::Ledger {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

impl<R: LedgerRecord> LedgerFile<R> {
    /// Load a ledger; a missing file is an empty ledger
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(ledger_error(&path, e)),
        };
        Ok(Self::parse(path, &content))
    }

    fn parse(path: PathBuf, content: &str) -> Self {
        let mut lines: IndexMap<LineKey<R::Key>, Line<R>> = IndexMap::new();
        let trailing_newline = content.ends_with('\n');

        if !content.is_empty() {
            let body = content.strip_suffix('\n').unwrap_or(content);
            for (n, text) in body.split('\n').enumerate() {
                let record = R::parse(text);
                let key = match &record {
                    Some(r) if !lines.contains_key(&LineKey::Record(r.key())) => {
                        LineKey::Record(r.key())
                    }
                    // Duplicates stay as plain lines
                    _ => LineKey::Other(n),
                };
                let record = match key {
                    LineKey::Record(_) => record,
                    LineKey::Other(_) => None,
                };
                lines.insert(
                    key,
                    Line {
                        record,
                        text: text.to_string(),
                    },
                );
            }
        }

        Self {
            path,
            lines,
            trailing_newline,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Managed records in file order
    pub fn records(&self) -> impl Iterator<Item = &R> {
        self.lines.values().filter_map(|line| line.record.as_ref())
    }

    pub fn get(&self, key: &R::Key) -> Option<&R> {
        self.lines
            .get(&LineKey::Record(key.clone()))
            .and_then(|line| line.record.as_ref())
    }

    pub fn contains(&self, key: &R::Key) -> bool {
        self.get(key).is_some()
    }

    /// Append a record, or rewrite it in place if its key exists
    pub fn upsert(&mut self, record: R) {
        if self.lines.is_empty() {
            self.trailing_newline = true;
        }
        let text = record.render();
        self.lines.insert(
            LineKey::Record(record.key()),
            Line {
                record: Some(record),
                text,
            },
        );
    }

    /// Remove the record with `key`, keeping the order of the rest
    pub fn remove(&mut self, key: &R::Key) -> Option<R> {
        self.lines
            .shift_remove(&LineKey::Record(key.clone()))
            .and_then(|line| line.record)
    }

    /// File content as it would be persisted
    pub fn render(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let mut content = self
            .lines
            .values()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if self.trailing_newline {
            content.push('\n');
        }
        content
    }

    /// Write through a temporary sibling and rename it over the original
    pub fn persist(&self) -> Result<()> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| ledger_error(&self.path, "ledger path has no file name"))?;
        let mut tmp_name = std::ffi::OsString::from(".");
        tmp_name.push(file_name);
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);

        let mut file = std::fs::File::create(&tmp).map_err(|e| ledger_error(&tmp, e))?;
        file.write_all(self.render().as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| ledger_error(&tmp, e))?;
        drop(file);
        if let Ok(meta) = std::fs::metadata(&self.path) {
            std::fs::set_permissions(&tmp, meta.permissions()).map_err(|e| ledger_error(&tmp, e))?;
        }
        std::fs::rename(&tmp, &self.path).map_err(|e| ledger_error(&self.path, e))?;

        debug!(path = %self.path.display(), lines = self.lines.len(), "Persisted ledger");
        Ok(())
    }
}

impl LedgerFile<ProjectEntry> {
    /// One above the largest recorded project id; 1 for an empty ledger
    ///
    /// Duplicate lines count too, so an id is never handed out twice.
    pub fn next_project_id(&self) -> u32 {
        self.lines
            .values()
            .filter_map(|line| ProjectEntry::parse(&line.text))
            .map(|r| r.id)
            .max()
            .map_or(1, |max| max + 1)
    }
}

// =============================================================================
// Ledger Set
// =============================================================================

/// Locations of the three host files
#[derive(Debug, Clone)]
pub struct Ledgers {
    pub projects: PathBuf,
    pub projid: PathBuf,
    pub fstab: PathBuf,
}

impl Ledgers {
    pub fn new(
        projects: impl Into<PathBuf>,
        projid: impl Into<PathBuf>,
        fstab: impl Into<PathBuf>,
    ) -> Self {
        Self {
            projects: projects.into(),
            projid: projid.into(),
            fstab: fstab.into(),
        }
    }

    /// Id to use for the next quota project
    pub fn next_project_id(&self) -> Result<u32> {
        Ok(LedgerFile::<ProjectEntry>::load(&self.projects)?.next_project_id())
    }

    /// Record a project in both quota ledgers
    pub fn record_project(&self, id: u32, path: &Path, name: &str) -> Result<()> {
        let mut projects = LedgerFile::<ProjectEntry>::load(&self.projects)?;
        projects.upsert(ProjectEntry {
            id,
            path: path.display().to_string(),
        });
        projects.persist()?;

        let mut projid = LedgerFile::<ProjidEntry>::load(&self.projid)?;
        projid.upsert(ProjidEntry {
            name: name.to_string(),
            id,
        });
        projid.persist()
    }

    /// Remove a project from the projects ledger
    pub fn forget_project_path(&self, path: &Path) -> Result<()> {
        let mut projects = LedgerFile::<ProjectEntry>::load(&self.projects)?;
        if projects.remove(&path.display().to_string()).is_some() {
            projects.persist()?;
        }
        Ok(())
    }

    /// Remove a project from the projid ledger
    pub fn forget_project_name(&self, name: &str) -> Result<()> {
        let mut projid = LedgerFile::<ProjidEntry>::load(&self.projid)?;
        if projid.remove(&name.to_string()).is_some() {
            projid.persist()?;
        }
        Ok(())
    }

    /// Record a persistent self bind mount
    pub fn record_mount(&self, path: &Path) -> Result<()> {
        let mut fstab = LedgerFile::<BindMountEntry>::load(&self.fstab)?;
        fstab.upsert(BindMountEntry {
            path: path.display().to_string(),
        });
        fstab.persist()
    }

    /// Remove a persistent self bind mount
    pub fn forget_mount(&self, path: &Path) -> Result<()> {
        let mut fstab = LedgerFile::<BindMountEntry>::load(&self.fstab)?;
        if fstab.remove(&path.display().to_string()).is_some() {
            fstab.persist()?;
        }
        Ok(())
    }
}
