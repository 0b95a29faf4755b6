//! Stable storage for prefixes handed out on interfaces.
//!
//! Lets a restarted daemon ask for the prefix an interface had before.
//! Entries are kept most-recent-last in a JSON file rewritten atomically on
//! every change.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use ipnet::Ipv6Net;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::IfaceResult;

/// Oldest entries are dropped past this count.
pub const MAX_STORED_PREFIXES: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPrefix {
    pub ifname: String,
    pub prefix: Ipv6Net,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    prefixes: Vec<StoredPrefix>,
}

pub struct PrefixStore {
    path: PathBuf,
    entries: Vec<StoredPrefix>,
}

impl PrefixStore {
    /// Open the store at `path`. A missing or empty file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> IfaceResult<Self> {
        let mut store = Self {
            path: path.into(),
            entries: Vec::new(),
        };
        store.reload()?;
        Ok(store)
    }

    /// Re-read the file, dropping the in-memory view.
    pub fn reload(&mut self) -> IfaceResult<()> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        self.entries = if content.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str::<StoreFile>(&content)?.prefixes
        };
        debug!(path = %self.path.display(), entries = self.entries.len(), "Prefix store loaded");
        Ok(())
    }

    /// Most recently recorded prefix, optionally restricted to one interface
    /// and to prefixes inside `within`.
    pub fn get_best(&self, ifname: Option<&str>, within: Option<&Ipv6Net>) -> Option<&StoredPrefix> {
        self.entries.iter().rev().find(|entry| {
            ifname.is_none_or(|name| entry.ifname == name)
                && within.is_none_or(|outer| outer.contains(&entry.prefix))
        })
    }

    /// Remember `prefix` for `ifname` as the most recent entry and persist.
    pub fn record(&mut self, ifname: &str, prefix: Ipv6Net) -> IfaceResult<()> {
        self.entries
            .retain(|entry| !(entry.ifname == ifname && entry.prefix == prefix));
        self.entries.push(StoredPrefix {
            ifname: ifname.to_string(),
            prefix,
            recorded_at: Utc::now(),
        });
        if self.entries.len() > MAX_STORED_PREFIXES {
            let excess = self.entries.len() - MAX_STORED_PREFIXES;
            self.entries.drain(..excess);
        }
        self.save()?;
        info!(ifname, %prefix, "Prefix recorded");
        Ok(())
    }

    pub fn entries(&self) -> &[StoredPrefix] {
        &self.entries
    }

    fn save(&self) -> IfaceResult<()> {
        let file = StoreFile {
            prefixes: self.entries.clone(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
