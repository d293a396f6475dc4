//! Hash-chained audit trail of gate activity
//!
//! Each entry's hash covers its sequence number, timestamp, kind, subject,
//! body and the previous entry's hash. When the bounded buffer evicts an
//! entry, its hash becomes the anchor the retained chain is verified from.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const GENESIS: [u8; 32] = [0u8; 32];

/// Audit errors
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Journal file could not be opened
    #[error("failed to open audit journal {path}: {source}")]
    Journal {
        /// Journal path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Chain does not verify at the given sequence number
    #[error("audit chain broken at entry {seq}")]
    IntegrityViolation {
        /// First entry that failed verification
        seq: u64,
    },
}

/// What an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Gate decision
    Decision,
    /// Direct outcome report for a source
    Outcome,
    /// Deferred decision resolution
    Resolution,
    /// Operator circuit reset
    Reset,
    /// Circuit forced open
    ForcedTrip,
    /// Processed anomaly
    Anomaly,
    /// Circuit transition not caused by a gate call (cooldown expiry)
    Transition,
}

impl AuditKind {
    /// Stable label
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::Outcome => "outcome",
            Self::Resolution => "resolution",
            Self::Reset => "reset",
            Self::ForcedTrip => "forced_trip",
            Self::Anomaly => "anomaly",
            Self::Transition => "transition",
        }
    }
}

/// One chained audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic sequence number, starting at 0
    pub seq: u64,
    /// When the entry was appended
    pub timestamp: DateTime<Utc>,
    /// Entry kind
    pub kind: AuditKind,
    /// Decision id, source or pattern the entry is about
    pub subject: String,
    /// Structured payload
    pub body: Value,
    /// Hex hash of the previous entry
    pub prev_hash: String,
    /// Hex hash of this entry
    pub hash: String,
}

#[derive(Debug)]
struct Chain {
    entries: VecDeque<AuditEntry>,
    anchor: String,
    last_hash: String,
    next_seq: u64,
}

/// Bounded, hash-chained, in-memory audit log with an optional journal
#[derive(Debug)]
pub struct AuditLog {
    chain: Mutex<Chain>,
    capacity: usize,
    journal: Option<Mutex<File>>,
}

impl AuditLog {
    /// Create log retaining at most `capacity` entries
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let genesis = hex::encode(GENESIS);
        Self {
            chain: Mutex::new(Chain {
                entries: VecDeque::new(),
                anchor: genesis.clone(),
                last_hash: genesis,
                next_seq: 0,
            }),
            capacity: capacity.max(1),
            journal: None,
        }
    }

    /// Also append every entry as a JSON line to `path`
    ///
    /// # Errors
    /// Returns `AuditError::Journal` if the file cannot be opened for append
    pub fn with_journal(mut self, path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| AuditError::Journal {
                path: path.to_path_buf(),
                source,
            })?;
        self.journal = Some(Mutex::new(file));
        Ok(self)
    }

    /// Append an entry and return it
    pub fn append(
        &self,
        kind: AuditKind,
        subject: impl Into<String>,
        body: Value,
        timestamp: DateTime<Utc>,
    ) -> AuditEntry {
        let mut chain = self.chain.lock();
        let mut entry = AuditEntry {
            seq: chain.next_seq,
            timestamp,
            kind,
            subject: subject.into(),
            body,
            prev_hash: chain.last_hash.clone(),
            hash: String::new(),
        };
        entry.hash = compute_hash(&entry);

        chain.next_seq += 1;
        chain.last_hash.clone_from(&entry.hash);
        chain.entries.push_back(entry.clone());
        while chain.entries.len() > self.capacity {
            if let Some(evicted) = chain.entries.pop_front() {
                chain.anchor = evicted.hash;
            }
        }
        // Journal order must match chain order
        self.write_journal(&entry);
        drop(chain);
        entry
    }

    /// Verify the retained chain from the anchor
    ///
    /// # Errors
    /// Returns `AuditError::IntegrityViolation` at the first entry whose link
    /// or hash does not match
    pub fn verify_integrity(&self) -> Result<(), AuditError> {
        let chain = self.chain.lock();
        let mut prev = chain.anchor.as_str();
        for entry in &chain.entries {
            if entry.prev_hash != prev || entry.hash != compute_hash(entry) {
                return Err(AuditError::IntegrityViolation { seq: entry.seq });
            }
            prev = entry.hash.as_str();
        }
        Ok(())
    }

    /// Retained entries, oldest first
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.chain.lock().entries.iter().cloned().collect()
    }

    /// The `n` most recent entries, oldest first
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<AuditEntry> {
        let chain = self.chain.lock();
        let skip = chain.entries.len().saturating_sub(n);
        chain.entries.iter().skip(skip).cloned().collect()
    }

    /// Hash of the latest entry (genesis hash when empty)
    #[must_use]
    pub fn head_hash(&self) -> String {
        self.chain.lock().last_hash.clone()
    }

    /// Retained entry count
    #[must_use]
    pub fn len(&self) -> usize {
        self.chain.lock().entries.len()
    }

    /// Check if nothing is retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.lock().entries.is_empty()
    }

    fn write_journal(&self, entry: &AuditEntry) {
        let Some(journal) = &self.journal else {
            return;
        };
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(seq = entry.seq, error = %err, "failed to encode audit entry");
                return;
            }
        };
        if let Err(err) = writeln!(journal.lock(), "{line}") {
            tracing::warn!(seq = entry.seq, error = %err, "failed to write audit journal");
        }
    }
}

fn compute_hash(entry: &AuditEntry) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entry.seq.to_le_bytes());
    hasher.update(entry.timestamp.to_rfc3339().as_bytes());
    hasher.update([0]);
    hasher.update(entry.kind.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(entry.subject.as_bytes());
    hasher.update([0]);
    hasher.update(entry.body.to_string().as_bytes());
    hasher.update([0]);
    hasher.update(entry.prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}
