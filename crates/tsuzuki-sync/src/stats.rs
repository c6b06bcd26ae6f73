use std::fmt;

use serde::Serialize;

/// Outcome counters for one reconciliation pass, with one detail line per event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: usize,
    pub details: Vec<String>,
}

impl SyncStats {
    pub fn added(&mut self, detail: impl Into<String>) {
        self.added += 1;
        self.details.push(detail.into());
    }

    pub fn updated(&mut self, detail: impl Into<String>) {
        self.updated += 1;
        self.details.push(detail.into());
    }

    pub fn deleted(&mut self, detail: impl Into<String>) {
        self.deleted += 1;
        self.details.push(detail.into());
    }

    pub fn skipped(&mut self, detail: impl Into<String>) {
        self.skipped += 1;
        self.details.push(detail.into());
    }

    pub fn error(&mut self, detail: impl Into<String>) {
        self.errors += 1;
        let detail = detail.into();
        tracing::warn!(detail = %detail, "sync item failed");
        self.details.push(detail);
    }

    /// Fold another pass's counters and details into this one.
    pub fn merge(&mut self, other: SyncStats) {
        self.added += other.added;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.details.extend(other.details);
    }

    /// Number of mutations applied on either side.
    pub fn changes(&self) -> usize {
        self.added + self.updated + self.deleted
    }
}

impl fmt::Display for SyncStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} updated, {} deleted, {} skipped, {} errors",
            self.added, self.updated, self.deleted, self.skipped, self.errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_details_stay_in_step() {
        let mut stats = SyncStats::default();
        stats.added("Added Frieren");
        stats.skipped("Frieren unchanged");
        stats.error("Failed to push 42: timeout");

        assert_eq!((stats.added, stats.skipped, stats.errors), (1, 1, 1));
        assert_eq!(stats.details.len(), 3);
        assert_eq!(stats.changes(), 1);
    }

    #[test]
    fn test_merge() {
        let mut a = SyncStats::default();
        a.updated("a");
        let mut b = SyncStats::default();
        b.deleted("b");
        b.updated("c");
        a.merge(b);

        assert_eq!(a.updated, 2);
        assert_eq!(a.deleted, 1);
        assert_eq!(a.details, vec!["a", "b", "c"]);
        assert_eq!(
            a.to_string(),
            "0 added, 2 updated, 1 deleted, 0 skipped, 0 errors"
        );
    }
}
