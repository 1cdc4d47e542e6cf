//! Two-phase active document selection.
//!
//! A local selection is applied immediately and stays pending until a
//! matching `cambio-documento` confirms it, a different one overrides it, the
//! request fails (reverted) or it times out (kept, pending cleared).

use std::time::{Duration, Instant};

/// Issued by a local selection; hand it back with the request result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectTicket {
    pub(crate) epoch: u64,
    pub(crate) seq: u64,
    document_id: String,
}

impl SelectTicket {
    pub(crate) fn new(epoch: u64, seq: u64, document_id: String) -> Self {
        Self { epoch, seq, document_id }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }
}

#[derive(Debug, Clone)]
struct Pending {
    seq: u64,
    document_id: String,
    /// Last confirmed document, restored if the request fails.
    previous: Option<String>,
    started: Instant,
}

/// How a remote document change related to local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Matched the pending local selection.
    Confirmed,
    /// Replaced a different pending local selection.
    Overridden,
    /// Switched documents with nothing pending.
    Switched,
    /// Already showing that document.
    Unchanged,
}

impl RemoteOutcome {
    /// Whether the visible document changed.
    pub fn switched(self) -> bool {
        matches!(self, RemoteOutcome::Overridden | RemoteOutcome::Switched)
    }
}

/// Active document id plus at most one pending local selection.
#[derive(Debug, Clone, Default)]
pub struct DocumentSelection {
    active: Option<String>,
    pending: Option<Pending>,
    next_seq: u64,
}

impl DocumentSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn pending(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.document_id.as_str())
    }

    /// Apply a local selection optimistically. Returns the request sequence
    /// number and whether the active document changed.
    pub fn begin(&mut self, document_id: String, now: Instant) -> (u64, bool) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let previous = match self.pending.take() {
            Some(superseded) => superseded.previous,
            None => self.active.clone(),
        };
        let changed = self.active.as_deref() != Some(document_id.as_str());
        self.active = Some(document_id.clone());
        self.pending = Some(Pending {
            seq,
            document_id,
            previous,
            started: now,
        });
        (seq, changed)
    }

    /// The request for `seq` failed. Returns the restored document id
    /// (itself possibly `None`) when the selection was reverted.
    pub fn fail(&mut self, seq: u64) -> Option<Option<String>> {
        if self.pending.as_ref().is_none_or(|p| p.seq != seq) {
            return None;
        }
        let pending = self.pending.take()?;
        self.active = pending.previous.clone();
        Some(pending.previous)
    }

    /// A `cambio-documento` announced `document_id`.
    pub fn remote(&mut self, document_id: &str) -> RemoteOutcome {
        let outcome = match self.pending.take() {
            Some(p) if p.document_id == document_id => RemoteOutcome::Confirmed,
            Some(_) => RemoteOutcome::Overridden,
            None if self.active.as_deref() == Some(document_id) => RemoteOutcome::Unchanged,
            None => RemoteOutcome::Switched,
        };
        self.active = Some(document_id.to_string());
        outcome
    }

    /// Drop a pending selection older than `timeout`, keeping the local value.
    /// Returns the id whose confirmation never arrived.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Option<String> {
        let expired = self
            .pending
            .as_ref()
            .is_some_and(|p| now.saturating_duration_since(p.started) >= timeout);
        if expired {
            self.pending.take().map(|p| p.document_id)
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.active = None;
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmed(id: &str) -> DocumentSelection {
        let mut sel = DocumentSelection::new();
        sel.remote(id);
        sel
    }

    #[test]
    fn test_begin_applies_immediately() {
        let mut sel = confirmed("a");
        let (_, changed) = sel.begin("b".into(), Instant::now());
        assert!(changed);
        assert_eq!(sel.active(), Some("b"));
        assert_eq!(sel.pending(), Some("b"));
    }

    #[test]
    fn test_matching_remote_confirms() {
        let mut sel = confirmed("a");
        sel.begin("b".into(), Instant::now());
        assert_eq!(sel.remote("b"), RemoteOutcome::Confirmed);
        assert_eq!(sel.pending(), None);
        assert_eq!(sel.active(), Some("b"));
    }

    #[test]
    fn test_different_remote_overrides() {
        let mut sel = confirmed("a");
        sel.begin("b".into(), Instant::now());
        assert_eq!(sel.remote("c"), RemoteOutcome::Overridden);
        assert_eq!(sel.active(), Some("c"));
        assert_eq!(sel.pending(), None);
    }

    #[test]
    fn test_failure_reverts_to_last_confirmed() {
        let mut sel = confirmed("a");
        sel.begin("b".into(), Instant::now());
        let (seq, _) = sel.begin("c".into(), Instant::now());
        assert_eq!(sel.fail(seq), Some(Some("a".to_string())));
        assert_eq!(sel.active(), Some("a"));
    }

    #[test]
    fn test_stale_failure_ignored() {
        let mut sel = confirmed("a");
        let (old, _) = sel.begin("b".into(), Instant::now());
        sel.begin("c".into(), Instant::now());
        assert_eq!(sel.fail(old), None);
        assert_eq!(sel.active(), Some("c"));
    }

    #[test]
    fn test_expire_keeps_local_value() {
        let start = Instant::now();
        let mut sel = confirmed("a");
        sel.begin("b".into(), start);
        let timeout = Duration::from_secs(10);
        assert_eq!(sel.expire(start + Duration::from_secs(1), timeout), None);
        assert_eq!(sel.expire(start + timeout, timeout), Some("b".to_string()));
        assert_eq!(sel.pending(), None);
        assert_eq!(sel.active(), Some("b"));
    }

    #[test]
    fn test_repeat_remote_is_unchanged() {
        let mut sel = confirmed("a");
        assert_eq!(sel.remote("a"), RemoteOutcome::Unchanged);
        assert!(!RemoteOutcome::Unchanged.switched());
    }
}
