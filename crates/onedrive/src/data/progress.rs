use std::fmt;
use std::sync::Arc;

/// Callback receiving transfer events on the thread doing the I/O.
///
/// Invoked synchronously between blocking steps, so it must return quickly.
pub type Observer = Arc<dyn Fn(&TransferEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A segment request is about to be issued.
    NewSegment,
    /// Bytes of the current segment consumed so far, reported before each read.
    Progress { progress: u64, total: u64 },
    /// The segment request returned.
    FinishSegment,
    /// The same segment is being sent again after a transient failure.
    Retry,
    /// The whole session is being re-established.
    Restart { attempt: u32 },
}

/// A notification about one file's transfer.
///
/// `to` is `None` for open-ended download segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub kind: EventKind,
    pub file: String,
    pub from: u64,
    pub to: Option<u64>,
}

impl TransferEvent {
    pub fn name(&self) -> &'static str {
        match self.kind {
            EventKind::NewSegment => "new_segment",
            EventKind::Progress { .. } => "progress",
            EventKind::FinishSegment => "finish_segment",
            EventKind::Retry => "retry",
            EventKind::Restart { .. } => "restart",
        }
    }
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}-", self.name(), self.file, self.from)?;
        if let Some(to) = self.to {
            write!(f, "{to}")?;
        }
        if let EventKind::Progress { progress, total } = self.kind {
            write!(f, " ({progress}/{total})")?;
        }
        Ok(())
    }
}

/// Emits events for one file, tolerating the absence of an observer.
#[derive(Clone)]
pub(crate) struct Reporter {
    file: String,
    observer: Option<Observer>,
}

impl Reporter {
    pub(crate) fn new(file: impl Into<String>, observer: Option<Observer>) -> Self {
        Self {
            file: file.into(),
            observer,
        }
    }

    pub(crate) fn emit(&self, kind: EventKind, from: u64, to: Option<u64>) {
        if let Some(observer) = &self.observer {
            observer(&TransferEvent {
                kind,
                file: self.file.clone(),
                from,
                to,
            });
        }
    }
}
