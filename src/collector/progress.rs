use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    Started,
    Finished,
    Failed,
    Snapshotting,
    Completed,
    Aborted,
}

/// A progress report: `index` of `total` repositories done, plus a
/// human-readable status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub index: usize,
    pub total: usize,
    pub kind: ProgressKind,
    pub message: String,
}

impl Progress {
    pub fn new(index: usize, total: usize, kind: ProgressKind, message: impl Into<String>) -> Self {
        Self {
            index,
            total,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.index, self.total, self.message)
    }
}
