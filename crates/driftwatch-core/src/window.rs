use chrono::{DateTime, Utc};

/// Time bounds for a branch-mode scan. Inclusion is decided on submit time;
/// update time only feeds the crossed-start early exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Outcome of testing one change against the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCheck {
    Keep,
    Skip,
    /// The change was last updated before the window start. Under the
    /// descending-submit-time pagination invariant nothing newer can follow,
    /// so the scan must stop here.
    CrossedStart,
}

/// Why a paginated scan terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A short page: the remote ran out of changes.
    Exhausted,
    CrossedStart,
    /// The remote returned an empty page.
    PageEmpty,
}

impl ScanWindow {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn check(&self, submitted: DateTime<Utc>, updated: DateTime<Utc>) -> WindowCheck {
        if let Some(start) = self.start {
            if updated < start {
                return WindowCheck::CrossedStart;
            }
            if submitted < start {
                return WindowCheck::Skip;
            }
        }
        if let Some(end) = self.end {
            if submitted > end {
                return WindowCheck::Skip;
            }
        }
        WindowCheck::Keep
    }
}
