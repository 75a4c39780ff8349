//! Results that tolerate per-entity failures.

use serde::Serialize;

/// A result that may omit some entities because of permission restrictions
/// or failed sub-queries. Such omissions are flagged, never fatal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialResult<T> {
    pub data: T,
    pub partial: bool,
    pub denied_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl<T> PartialResult<T> {
    /// A complete result.
    pub fn new(data: T) -> Self {
        Self {
            data,
            partial: false,
            denied_count: 0,
            warnings: Vec::new(),
        }
    }

    /// Record a non-fatal failure. Marks the result partial.
    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
        self.partial = true;
    }

    /// Count entities hidden by access restrictions.
    pub fn record_denied(&mut self, n: usize) {
        if n > 0 {
            self.denied_count += n;
            self.partial = true;
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PartialResult<U> {
        PartialResult {
            data: f(self.data),
            partial: self.partial,
            denied_count: self.denied_count,
            warnings: self.warnings,
        }
    }

    pub fn into_inner(self) -> T {
        self.data
    }
}

impl<T: Default> Default for PartialResult<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
