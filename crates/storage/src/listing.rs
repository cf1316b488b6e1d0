//! Best-effort enumeration results.

/// An entry left out of a best-effort listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedObject {
    /// Key of the offending object, when the failure names one.
    pub key: Option<String>,
    pub reason: String,
}

/// Items that could be read, plus the entries that were skipped.
///
/// Enumerations never fail because of a single bad entry; callers that care
/// about completeness check `skipped`.
#[derive(Clone, Debug, PartialEq)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub skipped: Vec<SkippedObject>,
}

impl<T> Default for Listing<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<T> Listing<T> {
    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn skip(&mut self, key: Option<String>, reason: impl ToString) {
        self.skipped.push(SkippedObject {
            key,
            reason: reason.to_string(),
        });
    }

    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}
