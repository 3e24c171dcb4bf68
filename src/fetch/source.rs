//! The remote page source seam.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::timeline::cursor::Cursor;

/// Bounds and size of one page request.
///
/// `older_than` maps to the API's `max_id`, `newer_than` to `since_id`;
/// both bounds are exclusive. Planned requests put `newer_than` one below the
/// nearest held entry, so a page that reaches that entry repeats it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub older_than: Option<Cursor>,
    pub newer_than: Option<Cursor>,
    pub limit: usize,
}

impl PageRequest {
    #[must_use]
    pub const fn newest(limit: usize) -> Self {
        Self {
            older_than: None,
            newer_than: None,
            limit,
        }
    }
}

/// One page as the server returned it, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor of the following (older) page, from the `Link` header.
    pub next: Option<Cursor>,
}

impl<T> Page<T> {
    #[must_use]
    pub const fn new(items: Vec<T>, next: Option<Cursor>) -> Self {
        Self { items, next }
    }
}

/// A remote feed.
///
/// Implementations must return items newest first and report failures as
/// `TlsError::TransientNetwork` (connectivity) or `TlsError::Server`
/// (non-2xx, malformed body). Calls run on fetch worker threads.
pub trait PageSource<T>: Send + Sync {
    fn fetch_page(&self, request: &PageRequest) -> Result<Page<T>>;

    /// Short label for logs.
    fn name(&self) -> &str {
        "remote"
    }
}

impl<T, S: PageSource<T> + ?Sized> PageSource<T> for Arc<S> {
    fn fetch_page(&self, request: &PageRequest) -> Result<Page<T>> {
        (**self).fetch_page(request)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
