//! Reply and boost filters applied to fetched pages.
//!
//! Filtering happens after the fetcher has classified the page as full or
//! not, so a page thinned out by filters still leaves a gap behind it.

use serde::{Deserialize, Serialize};

use crate::core::config::FilterConfig;
use crate::timeline::entity::StatusCarrier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedFilter {
    pub show_replies: bool,
    pub show_reblogs: bool,
}

impl Default for FeedFilter {
    fn default() -> Self {
        Self {
            show_replies: true,
            show_reblogs: true,
        }
    }
}

impl From<&FilterConfig> for FeedFilter {
    fn from(config: &FilterConfig) -> Self {
        Self {
            show_replies: config.show_replies,
            show_reblogs: config.show_reblogs,
        }
    }
}

impl FeedFilter {
    /// Whether the filter lets everything through.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.show_replies && self.show_reblogs
    }

    #[must_use]
    pub fn accepts<T: StatusCarrier>(&self, entry: &T) -> bool {
        let Some(status) = entry.status() else {
            return true;
        };
        if !self.show_reblogs && status.is_reblog() {
            return false;
        }
        // Self-replies (threads) stay visible.
        !(!self.show_replies && status.is_reply_to_other())
    }

    /// Drop filtered entries, keeping order.
    #[must_use]
    pub fn apply<T: StatusCarrier>(&self, page: Vec<T>) -> Vec<T> {
        if self.is_open() {
            return page;
        }
        page.into_iter().filter(|entry| self.accepts(entry)).collect()
    }
}
