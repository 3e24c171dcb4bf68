//! View data derived from list items.
//!
//! The mapping functions here are pure: the same item always yields the same
//! view. [`OrderedItemList`](crate::timeline::list::OrderedItemList) calls them
//! for every inserted or patched item.

#![allow(missing_docs)]

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::timeline::entity::{Notification, NotificationKind, Status};
use crate::timeline::item::{Gap, Item};

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid html tag regex"));

/// Plain text of an HTML status body.
#[must_use]
pub fn plain_text(html: &str) -> String {
    let spaced = html.replace("</p><p>", "\n").replace("<br>", "\n");
    TAG_RE
        .replace_all(&spaced, "")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .trim()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusView {
    pub id: String,
    /// Id of the status actions apply to (the boosted one for a boost).
    pub actionable_id: String,
    pub author: String,
    pub reblogged_by: Option<String>,
    pub text: String,
    pub spoiler_text: String,
    pub reblogged: bool,
    pub favourited: bool,
    pub bookmarked: bool,
    pub muted: bool,
    pub thread_muted: bool,
    pub is_reply: bool,
    pub edited: bool,
    pub poll_voted: Option<bool>,
    pub reblogs_count: u64,
    pub favourites_count: u64,
}

impl StatusView {
    #[must_use]
    pub fn from_status(status: &Status) -> Self {
        let target = status.actionable();
        Self {
            id: status.id.clone(),
            actionable_id: target.id.clone(),
            author: target.account.acct.clone(),
            reblogged_by: status.is_reblog().then(|| status.account.acct.clone()),
            text: plain_text(&target.content),
            spoiler_text: target.spoiler_text.clone(),
            reblogged: target.reblogged,
            favourited: target.favourited,
            bookmarked: target.bookmarked,
            muted: target.muted,
            thread_muted: target.thread_muted,
            is_reply: target.in_reply_to_id.is_some(),
            edited: target.edited_at.is_some(),
            poll_voted: target.poll.as_ref().map(|p| p.voted),
            reblogs_count: target.reblogs_count,
            favourites_count: target.favourites_count,
        }
    }
}

/// Row of a status timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusViewData {
    Concrete(StatusView),
    Placeholder { id: i64, loading: bool },
}

impl StatusViewData {
    #[must_use]
    pub const fn is_loading_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder { loading: true, .. })
    }
}

const fn placeholder(gap: Gap) -> (i64, bool) {
    (gap.id.raw(), gap.loading)
}

/// Mapping function for status timelines.
#[must_use]
pub fn status_view(item: &Item<Status>) -> StatusViewData {
    match item {
        Item::Real(status) => StatusViewData::Concrete(StatusView::from_status(status)),
        Item::Gap(gap) => {
            let (id, loading) = placeholder(*gap);
            StatusViewData::Placeholder { id, loading }
        }
    }
}

/// Row of the notifications screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationViewData {
    Concrete {
        id: String,
        notification: NotificationKind,
        account: String,
        status: Option<StatusView>,
    },
    Placeholder {
        id: i64,
        loading: bool,
    },
}

/// Mapping function for the notifications screen.
#[must_use]
pub fn notification_view(item: &Item<Notification>) -> NotificationViewData {
    match item {
        Item::Real(n) => NotificationViewData::Concrete {
            id: n.id.clone(),
            notification: n.kind,
            account: n.account.acct.clone(),
            status: n.status.as_ref().map(StatusView::from_status),
        },
        Item::Gap(gap) => {
            let (id, loading) = placeholder(*gap);
            NotificationViewData::Placeholder { id, loading }
        }
    }
}
