//! Pagination cursors and server-id arithmetic.
//!
//! Every feed kind pages with one [`Cursor`] type. Item-id feeds build cursors
//! from entry ids; link-header feeds (notifications, favourites, bookmarks)
//! carry the opaque `max_id` token of the `next` relation.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Opaque position in a feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Cursor {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// How the Bottom cursor of a feed is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationStyle {
    /// Older pages are requested with the id of the oldest held entry.
    #[default]
    ItemId,
    /// Older pages are requested with the `next` cursor of the previous page.
    LinkHeader,
}

/// Recency order of two server ids: longer ids are newer, equal lengths
/// compare bytewise.
#[must_use]
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.as_bytes().cmp(b.as_bytes()))
}

#[must_use]
pub fn is_newer(a: &str, than: &str) -> bool {
    compare_ids(a, than) == Ordering::Greater
}

const ID_MIN: u8 = b'0';
const ID_MAX: u8 = b'z';

/// Smallest id strictly newer than `id` in the `0..=z` alphabet.
#[must_use]
pub fn increment_id(id: &str) -> String {
    let mut bytes = id.as_bytes().to_vec();
    for slot in bytes.iter_mut().rev() {
        if *slot < ID_MAX {
            *slot += 1;
            return String::from_utf8_lossy(&bytes).into_owned();
        }
        *slot = ID_MIN;
    }
    let mut grown = Vec::with_capacity(bytes.len() + 1);
    grown.push(b'1');
    grown.extend(std::iter::repeat_n(ID_MIN, bytes.len()));
    String::from_utf8_lossy(&grown).into_owned()
}

/// Largest id strictly older than `id` in the `0..=z` alphabet.
#[must_use]
pub fn decrement_id(id: &str) -> String {
    if id.is_empty() {
        return String::new();
    }
    let mut bytes = id.as_bytes().to_vec();
    let mut exhausted = true;
    for slot in bytes.iter_mut().rev() {
        if *slot > ID_MIN {
            *slot -= 1;
            exhausted = false;
            break;
        }
        *slot = ID_MAX;
    }
    if exhausted {
        return String::from_utf8_lossy(&bytes[1..]).into_owned();
    }
    // A borrow out of the leading digit shortens the id.
    let start = usize::from(bytes.len() > 1 && bytes[0] == ID_MIN);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([^>]*)>\s*((?:;\s*[A-Za-z*]+\s*=\s*(?:"[^"]*"|[^,;]*)\s*)*)"#)
        .expect("valid link header regex")
});

static REL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)rel\s*=\s*"?([^";,]+)"?"#).expect("valid rel parameter regex")
});

/// One entry of an RFC 8288 `Link` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLink {
    pub uri: String,
    pub relations: Vec<String>,
}

impl HeaderLink {
    /// Value of a query parameter of the link target.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        let query = self.uri.split_once('?')?.1;
        let query = query.split('#').next().unwrap_or(query);
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name && !value.is_empty()).then_some(value)
        })
    }
}

/// Parse every link of a `Link` header; malformed segments are skipped.
#[must_use]
pub fn parse_link_header(header: &str) -> Vec<HeaderLink> {
    LINK_RE
        .captures_iter(header)
        .map(|caps| {
            let uri = caps.get(1).map_or("", |m| m.as_str()).trim().to_string();
            let params = caps.get(2).map_or("", |m| m.as_str());
            let relations = REL_RE
                .captures(params)
                .and_then(|rel| rel.get(1))
                .map(|rel| {
                    rel.as_str()
                        .split_whitespace()
                        .map(str::to_ascii_lowercase)
                        .collect()
                })
                .unwrap_or_default();
            HeaderLink { uri, relations }
        })
        .collect()
}

/// Cursor for the next (older) page: the `max_id` of the `rel="next"` link.
#[must_use]
pub fn next_cursor_from_link_header(header: &str) -> Option<Cursor> {
    parse_link_header(header)
        .iter()
        .find(|link| link.relations.iter().any(|rel| rel == "next"))
        .and_then(|link| link.query_param("max_id"))
        .map(Cursor::new)
}
