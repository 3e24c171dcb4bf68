//! Feed payloads as the REST API delivers them.
//!
//! Only the fields the list logic and local events touch are modelled;
//! unknown fields are ignored on deserialization.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timeline::item::FeedEntry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub acct: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub url: String,
}

impl Account {
    /// Host part of the profile url, e.g. `mastodon.social`.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        let rest = self.url.split_once("://").map_or(self.url.as_str(), |(_, r)| r);
        let host = rest.split(['/', '?', '#']).next()?;
        let host = host.rsplit('@').next()?;
        let host = host.split(':').next()?;
        (!host.is_empty()).then_some(host)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
    Private,
    Direct,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub title: String,
    #[serde(default)]
    pub votes_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    #[serde(default)]
    pub expired: bool,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub votes_count: u64,
    #[serde(default)]
    pub options: Vec<PollOption>,
    #[serde(default)]
    pub voted: bool,
    #[serde(default)]
    pub own_votes: Vec<usize>,
}

impl Poll {
    /// Copy of this poll with the local user's choices counted.
    #[must_use]
    pub fn voted(&self, choices: &[usize]) -> Self {
        let mut next = self.clone();
        for &choice in choices {
            if let Some(option) = next.options.get_mut(choice) {
                option.votes_count = Some(option.votes_count.unwrap_or(0) + 1);
            }
        }
        next.votes_count += choices.len() as u64;
        next.voted = true;
        next.own_votes = choices.to_vec();
        next
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub id: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub account: Account,
    #[serde(default)]
    pub in_reply_to_id: Option<String>,
    #[serde(default)]
    pub in_reply_to_account_id: Option<String>,
    #[serde(default)]
    pub reblog: Option<Box<Status>>,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reblogs_count: u64,
    #[serde(default)]
    pub favourites_count: u64,
    #[serde(default)]
    pub replies_count: u64,
    #[serde(default)]
    pub reblogged: bool,
    #[serde(default)]
    pub favourited: bool,
    #[serde(default)]
    pub bookmarked: bool,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub thread_muted: bool,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub spoiler_text: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub poll: Option<Poll>,
    /// Pleroma exposes the thread grouping key; Mastodon leaves it out.
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl Status {
    /// The status the user acts on: the boosted one for a boost.
    #[must_use]
    pub fn actionable(&self) -> &Self {
        self.reblog.as_deref().unwrap_or(self)
    }

    pub fn actionable_mut(&mut self) -> &mut Self {
        match self.reblog {
            Some(ref mut inner) => inner,
            None => self,
        }
    }

    #[must_use]
    pub fn is_reblog(&self) -> bool {
        self.reblog.is_some()
    }

    /// A reply to someone other than the author.
    #[must_use]
    pub fn is_reply_to_other(&self) -> bool {
        let target = self.actionable();
        target.in_reply_to_id.is_some()
            && target.in_reply_to_account_id.as_deref() != Some(target.account.id.as_str())
    }
}

impl FeedEntry for Status {
    fn id(&self) -> &str {
        &self.id
    }

    fn matches_id(&self, id: &str) -> bool {
        self.id == id || self.reblog.as_ref().is_some_and(|inner| inner.id == id)
    }

    fn conversation_key(&self) -> Option<&str> {
        let target = self.actionable();
        Some(target.conversation_id.as_deref().unwrap_or(target.id.as_str()))
    }

    fn account_ids(&self) -> Vec<&str> {
        let mut ids = vec![self.account.id.as_str()];
        if let Some(inner) = &self.reblog {
            ids.push(inner.account.id.as_str());
        }
        ids
    }

    fn account_domains(&self) -> Vec<&str> {
        self.actionable().account.domain().into_iter().collect()
    }

    fn created_at_ms(&self) -> i64 {
        self.created_at.timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Mention,
    Reblog,
    Favourite,
    Follow,
    FollowRequest,
    Poll,
    Status,
    Update,
    Move,
    #[serde(alias = "pleroma:emoji_reaction")]
    EmojiReaction,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub created_at: DateTime<Utc>,
    pub account: Account,
    #[serde(default)]
    pub status: Option<Status>,
}

impl FeedEntry for Notification {
    fn id(&self) -> &str {
        &self.id
    }

    fn conversation_key(&self) -> Option<&str> {
        self.status.as_ref().and_then(FeedEntry::conversation_key)
    }

    fn account_ids(&self) -> Vec<&str> {
        let mut ids = vec![self.account.id.as_str()];
        if let Some(status) = &self.status {
            ids.extend(status.account_ids());
        }
        ids
    }

    fn account_domains(&self) -> Vec<&str> {
        self.account.domain().into_iter().collect()
    }

    fn created_at_ms(&self) -> i64 {
        self.created_at.timestamp_millis()
    }
}

/// Entries that carry a status local events can act on.
pub trait StatusCarrier: FeedEntry {
    fn status(&self) -> Option<&Status>;
    fn status_mut(&mut self) -> Option<&mut Status>;

    /// Whether the carried status is `status_id` or boosts it.
    ///
    /// Looks at status ids only; a notification's own id is never compared.
    fn carries_status(&self, status_id: &str) -> bool {
        self.status().is_some_and(|status| status.matches_id(status_id))
    }
}

impl StatusCarrier for Status {
    fn status(&self) -> Option<&Status> {
        Some(self)
    }

    fn status_mut(&mut self) -> Option<&mut Status> {
        Some(self)
    }
}

impl StatusCarrier for Notification {
    fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> Option<&mut Status> {
        self.status.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str, url: &str) -> Account {
        Account {
            id: id.to_string(),
            username: format!("user{id}"),
            acct: format!("user{id}"),
            display_name: String::new(),
            url: url.to_string(),
        }
    }

    #[test]
    fn deserializes_mastodon_status_json() {
        let raw = r#"{
            "id": "109",
            "account": {"id": "7", "username": "ada", "acct": "ada", "url": "https://social.example/@ada"},
            "content": "<p>hello</p>",
            "created_at": "2024-03-01T10:00:00.000Z",
            "visibility": "unlisted",
            "favourited": true,
            "media_attachments": []
        }"#;
        let status: Status = serde_json::from_str(raw).expect("status json");
        assert_eq!(status.id, "109");
        assert!(status.favourited);
        assert_eq!(status.visibility, Visibility::Unlisted);
        assert_eq!(status.account.domain(), Some("social.example"));
        assert_eq!(status.conversation_key(), Some("109"));
    }

    #[test]
    fn unknown_notification_kind_is_tolerated() {
        let raw = r#"{
            "id": "5", "type": "admin.sign_up",
            "created_at": "2024-03-01T10:00:00Z",
            "account": {"id": "2"}
        }"#;
        let n: Notification = serde_json::from_str(raw).expect("notification json");
        assert_eq!(n.kind, NotificationKind::Unknown);
        assert!(n.status.is_none());
    }

    #[test]
    fn notification_identity_is_separate_from_status_ids() {
        let raw = r#"{
            "id": "1049", "type": "favourite",
            "created_at": "2024-03-01T10:00:00Z",
            "account": {"id": "2"},
            "status": {"id": "77", "created_at": "2024-03-01T10:00:00Z",
                "account": {"id": "3"},
                "reblog": {"id": "70", "created_at": "2024-03-01T10:00:00Z", "account": {"id": "4"}}}
        }"#;
        let n: Notification = serde_json::from_str(raw).expect("notification json");
        assert!(n.matches_id("1049"));
        assert!(!n.matches_id("77"));
        assert!(n.carries_status("77"));
        assert!(n.carries_status("70"));
        assert!(!n.carries_status("1049"));
    }

    #[test]
    fn account_domain_variants() {
        assert_eq!(
            account("1", "https://mastodon.social/@bob").domain(),
            Some("mastodon.social")
        );
        assert_eq!(account("1", "http://host.example:8080/u").domain(), Some("host.example"));
        assert_eq!(account("1", "").domain(), None);
    }

    #[test]
    fn poll_vote_counts_choices() {
        let poll = Poll {
            id: "p".into(),
            expired: false,
            multiple: true,
            votes_count: 3,
            options: vec![
                PollOption {
                    title: "a".into(),
                    votes_count: Some(1),
                },
                PollOption {
                    title: "b".into(),
                    votes_count: Some(2),
                },
            ],
            voted: false,
            own_votes: Vec::new(),
        };
        let after = poll.voted(&[0, 1]);
        assert!(after.voted);
        assert_eq!(after.votes_count, 5);
        assert_eq!(after.options[0].votes_count, Some(2));
        assert_eq!(after.own_votes, vec![0, 1]);
    }
}
