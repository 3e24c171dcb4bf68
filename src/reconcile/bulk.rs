//! In-memory bulk edits driven by local user actions.
//!
//! These act only on what the list currently holds; nothing here talks to the
//! server. Every removal is followed by gap collapsing.

use crate::timeline::entity::StatusCarrier;
use crate::timeline::item::FeedEntry;
use crate::timeline::list::OrderedItemList;

/// Remove every entry carrying status `id` (boosts match either id).
pub fn remove_carrying<T: StatusCarrier, V>(list: &mut OrderedItemList<T, V>, id: &str) -> usize {
    let removed = list.retain_entries(|entry| !entry.carries_status(id));
    list.collapse_gaps();
    removed
}

/// Remove every entry authored or boosted by `account_id`.
pub fn remove_by_account<T: FeedEntry, V>(
    list: &mut OrderedItemList<T, V>,
    account_id: &str,
) -> usize {
    let removed = list.retain_entries(|entry| !entry.account_ids().contains(&account_id));
    list.collapse_gaps();
    removed
}

/// Remove every entry whose author lives on `domain`.
pub fn remove_by_domain<T: FeedEntry, V>(list: &mut OrderedItemList<T, V>, domain: &str) -> usize {
    let removed = list.retain_entries(|entry| {
        !entry
            .account_domains()
            .iter()
            .any(|host| host.eq_ignore_ascii_case(domain))
    });
    list.collapse_gaps();
    removed
}

/// Mute a conversation: flag every held entry sharing `key`, or drop them.
///
/// Returns how many entries were flagged or removed.
pub fn mute_conversation<T: StatusCarrier, V>(
    list: &mut OrderedItemList<T, V>,
    key: &str,
    remove: bool,
) -> usize {
    let in_thread = |entry: &T| entry.conversation_key() == Some(key);
    if remove {
        let removed = list.retain_entries(|entry| !in_thread(entry));
        list.collapse_gaps();
        return removed;
    }
    list.update_where(in_thread, |entry| {
        if let Some(status) = entry.status_mut() {
            status.actionable_mut().thread_muted = true;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::entity::{Account, Status, Visibility};
    use crate::timeline::item::Item;

    fn account(id: &str, host: &str) -> Account {
        Account {
            id: id.to_string(),
            username: format!("u{id}"),
            acct: format!("u{id}@{host}"),
            display_name: String::new(),
            url: format!("https://{host}/@u{id}"),
        }
    }

    fn status(id: &str, author: Account, conversation: Option<&str>) -> Status {
        Status {
            id: id.to_string(),
            uri: None,
            url: None,
            account: author,
            in_reply_to_id: None,
            in_reply_to_account_id: None,
            reblog: None,
            content: String::new(),
            created_at: chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
            edited_at: None,
            reblogs_count: 0,
            favourites_count: 0,
            replies_count: 0,
            reblogged: false,
            favourited: false,
            bookmarked: false,
            muted: false,
            thread_muted: false,
            sensitive: false,
            spoiler_text: String::new(),
            visibility: Visibility::Public,
            pinned: false,
            poll: None,
            conversation_id: conversation.map(str::to_string),
        }
    }

    fn boost(id: &str, by: Account, inner: Status) -> Status {
        let mut outer = status(id, by, None);
        outer.reblog = Some(Box::new(inner));
        outer
    }

    fn list(entries: Vec<Item<Status>>) -> OrderedItemList<Status, bool> {
        let mut list = OrderedItemList::new(|item: &Item<Status>| {
            item.as_real().is_some_and(|s| s.actionable().thread_muted)
        });
        list.push_back(entries);
        list
    }

    #[test]
    fn remove_carrying_catches_boosts_and_collapses_gaps() {
        let alice = account("1", "a.example");
        let original = status("10", alice.clone(), None);
        let mut l = list(vec![
            Item::Real(boost("12", account("2", "b.example"), original.clone())),
        ]);
        let gap = l.new_gap();
        l.push_back([gap]);
        l.push_back([Item::Real(original)]);
        let trailing = l.new_gap();
        l.push_back([trailing]);

        assert_eq!(remove_carrying(&mut l, "10"), 2);
        assert_eq!(l.len(), 1);
        assert!(l.get(0).is_some_and(Item::is_gap));
    }

    #[test]
    fn account_and_domain_blocks() {
        let alice = account("1", "a.example");
        let bob = account("2", "B.Example");
        let mut l = list(vec![
            Item::Real(status("30", alice.clone(), None)),
            Item::Real(boost("29", bob.clone(), status("5", alice.clone(), None))),
            Item::Real(status("28", bob, None)),
        ]);
        assert_eq!(remove_by_domain(&mut l, "b.example"), 1);
        assert_eq!(l.len(), 2);
        assert_eq!(remove_by_account(&mut l, "1"), 2);
        assert!(l.is_empty());
    }

    #[test]
    fn mute_conversation_flags_or_removes() {
        let alice = account("1", "a.example");
        let mut l = list(vec![
            Item::Real(status("30", alice.clone(), Some("c1"))),
            Item::Real(status("29", alice.clone(), Some("c2"))),
            Item::Real(boost("28", alice.clone(), status("3", alice, Some("c1")))),
        ]);
        assert_eq!(mute_conversation(&mut l, "c1", false), 2);
        assert_eq!(l.views(), &[true, false, true]);
        assert_eq!(l.len(), 3);

        assert_eq!(mute_conversation(&mut l, "c1", true), 2);
        assert_eq!(l.len(), 1);
    }
}
