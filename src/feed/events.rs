//! Local user actions applied to held entries without a re-fetch.

use serde::{Deserialize, Serialize};

use crate::reconcile::bulk;
use crate::timeline::entity::{Status, StatusCarrier};
use crate::timeline::list::OrderedItemList;

/// A change the user made locally (or the streaming API reported) that the
/// held list should reflect immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LocalEvent {
    Favourite { status_id: String, favourited: bool },
    Reblog { status_id: String, reblogged: bool },
    Bookmark { status_id: String, bookmarked: bool },
    Mute { status_id: String, muted: bool },
    PollVote { status_id: String, choices: Vec<usize> },
    StatusEdited { status: Box<Status> },
    StatusDeleted { status_id: String },
    MuteConversation { conversation_key: String, remove: bool },
    AccountBlocked { account_id: String },
    DomainBlocked { domain: String },
}

/// Apply `event` to `list`; returns how many entries changed or left.
///
/// Patches keep order and length; only the touched views are re-derived.
pub fn apply_local_event<T: StatusCarrier, V>(
    list: &mut OrderedItemList<T, V>,
    event: &LocalEvent,
) -> usize {
    match event {
        LocalEvent::Favourite {
            status_id,
            favourited,
        } => patch_status(list, status_id, |s| s.favourited = *favourited),
        LocalEvent::Reblog {
            status_id,
            reblogged,
        } => patch_status(list, status_id, |s| s.reblogged = *reblogged),
        LocalEvent::Bookmark {
            status_id,
            bookmarked,
        } => patch_status(list, status_id, |s| s.bookmarked = *bookmarked),
        LocalEvent::Mute { status_id, muted } => patch_status(list, status_id, |s| {
            s.muted = *muted;
            s.thread_muted = *muted;
        }),
        LocalEvent::PollVote { status_id, choices } => patch_status(list, status_id, |s| {
            if let Some(poll) = &s.poll {
                s.poll = Some(poll.voted(choices));
            }
        }),
        LocalEvent::StatusEdited { status } => {
            let edited = status.as_ref();
            list.update_where(
                |entry| entry.carries_status(&edited.id),
                |entry| {
                    let Some(held) = entry.status_mut() else {
                        return;
                    };
                    if held.id == edited.id {
                        *held = edited.clone();
                    } else if let Some(inner) = held.reblog.as_deref_mut()
                        && inner.id == edited.id
                    {
                        *inner = edited.clone();
                    }
                },
            )
        }
        LocalEvent::StatusDeleted { status_id } => bulk::remove_carrying(list, status_id),
        LocalEvent::MuteConversation {
            conversation_key,
            remove,
        } => bulk::mute_conversation(list, conversation_key, *remove),
        LocalEvent::AccountBlocked { account_id } => bulk::remove_by_account(list, account_id),
        LocalEvent::DomainBlocked { domain } => bulk::remove_by_domain(list, domain),
    }
}

/// Patch the actionable status of every entry answering to `status_id`.
fn patch_status<T: StatusCarrier, V>(
    list: &mut OrderedItemList<T, V>,
    status_id: &str,
    mut patch: impl FnMut(&mut Status),
) -> usize {
    list.update_where(
        |entry| entry.carries_status(status_id),
        |entry| {
            if let Some(status) = entry.status_mut() {
                patch(status.actionable_mut());
            }
        },
    )
}
