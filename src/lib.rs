#![forbid(unsafe_code)]

//! Timeline sync: the gap-aware timeline pagination and reconciliation core of
//! a Mastodon client.
//!
//! A feed is an ordered list of entries interleaved with gap placeholders.
//! Pages are fetched from the top (refresh), the bottom (load more) or into a
//! gap, off the owning thread, and merged back so that order, identity and
//! the "no two gaps in a row" shape always hold.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use timeline_sync::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use timeline_sync::core::config::Config;
//! use timeline_sync::timeline::list::OrderedItemList;
//! ```

pub mod prelude;

pub mod cache;
pub mod core;
pub mod feed;
pub mod fetch;
pub mod logger;
pub mod reconcile;
pub mod timeline;
