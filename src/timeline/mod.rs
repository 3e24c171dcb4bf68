//! Feed model: items, cursors, payloads, view data and the ordered list.

pub mod cursor;
pub mod entity;
pub mod item;
pub mod list;
pub mod view;
