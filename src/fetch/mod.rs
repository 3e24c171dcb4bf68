//! Fetching pages from a remote feed: request planning, the worker pool and
//! the page source seam.

pub mod fetcher;
pub mod fixture;
pub mod plan;
pub mod source;
