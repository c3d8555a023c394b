//! End-to-end scenarios.
//!
//! Each scenario drives a full provider against an in-memory directory,
//! covering the paths that cross several components at once.

mod account_status;
mod group_resolution;
mod search_paging;
mod site_affinity;
