pub mod fixtures;
pub mod sync_helpers;
