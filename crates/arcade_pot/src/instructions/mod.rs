pub mod distribute;
pub mod entry;
pub mod lifecycle;

pub use distribute::rank_entries;
pub use lifecycle::RolloverOutcome;
