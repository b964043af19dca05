//! CLI command implementations.

pub mod levels;
pub mod maintenance;
pub mod stats;

pub use levels::list_levels;
pub use maintenance::{clear, compact};
pub use stats::show_stats;
