//! Pure transformations: no I/O, no clocks.

mod chunk;
pub mod path;
mod range;
mod retry;

pub use chunk::{ChunkOutcome, RestartReason, classify_chunk_response, next_expected_offset};
pub use path::ConflictBehavior;
pub use range::{ChunkRanges, chunk_ranges, parse_next_expected};
pub use retry::{capped_retry_delay, retry_delay};
