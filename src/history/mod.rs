//! Status history model: merging observations and querying timelines.

mod merge;
mod query;

pub use merge::*;
pub use query::*;
