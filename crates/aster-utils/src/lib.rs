pub mod ids;
pub mod multilist;
pub mod segments;

pub use ids::{FunctionId, TypeId};
pub use multilist::MultiList;
pub use segments::{Segment, SegmentSizes};
