pub mod raw_result;
pub mod timeline;

pub use raw_result::{NewRawResult, RawResult};
pub use timeline::{NewTimelineItem, TimelineItem};
