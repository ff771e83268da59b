//! Inertial fusion interfaces and the view-pose output filter.

pub mod filter;
pub mod output_filter;

pub use filter::{FilterPoseState, PoseFilter};
pub use output_filter::OutputPoseFilter;
