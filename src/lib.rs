pub mod config;
pub mod convert;
pub mod error;
pub mod layout;
pub mod merge;
pub mod render;
pub mod session;
pub mod status;
pub mod sync;
pub mod tree;
pub mod upstream;
pub mod utils;

#[cfg(feature = "server")]
pub mod serve;

pub use convert::{IssueRecord, RecordFilter, convert_records};
pub use error::{SessionError, TreeError, UpstreamError};
pub use layout::{LayoutConfig, MapLayout, TextMeasure, ViewTransform, layout};
pub use merge::merge_records;
pub use render::{SvgOptions, render_svg};
pub use session::MapSession;
pub use tree::{Node, NodeType, Point, Position};
