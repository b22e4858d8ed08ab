pub mod images;
pub mod queue;
pub mod transforms;

pub use images::{load_target, target_from_image};
pub use queue::{AssetQueue, FrameSource, LoadEvent};
pub use transforms::{FrameEntry, TransformsFile};
