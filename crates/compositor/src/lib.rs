//! Frame compositing for reels: lays out 1–3 still images over every frame
//! of a background clip and hands the frames to ffmpeg for encoding and
//! audio muxing.

pub mod blend;
pub mod error;
pub mod ffmpeg;
pub mod layout;
pub mod reel;

pub use blend::{Overlay, composite, composite_frame};
pub use error::{ComposeError, ComposeResult};
pub use ffmpeg::{Ffmpeg, VideoInfo};
pub use layout::{MAX_OVERLAYS, Placement};
pub use reel::{Progress, ReelSpec, ReelSummary, create_reel};
