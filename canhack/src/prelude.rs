//! Convenience re-exports for a typical attack-authoring call site.
//!
//! ```
//! use canhack::prelude::*;
//! ```

pub use crate::attack::AttackController;
pub use crate::config::BitRateConfig;
pub use crate::error::{AttackError, EncodeError, EngineError};
pub use crate::frame::{Frame, FrameSpec};
pub use canhack_core::CanHackPort as _;
