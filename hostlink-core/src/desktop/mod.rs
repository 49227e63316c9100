//! Desktop-side collaborators of the session agent: capture, input,
//! clipboard, power actions and frame pacing.

pub mod capture;
pub mod capturer;
pub mod clipboard;
pub mod delta;
pub mod frame;
pub mod input;
pub mod power;
pub mod scheduler;
pub mod types;

pub use capture::{DxgiCapturer, FrameSource};
pub use capturer::{CaptureOptions, ScreenCapturer, ScreenCapturerDelegate, ScreenCapturerWrapper};
pub use clipboard::{ClipboardDelegate, ClipboardMonitor, MemoryClipboard};
pub use frame::SharedFrame;
pub use input::{InputInjector, SendInputInjector};
pub use power::{PowerController, SessionPowerController};
pub use scheduler::{CaptureScheduler, FixedRateScheduler};
pub use types::{PixelFormat, Point, Rect, Region, Screen, ScreenId, ScreenList, Size};
