//! Per-session subsystem set and the factory that builds it.

use std::sync::Arc;

use crate::agent::events::AgentEvents;
use crate::desktop::{
    CaptureOptions, CaptureScheduler, ClipboardDelegate, ClipboardMonitor, FixedRateScheduler,
    InputInjector, ScreenCapturer, ScreenCapturerDelegate,
};
use crate::error::HostError;
use crate::shared_memory::SharedMemoryFactory;

/// Builds the subsystems of one active session.
pub trait SubsystemFactory: Send {
    fn create_input_injector(&mut self) -> Result<Box<dyn InputInjector>, HostError>;

    fn create_clipboard_monitor(
        &mut self,
        delegate: Arc<dyn ClipboardDelegate>,
    ) -> Result<Box<dyn ClipboardMonitor>, HostError>;

    fn create_capture_scheduler(&mut self) -> Box<dyn CaptureScheduler>;

    fn create_screen_capturer(
        &mut self,
        delegate: Arc<dyn ScreenCapturerDelegate>,
        shared_memory: SharedMemoryFactory,
    ) -> Result<Box<dyn ScreenCapturer>, HostError>;
}

/// Everything an active session owns.
///
/// Field order is drop order: the capturer goes first so no capture is
/// running while the rest is torn down.
pub struct Subsystems {
    pub screen_capturer: Box<dyn ScreenCapturer>,
    pub clipboard_monitor: Box<dyn ClipboardMonitor>,
    pub input_injector: Box<dyn InputInjector>,
    pub capture_scheduler: Box<dyn CaptureScheduler>,
    pub shared_memory: SharedMemoryFactory,
}

impl Subsystems {
    /// Create the full set. On failure whatever was already created is
    /// dropped before returning.
    pub fn create(factory: &mut dyn SubsystemFactory, events: AgentEvents) -> Result<Self, HostError> {
        let events = Arc::new(events);

        let shared_memory = SharedMemoryFactory::new(events.clone());
        let input_injector = factory.create_input_injector()?;
        let clipboard_monitor = factory.create_clipboard_monitor(events.clone())?;
        let capture_scheduler = factory.create_capture_scheduler();
        let screen_capturer = factory.create_screen_capturer(events, shared_memory.clone())?;

        Ok(Self {
            screen_capturer,
            clipboard_monitor,
            input_injector,
            capture_scheduler,
            shared_memory,
        })
    }
}

// ── Platform subsystems ──────────────────────────────────────────

/// Real desktop subsystems: DXGI capture, `SendInput`, the system
/// clipboard. Capture and input are Windows-only; elsewhere session start
/// fails and the agent stays idle.
#[derive(Debug, Clone, Default)]
pub struct PlatformSubsystems {
    options: CaptureOptions,
}

impl PlatformSubsystems {
    pub fn new(options: CaptureOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }
}

impl SubsystemFactory for PlatformSubsystems {
    fn create_input_injector(&mut self) -> Result<Box<dyn InputInjector>, HostError> {
        Ok(Box::new(crate::desktop::SendInputInjector::new()?))
    }

    #[cfg(target_os = "windows")]
    fn create_clipboard_monitor(
        &mut self,
        delegate: Arc<dyn ClipboardDelegate>,
    ) -> Result<Box<dyn ClipboardMonitor>, HostError> {
        Ok(Box::new(crate::desktop::clipboard::WindowsClipboard::new(delegate)?))
    }

    #[cfg(not(target_os = "windows"))]
    fn create_clipboard_monitor(
        &mut self,
        _delegate: Arc<dyn ClipboardDelegate>,
    ) -> Result<Box<dyn ClipboardMonitor>, HostError> {
        Ok(Box::new(crate::desktop::MemoryClipboard::new()))
    }

    fn create_capture_scheduler(&mut self) -> Box<dyn CaptureScheduler> {
        Box::new(FixedRateScheduler::new(self.options.interval))
    }

    fn create_screen_capturer(
        &mut self,
        delegate: Arc<dyn ScreenCapturerDelegate>,
        shared_memory: SharedMemoryFactory,
    ) -> Result<Box<dyn ScreenCapturer>, HostError> {
        let capturer = crate::desktop::ScreenCapturerWrapper::new(
            || {
                crate::desktop::DxgiCapturer::new(0)
                    .map(|capturer| Box::new(capturer) as Box<dyn crate::desktop::FrameSource>)
            },
            self.options,
            delegate,
            shared_memory,
        )?;
        Ok(Box::new(capturer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn platform_session_cannot_start_off_windows() {
        let (events, _rx) = AgentEvents::channel();
        let mut factory = PlatformSubsystems::default();
        assert!(matches!(
            Subsystems::create(&mut factory, events),
            Err(HostError::Unsupported(_))
        ));
    }

    #[test]
    fn scheduler_uses_configured_interval() {
        let options = CaptureOptions {
            interval: std::time::Duration::from_millis(250),
            ..Default::default()
        };
        let mut factory = PlatformSubsystems::new(options);
        let scheduler = factory.create_capture_scheduler();
        assert_eq!(scheduler.next_capture_delay(), options.interval);
    }
}
