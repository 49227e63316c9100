//! Screen capturer interface and the threaded wrapper around a
//! [`FrameSource`].
//!
//! The wrapper owns a dedicated capture thread. Requests are posted to it
//! over a command queue; every `capture_frame` request produces exactly
//! one `on_screen_captured` callback, delivered from the capture thread.

use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::desktop::capture::FrameSource;
use crate::desktop::delta::DeltaDetector;
use crate::desktop::frame::SharedFrame;
use crate::desktop::types::{Point, RawScreenFrame, Region, ScreenId, ScreenList, Size};
use crate::error::HostError;
use crate::shared_memory::{SharedMemory, SharedMemoryFactory};

// ── Interfaces ───────────────────────────────────────────────────

/// Receives capture results. Called from the capture thread.
pub trait ScreenCapturerDelegate: Send + Sync {
    /// `None` when the source failed and no frame could be produced.
    fn on_screen_captured(&self, frame: Option<SharedFrame>);
    fn on_screen_list_changed(&self, list: ScreenList);
}

pub trait ScreenCapturer: Send {
    fn select_screen(&mut self, screen_id: ScreenId);
    fn enable_wallpaper(&mut self, enable: bool);
    fn enable_effects(&mut self, enable: bool);
    /// Request one frame; the result arrives through the delegate.
    fn capture_frame(&mut self);
}

/// Tuning for the capture thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Target time between captures.
    pub interval: Duration,
    /// How long a single capture waits for the desktop to change.
    pub timeout: Duration,
    /// Tile size of the delta detector.
    pub block_size: usize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(33),
            timeout: Duration::from_millis(50),
            block_size: 64,
        }
    }
}

// ── ScreenCapturerWrapper ────────────────────────────────────────

enum Command {
    Capture,
    SelectScreen(ScreenId),
}

pub struct ScreenCapturerWrapper {
    commands: std_mpsc::Sender<Command>,
    environment: DesktopEnvironment,
}

impl ScreenCapturerWrapper {
    /// Spawn the capture thread and build the source on it. Fails if the
    /// source cannot be created.
    pub fn new<F>(
        make_source: F,
        options: CaptureOptions,
        delegate: Arc<dyn ScreenCapturerDelegate>,
        shared_memory: SharedMemoryFactory,
    ) -> Result<Self, HostError>
    where
        F: FnOnce() -> Result<Box<dyn FrameSource>, HostError> + Send + 'static,
    {
        let (commands, command_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);

        thread::Builder::new()
            .name("hostlink-capture".into())
            .spawn(move || {
                let source = match make_source() {
                    Ok(source) => {
                        let _ = ready_tx.send(Ok(()));
                        source
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                let mut worker = CaptureWorker {
                    source,
                    detector: DeltaDetector::new(options.block_size),
                    shared_memory,
                    buffer: None,
                    timeout: options.timeout,
                };
                worker.run(command_rx, delegate.as_ref());
            })
            .map_err(|e| HostError::platform("spawn capture thread", e))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(HostError::Other("capture thread exited during startup".into())),
        }

        info!("screen capturer started");
        Ok(Self {
            commands,
            environment: DesktopEnvironment::new(),
        })
    }

    fn post(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("capture thread is gone");
        }
    }
}

impl ScreenCapturer for ScreenCapturerWrapper {
    fn select_screen(&mut self, screen_id: ScreenId) {
        self.post(Command::SelectScreen(screen_id));
    }

    fn enable_wallpaper(&mut self, enable: bool) {
        self.environment.set_wallpaper(enable);
    }

    fn enable_effects(&mut self, enable: bool) {
        self.environment.set_effects(enable);
    }

    fn capture_frame(&mut self) {
        self.post(Command::Capture);
    }
}

// Dropping the wrapper closes the command queue; the thread finishes its
// current capture and exits on its own.

// ── Capture thread ───────────────────────────────────────────────

struct CaptureWorker {
    source: Box<dyn FrameSource>,
    detector: DeltaDetector,
    shared_memory: SharedMemoryFactory,
    buffer: Option<Arc<SharedMemory>>,
    timeout: Duration,
}

impl CaptureWorker {
    fn run(&mut self, commands: std_mpsc::Receiver<Command>, delegate: &dyn ScreenCapturerDelegate) {
        delegate.on_screen_list_changed(self.source.screens());

        while let Ok(command) = commands.recv() {
            match command {
                Command::Capture => {
                    let frame = match self.capture() {
                        Ok(frame) => Some(frame),
                        Err(err) => {
                            error!(error = %err, "capture failed");
                            // The source may come back with a different
                            // desktop; its first frame is reported in full.
                            self.detector.reset();
                            None
                        }
                    };
                    delegate.on_screen_captured(frame);
                }
                Command::SelectScreen(screen_id) => match self.source.select_screen(screen_id) {
                    Ok(()) => {
                        debug!(screen_id, "screen selected");
                        self.detector.reset();
                        delegate.on_screen_list_changed(self.source.screens());
                    }
                    Err(err) => warn!(screen_id, error = %err, "cannot select screen"),
                },
            }
        }

        debug!("capture thread exiting");
    }

    fn capture(&mut self) -> Result<SharedFrame, HostError> {
        match self.source.capture(self.timeout)? {
            Some(raw) => {
                let needed = raw.byte_len();
                let pixels = raw.data.get(..needed).ok_or_else(|| {
                    HostError::Other(format!("frame holds {} bytes, expected {needed}", raw.data.len()))
                })?;
                let updated_region = self.detector.detect(&raw);
                self.publish(&raw, pixels, updated_region)
            }
            None => self.unchanged_frame(),
        }
    }

    /// Frame over the current buffer with nothing updated.
    fn unchanged_frame(&mut self) -> Result<SharedFrame, HostError> {
        let buffer = match &self.buffer {
            Some(buffer) => Arc::clone(buffer),
            None => self.shared_memory.create(1)?,
        };
        Ok(SharedFrame {
            top_left: Point::default(),
            size: Size::default(),
            format: Default::default(),
            stride: 0,
            updated_region: Region::new(),
            shared_memory: buffer,
        })
    }

    fn publish(
        &mut self,
        raw: &RawScreenFrame,
        pixels: &[u8],
        updated_region: Region,
    ) -> Result<SharedFrame, HostError> {
        let needed = pixels.len();

        // Reuse the buffer only when no frame still references it and it
        // is large enough; otherwise the old one is released once its last
        // holder lets go.
        let reusable = self
            .buffer
            .as_mut()
            .filter(|buffer| buffer.len() >= needed)
            .and_then(Arc::get_mut)
            .is_some();
        if !reusable {
            self.buffer = Some(self.shared_memory.create(needed)?);
        }

        let buffer = self
            .buffer
            .as_mut()
            .ok_or_else(|| HostError::Other("no capture buffer".into()))?;
        if let Some(target) = Arc::get_mut(buffer).and_then(SharedMemory::as_mut_slice) {
            target[..needed].copy_from_slice(pixels);
        }

        Ok(SharedFrame {
            top_left: raw.top_left,
            size: raw.size(),
            format: raw.format,
            stride: raw.stride as usize,
            updated_region,
            shared_memory: Arc::clone(buffer),
        })
    }
}

// ── Desktop environment ──────────────────────────────────────────

/// Wallpaper and UI effects of the interactive desktop. Whatever was
/// turned off is turned back on when dropped.
struct DesktopEnvironment {
    wallpaper_disabled: bool,
    effects_disabled: bool,
}

impl DesktopEnvironment {
    fn new() -> Self {
        Self {
            wallpaper_disabled: false,
            effects_disabled: false,
        }
    }

    fn set_wallpaper(&mut self, enable: bool) {
        if self.wallpaper_disabled == !enable {
            return;
        }
        match platform::apply_wallpaper(enable) {
            Ok(()) => self.wallpaper_disabled = !enable,
            Err(err) => warn!(enable, error = %err, "cannot change wallpaper"),
        }
    }

    fn set_effects(&mut self, enable: bool) {
        if self.effects_disabled == !enable {
            return;
        }
        match platform::apply_effects(enable) {
            Ok(()) => self.effects_disabled = !enable,
            Err(err) => warn!(enable, error = %err, "cannot change UI effects"),
        }
    }
}

impl Drop for DesktopEnvironment {
    fn drop(&mut self) {
        self.set_wallpaper(true);
        self.set_effects(true);
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use std::ffi::c_void;

    use windows::Win32::UI::WindowsAndMessaging::{
        SPI_SETDESKWALLPAPER, SPI_SETDRAGFULLWINDOWS, SPI_SETUIEFFECTS, SPIF_SENDCHANGE,
        SystemParametersInfoW,
    };

    use crate::error::HostError;

    pub fn apply_wallpaper(enable: bool) -> Result<(), HostError> {
        // An empty path hides the wallpaper; null restores the user's.
        let empty: [u16; 1] = [0];
        let param = if enable {
            None
        } else {
            Some(empty.as_ptr() as *mut c_void)
        };
        unsafe { SystemParametersInfoW(SPI_SETDESKWALLPAPER, 0, param, SPIF_SENDCHANGE) }
            .map_err(|e| HostError::platform("SystemParametersInfoW", e))
    }

    pub fn apply_effects(enable: bool) -> Result<(), HostError> {
        unsafe {
            SystemParametersInfoW(
                SPI_SETUIEFFECTS,
                0,
                Some(enable as usize as *mut c_void),
                SPIF_SENDCHANGE,
            )
            .map_err(|e| HostError::platform("SystemParametersInfoW", e))?;
            SystemParametersInfoW(SPI_SETDRAGFULLWINDOWS, enable as u32, None, SPIF_SENDCHANGE)
                .map_err(|e| HostError::platform("SystemParametersInfoW", e))
        }
    }
}

#[cfg(not(target_os = "windows"))]
mod platform {
    use crate::error::HostError;

    pub fn apply_wallpaper(_enable: bool) -> Result<(), HostError> {
        Ok(())
    }

    pub fn apply_effects(_enable: bool) -> Result<(), HostError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::types::{PixelFormat, Screen};
    use crate::shared_memory::{SharedMemoryDelegate, SharedMemoryId};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Instant;

    struct ScriptedSource {
        frames: VecDeque<Result<Option<RawScreenFrame>, HostError>>,
    }

    impl FrameSource for ScriptedSource {
        fn capture(&mut self, _timeout: Duration) -> Result<Option<RawScreenFrame>, HostError> {
            self.frames.pop_front().unwrap_or(Ok(None))
        }

        fn screens(&self) -> ScreenList {
            ScreenList {
                screens: vec![Screen {
                    id: 0,
                    title: "primary".into(),
                }],
                current_screen: 0,
            }
        }

        fn select_screen(&mut self, _screen_id: ScreenId) -> Result<(), HostError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Events {
        frames: Mutex<Vec<Option<SharedFrame>>>,
        lists: Mutex<Vec<ScreenList>>,
        created: Mutex<Vec<SharedMemoryId>>,
    }

    impl ScreenCapturerDelegate for Events {
        fn on_screen_captured(&self, frame: Option<SharedFrame>) {
            self.frames.lock().unwrap().push(frame);
        }

        fn on_screen_list_changed(&self, list: ScreenList) {
            self.lists.lock().unwrap().push(list);
        }
    }

    impl SharedMemoryDelegate for Events {
        fn on_shared_memory_create(&self, id: SharedMemoryId) {
            self.created.lock().unwrap().push(id);
        }

        fn on_shared_memory_destroy(&self, _id: SharedMemoryId) {}
    }

    fn frame(fill: u8) -> RawScreenFrame {
        RawScreenFrame {
            top_left: Point::new(0, 0),
            width: 16,
            height: 16,
            stride: 64,
            format: PixelFormat::Bgra8,
            data: vec![fill; 64 * 16],
            timestamp: Instant::now(),
        }
    }

    fn wait_for_frames(events: &Events, count: usize) {
        for _ in 0..200 {
            if events.frames.lock().unwrap().len() >= count {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("timed out waiting for {count} frames");
    }

    #[test]
    fn unchanged_desktop_yields_empty_region_and_buffer_is_reused() {
        let events = Arc::new(Events::default());
        let source = ScriptedSource {
            frames: VecDeque::from(vec![Ok(Some(frame(1))), Ok(None), Ok(Some(frame(1)))]),
        };
        let mut capturer = ScreenCapturerWrapper::new(
            move || Ok(Box::new(source) as Box<dyn FrameSource>),
            CaptureOptions::default(),
            events.clone(),
            SharedMemoryFactory::new(events.clone()),
        )
        .unwrap();

        for expected in 1..=3 {
            capturer.capture_frame();
            wait_for_frames(&events, expected);
            // Drop our reference, as the agent does after the ack.
            if let Some(Some(frame)) = events.frames.lock().unwrap().last_mut().map(Option::take) {
                if expected == 1 {
                    assert!(frame.has_updates());
                    assert_eq!(&frame.shared_memory.as_slice()[..4], &[1, 1, 1, 1]);
                } else {
                    assert!(!frame.has_updates());
                }
            }
        }

        assert_eq!(events.created.lock().unwrap().len(), 1);
        assert_eq!(events.lists.lock().unwrap().len(), 1);
    }

    fn start(
        script: Vec<Result<Option<RawScreenFrame>, HostError>>,
    ) -> (ScreenCapturerWrapper, Arc<Events>) {
        let events = Arc::new(Events::default());
        let source = ScriptedSource {
            frames: VecDeque::from(script),
        };
        let capturer = ScreenCapturerWrapper::new(
            move || Ok(Box::new(source) as Box<dyn FrameSource>),
            CaptureOptions::default(),
            events.clone(),
            SharedMemoryFactory::new(events.clone()),
        )
        .unwrap();
        (capturer, events)
    }

    fn updates_per_capture(events: &Events) -> Vec<Option<bool>> {
        events
            .frames
            .lock()
            .unwrap()
            .iter()
            .map(|frame| frame.as_ref().map(SharedFrame::has_updates))
            .collect()
    }

    #[test]
    fn recovered_source_reports_full_frame() {
        let (mut capturer, events) = start(vec![
            Ok(Some(frame(1))),
            Err(HostError::SourceLost),
            Ok(Some(frame(1))),
        ]);

        for expected in 1..=3 {
            capturer.capture_frame();
            wait_for_frames(&events, expected);
        }

        // Identical pixels, but the failure in between forgets the old frame.
        assert_eq!(updates_per_capture(&events), vec![Some(true), None, Some(true)]);
    }

    #[test]
    fn short_frame_is_a_failed_capture() {
        let mut short = frame(1);
        short.data.truncate(10);
        let (mut capturer, events) = start(vec![Ok(Some(short)), Ok(Some(frame(2)))]);

        for expected in 1..=2 {
            capturer.capture_frame();
            wait_for_frames(&events, expected);
        }

        assert_eq!(updates_per_capture(&events), vec![None, Some(true)]);
        let frames = events.frames.lock().unwrap();
        let delivered = frames[1].as_ref().unwrap();
        assert_eq!(&delivered.shared_memory.as_slice()[..4], &[2, 2, 2, 2]);
    }

    #[test]
    fn failing_source_fails_construction() {
        let events = Arc::new(Events::default());
        let result = ScreenCapturerWrapper::new(
            || Err(HostError::Unsupported("test source")),
            CaptureOptions::default(),
            events.clone(),
            SharedMemoryFactory::new(events),
        );
        assert!(matches!(result, Err(HostError::Unsupported(_))));
    }
}
