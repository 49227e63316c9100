//! Clipboard synchronisation with the interactive desktop.
//!
//! The Windows monitor polls the clipboard sequence number from its own
//! thread and reports local text changes; text injected by the peer is
//! not echoed back. Other platforms get an in-process clipboard.

use tracing::debug;

use crate::message::ClipboardEvent;

/// Receives clipboard changes made on the local desktop.
pub trait ClipboardDelegate: Send + Sync {
    fn on_clipboard_event(&self, event: ClipboardEvent);
}

pub trait ClipboardMonitor: Send {
    /// Replace the local clipboard content with `event`.
    fn inject_clipboard_event(&mut self, event: &ClipboardEvent);
}

// ── In-process clipboard ─────────────────────────────────────────

/// Clipboard kept in memory; used where no system clipboard is wired up.
/// It never changes on its own, so it has no delegate.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    content: Option<ClipboardEvent>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self) -> Option<&ClipboardEvent> {
        self.content.as_ref()
    }
}

impl ClipboardMonitor for MemoryClipboard {
    fn inject_clipboard_event(&mut self, event: &ClipboardEvent) {
        debug!(mime_type = %event.mime_type, len = event.data.len(), "clipboard set");
        self.content = Some(event.clone());
    }
}

// ── Windows clipboard ────────────────────────────────────────────

#[cfg(target_os = "windows")]
pub use self::windows_impl::WindowsClipboard;

#[cfg(target_os = "windows")]
mod windows_impl {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::thread;
    use std::time::Duration;

    use tracing::{debug, warn};
    use windows::Win32::Foundation::{GlobalFree, HANDLE, HGLOBAL, HWND};
    use windows::Win32::System::DataExchange::{
        CloseClipboard, EmptyClipboard, GetClipboardData, GetClipboardSequenceNumber,
        IsClipboardFormatAvailable, OpenClipboard, SetClipboardData,
    };
    use windows::Win32::System::Memory::{GMEM_MOVEABLE, GlobalAlloc, GlobalLock, GlobalSize, GlobalUnlock};
    use windows::Win32::System::Ole::CF_UNICODETEXT;

    use super::{ClipboardDelegate, ClipboardMonitor};
    use crate::error::HostError;
    use crate::message::ClipboardEvent;

    const POLL_INTERVAL: Duration = Duration::from_millis(250);

    fn text_format() -> u32 {
        CF_UNICODETEXT.0 as u32
    }

    /// Clipboard access scoped to one open/close pair.
    struct OpenedClipboard;

    impl OpenedClipboard {
        fn open() -> Result<Self, HostError> {
            unsafe { OpenClipboard(HWND::default()) }
                .map_err(|e| HostError::platform("OpenClipboard", e))?;
            Ok(OpenedClipboard)
        }

        fn read_text(&self) -> Option<String> {
            unsafe {
                IsClipboardFormatAvailable(text_format()).ok()?;
                let handle = GetClipboardData(text_format()).ok()?;
                let global = HGLOBAL(handle.0);
                let ptr = GlobalLock(global) as *const u16;
                if ptr.is_null() {
                    return None;
                }
                let units = GlobalSize(global) / 2;
                let slice = std::slice::from_raw_parts(ptr, units);
                let len = slice.iter().position(|&c| c == 0).unwrap_or(units);
                let text = String::from_utf16_lossy(&slice[..len]);
                let _ = GlobalUnlock(global);
                Some(text)
            }
        }

        fn write_text(&self, text: &str) -> Result<(), HostError> {
            let wide: Vec<u16> = text.encode_utf16().chain(std::iter::once(0)).collect();
            let bytes = wide.len() * 2;

            unsafe {
                EmptyClipboard().map_err(|e| HostError::platform("EmptyClipboard", e))?;

                let global = GlobalAlloc(GMEM_MOVEABLE, bytes)
                    .map_err(|e| HostError::platform("GlobalAlloc", e))?;
                let ptr = GlobalLock(global) as *mut u16;
                if ptr.is_null() {
                    let _ = GlobalFree(global);
                    return Err(HostError::Other("GlobalLock returned null".into()));
                }
                std::ptr::copy_nonoverlapping(wide.as_ptr(), ptr, wide.len());
                let _ = GlobalUnlock(global);

                // On success the clipboard owns the memory.
                if let Err(e) = SetClipboardData(text_format(), HANDLE(global.0)) {
                    let _ = GlobalFree(global);
                    return Err(HostError::platform("SetClipboardData", e));
                }
            }
            Ok(())
        }
    }

    impl Drop for OpenedClipboard {
        fn drop(&mut self) {
            let _ = unsafe { CloseClipboard() };
        }
    }

    pub struct WindowsClipboard {
        stop: Arc<AtomicBool>,
        // Sequence number produced by our own last injection.
        injected_sequence: Arc<AtomicU32>,
    }

    impl WindowsClipboard {
        pub fn new(delegate: Arc<dyn ClipboardDelegate>) -> Result<Self, HostError> {
            let stop = Arc::new(AtomicBool::new(false));
            let injected_sequence = Arc::new(AtomicU32::new(0));

            let thread_stop = Arc::clone(&stop);
            let thread_injected = Arc::clone(&injected_sequence);
            thread::Builder::new()
                .name("hostlink-clipboard".into())
                .spawn(move || {
                    let mut last_seen = unsafe { GetClipboardSequenceNumber() };
                    while !thread_stop.load(Ordering::Acquire) {
                        thread::sleep(POLL_INTERVAL);

                        let current = unsafe { GetClipboardSequenceNumber() };
                        if current == last_seen {
                            continue;
                        }
                        last_seen = current;
                        if current == thread_injected.load(Ordering::Acquire) {
                            continue;
                        }

                        let text = OpenedClipboard::open()
                            .ok()
                            .and_then(|clipboard| clipboard.read_text());
                        if let Some(text) = text {
                            debug!(len = text.len(), "local clipboard changed");
                            delegate.on_clipboard_event(ClipboardEvent::text(text));
                        }
                    }
                })
                .map_err(|e| HostError::platform("spawn clipboard thread", e))?;

            Ok(Self {
                stop,
                injected_sequence,
            })
        }
    }

    impl ClipboardMonitor for WindowsClipboard {
        fn inject_clipboard_event(&mut self, event: &ClipboardEvent) {
            if event.mime_type != ClipboardEvent::TEXT_UTF8 {
                warn!(mime_type = %event.mime_type, "unsupported clipboard format");
                return;
            }
            let text = String::from_utf8_lossy(&event.data);

            let result = OpenedClipboard::open().and_then(|clipboard| clipboard.write_text(&text));
            match result {
                Ok(()) => {
                    let sequence = unsafe { GetClipboardSequenceNumber() };
                    self.injected_sequence.store(sequence, Ordering::Release);
                }
                Err(err) => warn!(error = %err, "cannot set clipboard"),
            }
        }
    }

    impl Drop for WindowsClipboard {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_clipboard_keeps_last_injection() {
        let mut clipboard = MemoryClipboard::new();
        assert!(clipboard.content().is_none());

        clipboard.inject_clipboard_event(&ClipboardEvent::text("first"));
        clipboard.inject_clipboard_event(&ClipboardEvent::text("second"));
        assert_eq!(clipboard.content().unwrap().data, b"second");
    }
}
