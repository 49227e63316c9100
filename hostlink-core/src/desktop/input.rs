//! Input injection into the interactive desktop.
//!
//! # Platform
//!
//! [`SendInputInjector`] replays events with Win32 `SendInput` and is only
//! functional on Windows. The agent process must run in the target session
//! with UI access for `SendInput` to reach elevated windows.

use crate::error::HostError;
use crate::message::{KeyEvent, PointerEvent};

pub trait InputInjector: Send {
    fn inject_pointer_event(&mut self, event: &PointerEvent);
    fn inject_key_event(&mut self, event: &KeyEvent);
    fn set_block_input(&mut self, block: bool);
}

/// `SendInput`-based injector.
///
/// Pointer events carry the full button mask; the injector tracks the
/// previous mask and emits only the transitions.
pub struct SendInputInjector {
    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    prev_mask: crate::message::PointerButtons,
    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    block_input: bool,
}

impl SendInputInjector {
    pub fn new() -> Result<Self, HostError> {
        if cfg!(target_os = "windows") {
            Ok(Self {
                prev_mask: Default::default(),
                block_input: false,
            })
        } else {
            Err(HostError::Unsupported("input injection"))
        }
    }
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use tracing::warn;
    use windows::Win32::Foundation::BOOL;
    use windows::Win32::UI::Input::KeyboardAndMouse::*;
    use windows::Win32::UI::WindowsAndMessaging::{
        GetSystemMetrics, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN,
        SM_YVIRTUALSCREEN, WHEEL_DELTA,
    };

    use super::*;
    use crate::message::{KeyFlags, PointerButtons};

    const BUTTONS: [(PointerButtons, MOUSE_EVENT_FLAGS, MOUSE_EVENT_FLAGS); 3] = [
        (PointerButtons::LEFT, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP),
        (PointerButtons::MIDDLE, MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP),
        (PointerButtons::RIGHT, MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP),
    ];

    fn mouse_input(dx: i32, dy: i32, data: u32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
        INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx,
                    dy,
                    mouseData: data,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }
    }

    fn send(inputs: &[INPUT], what: &str) {
        if inputs.is_empty() {
            return;
        }
        let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
        if sent as usize != inputs.len() {
            warn!(what, sent, expected = inputs.len(), "SendInput dropped events");
        }
    }

    impl InputInjector for SendInputInjector {
        fn inject_pointer_event(&mut self, event: &PointerEvent) {
            let (left, top, width, height) = unsafe {
                (
                    GetSystemMetrics(SM_XVIRTUALSCREEN),
                    GetSystemMetrics(SM_YVIRTUALSCREEN),
                    GetSystemMetrics(SM_CXVIRTUALSCREEN),
                    GetSystemMetrics(SM_CYVIRTUALSCREEN),
                )
            };
            if width <= 1 || height <= 1 {
                warn!("virtual screen has no size");
                return;
            }

            // Absolute coordinates are normalised to 0..65535 over the
            // virtual desktop.
            let abs_x = ((event.x - left) as i64 * 65535 / (width - 1) as i64) as i32;
            let abs_y = ((event.y - top) as i64 * 65535 / (height - 1) as i64) as i32;

            let mut inputs = vec![mouse_input(
                abs_x,
                abs_y,
                0,
                MOUSEEVENTF_MOVE | MOUSEEVENTF_ABSOLUTE | MOUSEEVENTF_VIRTUALDESK,
            )];

            let changed = self.prev_mask ^ event.mask;
            for (button, down, up) in BUTTONS {
                if changed.contains(button) {
                    let flag = if event.mask.contains(button) { down } else { up };
                    inputs.push(mouse_input(0, 0, 0, flag));
                }
            }

            // Wheel bits are momentary: each event carrying them is one notch.
            if event.mask.contains(PointerButtons::WHEEL_UP) {
                inputs.push(mouse_input(0, 0, WHEEL_DELTA, MOUSEEVENTF_WHEEL));
            } else if event.mask.contains(PointerButtons::WHEEL_DOWN) {
                inputs.push(mouse_input(0, 0, (-(WHEEL_DELTA as i32)) as u32, MOUSEEVENTF_WHEEL));
            }

            self.prev_mask = event.mask - (PointerButtons::WHEEL_UP | PointerButtons::WHEEL_DOWN);
            send(&inputs, "pointer");
        }

        fn inject_key_event(&mut self, event: &KeyEvent) {
            let mut flags = KEYBD_EVENT_FLAGS(0);

            if event.scan_code != 0 {
                flags |= KEYEVENTF_SCANCODE;
            }
            if !event.flags.contains(KeyFlags::PRESSED) {
                flags |= KEYEVENTF_KEYUP;
            }
            // Extended keys (right Ctrl, arrows, ...) carry an 0xE0 prefix.
            if event.scan_code > 0xFF {
                flags |= KEYEVENTF_EXTENDEDKEY;
            }

            let input = INPUT {
                r#type: INPUT_KEYBOARD,
                Anonymous: INPUT_0 {
                    ki: KEYBDINPUT {
                        wVk: VIRTUAL_KEY(event.virtual_key),
                        wScan: event.scan_code & 0xFF,
                        dwFlags: flags,
                        time: 0,
                        dwExtraInfo: 0,
                    },
                },
            };

            send(&[input], "key");
        }

        fn set_block_input(&mut self, block: bool) {
            if self.block_input == block {
                return;
            }
            match unsafe { BlockInput(BOOL::from(block)) } {
                Ok(()) => self.block_input = block,
                Err(err) => warn!(block, error = %err, "BlockInput failed"),
            }
        }
    }

    impl Drop for SendInputInjector {
        fn drop(&mut self) {
            if self.block_input {
                let _ = unsafe { BlockInput(BOOL::from(false)) };
            }
        }
    }
}

// ── Non-Windows stub ─────────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
impl InputInjector for SendInputInjector {
    fn inject_pointer_event(&mut self, _event: &PointerEvent) {}

    fn inject_key_event(&mut self, _event: &KeyEvent) {}

    fn set_block_input(&mut self, _block: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn injector_is_unsupported_off_windows() {
        assert!(matches!(
            SendInputInjector::new(),
            Err(HostError::Unsupported(_))
        ));
    }
}
