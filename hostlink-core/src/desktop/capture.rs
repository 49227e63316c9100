//! Frame sources: where raw desktop pixels come from.
//!
//! A [`FrameSource`] is driven from the capture thread only, so it does not
//! need to be `Send`; it is constructed on that thread as well.
//!
//! # Platform
//!
//! [`DxgiCapturer`] uses DXGI Desktop Duplication and is only functional
//! on Windows. Elsewhere construction fails with `Unsupported`.

use std::time::Duration;

use crate::desktop::types::{RawScreenFrame, ScreenId, ScreenList};
use crate::error::HostError;

/// Produces raw frames for one selected screen.
pub trait FrameSource {
    /// Wait up to `timeout` for a new frame. `Ok(None)` means the desktop
    /// did not change in time.
    fn capture(&mut self, timeout: Duration) -> Result<Option<RawScreenFrame>, HostError>;

    /// Screens that can be selected, plus the current one.
    fn screens(&self) -> ScreenList;

    fn select_screen(&mut self, screen_id: ScreenId) -> Result<(), HostError>;
}

// ── DxgiCapturer ─────────────────────────────────────────────────

/// DXGI-based screen capturer.
///
/// Wraps the `IDXGIOutputDuplication` pipeline:
///
/// 1. Create a D3D11 device.
/// 2. Enumerate outputs and duplicate the selected one.
/// 3. Create a CPU-readable staging texture.
/// 4. On each capture: `AcquireNextFrame`, copy to staging, map, copy
///    out, unmap.
///
/// A desktop switch (lock screen, UAC prompt, mode change) invalidates the
/// duplication. The capture that sees it fails with `SourceLost` and the
/// next one duplicates the output again.
pub struct DxgiCapturer {
    screens: ScreenList,

    #[cfg(target_os = "windows")]
    index: u32,
    #[cfg(target_os = "windows")]
    output: Option<platform::Output>,
}

#[cfg(target_os = "windows")]
mod platform {
    use std::time::{Duration, Instant};

    use windows::Win32::Graphics::{
        Direct3D::D3D_DRIVER_TYPE_HARDWARE,
        Direct3D11::*,
        Dxgi::{Common::*, *},
    };
    use tracing::debug;
    use windows::core::Interface;

    use super::{DxgiCapturer, FrameSource};
    use crate::desktop::types::{
        FULL_DESKTOP_SCREEN_ID, PixelFormat, Point, RawScreenFrame, Screen, ScreenId, ScreenList,
    };
    use crate::error::HostError;

    /// Duplication state for one monitor.
    pub(super) struct Output {
        top_left: Point,
        width: u32,
        height: u32,
        context: ID3D11DeviceContext,
        duplication: IDXGIOutputDuplication,
        staging_texture: ID3D11Texture2D,
    }

    fn other(call: &'static str) -> impl Fn(windows::core::Error) -> HostError {
        move |e| HostError::platform(call, e)
    }

    unsafe fn create_device() -> Result<(ID3D11Device, ID3D11DeviceContext), HostError> {
        let mut device = None;
        let mut context = None;
        unsafe {
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
            .map_err(other("D3D11CreateDevice"))?;
        }
        let device = device.ok_or_else(|| HostError::Other("D3D11 device is None".into()))?;
        let context = context.ok_or_else(|| HostError::Other("D3D11 context is None".into()))?;
        Ok((device, context))
    }

    unsafe fn adapter_of(device: &ID3D11Device) -> Result<IDXGIAdapter, HostError> {
        let dxgi_device: IDXGIDevice = device.cast().map_err(other("IDXGIDevice cast"))?;
        unsafe { dxgi_device.GetAdapter() }.map_err(other("GetAdapter"))
    }

    unsafe fn enumerate(adapter: &IDXGIAdapter) -> Vec<Screen> {
        let mut screens = Vec::new();
        let mut index = 0u32;
        while let Ok(output) = unsafe { adapter.EnumOutputs(index) } {
            let title = unsafe { output.GetDesc() }
                .map(|desc| {
                    let len = desc.DeviceName.iter().position(|&c| c == 0).unwrap_or(32);
                    String::from_utf16_lossy(&desc.DeviceName[..len])
                })
                .unwrap_or_else(|_| format!("Display {}", index + 1));
            screens.push(Screen {
                id: ScreenId::from(index),
                title,
            });
            index += 1;
        }
        screens
    }

    impl Output {
        unsafe fn open(index: u32) -> Result<Self, HostError> {
            let (device, context) = unsafe { create_device()? };
            let adapter = unsafe { adapter_of(&device)? };

            let output: IDXGIOutput =
                unsafe { adapter.EnumOutputs(index) }.map_err(other("EnumOutputs"))?;
            let desc = unsafe { output.GetDesc() }.map_err(other("IDXGIOutput::GetDesc"))?;
            let output1: IDXGIOutput1 = output.cast().map_err(other("IDXGIOutput1 cast"))?;
            let duplication =
                unsafe { output1.DuplicateOutput(&device) }.map_err(other("DuplicateOutput"))?;

            let dup_desc = unsafe { duplication.GetDesc() };
            let width = dup_desc.ModeDesc.Width;
            let height = dup_desc.ModeDesc.Height;

            let staging_desc = D3D11_TEXTURE2D_DESC {
                Width: width,
                Height: height,
                MipLevels: 1,
                ArraySize: 1,
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Usage: D3D11_USAGE_STAGING,
                BindFlags: 0,
                CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
                MiscFlags: 0,
            };

            let mut staging_texture = None;
            unsafe {
                device
                    .CreateTexture2D(&staging_desc, None, Some(&mut staging_texture))
                    .map_err(other("CreateTexture2D"))?;
            }
            let staging_texture = staging_texture
                .ok_or_else(|| HostError::Other("staging texture is None".into()))?;

            Ok(Self {
                top_left: Point::new(
                    desc.DesktopCoordinates.left,
                    desc.DesktopCoordinates.top,
                ),
                width,
                height,
                context,
                duplication,
                staging_texture,
            })
        }

        unsafe fn capture(&mut self, timeout: Duration) -> Result<Option<RawScreenFrame>, HostError> {
            let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
            let mut resource = None;

            let timeout_ms = timeout.as_millis().min(u32::MAX as u128) as u32;
            match unsafe {
                self.duplication
                    .AcquireNextFrame(timeout_ms, &mut frame_info, &mut resource)
            } {
                Ok(()) => {}
                Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => return Ok(None),
                Err(e) if e.code() == DXGI_ERROR_ACCESS_LOST => return Err(HostError::SourceLost),
                Err(e) => return Err(HostError::platform("AcquireNextFrame", e)),
            }

            let resource =
                resource.ok_or_else(|| HostError::Other("acquired resource is None".into()))?;

            let texture: ID3D11Texture2D = match resource.cast() {
                Ok(texture) => texture,
                Err(e) => {
                    let _ = unsafe { self.duplication.ReleaseFrame() };
                    return Err(HostError::platform("ID3D11Texture2D cast", e));
                }
            };

            unsafe { self.context.CopyResource(&self.staging_texture, &texture) };
            let _ = unsafe { self.duplication.ReleaseFrame() };

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            unsafe {
                self.context
                    .Map(&self.staging_texture, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                    .map_err(other("ID3D11DeviceContext::Map"))?;
            }

            let stride = mapped.RowPitch;
            let total_bytes = stride as usize * self.height as usize;
            let data =
                unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, total_bytes) }
                    .to_vec();

            unsafe { self.context.Unmap(&self.staging_texture, 0) };

            Ok(Some(RawScreenFrame {
                top_left: self.top_left,
                width: self.width,
                height: self.height,
                stride,
                format: PixelFormat::Bgra8,
                data,
                timestamp: Instant::now(),
            }))
        }
    }

    impl DxgiCapturer {
        /// Duplicate monitor `monitor_index` (0 = primary).
        pub fn new(monitor_index: u32) -> Result<Self, HostError> {
            let output = unsafe { Output::open(monitor_index)? };
            let screens = unsafe {
                let (device, _) = create_device()?;
                enumerate(&adapter_of(&device)?)
            };

            Ok(Self {
                screens: ScreenList {
                    screens,
                    current_screen: ScreenId::from(monitor_index),
                },
                index: monitor_index,
                output: Some(output),
            })
        }
    }

    impl FrameSource for DxgiCapturer {
        fn capture(&mut self, timeout: Duration) -> Result<Option<RawScreenFrame>, HostError> {
            let mut output = match self.output.take() {
                Some(output) => output,
                None => {
                    let output = unsafe { Output::open(self.index)? };
                    debug!(index = self.index, "output duplicated again");
                    output
                }
            };

            let result = unsafe { output.capture(timeout) };
            if !matches!(result, Err(HostError::SourceLost)) {
                self.output = Some(output);
            }
            result
        }

        fn screens(&self) -> ScreenList {
            self.screens.clone()
        }

        fn select_screen(&mut self, screen_id: ScreenId) -> Result<(), HostError> {
            // Duplication works per output; the full desktop maps to the primary.
            let screen_id = if screen_id == FULL_DESKTOP_SCREEN_ID { 0 } else { screen_id };
            if !self.screens.contains(screen_id) {
                return Err(HostError::Other(format!("unknown screen {screen_id}")));
            }
            let index = u32::try_from(screen_id)
                .map_err(|_| HostError::Other(format!("unknown screen {screen_id}")))?;
            if index == self.index && self.output.is_some() {
                return Ok(());
            }

            self.output = Some(unsafe { Output::open(index)? });
            self.index = index;
            self.screens.current_screen = screen_id;
            Ok(())
        }
    }
}

// ── Non-Windows stub ─────────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
impl DxgiCapturer {
    /// DXGI is only available on Windows.
    pub fn new(_monitor_index: u32) -> Result<Self, HostError> {
        Err(HostError::Unsupported("DXGI desktop duplication"))
    }
}

#[cfg(not(target_os = "windows"))]
impl FrameSource for DxgiCapturer {
    fn capture(&mut self, _timeout: Duration) -> Result<Option<RawScreenFrame>, HostError> {
        Err(HostError::Unsupported("DXGI desktop duplication"))
    }

    fn screens(&self) -> ScreenList {
        self.screens.clone()
    }

    fn select_screen(&mut self, _screen_id: ScreenId) -> Result<(), HostError> {
        Err(HostError::Unsupported("DXGI desktop duplication"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn dxgi_is_unsupported_off_windows() {
        assert!(matches!(
            DxgiCapturer::new(0),
            Err(HostError::Unsupported(_))
        ));
    }
}
