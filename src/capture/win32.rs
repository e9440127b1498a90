//! Win32 backend: GDI screen grabs and wheel/pointer input.

use anyhow::{anyhow, Result};
use image::RgbaImage;
use std::ffi::OsString;
use std::os::windows::ffi::OsStringExt;

use windows::Win32::Foundation::{BOOL, HWND, LPARAM, POINT, RECT, TRUE};
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC, GetDIBits,
    ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, SRCCOPY,
};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_MOUSE, MOUSEEVENTF_WHEEL, MOUSEINPUT,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetCursorPos, GetSystemMetrics, GetWindowRect, GetWindowTextLengthW,
    GetWindowTextW, IsIconic, IsWindowVisible, SetCursorPos, SetForegroundWindow, ShowWindow,
    SM_CXSCREEN, SM_CYSCREEN, SW_RESTORE,
};

use super::window::{matches_title, WindowControl};
use super::FrameSource;
use crate::error::ExtractError;
use crate::models::{Rectangle, ScrollDirection, WindowInfo};

const WHEEL_DELTA: i32 = 120;

#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }
}

impl WindowControl for NativeBackend {
    fn locate(&mut self, keywords: &[String]) -> Result<WindowInfo> {
        struct EnumData {
            keywords: Vec<String>,
            hwnd: Option<HWND>,
            title: String,
        }

        unsafe extern "system" fn enum_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
            unsafe {
                let data = &mut *(lparam.0 as *mut EnumData);

                if !IsWindowVisible(hwnd).as_bool() {
                    return TRUE;
                }

                let title_len = GetWindowTextLengthW(hwnd);
                if title_len == 0 {
                    return TRUE;
                }
                let mut title_buf: Vec<u16> = vec![0; (title_len + 1) as usize];
                GetWindowTextW(hwnd, &mut title_buf);
                let title = OsString::from_wide(&title_buf[..title_len as usize])
                    .to_string_lossy()
                    .to_string();

                if matches_title(&title, &data.keywords) {
                    data.hwnd = Some(hwnd);
                    data.title = title;
                    return BOOL(0); // Stop enumeration
                }

                TRUE
            }
        }

        let mut data = EnumData {
            keywords: keywords.to_vec(),
            hwnd: None,
            title: String::new(),
        };
        unsafe {
            // EnumWindows reports failure when the callback stops it early;
            // that is the found case, not an error.
            let _ = EnumWindows(Some(enum_callback), LPARAM(&mut data as *mut _ as isize));
        }

        let Some(hwnd) = data.hwnd else {
            return Err(ExtractError::WindowNotFound(keywords.join(", ")).into());
        };

        let mut rect = RECT::default();
        unsafe { GetWindowRect(hwnd, &mut rect)? };
        crate::log(&format!(
            "Found window \"{}\" at ({}, {}) size {}x{}",
            data.title,
            rect.left,
            rect.top,
            rect.right - rect.left,
            rect.bottom - rect.top
        ));

        Ok(WindowInfo {
            handle: hwnd.0 as isize,
            bounds: Rectangle::new(
                rect.left,
                rect.top,
                (rect.right - rect.left).max(0) as u32,
                (rect.bottom - rect.top).max(0) as u32,
            ),
            title: data.title,
        })
    }

    fn activate(&mut self, window: &WindowInfo) -> Result<()> {
        let hwnd = HWND(window.handle as *mut core::ffi::c_void);
        unsafe {
            if IsIconic(hwnd).as_bool() {
                let _ = ShowWindow(hwnd, SW_RESTORE);
            }
            let _ = SetForegroundWindow(hwnd);
        }
        // Give the window time to take focus before input is sent.
        std::thread::sleep(std::time::Duration::from_millis(100));
        Ok(())
    }

    fn scroll(&mut self, direction: ScrollDirection, notches: u32) -> Result<()> {
        if notches == 0 {
            return Ok(());
        }
        let signed = match direction {
            ScrollDirection::Up => notches as i32,
            ScrollDirection::Down => -(notches as i32),
        };
        let wheel = signed.saturating_mul(WHEEL_DELTA);
        let input = INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    mouseData: wheel as _,
                    dwFlags: MOUSEEVENTF_WHEEL,
                    ..Default::default()
                },
            },
        };
        let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
        if sent == 0 {
            return Err(anyhow!("SendInput rejected the wheel event"));
        }
        Ok(())
    }

    fn pointer_position(&mut self) -> Result<(i32, i32)> {
        let mut point = POINT::default();
        unsafe { GetCursorPos(&mut point)? };
        Ok((point.x, point.y))
    }

    fn move_pointer(&mut self, x: i32, y: i32) -> Result<()> {
        unsafe { SetCursorPos(x, y)? };
        Ok(())
    }

    fn screen_size(&mut self) -> Result<(u32, u32)> {
        let width = unsafe { GetSystemMetrics(SM_CXSCREEN) };
        let height = unsafe { GetSystemMetrics(SM_CYSCREEN) };
        if width <= 0 || height <= 0 {
            return Err(anyhow!("GetSystemMetrics reported an empty screen"));
        }
        Ok((width as u32, height as u32))
    }
}

impl FrameSource for NativeBackend {
    /// Grabs a screen region via BitBlt into a 32-bit top-down DIB and
    /// converts BGRA to RGBA.
    fn grab(&mut self, bounds: &Rectangle) -> Result<RgbaImage> {
        let width = bounds.width as i32;
        let height = bounds.height as i32;
        if width <= 0 || height <= 0 {
            return Err(
                ExtractError::CaptureUnavailable("empty capture bounds".to_string()).into(),
            );
        }

        unsafe {
            let screen_dc = GetDC(None);
            if screen_dc.is_invalid() {
                return Err(
                    ExtractError::CaptureUnavailable("GetDC returned null".to_string()).into(),
                );
            }
            let mem_dc = CreateCompatibleDC(screen_dc);
            let bitmap = CreateCompatibleBitmap(screen_dc, width, height);
            let old = SelectObject(mem_dc, bitmap);

            let blt = BitBlt(
                mem_dc, 0, 0, width, height, screen_dc, bounds.x, bounds.y, SRCCOPY,
            );

            let mut buffer = vec![0u8; width as usize * height as usize * 4];
            let mut bmi = BITMAPINFO {
                bmiHeader: BITMAPINFOHEADER {
                    biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: width,
                    biHeight: -height,
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: BI_RGB.0 as u32,
                    ..Default::default()
                },
                ..Default::default()
            };
            let copied = GetDIBits(
                mem_dc,
                bitmap,
                0,
                height as u32,
                Some(buffer.as_mut_ptr() as *mut _),
                &mut bmi,
                DIB_RGB_COLORS,
            );

            SelectObject(mem_dc, old);
            let _ = DeleteObject(bitmap);
            let _ = DeleteDC(mem_dc);
            ReleaseDC(None, screen_dc);

            blt.map_err(|e| {
                ExtractError::CaptureUnavailable(format!("BitBlt failed: {}", e))
            })?;
            if copied == 0 {
                return Err(
                    ExtractError::CaptureUnavailable("GetDIBits returned no scanlines".to_string())
                        .into(),
                );
            }

            // BGRA -> RGBA; GDI leaves alpha undefined.
            for px in buffer.chunks_exact_mut(4) {
                px.swap(0, 2);
                px[3] = 255;
            }

            RgbaImage::from_raw(bounds.width, bounds.height, buffer).ok_or_else(|| {
                ExtractError::CaptureUnavailable("capture buffer size mismatch".to_string()).into()
            })
        }
    }
}
