use crate::camera::controller::{CaptureDevice, CapturedStill, PermissionState};
use crate::common::config::CameraConfig;
use crate::common::{FaceAuthError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageBuffer, Luma};
use std::fs;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

/// Special device index meaning "first device that can capture video".
pub const AUTO_DETECT_INDEX: u32 = 999;

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
    pub formats: Vec<String>,
    pub can_capture: bool,
}

/// V4L2 webcam. Every blocking driver call runs on the blocking pool.
pub struct V4lCamera {
    config: CameraConfig,
    index: Option<u32>,
    ready: bool,
}

impl V4lCamera {
    pub fn new(config: &CameraConfig) -> Self {
        Self { config: config.clone(), index: None, ready: false }
    }

    /// List all available cameras with their capabilities
    pub fn list_all_cameras() -> Result<Vec<CameraInfo>> {
        let mut cameras = Vec::new();

        // Scan /dev/video* devices
        for entry in fs::read_dir("/dev")? {
            let entry = entry?;
            let Some(index) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("video"))
                .and_then(|index| index.parse::<u32>().ok())
            else {
                continue;
            };

            let Ok(device) = Device::new(index as usize) else { continue };
            let Ok(caps) = device.query_caps() else { continue };

            let formats = device
                .enum_formats()
                .unwrap_or_default()
                .iter()
                .map(|fmt| fmt.fourcc.str().unwrap_or("UNKNOWN").to_string())
                .collect();

            cameras.push(CameraInfo {
                index,
                name: caps.card.clone(),
                formats,
                can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            });
        }

        // Sort by index
        cameras.sort_by_key(|c| c.index);
        Ok(cameras)
    }

    fn resolve_index(&self) -> Result<u32> {
        if self.config.device_index != AUTO_DETECT_INDEX {
            return Ok(self.config.device_index);
        }
        Self::list_all_cameras()?
            .into_iter()
            .find(|c| c.can_capture)
            .map(|c| {
                tracing::info!("Selected camera: /dev/video{} ({})", c.index, c.name);
                c.index
            })
            .ok_or_else(|| FaceAuthError::HardwareUnavailable("No video capture device found".into()))
    }
}

impl CaptureDevice for V4lCamera {
    fn describe(&self) -> String {
        match self.index {
            Some(index) => format!("/dev/video{}", index),
            None => format!("/dev/video{}", self.config.device_index),
        }
    }

    async fn request_permission(&mut self) -> PermissionState {
        let index = match self.resolve_index() {
            Ok(index) => index,
            // No device at all is a hardware problem, reported by open().
            Err(_) => return PermissionState::Granted,
        };
        let node = format!("/dev/video{}", index);
        match fs::OpenOptions::new().read(true).write(true).open(&node) {
            Ok(_) => PermissionState::Granted,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                tracing::warn!("No access to {}. Add the user to the 'video' group.", node);
                PermissionState::Denied
            }
            Err(_) => PermissionState::Granted,
        }
    }

    async fn open(&mut self) -> Result<()> {
        let index = self.resolve_index()?;
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || configure_device(index, &config))
            .await
            .map_err(|e| FaceAuthError::HardwareUnavailable(format!("Camera task failed: {}", e)))??;

        self.index = Some(index);
        self.ready = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn acquire(&mut self) -> Result<CapturedStill> {
        let index = self.index.ok_or(FaceAuthError::CaptureNotReady)?;
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || capture_still(index, &config))
            .await
            .map_err(|e| FaceAuthError::CaptureFailed(format!("Camera task failed: {}", e)))?
    }

    fn release(&mut self) {
        // The stream lives only inside capture_still, so releasing is just
        // forgetting readiness.
        self.ready = false;
    }
}

fn configure_device(index: u32, config: &CameraConfig) -> Result<()> {
    tracing::debug!("Opening camera device {}...", index);

    let device = Device::new(index as usize)
        .map_err(|e| FaceAuthError::HardwareUnavailable(format!("Failed to open camera {}: {}", index, e)))?;

    let caps = device
        .query_caps()
        .map_err(|e| FaceAuthError::HardwareUnavailable(format!("Failed to query capabilities: {}", e)))?;

    if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
        return Err(FaceAuthError::HardwareUnavailable(format!(
            "Device {} ({}) does not support video capture",
            index, caps.card
        )));
    }

    let mut fmt = device
        .format()
        .map_err(|e| FaceAuthError::HardwareUnavailable(format!("Failed to get format: {}", e)))?;

    fmt.width = config.width;
    fmt.height = config.height;

    // Keep GREY for IR sensors, otherwise ask for MJPG.
    if fmt.fourcc.repr != *b"GREY" {
        fmt.fourcc = FourCC::new(b"MJPG");
    }

    // Try to set format, but don't fail if exact resolution isn't supported
    if let Err(e) = device.set_format(&fmt) {
        tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
    }

    let actual = device
        .format()
        .map_err(|e| FaceAuthError::HardwareUnavailable(format!("Failed to get final format: {}", e)))?;

    if actual.width != config.width || actual.height != config.height {
        tracing::warn!(
            "Camera resolution {}x{} differs from requested {}x{}",
            actual.width, actual.height, config.width, config.height
        );
    }

    tracing::info!("Camera {} ready: {}x{} {}", caps.card, actual.width, actual.height, actual.fourcc);
    Ok(())
}

fn capture_still(index: u32, config: &CameraConfig) -> Result<CapturedStill> {
    let mut device = Device::new(index as usize)
        .map_err(|e| FaceAuthError::CaptureFailed(format!("Failed to open camera {}: {}", index, e)))?;

    let fmt = device
        .format()
        .map_err(|e| FaceAuthError::CaptureFailed(format!("Failed to get format: {}", e)))?;

    let mut stream = v4l::io::mmap::Stream::with_buffers(&mut device, Type::VideoCapture, 4)
        .map_err(|e| FaceAuthError::CaptureFailed(format!("Failed to create stream: {}", e)))?;

    // Warmup frames let exposure settle
    for i in 0..config.warmup_frames {
        stream
            .next()
            .map_err(|e| FaceAuthError::CaptureFailed(format!("Failed to capture warmup frame {}: {}", i, e)))?;
        std::thread::sleep(std::time::Duration::from_millis(config.warmup_delay_ms));
    }

    let (buf, meta) = stream
        .next()
        .map_err(|e| FaceAuthError::CaptureFailed(format!("Failed to capture: {}", e)))?;
    let used = (meta.bytesused as usize).min(buf.len());
    let frame = if used > 0 { &buf[..used] } else { buf };

    match &fmt.fourcc.repr {
        b"MJPG" => Ok(CapturedStill { bytes: frame.to_vec(), mime: "image/jpeg" }),
        b"GREY" => grey_to_jpeg(frame.to_vec(), fmt.width, fmt.height, config.jpeg_quality),
        b"YUYV" => {
            // Luma is every other byte.
            let luma = frame.iter().step_by(2).copied().collect();
            grey_to_jpeg(luma, fmt.width, fmt.height, config.jpeg_quality)
        }
        _ => Err(FaceAuthError::CaptureFailed(format!("Unsupported pixel format {}", fmt.fourcc))),
    }
}

fn grey_to_jpeg(mut data: Vec<u8>, width: u32, height: u32, quality: u8) -> Result<CapturedStill> {
    data.truncate((width * height) as usize);
    let img_buffer = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data)
        .ok_or_else(|| FaceAuthError::CaptureFailed("Failed to create grayscale image buffer".into()))?;

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode(img_buffer.as_raw(), width, height, ColorType::L8)
        .map_err(|e| FaceAuthError::CaptureFailed(format!("JPEG encoding failed: {}", e)))?;

    Ok(CapturedStill { bytes, mime: "image/jpeg" })
}
