//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Resolution requested from the driver; the negotiated size may differ and
/// the negotiated values are what frames carry.
const REQUEST_WIDTH: u32 = 640;
const REQUEST_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("video capture not supported by device")]
    CaptureNotSupported,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("frame read failed: {0}")]
    ReadFailed(String),
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed; extract the Y channel.
    Yuyv,
    /// 8-bit grayscale, used as-is.
    Grey,
    /// Motion-JPEG; each buffer is a standalone JPEG image.
    Mjpg,
}

/// Anything that can push a sequence of frames into a sink.
///
/// The camera is the production source; tests substitute synthetic ones.
/// The source runs until the sink declines further frames (`false`) or the
/// source fails; an `Err` is terminal for the whole stream.
pub trait FrameSource {
    fn run(&mut self, sink: &mut dyn FnMut(Frame) -> bool) -> Result<(), CameraError>;
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 device by path (e.g. "/dev/video0") and negotiate a
    /// supported pixel format.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::ReadFailed(format!("failed to query capabilities: {e}")))?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::CaptureNotSupported);
        }

        // Ask for YUYV; accept whatever of the supported set the driver
        // negotiates (UVC webcams commonly answer MJPG at this size).
        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUEST_WIDTH;
        fmt.height = REQUEST_HEIGHT;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;

        let pixel_format = if negotiated.fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if negotiated.fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if negotiated.fourcc == FourCC::new(b"MJPG") {
            PixelFormat::Mjpg
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format {:?} (need YUYV, GREY, or MJPG)",
                negotiated.fourcc
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    /// Stream frames into `sink` until it declines more or a read fails.
    ///
    /// One mmap stream is held for the whole session; buffers are dequeued,
    /// converted to grayscale, and requeued by the iterator.
    pub fn stream(&self, sink: &mut dyn FnMut(Frame) -> bool) -> Result<(), CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::ReadFailed(format!("failed to create mmap stream: {e}")))?;

        loop {
            let (buf, meta) = stream
                .next()
                .map_err(|e| CameraError::ReadFailed(format!("failed to dequeue buffer: {e}")))?;

            let frame = self.decode_buffer(buf, meta.sequence)?;
            if !sink(frame) {
                return Ok(());
            }
        }
    }

    /// Convert one raw driver buffer into a grayscale [`Frame`].
    fn decode_buffer(&self, buf: &[u8], sequence: u32) -> Result<Frame, CameraError> {
        match self.pixel_format {
            PixelFormat::Grey => {
                let pixels = (self.width * self.height) as usize;
                if buf.len() < pixels {
                    return Err(CameraError::ReadFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                Ok(Frame {
                    data: buf[..pixels].to_vec(),
                    width: self.width,
                    height: self.height,
                    sequence,
                })
            }
            PixelFormat::Yuyv => {
                let data = frame::yuyv_to_grayscale(buf, self.width, self.height)
                    .map_err(|e| CameraError::ReadFailed(e.to_string()))?;
                Ok(Frame { data, width: self.width, height: self.height, sequence })
            }
            PixelFormat::Mjpg => {
                let decoded = image::load_from_memory(buf)
                    .map_err(|e| CameraError::ReadFailed(format!("MJPG decode failed: {e}")))?
                    .to_luma8();
                let (width, height) = decoded.dimensions();
                Ok(Frame { data: decoded.into_raw(), width, height, sequence })
            }
        }
    }
}

impl FrameSource for Camera {
    fn run(&mut self, sink: &mut dyn FnMut(Frame) -> bool) -> Result<(), CameraError> {
        self.stream(sink)
    }
}
