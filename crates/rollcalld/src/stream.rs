//! Live capture loop: MJPEG fan-out plus continuous recognition.
//!
//! One thread owns the frame source. Every frame is recognized against the
//! current model, annotated, JPEG-encoded, and broadcast to however many
//! `/video_feed` subscribers exist. Source failure produces an explicit
//! terminal event instead of a silently-ending stream.

use crate::mailbox::Mailbox;
use crate::trainer::SharedModel;
use bytes::Bytes;
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use rollcall_core::detect::normalize_crop;
use rollcall_core::locator::FaceLocator;
use rollcall_core::types::FaceRect;
use rollcall_hw::camera::FrameSource;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Predict distance at or below which a live match is accepted
/// (confidence ≥ 20 on the reported scale).
const ACCEPT_DISTANCE: f32 = 80.0;

/// Multipart boundary token used by the feed response.
pub const BOUNDARY: &str = "frame";

const FEED_BACKLOG: usize = 8;

/// Events fanned out to feed subscribers.
#[derive(Clone)]
pub enum FeedEvent {
    /// One encoded JPEG frame.
    Jpeg(Bytes),
    /// The source failed or ended; the stream is over. Carries the cause.
    Terminated(String),
}

/// Broadcast hub for feed events.
#[derive(Clone)]
pub struct FeedPublisher {
    tx: broadcast::Sender<FeedEvent>,
}

impl FeedPublisher {
    pub fn new() -> Self {
        Self { tx: broadcast::channel(FEED_BACKLOG).0 }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.tx.subscribe()
    }

    fn send(&self, event: FeedEvent) {
        // Zero subscribers is normal; frames are simply not retained.
        let _ = self.tx.send(event);
    }
}

impl Default for FeedPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the capture loop on its own thread.
pub fn spawn_capture_loop(
    mut source: impl FrameSource + Send + 'static,
    locator: Arc<dyn FaceLocator>,
    model: SharedModel,
    mailbox: Arc<Mailbox>,
    feed: FeedPublisher,
) {
    std::thread::Builder::new()
        .name("rollcall-capture".into())
        .spawn(move || {
            let result = source.run(&mut |frame| {
                let sequence = frame.sequence;
                match frame.into_image() {
                    Some(gray) => {
                        process_frame(gray, locator.as_ref(), &model, &mailbox, &feed)
                    }
                    None => {
                        tracing::warn!(sequence, "frame buffer size mismatch; skipping");
                    }
                }
                true
            });
            let cause = match result {
                Ok(()) => "frame source ended".to_string(),
                Err(e) => e.to_string(),
            };
            tracing::warn!(cause = %cause, "capture loop terminated");
            feed.send(FeedEvent::Terminated(cause));
        })
        .expect("failed to spawn capture thread");
}

/// One frame of the live loop: detect, recognize, annotate, publish, encode.
fn process_frame(
    gray: GrayImage,
    locator: &dyn FaceLocator,
    model: &SharedModel,
    mailbox: &Mailbox,
    feed: &FeedPublisher,
) {
    let faces = match locator.locate(&gray) {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(error = %e, "live detection failed; passing frame through");
            Vec::new()
        }
    };

    let mut canvas = DynamicImage::ImageLuma8(gray.clone()).to_rgb8();

    for rect in &faces {
        let Some(crop) = normalize_crop(&gray, rect) else { continue };
        let recognized = model.read().as_ref().and_then(|m| m.recognize(&crop).ok().flatten());
        let Some(rec) = recognized else { continue };
        if rec.distance <= ACCEPT_DISTANCE {
            draw_face_box(&mut canvas, rect);
            // Blocks while the previous name sits unpolled; the feed stalls
            // until the poller drains it.
            mailbox.publish_blocking(rec.subject);
        }
    }

    match encode_jpeg(&canvas) {
        Ok(jpeg) => feed.send(FeedEvent::Jpeg(jpeg)),
        Err(e) => tracing::warn!(error = %e, "jpeg encode failed; dropping frame"),
    }
}

fn draw_face_box(canvas: &mut RgbImage, rect: &FaceRect) {
    let shape = Rect::at(rect.x, rect.y).of_size(rect.width.max(1), rect.height.max(1));
    draw_hollow_rect_mut(canvas, shape, Rgb([0, 255, 0]));
}

fn encode_jpeg(img: &RgbImage) -> Result<Bytes, image::ImageError> {
    let mut buf = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 80).encode_image(img)?;
    Ok(Bytes::from(buf))
}

/// Frame one JPEG as a multipart part.
pub fn multipart_part(jpeg: &Bytes) -> Bytes {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n").as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

/// Terminal part announcing why the stream ended, followed by the closing
/// boundary.
pub fn terminal_part(cause: &str) -> Bytes {
    Bytes::from(format!(
        "--{BOUNDARY}\r\nContent-Type: text/plain\r\n\r\nstream terminated: {cause}\r\n--{BOUNDARY}--\r\n"
    ))
}
