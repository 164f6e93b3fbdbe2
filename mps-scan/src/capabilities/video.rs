//! Video file and stream decoding through FFmpeg
//!
//! FFmpeg pushes decoded frames into a filter callback on its own threads.
//! Each opened source gets a decode thread whose filter forwards RGB frames
//! into a bounded channel, which the reader drains one frame at a time.

use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame, Input};
use image::RgbImage;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use tracing::{debug, warn};

use super::frame_source::{is_stream_url, FrameReader, FrameSourceOpener};
use crate::error::{ScanError, ScanResult};
use crate::models::SourceSpec;

/// Decoded frames buffered ahead of the pipeline
const FRAME_QUEUE: usize = 8;

enum Decoded {
    Frame(RgbImage),
    Failed(String),
}

/// Opens video files and network streams
#[derive(Debug, Default, Clone)]
pub struct VideoFileOpener;

impl FrameSourceOpener for VideoFileOpener {
    fn open(&self, source: &SourceSpec) -> ScanResult<Box<dyn FrameReader>> {
        if !is_stream_url(&source.path) && !Path::new(&source.path).is_file() {
            return Err(ScanError::SourceUnavailable(format!(
                "{} is not a readable video file",
                source.path
            )));
        }

        let (frames_tx, frames_rx) = mpsc::sync_channel(FRAME_QUEUE);
        let (ready_tx, ready_rx) = mpsc::channel();
        let path = source.path.clone();
        std::thread::Builder::new()
            .name(format!("decode-{}", source.id))
            .spawn(move || decode(path, frames_tx, ready_tx))
            .map_err(|e| ScanError::SourceUnavailable(format!("decoder thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                debug!(source_id = %source.id, path = %source.path, "Opened video source");
                Ok(Box::new(VideoFrameReader { frames: frames_rx }))
            }
            Ok(Err(message)) => Err(ScanError::SourceUnavailable(format!(
                "{}: {}",
                source.path, message
            ))),
            Err(_) => Err(ScanError::SourceUnavailable(format!(
                "{}: decoder exited before start",
                source.path
            ))),
        }
    }
}

/// Decode thread body; reports open failures through `ready`
fn decode(path: String, frames: SyncSender<Decoded>, ready: Sender<Result<(), String>>) {
    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter(
        "forward",
        Box::new(ForwardFrames {
            frames: frames.clone(),
        }),
    );
    let output = create_null_output().add_frame_pipeline(pipe);

    let context = match FfmpegContext::builder()
        .input(Input::new(path.as_str()))
        .filter_descs(["format=rgb24"].into())
        .output(output)
        .build()
    {
        Ok(context) => context,
        Err(e) => {
            let _ = ready.send(Err(format!("probe failed: {}", e)));
            return;
        }
    };

    let scheduler = match context.start() {
        Ok(scheduler) => scheduler,
        Err(e) => {
            let _ = ready.send(Err(format!("decoder start failed: {}", e)));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    if let Err(e) = scheduler.wait() {
        warn!(path = %path, error = %e, "Video decoding stopped early");
        let _ = frames.send(Decoded::Failed(e.to_string()));
    }
}

/// Frame filter that copies each decoded frame out to the reader
#[derive(Clone)]
struct ForwardFrames {
    frames: SyncSender<Decoded>,
}

impl FrameFilter for ForwardFrames {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        if let Some(image) = unsafe { rgb_image(&frame) } {
            // A dropped reader ends decoding
            self.frames
                .send(Decoded::Frame(image))
                .map_err(|_| "frame reader closed".to_string())?;
        }
        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {}
}

/// Copy a packed RGB24 frame (the format filter guarantees the layout)
///
/// Empty, corrupt or malformed frames yield `None`.
unsafe fn rgb_image(frame: &Frame) -> Option<RgbImage> {
    if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
        return None;
    }
    let raw = &*frame.as_ptr();
    if raw.width <= 0 || raw.height <= 0 || raw.data[0].is_null() {
        return None;
    }

    let width = raw.width as usize;
    let height = raw.height as usize;
    let row = width * 3;
    let stride = raw.linesize[0] as usize;
    if stride < row {
        return None;
    }

    let mut pixels = Vec::with_capacity(row * height);
    for y in 0..height {
        let start = raw.data[0].add(y * stride);
        pixels.extend_from_slice(std::slice::from_raw_parts(start, row));
    }
    RgbImage::from_raw(width as u32, height as u32, pixels)
}

struct VideoFrameReader {
    frames: Receiver<Decoded>,
}

impl FrameReader for VideoFrameReader {
    fn next_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
        match self.frames.recv() {
            Ok(Decoded::Frame(frame)) => Ok(Some(frame)),
            Ok(Decoded::Failed(message)) => Err(anyhow::anyhow!("video decode failed: {}", message)),
            // Decode thread finished and dropped its sender
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source_at(path: &str) -> SourceSpec {
        SourceSpec {
            id: "cam".to_string(),
            name: "Lobby".to_string(),
            path: path.to_string(),
            location: None,
        }
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.mp4");
        let result = VideoFileOpener.open(&source_at(&path.display().to_string()));
        assert!(matches!(result, Err(ScanError::SourceUnavailable(_))));
    }

    #[test]
    fn test_corrupt_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.mp4");
        std::fs::write(&path, b"definitely not an mp4 container").unwrap();

        match VideoFileOpener.open(&source_at(&path.display().to_string())) {
            Err(ScanError::SourceUnavailable(message)) => assert!(message.contains("broken.mp4")),
            Err(other) => panic!("expected SourceUnavailable, got {:?}", other),
            Ok(_) => panic!("corrupt file opened"),
        }
    }
}
