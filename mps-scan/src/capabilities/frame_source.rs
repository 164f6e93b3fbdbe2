//! Frame sources
//!
//! A source is opened once per run and then read frame by frame. Directories
//! are read as still images in file-name order; video files and stream URLs
//! go to the FFmpeg decoder when the `video` feature is built in.

use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::error::{ScanError, ScanResult};
use crate::models::SourceSpec;

const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm", "m4v", "ts", "flv"];
const STREAM_SCHEMES: &[&str] = &["rtsp://", "rtmp://", "http://", "https://"];

/// Sequential frame reader for one source
pub trait FrameReader: Send {
    /// Next frame, `Ok(None)` at end of source
    fn next_frame(&mut self) -> anyhow::Result<Option<RgbImage>>;

    /// Total frames, if known up front
    fn len_hint(&self) -> Option<u64> {
        None
    }
}

/// Opens sources; failure means the source is unavailable
pub trait FrameSourceOpener: Send + Sync {
    fn open(&self, source: &SourceSpec) -> ScanResult<Box<dyn FrameReader>>;
}

/// Routes each source to a reader by what its path names
pub struct MediaSourceOpener {
    sequences: ImageSequenceOpener,
    video: Option<Arc<dyn FrameSourceOpener>>,
}

impl MediaSourceOpener {
    /// `video` handles files with a video extension and stream URLs
    pub fn new(video: Option<Arc<dyn FrameSourceOpener>>) -> Self {
        Self {
            sequences: ImageSequenceOpener,
            video,
        }
    }

    /// Image sequences plus whatever video decoding this build carries
    pub fn standard() -> Self {
        #[cfg(feature = "video")]
        let video: Option<Arc<dyn FrameSourceOpener>> = Some(Arc::new(super::video::VideoFileOpener));
        #[cfg(not(feature = "video"))]
        let video = None;
        Self::new(video)
    }
}

impl FrameSourceOpener for MediaSourceOpener {
    fn open(&self, source: &SourceSpec) -> ScanResult<Box<dyn FrameReader>> {
        let path = Path::new(&source.path);
        if path.is_dir() {
            return self.sequences.open(source);
        }
        if !is_stream_url(&source.path) && !has_extension(path, VIDEO_EXTENSIONS) {
            return Err(ScanError::SourceUnavailable(format!(
                "{} is neither a frame directory nor a video",
                source.path
            )));
        }
        match &self.video {
            Some(video) => video.open(source),
            None => Err(ScanError::SourceUnavailable(format!(
                "{}: video decoding is not built in",
                source.path
            ))),
        }
    }
}

pub(crate) fn is_stream_url(path: &str) -> bool {
    STREAM_SCHEMES.iter().any(|scheme| path.starts_with(scheme))
}

/// Opens a directory of image files as a frame sequence
#[derive(Debug, Default, Clone)]
pub struct ImageSequenceOpener;

impl FrameSourceOpener for ImageSequenceOpener {
    fn open(&self, source: &SourceSpec) -> ScanResult<Box<dyn FrameReader>> {
        let root = Path::new(&source.path);
        if !root.is_dir() {
            return Err(ScanError::SourceUnavailable(format!(
                "{} is not a readable directory",
                source.path
            )));
        }

        let mut frames: Vec<PathBuf> = WalkDir::new(root)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_frame_file(path))
            .collect();

        if frames.is_empty() {
            return Err(ScanError::SourceUnavailable(format!(
                "{} contains no frames",
                source.path
            )));
        }

        frames.sort();
        tracing::debug!(source_id = %source.id, frames = frames.len(), "Opened image sequence");
        Ok(Box::new(ImageSequenceReader { frames, next: 0 }))
    }
}

fn is_frame_file(path: &Path) -> bool {
    has_extension(path, FRAME_EXTENSIONS)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

struct ImageSequenceReader {
    frames: Vec<PathBuf>,
    next: usize,
}

impl FrameReader for ImageSequenceReader {
    fn next_frame(&mut self) -> anyhow::Result<Option<RgbImage>> {
        let Some(path) = self.frames.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let frame = image::open(path)
            .map_err(|e| anyhow::anyhow!("decode {}: {}", path.display(), e))?
            .to_rgb8();
        Ok(Some(frame))
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.frames.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records which paths reached the video decoder
    #[derive(Default)]
    struct RecordingVideo(Mutex<Vec<String>>);

    impl FrameSourceOpener for RecordingVideo {
        fn open(&self, source: &SourceSpec) -> ScanResult<Box<dyn FrameReader>> {
            self.0.lock().unwrap().push(source.path.clone());
            Err(ScanError::SourceUnavailable("no decoder in tests".to_string()))
        }
    }

    fn source_at(path: &Path) -> SourceSpec {
        SourceSpec {
            id: "cam".to_string(),
            name: "Gate".to_string(),
            path: path.display().to_string(),
            location: None,
        }
    }

    #[test]
    fn test_missing_directory_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let result = ImageSequenceOpener.open(&source_at(&dir.path().join("absent")));
        assert!(matches!(result, Err(ScanError::SourceUnavailable(_))));
    }

    #[test]
    fn test_empty_directory_is_unavailable() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();
        assert!(matches!(
            ImageSequenceOpener.open(&source_at(dir.path())),
            Err(ScanError::SourceUnavailable(_))
        ));
    }

    #[test]
    fn test_reads_frames_in_name_order() {
        let dir = TempDir::new().unwrap();
        RgbImage::from_pixel(3, 2, image::Rgb([10, 10, 10]))
            .save(dir.path().join("0002.png"))
            .unwrap();
        RgbImage::from_pixel(5, 4, image::Rgb([200, 0, 0]))
            .save(dir.path().join("0001.png"))
            .unwrap();

        let mut reader = ImageSequenceOpener.open(&source_at(dir.path())).unwrap();
        assert_eq!(reader.len_hint(), Some(2));
        assert_eq!(reader.next_frame().unwrap().unwrap().dimensions(), (5, 4));
        assert_eq!(reader.next_frame().unwrap().unwrap().dimensions(), (3, 2));
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_directory_read_as_image_sequence() {
        let dir = TempDir::new().unwrap();
        RgbImage::from_pixel(4, 4, image::Rgb([0, 0, 0]))
            .save(dir.path().join("0001.png"))
            .unwrap();
        let video = Arc::new(RecordingVideo::default());
        let opener = MediaSourceOpener::new(Some(video.clone()));

        let reader = opener.open(&source_at(dir.path())).unwrap();
        assert_eq!(reader.len_hint(), Some(1));
        assert!(video.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_video_files_and_streams_go_to_decoder() {
        let video = Arc::new(RecordingVideo::default());
        let opener = MediaSourceOpener::new(Some(video.clone()));

        for path in ["/footage/gate.MP4", "/footage/lobby.mkv", "rtsp://10.0.0.4/stream1"] {
            let mut spec = source_at(Path::new("unused"));
            spec.path = path.to_string();
            assert!(matches!(opener.open(&spec), Err(ScanError::SourceUnavailable(_))));
        }
        assert_eq!(
            *video.0.lock().unwrap(),
            vec!["/footage/gate.MP4", "/footage/lobby.mkv", "rtsp://10.0.0.4/stream1"]
        );
    }

    #[test]
    fn test_video_without_decoder_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let clip = dir.path().join("clip.mp4");
        std::fs::write(&clip, b"mp4").unwrap();

        match MediaSourceOpener::new(None).open(&source_at(&clip)) {
            Err(ScanError::SourceUnavailable(message)) => assert!(message.contains("not built in")),
            Err(other) => panic!("expected SourceUnavailable, got {:?}", other),
            Ok(_) => panic!("video opened without a decoder"),
        }
    }

    #[test]
    fn test_unrecognised_path_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, "not a source").unwrap();
        let video = Arc::new(RecordingVideo::default());
        let opener = MediaSourceOpener::new(Some(video.clone()));

        assert!(matches!(
            opener.open(&source_at(&notes)),
            Err(ScanError::SourceUnavailable(_))
        ));
        assert!(matches!(
            opener.open(&source_at(&dir.path().join("absent"))),
            Err(ScanError::SourceUnavailable(_))
        ));
        assert!(video.0.lock().unwrap().is_empty());
    }
}
