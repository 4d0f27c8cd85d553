// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Frame sources — the upstream collaborators feeding the pipeline.
//!
//! Sources are pulled by the pipeline's pump thread through
//! `next_frame() -> Frame | Eof`. The synthetic sources here pre-render a
//! single payload buffer and hand out `Arc` clones of it, so generating
//! half a million frames costs no per-frame allocation.

use super::error::{PipelineError, Result};
use super::frame::{AudioData, Frame, PixelFormat, VideoData};
use super::media_clock::TICKS_PER_SECOND;
use std::sync::Arc;
use std::time::Duration;

/// One pull from a source.
#[derive(Debug)]
pub enum SourceItem {
    Frame(Frame),
    Eof,
}

/// Pull-based frame producer.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<SourceItem>;

    /// Rewind to the beginning (loop restart).
    fn reset(&mut self) -> Result<()>;

    fn seek(&mut self, _pts: i64) -> Result<()> {
        Err(PipelineError::NotSupported("seek".to_string()))
    }

    /// Total duration in clock ticks, when known.
    fn duration(&self) -> Option<i64> {
        None
    }

    /// Current position in clock ticks, when known.
    fn position(&self) -> Option<i64> {
        None
    }

    /// Video format of the stream, when the source carries video.
    fn video_format(&self) -> Option<(PixelFormat, u32, u32)> {
        None
    }
}

/// Synthetic video source producing `total` frames at a fixed interval.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    format: PixelFormat,
    frame_interval: i64,
    total: u64,
    produced: u64,
    payload: Arc<Vec<u8>>,
    realtime: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, format: PixelFormat, fps: f64, total: u64) -> Result<Self> {
        if fps <= 0.0 {
            return Err(PipelineError::Configuration(format!(
                "fps must be positive, got {fps}"
            )));
        }
        if width == 0 || height == 0 {
            return Err(PipelineError::Configuration(format!(
                "invalid dimensions {width}x{height}"
            )));
        }
        let size = format.frame_size(width, height);
        // Cheap gradient so written output is not all zeros.
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        Ok(Self {
            width,
            height,
            format,
            frame_interval: (TICKS_PER_SECOND as f64 / fps) as i64,
            total,
            produced: 0,
            payload: Arc::new(payload),
            realtime: false,
        })
    }

    /// Sleep one frame interval between pulls, emulating a live capture.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn frame_interval(&self) -> i64 {
        self.frame_interval
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<SourceItem> {
        if self.produced >= self.total {
            return Ok(SourceItem::Eof);
        }
        if self.realtime && self.produced > 0 {
            std::thread::sleep(Duration::from_nanos(self.frame_interval as u64 * 100));
        }
        let pts = self.produced as i64 * self.frame_interval;
        self.produced += 1;
        Ok(SourceItem::Frame(Frame::video(
            VideoData {
                data: Arc::clone(&self.payload),
                width: self.width,
                height: self.height,
                format: self.format,
            },
            pts,
        )))
    }

    fn reset(&mut self) -> Result<()> {
        self.produced = 0;
        Ok(())
    }

    fn seek(&mut self, pts: i64) -> Result<()> {
        let target = (pts.max(0) / self.frame_interval) as u64;
        self.produced = target.min(self.total);
        Ok(())
    }

    fn duration(&self) -> Option<i64> {
        Some(self.total as i64 * self.frame_interval)
    }

    fn position(&self) -> Option<i64> {
        Some(self.produced as i64 * self.frame_interval)
    }

    fn video_format(&self) -> Option<(PixelFormat, u32, u32)> {
        Some((self.format, self.width, self.height))
    }
}

/// Synthetic A/V source interleaving video frames and audio blocks in pts
/// order, the way a demuxer hands out packets.
pub struct SyntheticAvSource {
    video: SyntheticSource,
    audio_block: Arc<Vec<f32>>,
    sample_rate: u32,
    channels: u32,
    audio_block_interval: i64,
    next_video_pts: i64,
    next_audio_pts: i64,
    duration: i64,
}

impl SyntheticAvSource {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        fps: f64,
        total_video_frames: u64,
        sample_rate: u32,
        channels: u32,
        samples_per_block: usize,
    ) -> Result<Self> {
        if sample_rate == 0 || channels == 0 || samples_per_block == 0 {
            return Err(PipelineError::Configuration(
                "invalid audio parameters".to_string(),
            ));
        }
        let video = SyntheticSource::new(width, height, format, fps, total_video_frames)?;
        let duration = video.duration().unwrap_or(0);
        let audio_block_interval =
            samples_per_block as i64 * TICKS_PER_SECOND / sample_rate as i64;
        Ok(Self {
            video,
            audio_block: Arc::new(vec![0.0; samples_per_block * channels as usize]),
            sample_rate,
            channels,
            audio_block_interval,
            next_video_pts: 0,
            next_audio_pts: 0,
            duration,
        })
    }

    fn make_audio(&self, pts: i64) -> Frame {
        Frame::audio(
            AudioData {
                samples: Arc::clone(&self.audio_block),
                sample_rate: self.sample_rate,
                channels: self.channels,
            },
            pts,
        )
    }
}

impl FrameSource for SyntheticAvSource {
    fn next_frame(&mut self) -> Result<SourceItem> {
        let video_done = self.video.produced >= self.video.total;
        let audio_done = self.next_audio_pts >= self.duration;

        if video_done && audio_done {
            return Ok(SourceItem::Eof);
        }
        // Emit whichever stream is further behind, audio winning ties so
        // the sink always has samples buffered ahead of the picture.
        if video_done || (!audio_done && self.next_audio_pts <= self.next_video_pts) {
            let frame = self.make_audio(self.next_audio_pts);
            self.next_audio_pts += self.audio_block_interval;
            return Ok(SourceItem::Frame(frame));
        }
        let item = self.video.next_frame()?;
        if let SourceItem::Frame(frame) = &item {
            self.next_video_pts = frame.pts() + self.video.frame_interval;
        }
        Ok(item)
    }

    fn reset(&mut self) -> Result<()> {
        self.video.reset()?;
        self.next_video_pts = 0;
        self.next_audio_pts = 0;
        Ok(())
    }

    fn seek(&mut self, pts: i64) -> Result<()> {
        self.video.seek(pts)?;
        self.next_video_pts = self.video.position().unwrap_or(0);
        self.next_audio_pts =
            (pts.max(0) / self.audio_block_interval) * self.audio_block_interval;
        Ok(())
    }

    fn duration(&self) -> Option<i64> {
        Some(self.duration)
    }

    fn position(&self) -> Option<i64> {
        Some(self.next_video_pts.min(self.next_audio_pts))
    }

    fn video_format(&self) -> Option<(PixelFormat, u32, u32)> {
        self.video.video_format()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::MediaKind;

    #[test]
    fn produces_exact_count_then_eof() {
        let mut src = SyntheticSource::new(64, 64, PixelFormat::Nv12, 30.0, 3).unwrap();
        let mut pts = Vec::new();
        loop {
            match src.next_frame().unwrap() {
                SourceItem::Frame(f) => pts.push(f.pts()),
                SourceItem::Eof => break,
            }
        }
        let interval = src.frame_interval();
        assert_eq!(pts, vec![0, interval, interval * 2]);
        // Eof is sticky.
        assert!(matches!(src.next_frame().unwrap(), SourceItem::Eof));
    }

    #[test]
    fn reset_rewinds() {
        let mut src = SyntheticSource::new(64, 64, PixelFormat::Nv12, 30.0, 2).unwrap();
        while !matches!(src.next_frame().unwrap(), SourceItem::Eof) {}
        src.reset().unwrap();
        let SourceItem::Frame(f) = src.next_frame().unwrap() else {
            panic!("expected frame after reset");
        };
        assert_eq!(f.pts(), 0);
    }

    #[test]
    fn seek_lands_on_frame_boundary() {
        let mut src = SyntheticSource::new(64, 64, PixelFormat::Nv12, 30.0, 100).unwrap();
        let interval = src.frame_interval();
        src.seek(interval * 10 + 17).unwrap();
        let SourceItem::Frame(f) = src.next_frame().unwrap() else {
            panic!("expected frame after seek");
        };
        assert_eq!(f.pts(), interval * 10);
    }

    #[test]
    fn invalid_fps_rejected() {
        assert!(SyntheticSource::new(64, 64, PixelFormat::Nv12, 0.0, 1).is_err());
        assert!(SyntheticSource::new(0, 64, PixelFormat::Nv12, 30.0, 1).is_err());
    }

    #[test]
    fn av_source_interleaves_in_pts_order() {
        let mut src =
            SyntheticAvSource::new(64, 64, PixelFormat::Nv12, 30.0, 5, 48_000, 2, 1024).unwrap();
        let mut last_pts = i64::MIN;
        let mut kinds = Vec::new();
        loop {
            match src.next_frame().unwrap() {
                SourceItem::Frame(f) => {
                    assert!(f.pts() >= last_pts, "pts went backwards");
                    last_pts = f.pts();
                    kinds.push(f.kind());
                }
                SourceItem::Eof => break,
            }
        }
        assert!(kinds.contains(&MediaKind::Video));
        assert!(kinds.contains(&MediaKind::Audio));
        assert_eq!(
            kinds.iter().filter(|k| **k == MediaKind::Video).count(),
            5
        );
    }
}
