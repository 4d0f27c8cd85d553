// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Frame types — the data contract between pipeline stages.
//!
//! A [`Frame`] pairs an opaque media payload with a presentation timestamp
//! (100 ns clock ticks) and a custom property map. Frames move through the
//! pipeline by value: whichever stage holds a frame owns it, connectors
//! transfer (never copy) it, and the sink releases it. Payload buffers are
//! `Arc`-shared so the splitter can duplicate a frame without copying
//! pixels or samples.

use super::config::PropertyValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Pixel layout of a video payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4:2:0 planar luma + interleaved chroma, 8 bits per sample.
    Nv12,
    /// 4:2:0 like Nv12 with 10 bits per sample in 16-bit words.
    P010,
    /// Interleaved 8-bit RGBA.
    Rgba8,
    /// Interleaved 8-bit BGRA.
    Bgra8,
}

impl PixelFormat {
    /// Bytes required for one frame at `width` x `height`.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Nv12 => pixels * 3 / 2,
            PixelFormat::P010 => pixels * 3,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => pixels * 4,
        }
    }
}

/// Decoded video payload.
#[derive(Debug, Clone)]
pub struct VideoData {
    /// Raw pixel bytes in `format` layout, shared between duplicates.
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Decoded audio payload: interleaved f32 samples in [-1.0, 1.0].
#[derive(Debug, Clone)]
pub struct AudioData {
    pub samples: Arc<Vec<f32>>,
    pub sample_rate: u32,
    pub channels: u32,
}

impl AudioData {
    /// Duration of this block in clock ticks.
    pub fn duration_ticks(&self) -> i64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let frames = self.samples.len() as i64 / self.channels as i64;
        frames * super::media_clock::TICKS_PER_SECOND / self.sample_rate as i64
    }
}

/// Media payload carried by a frame.
#[derive(Debug, Clone)]
pub enum FramePayload {
    Video(VideoData),
    Audio(AudioData),
}

/// Broad media kind, used for stream routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

/// One unit of media data flowing through the pipeline.
#[derive(Debug, Clone)]
pub struct Frame {
    payload: FramePayload,
    /// Presentation timestamp in 100 ns clock ticks.
    pts: i64,
    /// Custom properties, copied from input to output by well-behaved
    /// units (used e.g. to smuggle submission timestamps through).
    properties: HashMap<String, PropertyValue>,
}

impl Frame {
    pub fn new(payload: FramePayload, pts: i64) -> Self {
        Self {
            payload,
            pts,
            properties: HashMap::new(),
        }
    }

    pub fn video(data: VideoData, pts: i64) -> Self {
        Self::new(FramePayload::Video(data), pts)
    }

    pub fn audio(data: AudioData, pts: i64) -> Self {
        Self::new(FramePayload::Audio(data), pts)
    }

    pub fn pts(&self) -> i64 {
        self.pts
    }

    pub fn set_pts(&mut self, pts: i64) {
        self.pts = pts;
    }

    pub fn payload(&self) -> &FramePayload {
        &self.payload
    }

    pub fn kind(&self) -> MediaKind {
        match self.payload {
            FramePayload::Video(_) => MediaKind::Video,
            FramePayload::Audio(_) => MediaKind::Audio,
        }
    }

    /// Raw payload bytes for byte-oriented sinks. Audio payloads are
    /// serialized sample-by-sample by the sink instead.
    pub fn payload_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            FramePayload::Video(v) => Some(v.data.as_slice()),
            FramePayload::Audio(_) => None,
        }
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn property_int(&self, key: &str) -> Option<i64> {
        match self.properties.get(key)? {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::media_clock::TICKS_PER_SECOND;

    fn test_video_frame(pts: i64) -> Frame {
        let data = VideoData {
            data: Arc::new(vec![0u8; PixelFormat::Nv12.frame_size(16, 16)]),
            width: 16,
            height: 16,
            format: PixelFormat::Nv12,
        };
        Frame::video(data, pts)
    }

    #[test]
    fn frame_size_per_format() {
        assert_eq!(PixelFormat::Nv12.frame_size(1920, 1080), 1920 * 1080 * 3 / 2);
        assert_eq!(PixelFormat::P010.frame_size(1920, 1080), 1920 * 1080 * 3);
        assert_eq!(PixelFormat::Rgba8.frame_size(1280, 720), 1280 * 720 * 4);
    }

    #[test]
    fn properties_round_trip() {
        let mut frame = test_video_frame(0);
        frame.set_property("submit-time", 12_345i64);
        assert_eq!(frame.property_int("submit-time"), Some(12_345));
        assert_eq!(frame.property_int("missing"), None);
    }

    #[test]
    fn clone_shares_payload() {
        let frame = test_video_frame(33);
        let dup = frame.clone();
        let (FramePayload::Video(a), FramePayload::Video(b)) = (frame.payload(), dup.payload())
        else {
            panic!("expected video payloads");
        };
        assert!(Arc::ptr_eq(&a.data, &b.data));
        assert_eq!(dup.pts(), 33);
    }

    #[test]
    fn audio_block_duration() {
        let data = AudioData {
            samples: Arc::new(vec![0.0; 48_000 * 2]), // one second, stereo
            sample_rate: 48_000,
            channels: 2,
        };
        assert_eq!(data.duration_ticks(), TICKS_PER_SECOND);
    }
}
