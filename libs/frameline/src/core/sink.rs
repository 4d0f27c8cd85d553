// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Terminal sink stages: file writer and in-memory collector.

use super::error::{PipelineError, Result};
use super::frame::{Frame, FramePayload};
use super::latency::LatencyMonitor;
use super::stage::{Drain, Poll, Stage, Submit};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Sink writing raw payload bytes to a file.
pub struct FileWriterStage {
    name: String,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    frames_written: u64,
    bytes_written: u64,
    drained: bool,
    monitor: Option<Arc<LatencyMonitor>>,
}

impl FileWriterStage {
    pub fn create(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            name: name.into(),
            path,
            writer: Some(BufWriter::new(file)),
            frames_written: 0,
            bytes_written: 0,
            drained: false,
            monitor: None,
        })
    }

    pub fn with_monitor(mut self, monitor: Arc<LatencyMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            PipelineError::stage(self.name.clone(), "writer already terminated")
        })?;
        let written = match frame.payload() {
            FramePayload::Video(v) => {
                writer.write_all(&v.data)?;
                v.data.len() as u64
            }
            FramePayload::Audio(a) => {
                for sample in a.samples.iter() {
                    writer.write_all(&sample.to_le_bytes())?;
                }
                a.samples.len() as u64 * 4
            }
        };
        self.bytes_written += written;
        self.frames_written += 1;
        Ok(())
    }
}

impl Stage for FileWriterStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&mut self, frame: Frame) -> Result<Submit> {
        self.write_frame(&frame)?;
        if let Some(monitor) = &self.monitor {
            monitor.record_output(&frame);
        }
        Ok(Submit::Accepted)
    }

    fn try_receive(&mut self) -> Result<Poll> {
        if self.drained {
            Ok(Poll::Eof)
        } else {
            Ok(Poll::Pending)
        }
    }

    fn drain(&mut self) -> Result<Drain> {
        if !self.drained {
            if let Some(writer) = self.writer.as_mut() {
                writer.flush()?;
            }
            tracing::debug!(
                path = %self.path.display(),
                frames = self.frames_written,
                bytes = self.bytes_written,
                "file sink drained"
            );
            self.drained = true;
        }
        Ok(Drain::Accepted)
    }

    fn reinit(&mut self) -> Result<()> {
        // A second pass appends to the same file.
        self.drained = false;
        Ok(())
    }

    fn terminate(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                tracing::warn!(path = %self.path.display(), error = %e, "flush on terminate failed");
            }
        }
    }
}

/// Sink collecting received pts values in memory. Primarily for tests and
/// the bench null path.
pub struct CollectSink {
    name: String,
    received: Arc<Mutex<Vec<i64>>>,
    drained: bool,
    monitor: Option<Arc<LatencyMonitor>>,
}

impl CollectSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            received: Arc::new(Mutex::new(Vec::new())),
            drained: false,
            monitor: None,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<LatencyMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Shared handle to the received pts list.
    pub fn received(&self) -> Arc<Mutex<Vec<i64>>> {
        Arc::clone(&self.received)
    }
}

impl Stage for CollectSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&mut self, frame: Frame) -> Result<Submit> {
        if let Some(monitor) = &self.monitor {
            monitor.record_output(&frame);
        }
        self.received.lock().push(frame.pts());
        Ok(Submit::Accepted)
    }

    fn try_receive(&mut self) -> Result<Poll> {
        if self.drained {
            Ok(Poll::Eof)
        } else {
            Ok(Poll::Pending)
        }
    }

    fn drain(&mut self) -> Result<Drain> {
        self.drained = true;
        Ok(Drain::Accepted)
    }

    fn reinit(&mut self) -> Result<()> {
        self.drained = false;
        Ok(())
    }
}
