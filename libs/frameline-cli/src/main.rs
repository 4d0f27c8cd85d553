// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! frameline CLI: synthetic playback (`play`) and latency measurement
//! (`bench`).

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use frameline::{
    AudioPresenter, AvSyncClock, FileWriterStage, Frame, FrameSource, LatencyMonitor, LatencyUnit,
    LinkSpec,
    MediaClock, MonotonicClock, NullPresentTarget, PassthroughUnit, Pipeline, PixelFormat, Poll,
    PresentationStage, PropertyBag, RETRY_INTERVAL, RetryBackoff, SourceItem, Stage, StreamRouter,
    Submit, SyntheticAvSource, SyntheticSource, UnitStage, VideoPresenter, Wait, shared,
};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "frameline", version, about = "Staged media pipeline playground")]
struct Cli {
    /// Verbose logging (same as RUST_LOG=debug)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play a synthetic A/V stream through the full pipeline
    Play(PlayArgs),
    /// Measure submission-to-output latency through a processing unit
    Bench(BenchArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Nv12,
    P010,
    Rgba8,
    Bgra8,
}

impl From<FormatArg> for PixelFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Nv12 => PixelFormat::Nv12,
            FormatArg::P010 => PixelFormat::P010,
            FormatArg::Rgba8 => PixelFormat::Rgba8,
            FormatArg::Bgra8 => PixelFormat::Bgra8,
        }
    }
}

#[derive(clap::Args)]
struct PlayArgs {
    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 720)]
    height: u32,
    #[arg(long, value_enum, default_value_t = FormatArg::Nv12)]
    format: FormatArg,
    /// Frames per loop cycle
    #[arg(long, default_value_t = 300)]
    frames: u64,
    #[arg(long, default_value_t = 30.0)]
    fps: f64,
    /// Restart from the beginning on end-of-stream
    #[arg(long = "loop")]
    loop_playback: bool,
    /// Number of loop cycles to play (implies --loop)
    #[arg(long)]
    cycles: Option<u64>,
    /// Disable presentation waits (frames go out as fast as they arrive)
    #[arg(long)]
    low_latency: bool,
    /// Video-only playback
    #[arg(long)]
    no_audio: bool,
    /// Connector queue capacity on the video path
    #[arg(long, default_value_t = 4)]
    capacity: usize,
    /// Write the video stream to a file instead of presenting it
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BenchMode {
    /// Submit continuously; a polling thread collects output
    Asap,
    /// One frame in, one frame out
    Sync,
}

#[derive(clap::Args)]
struct BenchArgs {
    #[arg(long, default_value_t = 1920)]
    width: u32,
    #[arg(long, default_value_t = 1080)]
    height: u32,
    #[arg(long, value_enum, default_value_t = FormatArg::Nv12)]
    format: FormatArg,
    #[arg(long, default_value_t = 500)]
    frames: u64,
    #[arg(long, default_value_t = 60.0)]
    fps: f64,
    #[arg(long, value_enum, default_value_t = BenchMode::Asap)]
    mode: BenchMode,
    /// Polls the unit withholds each frame for (simulated turnaround)
    #[arg(long, default_value_t = 1)]
    delay_polls: u32,
    /// Pace submission at the source frame rate
    #[arg(long)]
    realtime: bool,
    /// Write unit output to a file
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Command::Play(args) => play(args),
        Command::Bench(args) => bench(args),
    }
}

fn play(args: PlayArgs) -> anyhow::Result<()> {
    let clock: Arc<dyn MediaClock> = Arc::new(MonotonicClock);
    let monitor = Arc::new(LatencyMonitor::new(Arc::clone(&clock)));
    let format: PixelFormat = args.format.into();

    let mut builder = Pipeline::builder();
    let unit_options = PropertyBag::new().with(PassthroughUnit::OPT_DEPTH, 4i64);

    // Video path: decoder -> converter -> presenter (or file writer).
    let decoder = builder.add_stage(
        UnitStage::init(
            "video-decoder",
            PassthroughUnit::boxed(),
            format,
            args.width,
            args.height,
            &unit_options,
        )
        .context("init video decoder")?,
    )?;
    let converter = builder.add_stage(
        UnitStage::init(
            "video-converter",
            PassthroughUnit::boxed(),
            format,
            args.width,
            args.height,
            &unit_options,
        )
        .context("init video converter")?,
    )?;
    builder.connect(
        decoder,
        converter,
        if args.low_latency {
            LinkSpec::direct()
        } else {
            LinkSpec::threaded(args.capacity)
        },
    )?;

    let avsync = Arc::new(AvSyncClock::new());
    let video_sink = if let Some(path) = &args.output {
        let writer = FileWriterStage::create("video-writer", path)
            .with_context(|| format!("create {}", path.display()))?
            .with_monitor(Arc::clone(&monitor));
        builder.add_stage(writer)?
    } else {
        let presenter =
            VideoPresenter::new("video-presenter", Arc::clone(&clock), Box::new(NullPresentTarget))
                .with_avsync(Arc::clone(&avsync))
                .with_monitor(Arc::clone(&monitor));
        presenter.control().set_do_wait(!args.low_latency);
        builder.register_presenter(&presenter);
        builder.add_stage(presenter)?
    };
    builder.connect(converter, video_sink, LinkSpec::threaded_poll(4))?;

    // Source side: an A/V router when audio plays too, else plain video.
    if args.no_audio || args.output.is_some() {
        let source = SyntheticSource::new(args.width, args.height, format, args.fps, args.frames)?;
        builder.set_source(source, decoder, LinkSpec::threaded(10));
    } else {
        let router = builder.add_stage(StreamRouter::new("demux"))?;
        builder.connect(
            router,
            decoder,
            LinkSpec::threaded(args.capacity).from_slot(StreamRouter::VIDEO_SLOT),
        )?;

        // The audio path is optional: a failure here degrades to
        // video-only playback instead of aborting.
        match build_audio_branch(&mut builder, &clock, &avsync, router) {
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(error = %e, "audio path disabled, continuing video-only");
            }
        }

        let source = SyntheticAvSource::new(
            args.width,
            args.height,
            format,
            args.fps,
            args.frames,
            48_000,
            2,
            1024,
        )?;
        builder.set_source(source, router, LinkSpec::threaded(10));
        builder.with_avsync(Arc::clone(&avsync));
    }

    builder.with_monitor(Arc::clone(&monitor));
    builder.loop_playback(args.loop_playback || args.cycles.is_some());
    if let Some(cycles) = args.cycles {
        builder.max_cycles(cycles);
    }

    let mut pipeline = builder.build().context("build pipeline")?;
    println!("{}", pipeline.topology().to_graphviz());

    let outcome = pipeline.run()?;
    println!("playback finished: {outcome:?}");
    println!(
        "presented {} frame(s), dropped {}, smoothed fps {:.2}",
        pipeline.frames_presented(),
        pipeline.frames_dropped(),
        pipeline.fps(),
    );
    print_latency(&monitor);
    pipeline.stop();
    Ok(())
}

fn build_audio_branch(
    builder: &mut frameline::PipelineBuilder,
    clock: &Arc<dyn MediaClock>,
    avsync: &Arc<AvSyncClock>,
    router: frameline::StageId,
) -> anyhow::Result<()> {
    let presenter =
        AudioPresenter::new("audio-presenter", Arc::clone(clock), Box::new(NullPresentTarget))
            .with_avsync(Arc::clone(avsync));
    builder.register_presenter(&presenter);
    let audio_sink = builder.add_stage(presenter)?;
    builder.connect(
        router,
        audio_sink,
        LinkSpec::threaded(10).from_slot(StreamRouter::AUDIO_SLOT),
    )?;
    Ok(())
}

fn bench(args: BenchArgs) -> anyhow::Result<()> {
    let clock: Arc<dyn MediaClock> = Arc::new(MonotonicClock);
    let monitor = Arc::new(LatencyMonitor::new(Arc::clone(&clock)));
    let format: PixelFormat = args.format.into();

    let unit_options =
        PropertyBag::new().with(LatencyUnit::OPT_DELAY_POLLS, args.delay_polls as i64);
    let stage = UnitStage::init(
        "encoder",
        LatencyUnit::boxed(args.delay_polls),
        format,
        args.width,
        args.height,
        &unit_options,
    )
    .context("init unit")?;

    let mut source = SyntheticSource::new(args.width, args.height, format, args.fps, args.frames)?
        .realtime(args.realtime);

    let mut writer = match &args.output {
        Some(path) => Some(
            std::io::BufWriter::new(
                std::fs::File::create(path)
                    .with_context(|| format!("create {}", path.display()))?,
            ),
        ),
        None => None,
    };

    println!(
        "bench: {} frames {}x{} mode {:?} delay {} poll(s)",
        args.frames, args.width, args.height, args.mode, args.delay_polls
    );

    match args.mode {
        BenchMode::Asap => bench_asap(stage, &mut source, &monitor, writer.as_mut())?,
        BenchMode::Sync => bench_sync(stage, &mut source, &monitor, writer.as_mut())?,
    }

    if let Some(w) = writer.as_mut() {
        w.flush()?;
    }
    print_latency(&monitor);
    Ok(())
}

type OutFile = std::io::BufWriter<std::fs::File>;

fn write_payload(writer: Option<&mut OutFile>, frame: &Frame) -> anyhow::Result<()> {
    if let (Some(w), Some(bytes)) = (writer, frame.payload_bytes()) {
        w.write_all(bytes)?;
    }
    Ok(())
}

/// Submit as fast as the unit accepts; a polling thread drains output.
fn bench_asap(
    stage: UnitStage,
    source: &mut SyntheticSource,
    monitor: &Arc<LatencyMonitor>,
    mut writer: Option<&mut OutFile>,
) -> anyhow::Result<()> {
    let stage = shared(stage);
    let poller = {
        let stage = Arc::clone(&stage);
        let monitor = Arc::clone(monitor);
        let mut collected: Vec<Frame> = Vec::new();
        std::thread::spawn(move || -> Vec<Frame> {
            loop {
                let polled = stage.lock().try_receive();
                match polled {
                    Ok(Poll::Frame(frame)) => {
                        monitor.record_output(&frame);
                        collected.push(frame);
                    }
                    Ok(Poll::Pending) => std::thread::sleep(RETRY_INTERVAL),
                    Ok(Poll::Eof) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "poll failed");
                        break;
                    }
                }
            }
            collected
        })
    };

    loop {
        match source.next_frame()? {
            SourceItem::Eof => break,
            SourceItem::Frame(mut frame) => {
                monitor.record_submit(&mut frame);
                let mut pending = Some(frame);
                let mut backoff = RetryBackoff::new(RETRY_INTERVAL, None);
                while let Some(f) = pending.take() {
                    match stage.lock().submit(f)? {
                        Submit::Accepted | Submit::NeedMore => {}
                        Submit::Full(f) => {
                            // Queue saturated: wait for the polling thread
                            // to free a slot, then resubmit.
                            pending = Some(f);
                            backoff.wait();
                        }
                    }
                }
            }
        }
    }

    // Drain; the input queue can refuse the signal while full.
    let mut backoff = RetryBackoff::new(RETRY_INTERVAL, Some(frameline::DRAIN_TIMEOUT));
    loop {
        match stage.lock().drain()? {
            frameline::Drain::Accepted => break,
            frameline::Drain::Full => match backoff.wait() {
                Wait::Retry => {}
                Wait::TimedOut => bail!("drain timed out"),
                Wait::Stopped => break,
            },
        }
    }

    let collected = poller.join().expect("polling thread panicked");
    for frame in &collected {
        write_payload(writer.as_deref_mut(), frame)?;
    }
    Ok(())
}

/// Frame-in/frame-out: the input queue never fills, every frame is polled
/// to completion before the next submit.
fn bench_sync(
    mut stage: UnitStage,
    source: &mut SyntheticSource,
    monitor: &Arc<LatencyMonitor>,
    mut writer: Option<&mut OutFile>,
) -> anyhow::Result<()> {
    loop {
        match source.next_frame()? {
            SourceItem::Eof => break,
            SourceItem::Frame(mut frame) => {
                monitor.record_submit(&mut frame);
                match stage.submit(frame)? {
                    Submit::Accepted | Submit::NeedMore => {}
                    Submit::Full(_) => bail!("input full in one-in/one-out mode"),
                }
                loop {
                    match stage.try_receive()? {
                        Poll::Frame(out) => {
                            monitor.record_output(&out);
                            write_payload(writer.as_deref_mut(), &out)?;
                            break;
                        }
                        Poll::Pending => std::thread::sleep(RETRY_INTERVAL),
                        Poll::Eof => break,
                    }
                }
            }
        }
    }

    // Flush whatever the unit still buffers.
    loop {
        match stage.drain()? {
            frameline::Drain::Accepted => break,
            frameline::Drain::Full => std::thread::sleep(RETRY_INTERVAL),
        }
    }
    loop {
        match stage.try_receive()? {
            Poll::Frame(out) => {
                monitor.record_output(&out);
                write_payload(writer.as_deref_mut(), &out)?;
            }
            Poll::Pending => std::thread::sleep(RETRY_INTERVAL),
            Poll::Eof => break,
        }
    }
    Ok(())
}

fn print_latency(monitor: &LatencyMonitor) {
    let report = monitor.report();
    println!(
        "latency: {} frame(s) in {:.2} ms ({:.1} fps)",
        report.frames, report.elapsed_ms, report.throughput_fps
    );
    println!(
        "         first {:.3} ms | min {:.3} ms | max {:.3} ms | avg {:.3} ms",
        report.first_frame_ms, report.min_ms, report.max_ms, report.avg_ms
    );
}
