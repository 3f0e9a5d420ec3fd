//! In-memory media backend.
//!
//! Sources are registered by path and served from memory. Decoders pass
//! sample bytes straight through (a "decoded" audio chunk is the sample
//! payload interpreted as PCM), sinks pace writes by the playback time of the
//! PCM they accept, and every open/release is counted so callers can check
//! that nothing leaks.

use super::MediaBackend;
use crate::audio::{AudioSink, AudioSinkConfig, ChannelLayout, PcmEncoding};
use crate::av::{BufferFlags, MediaFormat, Packet};
use crate::codec::{Decoder, OutputBuffer, OutputStatus, PresentationSurface, RenderedFrame};
use crate::format::{Demuxer, SeekMode};
use crate::{FrameStepError, Result};
use bytes::Bytes;
use log::trace;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Input slots each memory decoder exposes.
const INPUT_SLOTS: usize = 4;

/// One track of a [`MemorySource`].
#[derive(Debug, Clone)]
pub struct MemoryTrack {
    pub format: MediaFormat,
    pub samples: Vec<Packet>,
}

impl MemoryTrack {
    pub fn new(format: MediaFormat, samples: Vec<Packet>) -> Self {
        Self { format, samples }
    }

    /// `count` video samples spaced by the format's frame rate, with a sync
    /// sample every `gop` frames.
    pub fn video_frames(format: MediaFormat, count: usize, gop: usize) -> Self {
        let frame_rate = format.frame_rate.unwrap_or(30).max(1) as i64;
        let gop = gop.max(1);
        let samples = (0..count)
            .map(|i| {
                Packet::new(vec![(i % 251) as u8; 64])
                    .with_pts_us(i as i64 * 1_000_000 / frame_rate)
                    .with_key_flag(i % gop == 0)
            })
            .collect();
        Self::new(format, samples)
    }

    /// `count` chunks of `chunk_bytes` bytes of 16-bit PCM, every chunk a
    /// sync sample.
    pub fn pcm_chunks(format: MediaFormat, count: usize, chunk_bytes: usize) -> Self {
        let sample_rate = format.sample_rate.unwrap_or(44_100).max(1) as i64;
        let channels = format.channel_count.unwrap_or(2).max(1) as i64;
        let frames_per_chunk = chunk_bytes as i64 / (2 * channels);
        let samples = (0..count)
            .map(|i| {
                Packet::new(vec![0u8; chunk_bytes])
                    .with_pts_us(i as i64 * frames_per_chunk * 1_000_000 / sample_rate)
                    .with_key_flag(true)
            })
            .collect();
        Self::new(format, samples)
    }
}

/// A container served by [`MemoryBackend`].
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pub tracks: Vec<MemoryTrack>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_track(mut self, track: MemoryTrack) -> Self {
        self.tracks.push(track);
        self
    }
}

#[derive(Debug, Default)]
struct ResourceCounters {
    demuxers_opened: AtomicUsize,
    demuxers_released: AtomicUsize,
    decoders_created: AtomicUsize,
    decoders_released: AtomicUsize,
    sinks_opened: AtomicUsize,
    sinks_released: AtomicUsize,
}

/// Point-in-time copy of a backend's open/release counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceSnapshot {
    pub demuxers_opened: usize,
    pub demuxers_released: usize,
    pub decoders_created: usize,
    pub decoders_released: usize,
    pub sinks_opened: usize,
    pub sinks_released: usize,
}

impl ResourceSnapshot {
    pub fn live_demuxers(&self) -> usize {
        self.demuxers_opened - self.demuxers_released
    }

    pub fn live_decoders(&self) -> usize {
        self.decoders_created - self.decoders_released
    }

    pub fn live_sinks(&self) -> usize {
        self.sinks_opened - self.sinks_released
    }

    /// Every opened instance has been released.
    pub fn all_released(&self) -> bool {
        self.live_demuxers() == 0 && self.live_decoders() == 0 && self.live_sinks() == 0
    }
}

/// What the backend's sinks have been asked to do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioLog {
    pub opened: Vec<AudioSinkConfig>,
    pub bytes_written: usize,
    pub writes: usize,
    pub flushes: usize,
}

/// Knobs for the decoders and sinks a [`MemoryBackend`] hands out.
#[derive(Debug, Clone)]
pub struct MemoryBackendOptions {
    /// Inputs a decoder holds before it emits the first output.
    pub decoder_latency: usize,
    /// Report `FormatChanged` before the first audio output.
    pub announce_audio_format: bool,
    /// Fail `create_decoder` for MIME types with this prefix.
    pub fail_decoder_for: Option<String>,
    /// Make sink writes take as long as the PCM they carry.
    pub pace_sink_writes: bool,
}

impl Default for MemoryBackendOptions {
    fn default() -> Self {
        Self {
            decoder_latency: 0,
            announce_audio_format: false,
            fail_decoder_for: None,
            pace_sink_writes: true,
        }
    }
}

/// [`MediaBackend`] serving registered in-memory sources.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    sources: RwLock<HashMap<PathBuf, Arc<MemorySource>>>,
    options: MemoryBackendOptions,
    counters: Arc<ResourceCounters>,
    audio_log: Arc<Mutex<AudioLog>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: MemoryBackendOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    /// Makes `source` readable at `path`.
    pub fn register<P: AsRef<Path>>(&self, path: P, source: MemorySource) {
        self.sources
            .write()
            .insert(path.as_ref().to_path_buf(), Arc::new(source));
    }

    pub fn resources(&self) -> ResourceSnapshot {
        let c = &self.counters;
        ResourceSnapshot {
            demuxers_opened: c.demuxers_opened.load(Ordering::SeqCst),
            demuxers_released: c.demuxers_released.load(Ordering::SeqCst),
            decoders_created: c.decoders_created.load(Ordering::SeqCst),
            decoders_released: c.decoders_released.load(Ordering::SeqCst),
            sinks_opened: c.sinks_opened.load(Ordering::SeqCst),
            sinks_released: c.sinks_released.load(Ordering::SeqCst),
        }
    }

    pub fn audio_log(&self) -> AudioLog {
        self.audio_log.lock().clone()
    }
}

impl MediaBackend for MemoryBackend {
    fn open_demuxer(&self, path: &Path) -> Result<Box<dyn Demuxer>> {
        let source = self.sources.read().get(path).cloned().ok_or_else(|| {
            FrameStepError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no source registered at {}", path.display()),
            ))
        })?;
        self.counters.demuxers_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryDemuxer {
            source,
            selected: None,
            cursor: 0,
            released: false,
            counters: self.counters.clone(),
        }))
    }

    fn create_decoder(&self, format: &MediaFormat) -> Result<Box<dyn Decoder>> {
        let options = &self.options;
        if let Some(prefix) = &options.fail_decoder_for {
            if format.mime.starts_with(prefix.as_str()) {
                return Err(FrameStepError::DecoderInit(format!(
                    "no decoder available for {}",
                    format.mime
                )));
            }
        }
        self.counters.decoders_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryDecoder::new(
            options.decoder_latency,
            options.announce_audio_format,
            self.counters.clone(),
        )))
    }

    fn min_buffer_size(
        &self,
        sample_rate: u32,
        layout: ChannelLayout,
        encoding: PcmEncoding,
    ) -> usize {
        // 20 ms worth of PCM, rounded up to a whole frame
        let frame = layout.channels() as usize * encoding.bytes_per_sample();
        let frames = (sample_rate as usize / 50).max(1);
        frames * frame
    }

    fn open_audio_sink(&self, config: &AudioSinkConfig) -> Result<Box<dyn AudioSink>> {
        if config.sample_rate == 0 {
            return Err(FrameStepError::DecoderInit(
                "audio sink sample rate must be positive".into(),
            ));
        }
        self.counters.sinks_opened.fetch_add(1, Ordering::SeqCst);
        self.audio_log.lock().opened.push(*config);
        Ok(Box::new(MemorySink {
            config: *config,
            playing: false,
            released: false,
            pace: self.options.pace_sink_writes,
            log: self.audio_log.clone(),
            counters: self.counters.clone(),
        }))
    }
}

struct MemoryDemuxer {
    source: Arc<MemorySource>,
    selected: Option<usize>,
    cursor: usize,
    released: bool,
    counters: Arc<ResourceCounters>,
}

impl MemoryDemuxer {
    fn samples(&self) -> &[Packet] {
        match self.selected {
            Some(index) => &self.source.tracks[index].samples,
            None => &[],
        }
    }
}

#[async_trait::async_trait]
impl Demuxer for MemoryDemuxer {
    fn track_count(&self) -> usize {
        self.source.tracks.len()
    }

    fn track_format(&self, index: usize) -> Result<MediaFormat> {
        self.source
            .tracks
            .get(index)
            .map(|t| t.format.clone())
            .ok_or_else(|| FrameStepError::InvalidData(format!("no track {}", index)))
    }

    fn select_track(&mut self, index: usize) -> Result<()> {
        if index >= self.source.tracks.len() {
            return Err(FrameStepError::InvalidData(format!("no track {}", index)));
        }
        self.selected = Some(index);
        self.cursor = 0;
        Ok(())
    }

    async fn read_sample(&mut self) -> Result<Option<Packet>> {
        tokio::task::yield_now().await;
        let Some(track) = self.selected else {
            return Err(FrameStepError::InvalidData("no track selected".into()));
        };
        Ok(self
            .samples()
            .get(self.cursor)
            .map(|p| p.clone().with_track_index(track)))
    }

    fn advance(&mut self) -> bool {
        let len = self.samples().len();
        if self.cursor < len {
            self.cursor += 1;
        }
        self.cursor < len
    }

    fn seek(&mut self, offset_us: i64, mode: SeekMode) -> Result<()> {
        let samples = self.samples();
        let previous = samples
            .iter()
            .rposition(|p| p.is_key && p.pts_us <= offset_us)
            .unwrap_or(0);
        let next = samples
            .iter()
            .position(|p| p.is_key && p.pts_us >= offset_us)
            .unwrap_or(samples.len());
        let cursor = match mode {
            SeekMode::PreviousSync => previous,
            SeekMode::NextSync => next,
            SeekMode::ClosestSync => match samples.get(next) {
                Some(after) if after.pts_us - offset_us < offset_us - samples[previous].pts_us => {
                    next
                }
                _ => previous,
            },
        };
        self.cursor = cursor;
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.counters.demuxers_released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct PendingInput {
    slot: usize,
    data: Bytes,
    pts_us: i64,
    flags: BufferFlags,
}

struct MemoryDecoder {
    format: Option<MediaFormat>,
    surface: Option<Arc<dyn PresentationSurface>>,
    started: bool,
    released: bool,
    latency: usize,
    announce_format: bool,
    format_announced: bool,
    free_slots: VecDeque<usize>,
    pending: VecDeque<PendingInput>,
    input_eos: bool,
    ready: HashMap<usize, (Bytes, i64)>,
    next_output: usize,
    counters: Arc<ResourceCounters>,
}

impl MemoryDecoder {
    fn new(latency: usize, announce_format: bool, counters: Arc<ResourceCounters>) -> Self {
        Self {
            format: None,
            surface: None,
            started: false,
            released: false,
            latency,
            announce_format,
            format_announced: false,
            free_slots: (0..INPUT_SLOTS).collect(),
            pending: VecDeque::new(),
            input_eos: false,
            ready: HashMap::new(),
            next_output: 0,
            counters,
        }
    }

    fn ensure_started(&self) -> Result<()> {
        if self.started {
            Ok(())
        } else {
            Err(FrameStepError::Codec("decoder is not executing".into()))
        }
    }
}

#[async_trait::async_trait]
impl Decoder for MemoryDecoder {
    fn configure(
        &mut self,
        format: &MediaFormat,
        surface: Option<Arc<dyn PresentationSurface>>,
    ) -> Result<()> {
        if let Some(surface) = &surface {
            if !surface.is_valid() {
                return Err(FrameStepError::DecoderInit("surface is not valid".into()));
            }
        }
        self.format = Some(format.clone());
        self.surface = surface;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.format.is_none() {
            return Err(FrameStepError::DecoderInit("decoder is not configured".into()));
        }
        self.started = true;
        Ok(())
    }

    async fn dequeue_input_buffer(&mut self, timeout: Duration) -> Result<Option<usize>> {
        self.ensure_started()?;
        tokio::task::yield_now().await;
        match self.free_slots.pop_front() {
            Some(slot) => Ok(Some(slot)),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        data: Bytes,
        pts_us: i64,
        flags: BufferFlags,
    ) -> Result<()> {
        self.ensure_started()?;
        if index >= INPUT_SLOTS || self.free_slots.contains(&index) {
            return Err(FrameStepError::Codec(format!("input slot {} is not dequeued", index)));
        }
        if self.input_eos {
            return Err(FrameStepError::Codec("input queued after end-of-stream".into()));
        }
        self.input_eos = flags.end_of_stream;
        self.pending.push_back(PendingInput {
            slot: index,
            data,
            pts_us,
            flags,
        });
        Ok(())
    }

    async fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<OutputStatus> {
        self.ensure_started()?;
        tokio::task::yield_now().await;

        if self.announce_format && !self.format_announced {
            self.format_announced = true;
            if let Some(format) = &self.format {
                return Ok(OutputStatus::FormatChanged(format.clone()));
            }
        }

        if self.pending.len() > self.latency || (self.input_eos && !self.pending.is_empty()) {
            if let Some(input) = self.pending.pop_front() {
                self.free_slots.push_back(input.slot);
                let index = self.next_output;
                self.next_output += 1;
                let size = input.data.len();
                self.ready.insert(index, (input.data, input.pts_us));
                trace!("decoded output {} ({} bytes)", index, size);
                return Ok(OutputStatus::Buffer(OutputBuffer {
                    index,
                    size,
                    pts_us: input.pts_us,
                    flags: input.flags,
                }));
            }
        }

        tokio::time::sleep(timeout).await;
        Ok(OutputStatus::TryAgainLater)
    }

    fn output_buffer(&self, index: usize) -> Option<Bytes> {
        self.ready.get(&index).map(|(data, _)| data.clone())
    }

    fn release_output_buffer(&mut self, index: usize, render: bool) -> Result<()> {
        let (_, pts_us) = self
            .ready
            .remove(&index)
            .ok_or_else(|| FrameStepError::Codec(format!("output {} is not dequeued", index)))?;
        if render {
            if let (Some(surface), Some(format)) = (&self.surface, &self.format) {
                surface.present(&RenderedFrame {
                    pts_us,
                    width: format.width.unwrap_or(0),
                    height: format.height.unwrap_or(0),
                });
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
        self.pending.clear();
        self.ready.clear();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.surface = None;
            self.counters.decoders_released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct MemorySink {
    config: AudioSinkConfig,
    playing: bool,
    released: bool,
    pace: bool,
    log: Arc<Mutex<AudioLog>>,
    counters: Arc<ResourceCounters>,
}

#[async_trait::async_trait]
impl AudioSink for MemorySink {
    fn play(&mut self) -> Result<()> {
        if self.released {
            return Err(FrameStepError::Codec("sink already released".into()));
        }
        self.playing = true;
        Ok(())
    }

    async fn write(&mut self, pcm: &[u8]) -> Result<usize> {
        if self.released {
            return Err(FrameStepError::Codec("sink already released".into()));
        }
        if self.pace && self.playing {
            let byte_rate = self.config.byte_rate().max(1) as f64;
            tokio::time::sleep(Duration::from_secs_f64(pcm.len() as f64 / byte_rate)).await;
        } else {
            tokio::task::yield_now().await;
        }
        let mut log = self.log.lock();
        log.bytes_written += pcm.len();
        log.writes += 1;
        Ok(pcm.len())
    }

    fn flush(&mut self) {
        self.log.lock().flushes += 1;
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.playing = false;
            self.counters.sinks_released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Presentation surface that counts the frames rendered onto it.
#[derive(Debug)]
pub struct MemorySurface {
    valid: AtomicBool,
    frames: AtomicUsize,
    last_pts_us: AtomicI64,
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self {
            valid: AtomicBool::new(true),
            frames: AtomicUsize::new(0),
            last_pts_us: AtomicI64::new(-1),
        }
    }
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_rendered(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    /// PTS of the last rendered frame, `None` before the first one.
    pub fn last_pts_us(&self) -> Option<i64> {
        let pts = self.last_pts_us.load(Ordering::SeqCst);
        (pts >= 0).then_some(pts)
    }

    /// Marks the surface as destroyed; decoders refuse to bind to it.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }
}

impl PresentationSurface for MemorySurface {
    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn present(&self, frame: &RenderedFrame) {
        self.frames.fetch_add(1, Ordering::SeqCst);
        self.last_pts_us.store(frame.pts_us, Ordering::SeqCst);
    }
}
