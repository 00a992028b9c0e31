//! # Acquisition-then-Upload Pipeline
//!
//! One wake cycle, strictly sequential:
//!
//! ```text
//! storage.create -> WavWriter::begin -> SampleClock::capture -> finalize
//!     -> link gate -> storage.open_read -> TransportSession::open
//!     -> request head -> MultipartEnvelope::stream_to -> response lines -> close
//! ```
//!
//! The capture must finish (or fail) before the upload starts, and nothing is
//! retried inside a cycle. Any error ends the cycle; the caller logs it and
//! suspends.

use crate::audio::adc::AnalogInput;
use crate::audio::sampler::{CaptureStats, SampleClock};
use crate::audio::wav::{WavSpec, WavSummary, WavWriter};
use crate::config::{AudioConfig, NodeConfig};
use crate::error::{NodeError, NodeResult};
use crate::http::multipart::{FilePart, MultipartEnvelope};
use crate::http::transport::{parse_status_line, TlsPolicy, TransportSession};
use crate::network::LinkGate;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

const USER_AGENT: &str = concat!("edge-noise-node/", env!("CARGO_PKG_VERSION"));

/// A finalized recording on storage.
#[derive(Debug, Clone, Copy)]
pub struct Recording {
    pub wav: WavSummary,
    pub capture: CaptureStats,
}

/// What one upload put on the wire and what came back.
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadOutcome {
    pub file_bytes: u64,
    /// Chunk payload bytes (multipart framing included, chunk framing not)
    pub body_bytes: u64,
    pub frames: u64,
    pub status: Option<u16>,
}

/// Summary of a completed cycle, logged as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub device_id: String,
    pub wav_bytes: u64,
    pub samples: u64,
    pub effective_rate: f64,
    pub late_samples: u64,
    pub uploaded_bytes: u64,
    pub body_bytes: u64,
    pub frames: u64,
    pub http_status: Option<u16>,
}

/// Run one full cycle: record, then upload.
pub async fn run_cycle(config: &NodeConfig, input: &mut dyn AnalogInput) -> NodeResult<CycleReport> {
    let cycle_id = Uuid::new_v4();
    let started_at = Utc::now();
    let span = info_span!("cycle", cycle_id = %cycle_id);

    async move {
        let storage = Storage::new(&config.storage.root);
        let recording = record(&config.audio, &storage, &config.storage.wav_name, input)?;

        LinkGate::new(
            config.upload.host.clone(),
            config.upload.port,
            Duration::from_secs(config.power.link_wait_secs),
        )
        .wait_for_link()
        .await?;

        let outcome = upload(config, &storage).await?;

        Ok(CycleReport {
            cycle_id,
            started_at,
            device_id: config.device.id.clone(),
            wav_bytes: recording.wav.file_bytes,
            samples: recording.wav.samples,
            effective_rate: recording.capture.effective_rate(),
            late_samples: recording.capture.late_samples,
            uploaded_bytes: outcome.file_bytes,
            body_bytes: outcome.body_bytes,
            frames: outcome.frames,
            http_status: outcome.status,
        })
    }
    .instrument(span)
    .await
}

/// Capture one recording into `name`, overwriting the previous cycle's file.
///
/// Blocks the calling thread for the whole capture.
pub fn record(
    audio: &AudioConfig,
    storage: &Storage,
    name: &str,
    input: &mut dyn AnalogInput,
) -> NodeResult<Recording> {
    let sink = storage.create(name)?;
    let mut writer = WavWriter::begin(sink, WavSpec::mono_pcm16(audio.sample_rate))?;

    info!(
        sample_rate = audio.sample_rate,
        duration_secs = audio.duration_secs,
        adc_bits = input.resolution_bits(),
        source = ?audio.source,
        timing = ?audio.timing,
        "Starting capture"
    );
    let clock = SampleClock::new(audio.sample_rate, audio.timing);
    let capture = clock.capture(audio.duration_secs, input, |sample| writer.append_sample(sample))?;

    let (sink, wav) = writer.finalize()?;
    let file = sink
        .into_inner()
        .map_err(|e| NodeError::storage("flush WAV", e.into_error()))?;
    file.sync_all().map_err(|e| NodeError::storage("sync WAV", e))?;

    if capture.late_samples > 0 {
        warn!(late_samples = capture.late_samples, "Sample clock missed deadlines");
    }
    info!(
        samples = wav.samples,
        data_bytes = wav.data_bytes,
        file_bytes = wav.file_bytes,
        effective_rate = %format!("{:.1}", capture.effective_rate()),
        late_samples = capture.late_samples,
        "Capture complete"
    );
    Ok(Recording { wav, capture })
}

/// Stream the stored recording to the collection server.
///
/// Bounded by `upload.timeout_secs` when it is non-zero.
pub async fn upload(config: &NodeConfig, storage: &Storage) -> NodeResult<UploadOutcome> {
    let timeout_secs = config.upload.timeout_secs;
    if timeout_secs == 0 {
        return send_recording(config, storage).await;
    }
    tokio::time::timeout(Duration::from_secs(timeout_secs), send_recording(config, storage))
        .await
        .map_err(|_| NodeError::Transport(format!("upload exceeded {}s deadline", timeout_secs)))?
}

async fn send_recording(config: &NodeConfig, storage: &Storage) -> NodeResult<UploadOutcome> {
    let upload = &config.upload;
    // storage first: a missing recording must not cost a connection
    let source = storage.open_read(&config.storage.wav_name).await?;

    let tls = upload.use_tls.then_some(if upload.tls_insecure {
        TlsPolicy::AcceptAny
    } else {
        TlsPolicy::VerifyChain
    });
    info!(host = %upload.host, port = upload.port, path = %upload.path, tls = ?tls, "Connecting to collector");

    let mut session = TransportSession::open(&upload.host, upload.port, tls).await?;
    let result = exchange(&mut session, config, source).await;
    session.close().await;
    result
}

async fn exchange(
    session: &mut TransportSession,
    config: &NodeConfig,
    source: tokio::fs::File,
) -> NodeResult<UploadOutcome> {
    let upload = &config.upload;
    let envelope = build_envelope(config, source);

    session.send_request_line("POST", &upload.path).await?;
    session.send_header("Host", &host_header(&upload.host, upload.port, upload.use_tls)).await?;
    session.send_header("Content-Type", &envelope.content_type()).await?;
    session.send_header("User-Agent", USER_AGENT).await?;
    session.end_headers().await?;

    let stats = envelope.stream_to(session.body()?, upload.window_bytes).await?;
    info!(
        file_bytes = stats.file_bytes,
        body_bytes = stats.chunked.payload_bytes,
        frames = stats.chunked.frames,
        "Upload body sent"
    );

    let mut status = None;
    let mut first_line = true;
    let lines = session.read_response()?;
    tokio::pin!(lines);
    while let Some(line) = lines.next().await {
        let line = line?;
        if std::mem::take(&mut first_line) {
            status = parse_status_line(&line);
            if let Some(code) = status {
                if (200..300).contains(&code) {
                    info!(status = code, "Collector accepted upload");
                } else {
                    warn!(status = code, "Collector returned non-success status");
                }
            }
        }
        info!(line = %line, "Collector response");
    }

    Ok(UploadOutcome {
        file_bytes: stats.file_bytes,
        body_bytes: stats.chunked.payload_bytes,
        frames: stats.chunked.frames,
        status,
    })
}

/// File part, then `device_id`, then location fields when configured.
fn build_envelope<R>(config: &NodeConfig, source: R) -> MultipartEnvelope<R> {
    let upload = &config.upload;
    let device = &config.device;
    let mut envelope = MultipartEnvelope::new(
        upload.boundary.clone(),
        FilePart {
            field_name: upload.file_field.clone(),
            filename: upload.filename.clone(),
            content_type: upload.content_type.clone(),
            source,
        },
    )
    .field("device_id", device.id.clone());

    if let Some(latitude) = &device.latitude {
        envelope = envelope.field("latitude", latitude.clone());
    }
    if let Some(longitude) = &device.longitude {
        envelope = envelope.field("longitude", longitude.clone());
    }
    envelope
}

/// `Host` value per RFC 7230: IPv6 literals are bracketed, default ports omitted.
fn host_header(host: &str, port: u16, tls: bool) -> String {
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };
    let default_port = if tls { 443 } else { 80 };
    if port == default_port {
        host
    } else {
        format!("{}:{}", host, port)
    }
}
