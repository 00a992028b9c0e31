//! # WAV Framer
//!
//! Writes a canonical 44-byte RIFF/WAVE header in front of a raw PCM payload
//! without knowing the payload length up front.
//!
//! ## Lifecycle:
//! 1. **begin**: header written with both size fields zeroed
//! 2. **append**: PCM bytes written sequentially, never rewinding
//! 3. **finalize**: RIFF size (offset 4) and data size (offset 40) back-patched
//!
//! ## Header Layout (little-endian):
//! ```text
//!  0 "RIFF"   4 riff size = 36 + data   8 "WAVE"
//! 12 "fmt "  16 16 (fmt chunk size)     20 1 (PCM)      22 channels
//! 24 sample rate                        28 byte rate    32 block align
//! 34 bits per sample                    36 "data"       40 data size
//! ```

use crate::error::{NodeError, NodeResult};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Seek, SeekFrom, Write};

/// Size of the canonical header; the payload starts right after it.
pub const WAV_HEADER_LEN: u64 = 44;

const RIFF_SIZE_OFFSET: u64 = 4;
const DATA_SIZE_OFFSET: u64 = 40;
const FMT_CHUNK_LEN: u32 = 16;
const FORMAT_PCM: u16 = 1;

/// Format fields fixed at capture start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl WavSpec {
    /// Mono 16-bit PCM, the only layout the sample clock produces.
    pub fn mono_pcm16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            bits_per_sample: 16,
            channels: 1,
        }
    }

    pub fn bytes_per_sample(&self) -> u16 {
        (self.bits_per_sample + 7) / 8
    }

    pub fn block_align(&self) -> u16 {
        self.channels * self.bytes_per_sample()
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * u32::from(self.block_align())
    }
}

/// Write the 44-byte header with the given size fields.
fn write_header<W: Write>(sink: &mut W, spec: &WavSpec, riff_size: u32, data_size: u32) -> io::Result<()> {
    sink.write_all(b"RIFF")?;
    sink.write_u32::<LittleEndian>(riff_size)?;
    sink.write_all(b"WAVE")?;

    sink.write_all(b"fmt ")?;
    sink.write_u32::<LittleEndian>(FMT_CHUNK_LEN)?;
    sink.write_u16::<LittleEndian>(FORMAT_PCM)?;
    sink.write_u16::<LittleEndian>(spec.channels)?;
    sink.write_u32::<LittleEndian>(spec.sample_rate)?;
    sink.write_u32::<LittleEndian>(spec.byte_rate())?;
    sink.write_u16::<LittleEndian>(spec.block_align())?;
    sink.write_u16::<LittleEndian>(spec.bits_per_sample)?;

    sink.write_all(b"data")?;
    sink.write_u32::<LittleEndian>(data_size)?;
    Ok(())
}

/// Final sizes of a finalized recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSummary {
    /// Total bytes on storage, header included
    pub file_bytes: u64,
    /// PCM payload bytes
    pub data_bytes: u64,
    pub samples: u64,
}

/// A WAV object under construction.
///
/// The sink must support seeking back over already written bytes; in
/// production that is a buffered file from [`crate::storage::Storage`], in
/// tests an in-memory `Cursor`.
pub struct WavWriter<W: Write + Seek> {
    sink: W,
    spec: WavSpec,
}

impl<W: Write + Seek> WavWriter<W> {
    /// Write the placeholder header and return a writer positioned at the payload.
    pub fn begin(mut sink: W, spec: WavSpec) -> NodeResult<Self> {
        write_header(&mut sink, &spec, 0, 0).map_err(|e| NodeError::storage("write WAV header", e))?;
        Ok(Self { sink, spec })
    }

    /// Append one 16-bit sample.
    pub fn append_sample(&mut self, sample: i16) -> NodeResult<()> {
        self.sink
            .write_i16::<LittleEndian>(sample)
            .map_err(|e| NodeError::storage("append PCM", e))
    }

    /// Patch both size fields from the real sink length and hand the sink back.
    ///
    /// Sizes come from the sink's end position, not from the running counter,
    /// so the header always describes what is actually on storage.
    pub fn finalize(mut self) -> NodeResult<(W, WavSummary)> {
        let file_bytes = self
            .sink
            .seek(SeekFrom::End(0))
            .map_err(|e| NodeError::storage("seek to end", e))?;
        let data_bytes = file_bytes.saturating_sub(WAV_HEADER_LEN);

        let riff_size = u32::try_from(file_bytes.saturating_sub(8)).map_err(|_| {
            NodeError::Storage(format!("recording of {} bytes exceeds the WAV size limit", file_bytes))
        })?;
        // riff_size fitting implies data_size fits too
        let data_size = data_bytes as u32;

        self.patch_u32(RIFF_SIZE_OFFSET, riff_size)?;
        self.patch_u32(DATA_SIZE_OFFSET, data_size)?;
        self.sink
            .seek(SeekFrom::End(0))
            .map_err(|e| NodeError::storage("seek to end", e))?;
        self.sink.flush().map_err(|e| NodeError::storage("flush WAV", e))?;

        let summary = WavSummary {
            file_bytes,
            data_bytes,
            samples: data_bytes / u64::from(self.spec.block_align().max(1)),
        };
        Ok((self.sink, summary))
    }

    fn patch_u32(&mut self, offset: u64, value: u32) -> NodeResult<()> {
        self.sink
            .seek(SeekFrom::Start(offset))
            .map_err(|e| NodeError::storage("seek to header field", e))?;
        self.sink
            .write_u32::<LittleEndian>(value)
            .map_err(|e| NodeError::storage("patch header field", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{ByteOrder, LittleEndian};
    use std::io::Cursor;

    fn finalize_samples(sample_rate: u32, samples: &[i16]) -> (Vec<u8>, WavSummary) {
        let mut writer = WavWriter::begin(Cursor::new(Vec::new()), WavSpec::mono_pcm16(sample_rate)).unwrap();
        for &s in samples {
            writer.append_sample(s).unwrap();
        }
        let (cursor, summary) = writer.finalize().unwrap();
        (cursor.into_inner(), summary)
    }

    #[test]
    fn test_one_second_at_8khz_header_fields() {
        let samples = vec![0i16; 8000];
        let (bytes, summary) = finalize_samples(8000, &samples);

        assert_eq!(bytes.len(), 16044);
        assert_eq!(summary.file_bytes, 16044);
        assert_eq!(summary.data_bytes, 16000);
        assert_eq!(summary.samples, 8000);

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(LittleEndian::read_u32(&bytes[4..8]), 16036);
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(LittleEndian::read_u32(&bytes[16..20]), 16);
        assert_eq!(LittleEndian::read_u16(&bytes[20..22]), 1);
        assert_eq!(LittleEndian::read_u16(&bytes[22..24]), 1);
        assert_eq!(LittleEndian::read_u32(&bytes[24..28]), 8000);
        assert_eq!(LittleEndian::read_u32(&bytes[28..32]), 16000);
        assert_eq!(LittleEndian::read_u16(&bytes[32..34]), 2);
        assert_eq!(LittleEndian::read_u16(&bytes[34..36]), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(LittleEndian::read_u32(&bytes[40..44]), 16000);
    }

    #[test]
    fn test_zero_samples_is_bare_header() {
        let (bytes, summary) = finalize_samples(8000, &[]);
        assert_eq!(bytes.len(), 44);
        assert_eq!(summary.data_bytes, 0);
        assert_eq!(LittleEndian::read_u32(&bytes[4..8]), 36);
        assert_eq!(LittleEndian::read_u32(&bytes[40..44]), 0);
    }

    #[test]
    fn test_placeholder_header_has_zeroed_sizes() {
        let writer = WavWriter::begin(Cursor::new(Vec::new()), WavSpec::mono_pcm16(16000)).unwrap();
        let bytes = writer.sink.get_ref().clone();
        assert_eq!(bytes.len(), 44);
        assert_eq!(LittleEndian::read_u32(&bytes[4..8]), 0);
        assert_eq!(LittleEndian::read_u32(&bytes[40..44]), 0);
        assert_eq!(LittleEndian::read_u32(&bytes[28..32]), 32000);
    }

    #[test]
    fn test_samples_are_little_endian_after_header() {
        let (bytes, _) = finalize_samples(8000, &[1, -2, i16::MAX]);
        assert_eq!(&bytes[44..], &[0x01, 0x00, 0xFE, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn test_size_invariants_over_durations() {
        for (duration, rate) in [(0u32, 8000u32), (1, 8000), (2, 4000), (1, 22050)] {
            let samples = vec![7i16; (duration * rate) as usize];
            let (bytes, summary) = finalize_samples(rate, &samples);
            let data_size = u64::from(duration * rate * 2);
            assert_eq!(summary.data_bytes, data_size);
            assert_eq!(summary.file_bytes, data_size + 44);
            assert_eq!(u64::from(LittleEndian::read_u32(&bytes[4..8])), 36 + data_size);
            assert_eq!(u64::from(LittleEndian::read_u32(&bytes[40..44])), data_size);
        }
    }

    #[test]
    fn test_output_is_readable_by_wav_crate() {
        let samples: Vec<i16> = (0..800).map(|i| (i * 40 - 16000) as i16).collect();
        let (bytes, _) = finalize_samples(8000, &samples);

        let (header, data) = wav::read(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(header.audio_format, 1);
        assert_eq!(header.channel_count, 1);
        assert_eq!(header.sampling_rate, 8000);
        assert_eq!(header.bits_per_sample, 16);
        match data {
            wav::BitDepth::Sixteen(decoded) => assert_eq!(decoded, samples),
            _ => panic!("expected 16-bit samples"),
        }
    }
}
