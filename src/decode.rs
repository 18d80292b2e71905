//! Streaming decode stage.
//!
//! Uses Symphonia to probe the container/codec, then renders packets into
//! interleaved signed 16-bit little-endian bytes on demand. The stage is
//! split in two so a stream cannot be read before format negotiation:
//! [`open_source`] probes the file and reports its native format, and
//! [`DecodeSource::convert`] applies the negotiated target, yielding the
//! readable [`DecodeStream`]. Streams are strictly forward-only; the resume
//! path re-opens the file and discards bytes with [`DecodeStream::discard`]
//! using the count from [`skip_byte_count`].

use std::fs::File;
use std::io;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{self, CodecParameters, CodecType, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::SampleFormat;

use crate::error::PlayerError;
use crate::format::{ByteOrder, FormatDescriptor, SampleEncoding};

/// Scratch buffer size for the read-and-discard skip loop.
const DISCARD_CHUNK: usize = 4096;

/// PCM codecs whose serialized form is big-endian.
const BIG_ENDIAN_PCM: [CodecType; 8] = [
    codecs::CODEC_TYPE_PCM_S16BE,
    codecs::CODEC_TYPE_PCM_S24BE,
    codecs::CODEC_TYPE_PCM_S32BE,
    codecs::CODEC_TYPE_PCM_U16BE,
    codecs::CODEC_TYPE_PCM_U24BE,
    codecs::CODEC_TYPE_PCM_U32BE,
    codecs::CODEC_TYPE_PCM_F32BE,
    codecs::CODEC_TYPE_PCM_F64BE,
];

/// A probed file whose native format is known but which is not yet readable.
///
/// Call [`convert`](Self::convert) with the negotiated target format to get
/// a [`DecodeStream`].
pub struct DecodeSource {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    native: FormatDescriptor,
    duration_us: Option<u64>,
}

/// Sequential byte stream of decoded audio in the converted format.
pub struct DecodeStream {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: FormatDescriptor,
    pending: Vec<u8>,
    pending_pos: usize,
    eof: bool,
}

/// Probe `path` and prepare a decoder for its default audio track.
pub fn open_source(path: &Path) -> Result<DecodeSource, PlayerError> {
    let open_err = |detail: String| PlayerError::DecodeOpen {
        path: path.to_path_buf(),
        detail,
    };

    let file = File::open(path).map_err(|e| open_err(e.to_string()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| open_err(e.to_string()))?;

    let reader = probed.format;
    let track = reader
        .default_track()
        .ok_or_else(|| open_err("no default audio track".into()))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let sample_rate = params
        .sample_rate
        .filter(|rate| *rate > 0)
        .ok_or_else(|| open_err("unknown sample rate".into()))?;
    let channels = params
        .channels
        .map(|c| c.count())
        .filter(|count| (1..=u16::MAX as usize).contains(count))
        .ok_or_else(|| open_err("unknown channel layout".into()))? as u16;

    let native = native_format_of(&params, sample_rate, channels);
    let duration_us = params
        .n_frames
        .map(|frames| frames.saturating_mul(1_000_000) / sample_rate as u64);

    let decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| open_err(e.to_string()))?;

    Ok(DecodeSource {
        reader,
        decoder,
        track_id,
        native,
        duration_us,
    })
}

impl DecodeSource {
    /// Format the decoder reports for this track's samples.
    pub fn native_format(&self) -> FormatDescriptor {
        self.native
    }

    /// Track duration, when the container declares a frame count.
    pub fn duration_micros(&self) -> Option<u64> {
        self.duration_us
    }

    /// Apply the negotiated `target` format and return the readable stream.
    ///
    /// A canonical source passes through unchanged; this only re-labels the
    /// stream. Targets that would alter the sample rate or channel count, or
    /// ask for anything but signed 16-bit little-endian output, are
    /// conversion failures.
    pub fn convert(self, target: &FormatDescriptor) -> Result<DecodeStream, PlayerError> {
        if target.sample_rate != self.native.sample_rate || target.channels != self.native.channels
        {
            return Err(PlayerError::FormatConversion {
                requested: target.to_string(),
                detail: format!("source stream is {}", self.native),
            });
        }
        if !target.is_canonical() {
            return Err(PlayerError::FormatConversion {
                requested: target.to_string(),
                detail: "only signed 16-bit little-endian output is supported".into(),
            });
        }
        Ok(DecodeStream {
            reader: self.reader,
            decoder: self.decoder,
            track_id: self.track_id,
            format: *target,
            pending: Vec::new(),
            pending_pos: 0,
            eof: false,
        })
    }
}

impl DecodeStream {
    /// Format of the bytes this stream yields.
    pub fn format(&self) -> FormatDescriptor {
        self.format
    }

    /// Fill `out` with decoded bytes.
    ///
    /// Returns the number of bytes written; `0` means end of stream. A
    /// return shorter than `out` only happens at end of stream. Reads are
    /// frame-aligned whenever `out.len()` is a frame multiple.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize, PlayerError> {
        let mut filled = 0;
        while filled < out.len() {
            if self.pending_pos < self.pending.len() {
                let take = (out.len() - filled).min(self.pending.len() - self.pending_pos);
                out[filled..filled + take]
                    .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + take]);
                self.pending_pos += take;
                filled += take;
                continue;
            }
            if !self.decode_next_packet()? {
                break;
            }
        }
        Ok(filled)
    }

    /// Read and throw away up to `bytes` bytes.
    ///
    /// Returns the count actually discarded. Stops early at end of stream
    /// (not an error: the caller simply observes end of stream on its next
    /// read) or when `cancelled` reports true between scratch reads.
    pub fn discard(
        &mut self,
        bytes: u64,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<u64, PlayerError> {
        let mut scratch = [0u8; DISCARD_CHUNK];
        let mut discarded: u64 = 0;
        while discarded < bytes {
            if cancelled() {
                break;
            }
            let want = scratch.len().min((bytes - discarded) as usize);
            let got = self.read(&mut scratch[..want])?;
            if got == 0 {
                break;
            }
            discarded += got as u64;
        }
        Ok(discarded)
    }

    /// Decode packets until one yields samples. Returns `false` at end of
    /// stream.
    fn decode_next_packet(&mut self) -> Result<bool, PlayerError> {
        if self.eof {
            return Ok(false);
        }
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.eof = true;
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(other) => return Err(PlayerError::DecodeRead(other.to_string())),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(err)) => {
                    tracing::warn!(error = %err, "skipping undecodable packet");
                    continue;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(other) => return Err(PlayerError::DecodeRead(other.to_string())),
            };
            if decoded.frames() == 0 {
                continue;
            }

            let mut sample_buf = SampleBuffer::<i16>::new(decoded.frames() as u64, *decoded.spec());
            sample_buf.copy_interleaved_ref(decoded);

            self.pending.clear();
            self.pending_pos = 0;
            self.pending.reserve(sample_buf.samples().len() * 2);
            for sample in sample_buf.samples() {
                self.pending.extend_from_slice(&sample.to_le_bytes());
            }
            return Ok(true);
        }
    }
}

/// Bytes to discard when resuming after `elapsed_us` of rendered audio.
///
/// `floor(elapsed_us * rate * frame_size / 1e6)`, rounded down to a frame
/// multiple so a partial frame is never skipped (that would shift channel
/// alignment for the whole remaining stream).
pub fn skip_byte_count(elapsed_us: u64, format: &FormatDescriptor) -> u64 {
    let frame = format.frame_size as u64;
    if frame == 0 {
        return 0;
    }
    let raw =
        (elapsed_us as f64 * format.sample_rate as f64 * frame as f64 / 1_000_000.0) as u64;
    raw - raw % frame
}

/// Infer the serialized sample format of a track from its codec parameters.
///
/// Lossy codecs that do not declare a sample format decode to float
/// internally, so they land on `f32`; lossless codecs declare either a
/// sample format or a bit depth.
fn native_format_of(params: &CodecParameters, sample_rate: u32, channels: u16) -> FormatDescriptor {
    let byte_order = if BIG_ENDIAN_PCM.contains(&params.codec) {
        ByteOrder::Big
    } else {
        ByteOrder::Little
    };

    let (encoding, bits) = match params.sample_format {
        Some(SampleFormat::S8) => (SampleEncoding::SignedInt, 8),
        Some(SampleFormat::S16) => (SampleEncoding::SignedInt, 16),
        Some(SampleFormat::S24) => (SampleEncoding::SignedInt, 24),
        Some(SampleFormat::S32) => (SampleEncoding::SignedInt, 32),
        Some(SampleFormat::U8) => (SampleEncoding::UnsignedInt, 8),
        Some(SampleFormat::U16) => (SampleEncoding::UnsignedInt, 16),
        Some(SampleFormat::U24) => (SampleEncoding::UnsignedInt, 24),
        Some(SampleFormat::U32) => (SampleEncoding::UnsignedInt, 32),
        Some(SampleFormat::F32) => (SampleEncoding::Float, 32),
        Some(SampleFormat::F64) => (SampleEncoding::Float, 64),
        None => match params.bits_per_sample.and_then(|bits| u16::try_from(bits).ok()) {
            Some(bits) => (SampleEncoding::SignedInt, bits),
            None => (SampleEncoding::Float, 32),
        },
    };

    FormatDescriptor::new(encoding, sample_rate, bits, channels, byte_order)
}
