//! Audio format descriptors and canonical-format negotiation.
//!
//! Every playback segment renders through one canonical format: fixed-point
//! signed 16-bit little-endian samples at the source's own rate and channel
//! count. [`FormatDescriptor::canonical`] is the negotiation step: a source
//! already in that shape keeps its descriptor unchanged, anything else maps
//! onto the canonical descriptor with rate and channels preserved.

use std::fmt;

/// Sample encoding family of a PCM stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleEncoding {
    SignedInt,
    UnsignedInt,
    Float,
}

/// Byte order of multi-byte samples in the serialized stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Shape of a decoded PCM byte stream.
///
/// `frame_size` is derived in [`FormatDescriptor::new`] and is always
/// `channels * bytes_per_sample`, so a descriptor cannot carry an
/// inconsistent frame size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub encoding: SampleEncoding,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    /// Bytes per frame (one sample for every channel).
    pub frame_size: u16,
    pub byte_order: ByteOrder,
}

impl FormatDescriptor {
    pub fn new(
        encoding: SampleEncoding,
        sample_rate: u32,
        bits_per_sample: u16,
        channels: u16,
        byte_order: ByteOrder,
    ) -> Self {
        let frame_size = channels * bits_per_sample.div_ceil(8);
        Self {
            encoding,
            sample_rate,
            bits_per_sample,
            channels,
            frame_size,
            byte_order,
        }
    }

    pub fn bytes_per_sample(&self) -> u16 {
        self.bits_per_sample.div_ceil(8)
    }

    /// Whether this descriptor already is the canonical playback format.
    pub fn is_canonical(&self) -> bool {
        self.encoding == SampleEncoding::SignedInt
            && self.bits_per_sample == 16
            && self.byte_order == ByteOrder::Little
    }

    /// Negotiate the playback format for a stream with this native format.
    ///
    /// Returns `self` unchanged when it is already canonical, so a canonical
    /// source introduces no conversion step. Otherwise the result is signed
    /// 16-bit little-endian at the same sample rate and channel count.
    pub fn canonical(&self) -> Self {
        if self.is_canonical() {
            *self
        } else {
            Self::new(
                SampleEncoding::SignedInt,
                self.sample_rate,
                16,
                self.channels,
                ByteOrder::Little,
            )
        }
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.encoding {
            SampleEncoding::SignedInt => "s",
            SampleEncoding::UnsignedInt => "u",
            SampleEncoding::Float => "f",
        };
        let order = match self.byte_order {
            ByteOrder::Little => "le",
            ByteOrder::Big => "be",
        };
        write!(
            f,
            "{}{}{} {} Hz {} ch",
            prefix, self.bits_per_sample, order, self.sample_rate, self.channels
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_follows_channels_and_bits() {
        let f = FormatDescriptor::new(SampleEncoding::SignedInt, 44_100, 16, 2, ByteOrder::Little);
        assert_eq!(f.frame_size, 4);
        let f = FormatDescriptor::new(SampleEncoding::SignedInt, 48_000, 24, 2, ByteOrder::Little);
        assert_eq!(f.frame_size, 6);
        let f = FormatDescriptor::new(SampleEncoding::Float, 96_000, 32, 1, ByteOrder::Little);
        assert_eq!(f.frame_size, 4);
    }

    #[test]
    fn canonical_source_negotiates_to_itself() {
        let native =
            FormatDescriptor::new(SampleEncoding::SignedInt, 44_100, 16, 2, ByteOrder::Little);
        assert!(native.is_canonical());
        assert_eq!(native.canonical(), native);
    }

    #[test]
    fn non_canonical_sources_keep_rate_and_channels() {
        let native = FormatDescriptor::new(SampleEncoding::Float, 48_000, 32, 1, ByteOrder::Little);
        let target = native.canonical();
        assert_eq!(target.encoding, SampleEncoding::SignedInt);
        assert_eq!(target.bits_per_sample, 16);
        assert_eq!(target.sample_rate, 48_000);
        assert_eq!(target.channels, 1);
        assert_eq!(target.frame_size, 2);
        assert_eq!(target.byte_order, ByteOrder::Little);
    }

    #[test]
    fn big_endian_sixteen_bit_is_rewritten_to_little() {
        let native = FormatDescriptor::new(SampleEncoding::SignedInt, 44_100, 16, 2, ByteOrder::Big);
        assert!(!native.is_canonical());
        let target = native.canonical();
        assert_eq!(target.byte_order, ByteOrder::Little);
        assert_eq!(target.sample_rate, 44_100);
        assert_eq!(target.channels, 2);
    }

    #[test]
    fn display_is_compact() {
        let f = FormatDescriptor::new(SampleEncoding::SignedInt, 44_100, 16, 2, ByteOrder::Little);
        assert_eq!(f.to_string(), "s16le 44100 Hz 2 ch");
    }
}
