use serde::{Deserialize, Serialize};

/// Encoding of one raw sample as delivered by the device.
///
/// Integer formats are signed and normalised by the type's maximum, so
/// `i16::MAX` decodes to `1.0`. All formats use native byte order because the
/// queue only ever carries bytes produced on this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    I8,
    I16,
    I32,
    #[default]
    F32,
}

impl SampleFormat {
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::I8 => 1,
            Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
        }
    }

    /// Decode one sample from exactly `bytes_per_sample()` bytes.
    ///
    /// The result is clamped to `[-1.0, 1.0]`.
    pub fn decode(self, bytes: &[u8]) -> f32 {
        debug_assert_eq!(bytes.len(), self.bytes_per_sample());
        let value = match self {
            Self::I8 => i8::from_ne_bytes([bytes[0]]) as f32 / i8::MAX as f32,
            Self::I16 => i16::from_ne_bytes([bytes[0], bytes[1]]) as f32 / i16::MAX as f32,
            Self::I32 => {
                let raw = i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                (raw as f64 / i32::MAX as f64) as f32
            }
            Self::F32 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        };
        value.clamp(-1.0, 1.0)
    }

    /// Encode a normalised sample into `out`, the inverse of [`decode`](Self::decode).
    pub fn encode(self, sample: f32, out: &mut [u8]) {
        debug_assert_eq!(out.len(), self.bytes_per_sample());
        let clamped = sample.clamp(-1.0, 1.0);
        match self {
            Self::I8 => ((clamped * i8::MAX as f32).round() as i8).write_ne(out),
            Self::I16 => ((clamped * i16::MAX as f32).round() as i16).write_ne(out),
            Self::I32 => ((clamped as f64 * i32::MAX as f64).round() as i32).write_ne(out),
            Self::F32 => clamped.write_ne(out),
        }
    }
}

/// A primitive sample type a driver can hand to the producer directly.
pub trait PcmSample: Copy + Send + 'static {
    const FORMAT: SampleFormat;

    /// Write this sample's native-endian bytes into `out`.
    fn write_ne(self, out: &mut [u8]);
}

impl PcmSample for i8 {
    const FORMAT: SampleFormat = SampleFormat::I8;

    fn write_ne(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_ne_bytes());
    }
}

impl PcmSample for i16 {
    const FORMAT: SampleFormat = SampleFormat::I16;

    fn write_ne(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_ne_bytes());
    }
}

impl PcmSample for i32 {
    const FORMAT: SampleFormat = SampleFormat::I32;

    fn write_ne(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_ne_bytes());
    }
}

impl PcmSample for f32 {
    const FORMAT: SampleFormat = SampleFormat::F32;

    fn write_ne(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_ne_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn bytes_per_sample() {
        assert_eq!(SampleFormat::I8.bytes_per_sample(), 1);
        assert_eq!(SampleFormat::I16.bytes_per_sample(), 2);
        assert_eq!(SampleFormat::I32.bytes_per_sample(), 4);
        assert_eq!(SampleFormat::F32.bytes_per_sample(), 4);
    }

    #[test]
    fn decode_i16_full_scale() {
        let max = i16::MAX.to_ne_bytes();
        let min = i16::MIN.to_ne_bytes();
        let zero = 0i16.to_ne_bytes();

        assert_abs_diff_eq!(SampleFormat::I16.decode(&max), 1.0);
        // i16::MIN is one step past -MAX and clamps.
        assert_abs_diff_eq!(SampleFormat::I16.decode(&min), -1.0);
        assert_abs_diff_eq!(SampleFormat::I16.decode(&zero), 0.0);
    }

    #[test]
    fn decode_i8_half_scale() {
        let half = 64i8.to_ne_bytes();
        assert_abs_diff_eq!(SampleFormat::I8.decode(&half), 64.0 / 127.0, epsilon = 1e-6);
    }

    #[test]
    fn decode_f32_clamps_out_of_range() {
        assert_abs_diff_eq!(SampleFormat::F32.decode(&1.5f32.to_ne_bytes()), 1.0);
        assert_abs_diff_eq!(SampleFormat::F32.decode(&(-3.0f32).to_ne_bytes()), -1.0);
        assert_abs_diff_eq!(SampleFormat::F32.decode(&0.25f32.to_ne_bytes()), 0.25);
    }

    #[test]
    fn encode_i16_matches_decode() {
        let mut bytes = [0u8; 2];
        SampleFormat::I16.encode(0.5, &mut bytes);
        assert_eq!(i16::from_ne_bytes(bytes), 16384);
        assert_abs_diff_eq!(SampleFormat::I16.decode(&bytes), 0.5, epsilon = 1e-4);
    }

    #[test]
    fn pcm_sample_formats() {
        assert_eq!(<i8 as PcmSample>::FORMAT, SampleFormat::I8);
        assert_eq!(<i16 as PcmSample>::FORMAT, SampleFormat::I16);
        assert_eq!(<i32 as PcmSample>::FORMAT, SampleFormat::I32);
        assert_eq!(<f32 as PcmSample>::FORMAT, SampleFormat::F32);
    }
}
