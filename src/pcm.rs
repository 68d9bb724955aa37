//! Sizing helpers for linear PCM buffers, which is what decoders usually hand to an audio driver.

/// The layout of a linear PCM buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PcmFormat {
    pub channels: u16,
    pub bits_per_sample: u16,
    pub sample_rate: u32,
}

impl PcmFormat {
    pub fn new(channels: u16, bits_per_sample: u16, sample_rate: u32) -> PcmFormat {
        PcmFormat {
            channels,
            bits_per_sample,
            sample_rate,
        }
    }

    /// Number of sample frames held by `byte_len` bytes in this format.
    pub fn frames(&self, byte_len: usize) -> u64 {
        let bits_per_frame = self.channels as u64 * self.bits_per_sample as u64;
        if bits_per_frame == 0 {
            return 0;
        }
        byte_len as u64 * 8 / bits_per_frame
    }

    /// Playing time of `byte_len` bytes in this format, in milliseconds.  A zero sample rate gives zero.
    pub fn duration_ms(&self, byte_len: usize) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        1000.0 * self.frames(byte_len) as f32 / self.sample_rate as f32
    }
}
