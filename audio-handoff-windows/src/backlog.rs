//! Bounded staging between WASAPI packets and the consumer's `drain` calls.
//!
//! A WASAPI packet has to be released whole, while the consumer drains in
//! batches of its own size. Whatever does not fit is dropped whole-frame,
//! newest first, and counted, the same way the callback path counts overruns.

use audio_handoff_core::{BoundedByteQueue, CaptureError, QueueReader, QueueWriter};

pub(crate) struct PacketBacklog {
    writer: QueueWriter,
    reader: QueueReader,
    bytes_per_frame: usize,
    dropped: u64,
}

impl PacketBacklog {
    pub(crate) fn new(frames: usize, bytes_per_frame: usize) -> Result<Self, CaptureError> {
        if bytes_per_frame == 0 {
            return Err(CaptureError::config("backlog frame size must be non-zero"));
        }
        let (writer, reader) = BoundedByteQueue::for_frames(frames, bytes_per_frame)?.split();
        Ok(Self {
            writer,
            reader,
            bytes_per_frame,
            dropped: 0,
        })
    }

    /// Store the whole frames of `packet` that fit. Returns the frames stored.
    pub(crate) fn push(&mut self, packet: &[u8]) -> usize {
        let frames = packet.len() / self.bytes_per_frame;
        let fit = (self.writer.available_to_write() / self.bytes_per_frame).min(frames);
        let written = self.writer.write(&packet[..fit * self.bytes_per_frame]);
        debug_assert_eq!(written, fit * self.bytes_per_frame);
        self.dropped += (frames - fit) as u64;
        fit
    }

    pub(crate) fn frames(&self) -> usize {
        self.reader.available_to_read() / self.bytes_per_frame
    }

    /// Copy up to `into.len() / bytes_per_frame` whole frames out.
    pub(crate) fn drain(&mut self, into: &mut [u8]) -> Result<usize, CaptureError> {
        let frames = (into.len() / self.bytes_per_frame).min(self.frames());
        self.reader.read(&mut into[..frames * self.bytes_per_frame])?;
        Ok(frames)
    }

    /// Frames dropped because the backlog was full.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    #[test]
    fn slow_consumer_drops_instead_of_growing() {
        let mut backlog = PacketBacklog::new(4, 4).unwrap();

        assert_eq!(backlog.push(&packet(&[0.1, 0.2, 0.3])), 3);
        assert_eq!(backlog.push(&packet(&[0.4, 0.5, 0.6])), 1);
        assert_eq!(backlog.push(&packet(&[0.7])), 0);

        assert_eq!(backlog.frames(), 4);
        assert_eq!(backlog.dropped(), 3);

        let mut out = vec![0u8; 16];
        assert_eq!(backlog.drain(&mut out).unwrap(), 4);
        assert_eq!(out, packet(&[0.1, 0.2, 0.3, 0.4]));
    }

    #[test]
    fn drain_is_limited_to_whole_frames_in_buffer() {
        let mut backlog = PacketBacklog::new(8, 8).unwrap();
        backlog.push(&packet(&[0.1, -0.1, 0.2, -0.2, 0.3]));

        let mut out = vec![0u8; 12];
        assert_eq!(backlog.drain(&mut out).unwrap(), 1);
        assert_eq!(&out[..8], &packet(&[0.1, -0.1])[..]);
        assert_eq!(backlog.frames(), 1);

        let mut rest = vec![0u8; 64];
        assert_eq!(backlog.drain(&mut rest).unwrap(), 1);
        assert_eq!(backlog.drain(&mut rest).unwrap(), 0);
        assert_eq!(backlog.dropped(), 0);
    }

    #[test]
    fn space_freed_by_drain_is_reused() {
        let mut backlog = PacketBacklog::new(2, 4).unwrap();
        let mut out = vec![0u8; 8];

        for round in 0..5 {
            let value = round as f32;
            assert_eq!(backlog.push(&packet(&[value, value + 0.5])), 2);
            assert_eq!(backlog.drain(&mut out).unwrap(), 2);
            assert_eq!(out, packet(&[value, value + 0.5]));
        }
        assert_eq!(backlog.dropped(), 0);
    }
}
