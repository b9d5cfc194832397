use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::types::{SamplePacket, EDL_CHANNEL_NUM};

/// Bytes occupied by one packet in the output stream.
pub const PACKET_BYTES: usize = EDL_CHANNEL_NUM * std::mem::size_of::<f32>();

/// Destination for acquired packets. Owned exclusively by one session.
pub trait SampleSink {
    fn write_packet(&mut self, packet: &SamplePacket) -> io::Result<()>;
    /// Flush and release the destination. Calling it again is a no-op.
    fn close(&mut self) -> io::Result<()>;
    fn is_closed(&self) -> bool;
}

/// Raw interleaved float stream: every packet is written as its channels,
/// voltage first, 32-bit little-endian, with no header or framing.
pub struct BinarySink<W: Write> {
    writer: Option<W>,
    packets_written: u64,
    close_calls: u32,
}

impl BinarySink<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path.as_ref())?;
        log::info!("writing samples to {}", path.as_ref().display());
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> BinarySink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Some(writer),
            packets_written: 0,
            close_calls: 0,
        }
    }
    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }
    /// Number of times `close` was requested, including no-op repeats.
    pub fn close_calls(&self) -> u32 {
        self.close_calls
    }
}

impl<W: Write> SampleSink for BinarySink<W> {
    fn write_packet(&mut self, packet: &SamplePacket) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "sink already closed"))?;
        let mut record = [0u8; PACKET_BYTES];
        for (chunk, value) in record.chunks_exact_mut(4).zip(packet.channels) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        writer.write_all(&record)?;
        self.packets_written += 1;
        Ok(())
    }
    fn close(&mut self) -> io::Result<()> {
        self.close_calls += 1;
        if let Some(mut w) = self.writer.take() {
            w.flush()?;
            log::debug!("sink closed after {} packets", self.packets_written);
        }
        Ok(())
    }
    fn is_closed(&self) -> bool {
        self.writer.is_none()
    }
}

/// Decode a raw stream written by [`BinarySink`].
pub fn decode_packets(bytes: &[u8]) -> Vec<SamplePacket> {
    bytes
        .chunks_exact(PACKET_BYTES)
        .map(|record| {
            let mut channels = [0f32; EDL_CHANNEL_NUM];
            for (value, chunk) in channels.iter_mut().zip(record.chunks_exact(4)) {
                *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
            SamplePacket { channels }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Writer whose bytes stay reachable after the sink drops it on close.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuffer(pub Arc<Mutex<Vec<u8>>>);
    impl SharedBuffer {
        pub(crate) fn bytes(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }
    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn packet_round_trips_through_bytes() {
        let buffer = SharedBuffer::default();
        let mut sink = BinarySink::new(buffer.clone());
        let packet = SamplePacket::new(-70.125, 12.5e-3);
        sink.write_packet(&packet).unwrap();
        sink.close().unwrap();
        let bytes = buffer.bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(decode_packets(&bytes), vec![packet]);
    }
    #[test]
    fn voltage_is_written_first() {
        let buffer = SharedBuffer::default();
        let mut sink = BinarySink::new(buffer.clone());
        sink.write_packet(&SamplePacket::new(1.0, 2.0)).unwrap();
        let bytes = buffer.bytes();
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..8], &2.0f32.to_le_bytes());
    }
    #[test]
    fn close_is_idempotent_and_blocks_writes() {
        let mut sink = BinarySink::new(SharedBuffer::default());
        sink.close().unwrap();
        sink.close().unwrap();
        assert!(sink.is_closed());
        assert_eq!(sink.close_calls(), 2);
        assert!(sink.write_packet(&SamplePacket::new(0.0, 0.0)).is_err());
    }
    #[test]
    fn file_sink_persists_packets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.dat");
        let mut sink = BinarySink::create(&path).unwrap();
        for i in 0..3 {
            sink.write_packet(&SamplePacket::new(i as f32, -(i as f32))).unwrap();
        }
        sink.close().unwrap();
        let packets = decode_packets(&std::fs::read(&path).unwrap());
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[2], SamplePacket::new(2.0, -2.0));
    }
}
