use crate::drivers::EdlError;
use crate::types::{Command, DeviceStatus, SamplePacket};

/// How a read request was satisfied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReadStatus {
    #[default]
    Complete,
    /// Fewer packets than requested were available; the batch is still valid.
    Truncated,
    /// The backend reported an error code other than disconnection. Whatever
    /// packets it returned alongside the code are still delivered.
    Failed { code: i32 },
}

/// Packets returned by one read call, in acquisition order.
#[derive(Clone, Debug, Default)]
pub struct ReadBatch {
    pub status: ReadStatus,
    pub packets: Vec<SamplePacket>,
}

impl ReadBatch {
    pub fn complete(packets: Vec<SamplePacket>) -> Self {
        Self {
            status: ReadStatus::Complete,
            packets,
        }
    }
    pub fn truncated(packets: Vec<SamplePacket>) -> Self {
        Self {
            status: ReadStatus::Truncated,
            packets,
        }
    }
    pub fn failed(code: i32, packets: Vec<SamplePacket>) -> Self {
        Self {
            status: ReadStatus::Failed { code },
            packets,
        }
    }
    pub fn len(&self) -> usize {
        self.packets.len()
    }
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// Streaming side of a connected device.
pub trait DataSource {
    /// Discard buffered samples that have not been read yet.
    fn purge_data(&mut self) -> Result<(), EdlError>;
    fn device_status(&mut self) -> Result<DeviceStatus, EdlError>;
    /// Read up to `requested` packets. A short read is reported through
    /// [`ReadStatus::Truncated`], a vendor error that still carries packets
    /// through [`ReadStatus::Failed`] and a lost connection through
    /// [`EdlError::DeviceNotConnected`].
    fn read_data(&mut self, requested: usize) -> Result<ReadBatch, EdlError>;
}

/// Discovery, connection and command side of the device.
pub trait DeviceControl {
    fn detect_devices(&mut self) -> Result<Vec<String>, EdlError>;
    fn connect(&mut self, device_id: &str) -> Result<(), EdlError>;
    fn disconnect(&mut self) -> Result<(), EdlError>;
    /// Stack `command`; when `apply` is set, every stacked command is sent.
    fn set_command(&mut self, command: Command, apply: bool) -> Result<(), EdlError>;
}

/// A complete device backend.
pub trait EdlDevice: DataSource + DeviceControl {}

impl<T: DataSource + DeviceControl> EdlDevice for T {}
