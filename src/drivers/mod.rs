// src/drivers/mod.rs
// 驱动层：采集循环、设备能力接口、输出、协议序列
pub mod acquisition;
pub mod device;
pub mod error;
pub mod protocol;
pub mod retry;
pub mod sim;
pub mod sink;
// 公开导出常用类型，方便外部调用
pub use acquisition::{AcquisitionLoop, AcquisitionReport, AcquisitionSettings};
pub use device::{DataSource, DeviceControl, EdlDevice, ReadBatch, ReadStatus};
pub use error::{AcquisitionError, EdlError, SessionError};
pub use protocol::{SealTest, WorkingModality};
pub use retry::FixedRetry;
#[cfg(test)]
pub use sim::ScriptedDevice;
pub use sim::SimulatedAmplifier;
pub use sink::{BinarySink, SampleSink};
