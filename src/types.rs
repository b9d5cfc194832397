// src/types.rs
use serde::{Deserialize, Serialize};

use crate::drivers::{AcquisitionReport, EdlError};

/// Number of channels in one data packet: one voltage channel followed by
/// `EDL_CHANNEL_NUM - 1` current channels.
pub const EDL_CHANNEL_NUM: usize = 2;

// 连接模式
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    #[default]
    Hardware,
    Simulation,
}

/// Snapshot returned by a device status query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceStatus {
    pub available_data_packets: usize,
    /// Device-side buffer overflowed since the last poll.
    pub buffer_overflow: bool,
    /// Samples were dropped between the device and the host.
    pub lost_data: bool,
}

/// One acquisition instant: channel 0 is the voltage in mV, the remaining
/// channels are currents in the unit selected by the configured range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplePacket {
    pub channels: [f32; EDL_CHANNEL_NUM],
}

impl SamplePacket {
    pub fn new(voltage_mv: f32, current: f32) -> Self {
        Self {
            channels: [voltage_mv, current],
        }
    }
    pub fn voltage_mv(&self) -> f32 {
        self.channels[0]
    }
    pub fn current(&self) -> f32 {
        self.channels[1]
    }
}

/// Sampling rate selector (`radioId` of the sampling rate command).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum SamplingRate {
    #[serde(rename = "1.25khz")]
    #[value(name = "1.25khz")]
    Khz1_25,
    #[default]
    #[serde(rename = "5khz")]
    #[value(name = "5khz")]
    Khz5,
    #[serde(rename = "10khz")]
    #[value(name = "10khz")]
    Khz10,
    #[serde(rename = "20khz")]
    #[value(name = "20khz")]
    Khz20,
    #[serde(rename = "50khz")]
    #[value(name = "50khz")]
    Khz50,
    #[serde(rename = "100khz")]
    #[value(name = "100khz")]
    Khz100,
    #[serde(rename = "200khz")]
    #[value(name = "200khz")]
    Khz200,
}

impl SamplingRate {
    pub const ALL: [SamplingRate; 7] = [
        SamplingRate::Khz1_25,
        SamplingRate::Khz5,
        SamplingRate::Khz10,
        SamplingRate::Khz20,
        SamplingRate::Khz50,
        SamplingRate::Khz100,
        SamplingRate::Khz200,
    ];
    pub fn radio_id(self) -> u32 {
        self as u32
    }
    pub fn from_radio_id(id: u32) -> Result<Self, EdlError> {
        Self::ALL
            .get(id as usize)
            .copied()
            .ok_or(EdlError::InvalidSelector {
                command: CommandId::SamplingRate,
                value: id,
            })
    }
    pub fn hz(self) -> f64 {
        match self {
            SamplingRate::Khz1_25 => 1_250.0,
            SamplingRate::Khz5 => 5_000.0,
            SamplingRate::Khz10 => 10_000.0,
            SamplingRate::Khz20 => 20_000.0,
            SamplingRate::Khz50 => 50_000.0,
            SamplingRate::Khz100 => 100_000.0,
            SamplingRate::Khz200 => 200_000.0,
        }
    }
}

/// Current range selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum CurrentRange {
    #[default]
    #[serde(rename = "200pa")]
    #[value(name = "200pa")]
    Pa200,
    #[serde(rename = "20na")]
    #[value(name = "20na")]
    Na20,
}

impl CurrentRange {
    pub fn radio_id(self) -> u32 {
        self as u32
    }
    pub fn from_radio_id(id: u32) -> Result<Self, EdlError> {
        match id {
            0 => Ok(CurrentRange::Pa200),
            1 => Ok(CurrentRange::Na20),
            _ => Err(EdlError::InvalidSelector {
                command: CommandId::Range,
                value: id,
            }),
        }
    }
    /// Unit of the current channels while this range is active.
    pub fn current_unit(self) -> &'static str {
        match self {
            CurrentRange::Pa200 => "pA",
            CurrentRange::Na20 => "nA",
        }
    }
}

/// Final bandwidth selector, expressed as a fraction of the sampling rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FinalBandwidth {
    /// Filters disabled: bandwidth is half the sampling rate.
    #[default]
    Sr2,
    Sr8,
    Sr10,
    Sr20,
}

impl FinalBandwidth {
    pub fn radio_id(self) -> u32 {
        self as u32
    }
    pub fn from_radio_id(id: u32) -> Result<Self, EdlError> {
        match id {
            0 => Ok(FinalBandwidth::Sr2),
            1 => Ok(FinalBandwidth::Sr8),
            2 => Ok(FinalBandwidth::Sr10),
            3 => Ok(FinalBandwidth::Sr20),
            _ => Err(EdlError::InvalidSelector {
                command: CommandId::FinalBandwidth,
                value: id,
            }),
        }
    }
    pub fn cutoff_hz(self, rate: SamplingRate) -> f64 {
        let divisor = match self {
            FinalBandwidth::Sr2 => 2.0,
            FinalBandwidth::Sr8 => 8.0,
            FinalBandwidth::Sr10 => 10.0,
            FinalBandwidth::Sr20 => 20.0,
        };
        rate.hz() / divisor
    }
}

/// Command identifiers understood by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CommandId {
    Range = 0,
    SamplingRate = 1,
    FinalBandwidth = 2,
    DigitalCompensation = 3,
    Reset = 4,
    ApplyProtocol = 5,
    MainTrial = 6,
    Vhold = 7,
    Vfp = 8,
    Vstep = 9,
    Tstep = 10,
    Tpu = 11,
    Tpe = 12,
    N = 13,
    Ne = 14,
    Vamp = 15,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Radio,
    Checkbox,
    PushButton,
    Value,
}

impl CommandId {
    pub fn kind(self) -> CommandKind {
        match self {
            CommandId::Range | CommandId::SamplingRate | CommandId::FinalBandwidth => {
                CommandKind::Radio
            }
            CommandId::DigitalCompensation | CommandId::Reset => CommandKind::Checkbox,
            CommandId::ApplyProtocol => CommandKind::PushButton,
            _ => CommandKind::Value,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CommandValue {
    Radio(u32),
    Checkbox(bool),
    PushButton(bool),
    Value(f64),
}

impl CommandValue {
    fn kind(self) -> CommandKind {
        match self {
            CommandValue::Radio(_) => CommandKind::Radio,
            CommandValue::Checkbox(_) => CommandKind::Checkbox,
            CommandValue::PushButton(_) => CommandKind::PushButton,
            CommandValue::Value(_) => CommandKind::Value,
        }
    }
}

/// A single device command. Built fresh for every call and passed by value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Command {
    id: CommandId,
    value: CommandValue,
}

impl Command {
    pub fn new(id: CommandId, value: CommandValue) -> Result<Self, EdlError> {
        if id.kind() != value.kind() {
            return Err(EdlError::CommandKindMismatch {
                command: id,
                expected: id.kind(),
            });
        }
        Ok(Self { id, value })
    }
    pub fn sampling_rate(rate: SamplingRate) -> Self {
        Self {
            id: CommandId::SamplingRate,
            value: CommandValue::Radio(rate.radio_id()),
        }
    }
    pub fn range(range: CurrentRange) -> Self {
        Self {
            id: CommandId::Range,
            value: CommandValue::Radio(range.radio_id()),
        }
    }
    pub fn final_bandwidth(bandwidth: FinalBandwidth) -> Self {
        Self {
            id: CommandId::FinalBandwidth,
            value: CommandValue::Radio(bandwidth.radio_id()),
        }
    }
    pub fn digital_compensation(enabled: bool) -> Self {
        Self {
            id: CommandId::DigitalCompensation,
            value: CommandValue::Checkbox(enabled),
        }
    }
    pub fn apply_protocol() -> Self {
        Self {
            id: CommandId::ApplyProtocol,
            value: CommandValue::PushButton(true),
        }
    }
    /// Numeric parameter command (protocol selection, voltages in mV, times in ms).
    pub fn value(id: CommandId, value: f64) -> Result<Self, EdlError> {
        Self::new(id, CommandValue::Value(value))
    }
    pub fn id(&self) -> CommandId {
        self.id
    }
    pub fn payload(&self) -> CommandValue {
        self.value
    }
}

// 后台线程发给前端的消息
#[derive(Clone, Debug)]
pub enum SessionEvent {
    Log(String),
    Connected(String),
    Configured,
    Compensated,
    AcquisitionStarted,
    Finished(AcquisitionReport),
    Failed(String),
}
