use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::drivers::protocol::{PROTOCOL_CONSTANT, PROTOCOL_SEAL_TEST};
use crate::drivers::{DataSource, DeviceControl, EdlError, ReadBatch};
use crate::types::{
    Command, CommandId, CommandValue, CurrentRange, DeviceStatus, FinalBandwidth, SamplePacket,
    SamplingRate,
};

/// Test backend that replays queued status and read results.
///
/// Once the status queue runs dry every query reports zero available packets.
/// Once the read queue runs dry every read returns exactly the requested count
/// of sequentially numbered packets.
#[cfg(test)]
pub struct ScriptedDevice {
    statuses: VecDeque<Result<DeviceStatus, EdlError>>,
    reads: VecDeque<Result<ReadBatch, EdlError>>,
    purge_error: Option<EdlError>,
    command_error: Option<EdlError>,
    devices: Vec<String>,
    disconnect_failures: u32,
    next_packet: u32,
    pub connected: Option<String>,
    pub purges: usize,
    pub status_queries: usize,
    pub read_requests: Vec<usize>,
    pub disconnect_calls: u32,
    pub commands: Vec<(Command, bool)>,
}

#[cfg(test)]
impl Default for ScriptedDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl ScriptedDevice {
    pub fn new() -> Self {
        Self {
            statuses: VecDeque::new(),
            reads: VecDeque::new(),
            purge_error: None,
            command_error: None,
            devices: vec!["SCRIPTED-0".to_owned()],
            disconnect_failures: 0,
            next_packet: 0,
            connected: None,
            purges: 0,
            status_queries: 0,
            read_requests: Vec::new(),
            disconnect_calls: 0,
            commands: Vec::new(),
        }
    }
    /// Sequential packets `[start, -start] .. [start + n - 1, ...]`.
    pub fn packets(start: u32, n: usize) -> Vec<SamplePacket> {
        (start..start + n as u32)
            .map(|i| SamplePacket::new(i as f32, -(i as f32)))
            .collect()
    }
    pub fn with_available(self, available: usize) -> Self {
        self.with_status(DeviceStatus {
            available_data_packets: available,
            ..DeviceStatus::default()
        })
    }
    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.statuses.push_back(Ok(status));
        self
    }
    pub fn with_status_error(mut self, err: EdlError) -> Self {
        self.statuses.push_back(Err(err));
        self
    }
    pub fn with_read(mut self, result: Result<ReadBatch, EdlError>) -> Self {
        self.reads.push_back(result);
        self
    }
    pub fn failing_purge(mut self, err: EdlError) -> Self {
        self.purge_error = Some(err);
        self
    }
    pub fn failing_commands(mut self, err: EdlError) -> Self {
        self.command_error = Some(err);
        self
    }
    pub fn with_devices(mut self, devices: Vec<String>) -> Self {
        self.devices = devices;
        self
    }
    /// The first `n` disconnect calls fail.
    pub fn failing_disconnects(mut self, n: u32) -> Self {
        self.disconnect_failures = n;
        self
    }
    fn next_packets(&mut self, n: usize) -> Vec<SamplePacket> {
        let packets = Self::packets(self.next_packet, n);
        self.next_packet += n as u32;
        packets
    }
}

#[cfg(test)]
impl DataSource for ScriptedDevice {
    fn purge_data(&mut self) -> Result<(), EdlError> {
        self.purges += 1;
        match &self.purge_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
    fn device_status(&mut self) -> Result<DeviceStatus, EdlError> {
        self.status_queries += 1;
        self.statuses
            .pop_front()
            .unwrap_or(Ok(DeviceStatus::default()))
    }
    fn read_data(&mut self, requested: usize) -> Result<ReadBatch, EdlError> {
        self.read_requests.push(requested);
        match self.reads.pop_front() {
            Some(result) => result,
            None => Ok(ReadBatch::complete(self.next_packets(requested))),
        }
    }
}

#[cfg(test)]
impl DeviceControl for ScriptedDevice {
    fn detect_devices(&mut self) -> Result<Vec<String>, EdlError> {
        Ok(self.devices.clone())
    }
    fn connect(&mut self, device_id: &str) -> Result<(), EdlError> {
        if !self.devices.iter().any(|d| d == device_id) {
            return Err(EdlError::DeviceNotConnected);
        }
        self.connected = Some(device_id.to_owned());
        Ok(())
    }
    fn disconnect(&mut self) -> Result<(), EdlError> {
        self.disconnect_calls += 1;
        if self.disconnect_calls <= self.disconnect_failures {
            return Err(EdlError::Vendor {
                call: "disconnectDevice",
                code: -1,
            });
        }
        self.connected = None;
        Ok(())
    }
    fn set_command(&mut self, command: Command, apply: bool) -> Result<(), EdlError> {
        if let Some(err) = &self.command_error {
            return Err(err.clone());
        }
        self.commands.push((command, apply));
        Ok(())
    }
}

/// Seal resistance of the simulated cell, in GΩ.
const SEAL_GOHM: f32 = 1.0;
/// Offset current removed by digital compensation, in pA.
const DIGITAL_OFFSET_PA: f32 = 3.0;
/// Peak-to-peak current noise, in pA.
const NOISE_PA: f32 = 0.5;
const SIM_DEVICE_ID: &str = "SIM-eONE-HS";

#[derive(Clone, Copy, Debug, PartialEq)]
struct ProtocolState {
    main_trial: f64,
    vhold_mv: f64,
    vstep_mv: f64,
    tpu_ms: f64,
    tpe_ms: f64,
}

impl Default for ProtocolState {
    fn default() -> Self {
        Self {
            main_trial: PROTOCOL_CONSTANT,
            vhold_mv: 0.0,
            vstep_mv: 0.0,
            tpu_ms: 0.0,
            tpe_ms: 0.0,
        }
    }
}

/// Offline amplifier producing a synthetic voltage-clamp recording at the
/// configured sampling rate, driven by wall-clock time.
pub struct SimulatedAmplifier {
    connected: bool,
    sampling_rate: SamplingRate,
    range: CurrentRange,
    bandwidth: FinalBandwidth,
    compensated: bool,
    /// Stacked protocol values, committed by an applied `ApplyProtocol`.
    staged: ProtocolState,
    protocol: ProtocolState,
    pending: Vec<Command>,
    buffer: VecDeque<SamplePacket>,
    capacity: usize,
    overflow: bool,
    lost_data: bool,
    owed: f64,
    sample_index: u64,
    last_pump: Instant,
}

impl SimulatedAmplifier {
    /// `buffer_seconds` bounds the device-side buffer; older packets are
    /// dropped and flagged as overflow when the host falls behind.
    pub fn new(buffer_seconds: f64) -> Self {
        let sampling_rate = SamplingRate::default();
        Self {
            connected: false,
            sampling_rate,
            range: CurrentRange::default(),
            bandwidth: FinalBandwidth::default(),
            compensated: false,
            staged: ProtocolState::default(),
            protocol: ProtocolState::default(),
            pending: Vec::new(),
            buffer: VecDeque::new(),
            capacity: ((sampling_rate.hz() * buffer_seconds) as usize).max(1),
            overflow: false,
            lost_data: false,
            owed: 0.0,
            sample_index: 0,
            last_pump: Instant::now(),
        }
    }
    pub fn sampling_rate(&self) -> SamplingRate {
        self.sampling_rate
    }
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
    /// Generates the packets produced during `elapsed`.
    pub fn pump(&mut self, elapsed: Duration) {
        if !self.connected {
            return;
        }
        self.owed += elapsed.as_secs_f64() * self.sampling_rate.hz();
        let due = self.owed.floor();
        self.owed -= due;
        for _ in 0..due as u64 {
            let packet = self.synthesize();
            if self.buffer.len() == self.capacity {
                self.buffer.pop_front();
                self.overflow = true;
            }
            self.buffer.push_back(packet);
        }
    }
    fn pump_to_now(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_pump);
        self.last_pump = now;
        self.pump(elapsed);
    }
    fn command_voltage_mv(&self, t_ms: f64) -> f64 {
        let p = &self.protocol;
        if p.main_trial != PROTOCOL_SEAL_TEST || p.tpe_ms <= 0.0 {
            return p.vhold_mv;
        }
        let phase = t_ms % p.tpe_ms;
        if phase < p.tpu_ms / 2.0 {
            p.vhold_mv + p.vstep_mv
        } else if phase < p.tpu_ms {
            p.vhold_mv - p.vstep_mv
        } else {
            p.vhold_mv
        }
    }
    fn synthesize(&mut self) -> SamplePacket {
        let t_ms = self.sample_index as f64 * 1_000.0 / self.sampling_rate.hz();
        self.sample_index += 1;
        let voltage = self.command_voltage_mv(t_ms) as f32;
        let offset = if self.compensated { 0.0 } else { DIGITAL_OFFSET_PA };
        // White noise shrinks with the square root of the filtered bandwidth.
        let nyquist = self.sampling_rate.hz() / 2.0;
        let scale = (self.bandwidth.cutoff_hz(self.sampling_rate) / nyquist).sqrt() as f32;
        let noise = scale * rand::thread_rng().gen_range(-NOISE_PA / 2.0..NOISE_PA / 2.0);
        // 1 mV across 1 GΩ drives 1 pA.
        let current_pa = voltage / SEAL_GOHM + offset + noise;
        let current = match self.range {
            CurrentRange::Pa200 => current_pa,
            CurrentRange::Na20 => current_pa / 1_000.0,
        };
        SamplePacket::new(voltage, current)
    }
    fn apply_pending(&mut self) -> Result<(), EdlError> {
        for command in std::mem::take(&mut self.pending) {
            match (command.id(), command.payload()) {
                (CommandId::SamplingRate, CommandValue::Radio(id)) => {
                    let rate = SamplingRate::from_radio_id(id)?;
                    let seconds = self.capacity as f64 / self.sampling_rate.hz();
                    self.capacity = ((rate.hz() * seconds) as usize).max(1);
                    self.sampling_rate = rate;
                }
                (CommandId::Range, CommandValue::Radio(id)) => {
                    self.range = CurrentRange::from_radio_id(id)?;
                }
                (CommandId::FinalBandwidth, CommandValue::Radio(id)) => {
                    self.bandwidth = FinalBandwidth::from_radio_id(id)?;
                }
                (CommandId::DigitalCompensation, CommandValue::Checkbox(on)) => {
                    // Compensation converges while enabled and holds once released.
                    if !on {
                        self.compensated = true;
                    }
                }
                (CommandId::ApplyProtocol, _) => {
                    self.protocol = self.staged;
                    self.sample_index = 0;
                }
                (CommandId::MainTrial, CommandValue::Value(v)) => self.staged.main_trial = v,
                (CommandId::Vhold, CommandValue::Value(v)) => self.staged.vhold_mv = v,
                (CommandId::Vstep, CommandValue::Value(v)) => self.staged.vstep_mv = v,
                (CommandId::Tpu, CommandValue::Value(v)) => self.staged.tpu_ms = v,
                (CommandId::Tpe, CommandValue::Value(v)) => self.staged.tpe_ms = v,
                _ => {}
            }
        }
        // Commands interrupt the stream briefly, like the real hardware.
        self.lost_data = true;
        Ok(())
    }
    fn ensure_connected(&self) -> Result<(), EdlError> {
        if self.connected {
            Ok(())
        } else {
            Err(EdlError::DeviceNotConnected)
        }
    }
}

impl DataSource for SimulatedAmplifier {
    fn purge_data(&mut self) -> Result<(), EdlError> {
        self.ensure_connected()?;
        self.pump_to_now();
        self.buffer.clear();
        self.overflow = false;
        self.lost_data = false;
        Ok(())
    }
    fn device_status(&mut self) -> Result<DeviceStatus, EdlError> {
        self.ensure_connected()?;
        self.pump_to_now();
        let status = DeviceStatus {
            available_data_packets: self.buffer.len(),
            buffer_overflow: self.overflow,
            lost_data: self.lost_data,
        };
        self.overflow = false;
        self.lost_data = false;
        Ok(status)
    }
    fn read_data(&mut self, requested: usize) -> Result<ReadBatch, EdlError> {
        self.ensure_connected()?;
        let n = requested.min(self.buffer.len());
        let packets: Vec<SamplePacket> = self.buffer.drain(..n).collect();
        if n < requested {
            Ok(ReadBatch::truncated(packets))
        } else {
            Ok(ReadBatch::complete(packets))
        }
    }
}

impl DeviceControl for SimulatedAmplifier {
    fn detect_devices(&mut self) -> Result<Vec<String>, EdlError> {
        Ok(vec![SIM_DEVICE_ID.to_owned()])
    }
    fn connect(&mut self, device_id: &str) -> Result<(), EdlError> {
        if device_id != SIM_DEVICE_ID {
            return Err(EdlError::NoDevicesFound);
        }
        self.connected = true;
        self.last_pump = Instant::now();
        Ok(())
    }
    fn disconnect(&mut self) -> Result<(), EdlError> {
        self.connected = false;
        self.buffer.clear();
        Ok(())
    }
    fn set_command(&mut self, command: Command, apply: bool) -> Result<(), EdlError> {
        self.ensure_connected()?;
        self.pending.push(command);
        if apply {
            self.apply_pending()?;
        }
        Ok(())
    }
}
