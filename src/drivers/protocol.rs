//! Command sequences used to bring the amplifier into a known working state.
//!
//! Every sequence is a list of `(command, apply)` steps. Commands sent with
//! `apply == false` are stacked by the device and take effect together with the
//! next applied command.
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::drivers::{DeviceControl, EdlError};
use crate::types::{Command, CommandId, CurrentRange, FinalBandwidth, SamplingRate};

/// `MainTrial` value selecting the constant holding protocol.
pub const PROTOCOL_CONSTANT: f64 = 0.0;
/// `MainTrial` value selecting the seal test protocol.
pub const PROTOCOL_SEAL_TEST: f64 = 2.0;

/// Acquisition settings committed before streaming.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingModality {
    pub sampling_rate: SamplingRate,
    pub range: CurrentRange,
    pub bandwidth: FinalBandwidth,
}

impl WorkingModality {
    pub fn commands(&self) -> Vec<(Command, bool)> {
        vec![
            (Command::sampling_rate(self.sampling_rate), false),
            (Command::range(self.range), false),
            (Command::final_bandwidth(self.bandwidth), true),
        ]
    }
}

/// Square pulse around a holding potential, used to monitor seal resistance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SealTest {
    pub vhold_mv: f64,
    /// Pulse amplitude; the pulse swings from `+vstep` to `-vstep`.
    pub vstep_mv: f64,
    /// Pulse period.
    pub tpu_ms: f64,
    /// Command period.
    pub tpe_ms: f64,
}

impl Default for SealTest {
    fn default() -> Self {
        Self {
            vhold_mv: 0.0,
            vstep_mv: 50.0,
            tpu_ms: 20.0,
            tpe_ms: 50.0,
        }
    }
}

impl SealTest {
    pub fn commands(&self) -> Result<Vec<(Command, bool)>, EdlError> {
        Ok(vec![
            (Command::value(CommandId::MainTrial, PROTOCOL_SEAL_TEST)?, false),
            (Command::value(CommandId::Vhold, self.vhold_mv)?, false),
            (Command::value(CommandId::Vstep, self.vstep_mv)?, false),
            (Command::value(CommandId::Tpu, self.tpu_ms)?, false),
            (Command::value(CommandId::Tpe, self.tpe_ms)?, false),
            (Command::apply_protocol(), true),
        ])
    }
}

/// Commands that select the constant protocol at 0 mV and start digital
/// offset compensation. [`compensation_end`] stops it again.
pub fn compensation_start() -> Result<Vec<(Command, bool)>, EdlError> {
    Ok(vec![
        (Command::value(CommandId::MainTrial, PROTOCOL_CONSTANT)?, false),
        (Command::value(CommandId::Vhold, 0.0)?, false),
        (Command::apply_protocol(), true),
        (Command::digital_compensation(true), true),
    ])
}

pub fn compensation_end() -> Vec<(Command, bool)> {
    vec![(Command::digital_compensation(false), true)]
}

/// Sends `steps` in order and stops at the first failure.
pub fn send_all<D: DeviceControl + ?Sized>(
    device: &mut D,
    steps: Vec<(Command, bool)>,
) -> Result<(), EdlError> {
    for (command, apply) in steps {
        log::debug!("set {:?} = {:?} (apply: {apply})", command.id(), command.payload());
        device.set_command(command, apply)?;
    }
    Ok(())
}

pub fn configure_working_modality<D: DeviceControl + ?Sized>(
    device: &mut D,
    modality: &WorkingModality,
) -> Result<(), EdlError> {
    send_all(device, modality.commands())?;
    log::info!(
        "configured {:?}, range {:?}, bandwidth {:?}",
        modality.sampling_rate,
        modality.range,
        modality.bandwidth
    );
    Ok(())
}

/// Runs digital offset compensation for `duration` at 0 mV.
pub fn compensate_digital_offset<D: DeviceControl + ?Sized>(
    device: &mut D,
    duration: Duration,
) -> Result<(), EdlError> {
    send_all(device, compensation_start()?)?;
    log::info!("compensating digital offset for {} ms", duration.as_millis());
    thread::sleep(duration);
    send_all(device, compensation_end())
}

pub fn apply_seal_test<D: DeviceControl + ?Sized>(
    device: &mut D,
    seal_test: &SealTest,
) -> Result<(), EdlError> {
    send_all(device, seal_test.commands()?)?;
    log::info!(
        "seal test applied: {} mV pulses every {} ms",
        seal_test.vstep_mv,
        seal_test.tpe_ms
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::sim::ScriptedDevice;
    use crate::types::CommandValue;

    fn ids(device: &ScriptedDevice) -> Vec<(CommandId, bool)> {
        device.commands.iter().map(|(c, a)| (c.id(), *a)).collect()
    }

    #[test]
    fn modality_stacks_then_applies_with_bandwidth() {
        let mut device = ScriptedDevice::new();
        let modality = WorkingModality {
            sampling_rate: SamplingRate::Khz20,
            range: CurrentRange::Na20,
            bandwidth: FinalBandwidth::Sr8,
        };
        configure_working_modality(&mut device, &modality).unwrap();
        assert_eq!(
            ids(&device),
            vec![
                (CommandId::SamplingRate, false),
                (CommandId::Range, false),
                (CommandId::FinalBandwidth, true),
            ]
        );
        assert_eq!(device.commands[0].0.payload(), CommandValue::Radio(3));
        assert_eq!(device.commands[2].0.payload(), CommandValue::Radio(1));
    }
    #[test]
    fn compensation_toggles_checkbox_around_wait() {
        let mut device = ScriptedDevice::new();
        compensate_digital_offset(&mut device, Duration::ZERO).unwrap();
        assert_eq!(
            ids(&device),
            vec![
                (CommandId::MainTrial, false),
                (CommandId::Vhold, false),
                (CommandId::ApplyProtocol, true),
                (CommandId::DigitalCompensation, true),
                (CommandId::DigitalCompensation, true),
            ]
        );
        assert_eq!(device.commands[3].0.payload(), CommandValue::Checkbox(true));
        assert_eq!(device.commands[4].0.payload(), CommandValue::Checkbox(false));
    }
    #[test]
    fn seal_test_sets_pulse_parameters() {
        let mut device = ScriptedDevice::new();
        apply_seal_test(&mut device, &SealTest::default()).unwrap();
        let values: Vec<CommandValue> = device.commands.iter().map(|(c, _)| c.payload()).collect();
        assert_eq!(
            values,
            vec![
                CommandValue::Value(PROTOCOL_SEAL_TEST),
                CommandValue::Value(0.0),
                CommandValue::Value(50.0),
                CommandValue::Value(20.0),
                CommandValue::Value(50.0),
                CommandValue::PushButton(true),
            ]
        );
        assert!(device.commands[5].1);
    }
    #[test]
    fn first_failing_command_stops_sequence() {
        let mut device = ScriptedDevice::new().failing_commands(EdlError::DeviceNotConnected);
        let err = compensate_digital_offset(&mut device, Duration::ZERO).unwrap_err();
        assert!(matches!(err, EdlError::DeviceNotConnected));
        assert_eq!(device.commands.len(), 0);
    }
}
