// src/engine.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::SessionConfig;
use crate::drivers::protocol;
use crate::drivers::{
    AcquisitionLoop, AcquisitionReport, EdlDevice, EdlError, FixedRetry, SampleSink, SessionError,
};
use crate::types::SessionEvent;

/// Worker running one session in the background.
pub struct SessionHandle {
    cancel: Arc<AtomicBool>,
    events: Receiver<SessionEvent>,
    worker: JoinHandle<Result<AcquisitionReport, SessionError>>,
}

impl SessionHandle {
    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }
    /// Ask the acquisition loop to stop before its next iteration.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
    pub fn join(self) -> Result<AcquisitionReport, SessionError> {
        match self.worker.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

pub fn spawn_session<D, S>(config: SessionConfig, mut device: D, mut sink: S) -> SessionHandle
where
    D: EdlDevice + Send + 'static,
    S: SampleSink + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    let worker = thread::spawn(move || {
        let result = run_session(&config, &mut device, &mut sink, flag, &tx);
        match &result {
            Ok(report) => tx.send(SessionEvent::Finished(report.clone())).ok(),
            Err(e) => tx.send(SessionEvent::Failed(e.to_string())).ok(),
        };
        result
    });
    SessionHandle {
        cancel,
        events: rx,
        worker,
    }
}

/// Bring-up, acquisition and teardown of one recording.
///
/// The device is disconnected whenever the connection succeeded, even if a
/// later step failed. The sink is always closed exactly once.
pub fn run_session<D, S>(
    config: &SessionConfig,
    device: &mut D,
    sink: &mut S,
    cancel: Arc<AtomicBool>,
    tx: &Sender<SessionEvent>,
) -> Result<AcquisitionReport, SessionError>
where
    D: EdlDevice + ?Sized,
    S: SampleSink + ?Sized,
{
    let device_id = match connect_first(device) {
        Ok(id) => id,
        Err(e) => {
            close_sink(sink).ok();
            return Err(e);
        }
    };
    tx.send(SessionEvent::Connected(device_id.clone())).ok();

    let acquired = configure_and_acquire(config, device, sink, cancel, tx);
    let closed = close_sink(sink);
    let disconnected = disconnect(config, device);
    if disconnected.is_ok() {
        tx.send(SessionEvent::Log(format!("disconnected from {device_id}"))).ok();
    }

    let report = acquired?;
    closed?;
    disconnected?;
    Ok(report)
}

fn connect_first<D: EdlDevice + ?Sized>(device: &mut D) -> Result<String, SessionError> {
    let devices = device.detect_devices().map_err(|e| match e {
        EdlError::NoDevicesFound => SessionError::NoDevicesFound,
        e => SessionError::Detect(e),
    })?;
    let Some(device_id) = devices.into_iter().next() else {
        return Err(SessionError::NoDevicesFound);
    };
    device
        .connect(&device_id)
        .map_err(|source| SessionError::Connect {
            device: device_id.clone(),
            source,
        })?;
    log::info!("connected to {device_id}");
    Ok(device_id)
}

fn configure_and_acquire<D, S>(
    config: &SessionConfig,
    device: &mut D,
    sink: &mut S,
    cancel: Arc<AtomicBool>,
    tx: &Sender<SessionEvent>,
) -> Result<AcquisitionReport, SessionError>
where
    D: EdlDevice + ?Sized,
    S: SampleSink + ?Sized,
{
    protocol::configure_working_modality(device, &config.modality).map_err(|source| {
        SessionError::Command {
            step: "working modality",
            source,
        }
    })?;
    tx.send(SessionEvent::Configured).ok();

    protocol::compensate_digital_offset(device, config.compensation_time).map_err(|source| {
        SessionError::Command {
            step: "digital offset compensation",
            source,
        }
    })?;
    tx.send(SessionEvent::Compensated).ok();

    if let Some(seal_test) = &config.seal_test {
        protocol::apply_seal_test(device, seal_test).map_err(|source| SessionError::Command {
            step: "seal test protocol",
            source,
        })?;
        tx.send(SessionEvent::Log("seal test protocol applied".to_owned()))
            .ok();
    }

    thread::sleep(config.settle_delay);
    tx.send(SessionEvent::AcquisitionStarted).ok();
    let report = AcquisitionLoop::new(config.acquisition)
        .with_cancel(cancel)
        .run(device, sink)?;
    Ok(report)
}

// The loop may already have closed it on disconnection.
fn close_sink<S: SampleSink + ?Sized>(sink: &mut S) -> Result<(), SessionError> {
    if sink.is_closed() {
        return Ok(());
    }
    sink.close().map_err(SessionError::Close)
}

fn disconnect<D: EdlDevice + ?Sized>(
    config: &SessionConfig,
    device: &mut D,
) -> Result<(), SessionError> {
    let policy = FixedRetry::new(config.disconnect_attempts, config.disconnect_retry_delay);
    match policy.run(|| device.disconnect()) {
        Ok(((), attempts)) => {
            if attempts > 1 {
                log::debug!("disconnected after {attempts} attempts");
            }
            Ok(())
        }
        Err(exhausted) => {
            log::error!("failed to disconnect after {} attempts", exhausted.attempts);
            Err(SessionError::Disconnect {
                attempts: exhausted.attempts,
                source: exhausted.last_error,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::sink::tests::SharedBuffer;
    use crate::drivers::sink::decode_packets;
    use crate::drivers::{AcquisitionError, BinarySink, ScriptedDevice, SimulatedAmplifier};
    use crate::types::{CommandId, ConnectionMode};
    use std::time::Duration;

    fn quick_config(iterations: u32) -> SessionConfig {
        let mut config = SessionConfig::default();
        config.compensation_time = Duration::ZERO;
        config.settle_delay = Duration::ZERO;
        config.disconnect_retry_delay = Duration::ZERO;
        config.acquisition.iterations = iterations;
        config.acquisition.idle_sleep = Duration::ZERO;
        config
    }
    fn run(
        config: &SessionConfig,
        device: &mut ScriptedDevice,
        sink: &mut BinarySink<SharedBuffer>,
    ) -> (Result<AcquisitionReport, SessionError>, Vec<SessionEvent>) {
        let (tx, rx) = mpsc::channel();
        let result = run_session(config, device, sink, Arc::new(AtomicBool::new(false)), &tx);
        drop(tx);
        (result, rx.iter().collect())
    }

    #[test]
    fn full_session_brings_up_acquires_and_tears_down() {
        let mut device = ScriptedDevice::new().with_available(15).with_available(20);
        let buffer = SharedBuffer::default();
        let mut sink = BinarySink::new(buffer.clone());
        let (result, events) = run(&quick_config(2), &mut device, &mut sink);
        let report = result.unwrap();
        assert_eq!(report.packets_written, 35);
        assert_eq!(decode_packets(&buffer.bytes()).len(), 35);
        assert_eq!(sink.close_calls(), 1);
        assert_eq!(device.connected, None);
        assert_eq!(device.disconnect_calls, 1);
        assert_eq!(device.commands[0].0.id(), CommandId::SamplingRate);
        assert!(matches!(events[0], SessionEvent::Connected(ref id) if id == "SCRIPTED-0"));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::AcquisitionStarted)));
    }
    #[test]
    fn seal_test_is_sent_when_configured() {
        let mut config = quick_config(1);
        config.seal_test = Some(protocol::SealTest::default());
        let mut device = ScriptedDevice::new();
        let mut sink = BinarySink::new(SharedBuffer::default());
        run(&config, &mut device, &mut sink).0.unwrap();
        assert!(device
            .commands
            .iter()
            .any(|(c, _)| c.id() == CommandId::Tpe));
    }
    #[test]
    fn missing_device_is_a_caller_level_error() {
        let mut device = ScriptedDevice::new().with_devices(Vec::new());
        let mut sink = BinarySink::new(SharedBuffer::default());
        let (result, _) = run(&quick_config(5), &mut device, &mut sink);
        assert!(matches!(result, Err(SessionError::NoDevicesFound)));
        assert_eq!(device.disconnect_calls, 0);
        assert!(sink.is_closed());
    }
    #[test]
    fn disconnect_is_retried_until_it_succeeds() {
        let mut device = ScriptedDevice::new().failing_disconnects(3);
        let mut sink = BinarySink::new(SharedBuffer::default());
        run(&quick_config(1), &mut device, &mut sink).0.unwrap();
        assert_eq!(device.disconnect_calls, 4);
    }
    #[test]
    fn exhausted_disconnect_retries_fail_the_session() {
        let mut config = quick_config(1);
        config.disconnect_attempts = 5;
        let mut device = ScriptedDevice::new().failing_disconnects(100);
        let mut sink = BinarySink::new(SharedBuffer::default());
        let (result, _) = run(&config, &mut device, &mut sink);
        assert!(matches!(result, Err(SessionError::Disconnect { attempts: 5, .. })));
        assert_eq!(device.disconnect_calls, 5);
    }
    #[test]
    fn disconnection_during_read_closes_sink_once_and_still_disconnects() {
        let mut device = ScriptedDevice::new()
            .with_available(40)
            .with_read(Err(EdlError::DeviceNotConnected));
        let mut sink = BinarySink::new(SharedBuffer::default());
        let (result, _) = run(&quick_config(10), &mut device, &mut sink);
        assert!(matches!(
            result,
            Err(SessionError::Acquisition(AcquisitionError::Disconnected))
        ));
        assert!(sink.is_closed());
        assert_eq!(sink.close_calls(), 1);
        assert_eq!(sink.packets_written(), 0);
        assert_eq!(device.disconnect_calls, 1);
    }
    #[test]
    fn command_failure_aborts_before_acquisition() {
        let mut device = ScriptedDevice::new().failing_commands(EdlError::Vendor {
            call: "setCommand",
            code: 7,
        });
        let mut sink = BinarySink::new(SharedBuffer::default());
        let (result, _) = run(&quick_config(10), &mut device, &mut sink);
        assert!(matches!(
            result,
            Err(SessionError::Command { step: "working modality", .. })
        ));
        assert_eq!(device.purges, 0);
        assert_eq!(device.disconnect_calls, 1);
    }
    #[test]
    fn spawned_session_reports_finish_event() {
        let mut config = quick_config(200);
        config.mode = ConnectionMode::Simulation;
        config.acquisition.idle_sleep = Duration::from_millis(1);
        let buffer = SharedBuffer::default();
        let handle = spawn_session(config, SimulatedAmplifier::new(1.0), BinarySink::new(buffer.clone()));
        let events: Vec<SessionEvent> = handle.events().iter().collect();
        let report = handle.join().unwrap();
        assert!(matches!(events.last(), Some(SessionEvent::Finished(_))));
        assert_eq!(
            decode_packets(&buffer.bytes()).len() as u64,
            report.packets_written
        );
    }
    #[test]
    fn cancelled_session_still_tears_down() {
        let config = quick_config(1_000_000);
        let mut device = ScriptedDevice::new();
        let mut sink = BinarySink::new(SharedBuffer::default());
        let (tx, _rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(true));
        let report = run_session(&config, &mut device, &mut sink, cancel, &tx).unwrap();
        assert!(report.cancelled);
        assert!(sink.is_closed());
        assert_eq!(device.disconnect_calls, 1);
    }
}
