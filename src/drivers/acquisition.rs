//! Polling acquisition loop.
//!
//! Each iteration queries the device status, reads only when at least
//! `min_packets_to_read` packets are buffered and streams the returned batch to
//! the sink. Overflow, data loss, short reads and other read errors are logged
//! and counted but do not stop the session; purge, status and connection
//! failures do.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::drivers::{AcquisitionError, DataSource, EdlError, ReadStatus, SampleSink};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Reads are skipped while fewer packets than this are available.
    pub min_packets_to_read: usize,
    pub iterations: u32,
    /// Pause after a poll that did not lead to a read.
    #[serde(with = "millis")]
    pub idle_sleep: Duration,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            min_packets_to_read: 10,
            iterations: 1_000,
            idle_sleep: Duration::from_millis(1),
        }
    }
}

/// Outcome of a session that ran to its iteration bound (or was cancelled).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AcquisitionReport {
    pub iterations: u32,
    pub reads: u32,
    pub packets_written: u64,
    pub overflow_warnings: u32,
    pub lost_data_warnings: u32,
    pub truncated_reads: u32,
    /// Reads that returned a vendor error other than disconnection.
    pub read_errors: u32,
    /// Status of the most recent read.
    pub last_read: ReadStatus,
    pub cancelled: bool,
}

impl AcquisitionReport {
    pub fn warnings(&self) -> u32 {
        self.overflow_warnings + self.lost_data_warnings + self.truncated_reads + self.read_errors
    }
    pub fn is_clean(&self) -> bool {
        self.warnings() == 0
    }
}

pub struct AcquisitionLoop {
    settings: AcquisitionSettings,
    cancel: Option<Arc<AtomicBool>>,
}

impl AcquisitionLoop {
    pub fn new(settings: AcquisitionSettings) -> Self {
        Self {
            settings,
            cancel: None,
        }
    }
    /// The loop stops before its next iteration once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Runs one session. The sink is closed here only when the device
    /// disconnects; otherwise closing it is left to the caller.
    pub fn run<D, S>(&self, device: &mut D, sink: &mut S) -> Result<AcquisitionReport, AcquisitionError>
    where
        D: DataSource + ?Sized,
        S: SampleSink + ?Sized,
    {
        let mut report = AcquisitionReport::default();
        if self.cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        log::info!("purge old data");
        device.purge_data().map_err(|e| {
            log::error!("failed to purge data: {e}");
            AcquisitionError::Purge(e)
        })?;

        log::info!("collecting data...");
        let threshold = self.settings.min_packets_to_read;
        for _ in 0..self.settings.iterations {
            if self.cancelled() {
                log::info!("acquisition cancelled after {} iterations", report.iterations);
                report.cancelled = true;
                return Ok(report);
            }
            report.iterations += 1;

            let status = device.device_status().map_err(|e| {
                log::error!("failed to get device status: {e}");
                AcquisitionError::Status(e)
            })?;
            if status.buffer_overflow {
                report.overflow_warnings += 1;
                log::warn!(
                    "lost some data due to buffer overflow; increase min_packets_to_read (now {threshold}) to improve performance"
                );
            }
            if status.lost_data {
                report.lost_data_warnings += 1;
                log::warn!(
                    "lost some data from the device; decrease sampling frequency or close unused applications. \
                     Data loss may also occur right after a command is sent to the device"
                );
            }

            let requested = status.available_data_packets;
            if requested < threshold {
                thread::sleep(self.settings.idle_sleep);
                continue;
            }

            report.reads += 1;
            let batch = match device.read_data(requested) {
                Ok(batch) => batch,
                Err(EdlError::DeviceNotConnected) => {
                    log::error!("the device is not connected");
                    if let Err(e) = sink.close() {
                        log::error!("failed to close sink after disconnection: {e}");
                    }
                    return Err(AcquisitionError::Disconnected);
                }
                Err(e) => {
                    report.read_errors += 1;
                    log::warn!("read of {requested} packets failed: {e}");
                    continue;
                }
            };
            let outcome = match batch.status {
                ReadStatus::Complete if batch.len() < requested => ReadStatus::Truncated,
                status => status,
            };
            match outcome {
                ReadStatus::Complete => {}
                ReadStatus::Truncated => {
                    report.truncated_reads += 1;
                    log::warn!(
                        "not enough available data, only {} of {requested} packets have been read",
                        batch.len()
                    );
                }
                ReadStatus::Failed { code } => {
                    report.read_errors += 1;
                    log::warn!(
                        "read failed (EDL code {code}), saving the {} of {requested} packets returned",
                        batch.len()
                    );
                }
            }
            for packet in &batch.packets {
                sink.write_packet(packet)?;
            }
            report.packets_written += batch.len() as u64;
            report.last_read = outcome;
        }
        log::info!(
            "done: {} packets in {} reads ({} warnings)",
            report.packets_written,
            report.reads,
            report.warnings()
        );
        Ok(report)
    }
}

/// Serde helper storing a `Duration` as whole milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
