use std::io;

use thiserror::Error;

use crate::types::{CommandId, CommandKind};

/// Failures reported by the device collaborator.
#[derive(Clone, Debug, Error)]
pub enum EdlError {
    #[error("the device is not connected")]
    DeviceNotConnected,
    #[error("no devices found")]
    NoDevicesFound,
    #[error("{call} failed (EDL code {code})")]
    Vendor { call: &'static str, code: i32 },
    #[error("selector {value} is out of range for {command:?}")]
    InvalidSelector { command: CommandId, value: u32 },
    #[error("{command:?} expects a {expected:?} value")]
    CommandKindMismatch {
        command: CommandId,
        expected: CommandKind,
    },
    #[error("failed to load EDL library: {0}")]
    Library(String),
}

impl From<libloading::Error> for EdlError {
    fn from(value: libloading::Error) -> Self {
        EdlError::Library(value.to_string())
    }
}

/// Failures that end an acquisition session early.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("failed to purge data: {0}")]
    Purge(#[source] EdlError),
    #[error("failed to get device status: {0}")]
    Status(#[source] EdlError),
    #[error("device disconnected during read")]
    Disconnected,
    #[error("failed to write samples: {0}")]
    Sink(#[from] io::Error),
}

/// Caller-level failures, kept distinct from acquisition loop failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no EDL device detected")]
    NoDevicesFound,
    #[error("device detection failed: {0}")]
    Detect(#[source] EdlError),
    #[error("failed to connect to {device}: {source}")]
    Connect {
        device: String,
        #[source]
        source: EdlError,
    },
    #[error("{step} failed: {source}")]
    Command {
        step: &'static str,
        #[source]
        source: EdlError,
    },
    #[error("failed to open output: {0}")]
    Output(#[source] io::Error),
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error("disconnect still failing after {attempts} attempts: {source}")]
    Disconnect {
        attempts: u32,
        #[source]
        source: EdlError,
    },
    #[error("failed to close output: {0}")]
    Close(#[source] io::Error),
}
