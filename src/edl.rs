// src/edl.rs
//! Dynamic binding to the EDL vendor library through its C shim.
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_double, c_int, c_uint};
use std::path::Path;

use libloading::Library;
use once_cell::sync::OnceCell;

use crate::drivers::{DataSource, DeviceControl, EdlError, ReadBatch};
use crate::types::{Command, CommandValue, DeviceStatus, SamplePacket, EDL_CHANNEL_NUM};

#[cfg(windows)]
pub const DEFAULT_LIBRARY: &str = "edl_c.dll";
#[cfg(not(windows))]
pub const DEFAULT_LIBRARY: &str = "libedl_c.so";

// Return codes of the C shim.
const EDL_SUCCESS: c_int = 0;
const EDL_DEVICE_NOT_CONNECTED: c_int = 1;
const EDL_NOT_ENOUGH_AVAILABLE_DATA: c_int = 2;
const EDL_NO_DEVICES_FOUND: c_int = 3;
const DETECT_BUFFER_BYTES: usize = 4096;

#[repr(C)]
struct EdlCommandC {
    radio_id: c_uint,
    checkbox_checked: bool,
    button_pressed: bool,
    value: c_double,
}

impl From<CommandValue> for EdlCommandC {
    fn from(value: CommandValue) -> Self {
        let mut raw = EdlCommandC {
            radio_id: 0,
            checkbox_checked: false,
            button_pressed: false,
            value: 0.0,
        };
        match value {
            CommandValue::Radio(id) => raw.radio_id = id,
            CommandValue::Checkbox(on) => raw.checkbox_checked = on,
            CommandValue::PushButton(pressed) => raw.button_pressed = pressed,
            CommandValue::Value(v) => raw.value = v,
        }
        raw
    }
}

#[repr(C)]
#[derive(Default)]
struct EdlDeviceStatusC {
    available_data_packets: c_uint,
    buffer_overflow_flag: bool,
    lost_data_flag: bool,
}

struct EdlApi {
    #[allow(dead_code)]
    lib: Library,
    init: unsafe extern "C" fn() -> c_int,
    detect_devices: unsafe extern "C" fn(*mut c_char, c_uint, *mut c_uint) -> c_int,
    connect_device: unsafe extern "C" fn(*const c_char) -> c_int,
    disconnect_device: unsafe extern "C" fn() -> c_int,
    set_command: unsafe extern "C" fn(c_int, *const EdlCommandC, bool) -> c_int,
    purge_data: unsafe extern "C" fn() -> c_int,
    get_device_status: unsafe extern "C" fn(*mut EdlDeviceStatusC) -> c_int,
    read_data: unsafe extern "C" fn(c_uint, *mut c_uint, *mut f32) -> c_int,
}

impl EdlApi {
    fn load(path: &Path) -> Result<Self, EdlError> {
        let lib = unsafe { Library::new(path) }
            .map_err(|e| EdlError::Library(format!("{}: {e}", path.display())))?;
        // Safety: signatures follow the C shim header shipped with the driver.
        let api = unsafe {
            Self {
                init: *lib.get(b"edl_init\0")?,
                detect_devices: *lib.get(b"edl_detect_devices\0")?,
                connect_device: *lib.get(b"edl_connect_device\0")?,
                disconnect_device: *lib.get(b"edl_disconnect_device\0")?,
                set_command: *lib.get(b"edl_set_command\0")?,
                purge_data: *lib.get(b"edl_purge_data\0")?,
                get_device_status: *lib.get(b"edl_get_device_status\0")?,
                read_data: *lib.get(b"edl_read_data\0")?,
                lib,
            }
        };
        check(unsafe { (api.init)() }, "init")?;
        Ok(api)
    }
    /// The library is loaded and initialised once per process; later calls
    /// reuse it regardless of `path`.
    fn instance(path: &Path) -> Result<&'static EdlApi, EdlError> {
        static API: OnceCell<EdlApi> = OnceCell::new();
        API.get_or_try_init(|| Self::load(path))
    }
}

fn check(code: c_int, call: &'static str) -> Result<(), EdlError> {
    match code {
        EDL_SUCCESS => Ok(()),
        EDL_DEVICE_NOT_CONNECTED => Err(EdlError::DeviceNotConnected),
        EDL_NO_DEVICES_FOUND => Err(EdlError::NoDevicesFound),
        code => Err(EdlError::Vendor { call, code }),
    }
}

// Packets returned next to an unexpected code are kept.
fn read_outcome(code: c_int, packets: Vec<SamplePacket>) -> Result<ReadBatch, EdlError> {
    match code {
        EDL_SUCCESS => Ok(ReadBatch::complete(packets)),
        EDL_DEVICE_NOT_CONNECTED => Err(EdlError::DeviceNotConnected),
        EDL_NOT_ENOUGH_AVAILABLE_DATA => Ok(ReadBatch::truncated(packets)),
        code => Ok(ReadBatch::failed(code, packets)),
    }
}

fn split_device_list(raw: &[u8]) -> Vec<String> {
    let text = CStr::from_bytes_until_nul(raw)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(raw).into_owned());
    text.split('\n')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .collect()
}

fn packets_from_floats(data: &[f32]) -> Vec<SamplePacket> {
    data.chunks_exact(EDL_CHANNEL_NUM)
        .map(|chunk| {
            let mut channels = [0f32; EDL_CHANNEL_NUM];
            channels.copy_from_slice(chunk);
            SamplePacket { channels }
        })
        .collect()
}

/// EDL device reached through the vendor library.
pub struct EdlLibrary {
    api: &'static EdlApi,
    connected: bool,
}

impl EdlLibrary {
    pub fn open(path: &Path) -> Result<Self, EdlError> {
        let api = EdlApi::instance(path)?;
        log::info!("EDL library loaded from {}", path.display());
        Ok(Self {
            api,
            connected: false,
        })
    }
}

impl DataSource for EdlLibrary {
    fn purge_data(&mut self) -> Result<(), EdlError> {
        check(unsafe { (self.api.purge_data)() }, "purgeData")
    }
    fn device_status(&mut self) -> Result<DeviceStatus, EdlError> {
        let mut raw = EdlDeviceStatusC::default();
        check(
            unsafe { (self.api.get_device_status)(&mut raw as *mut EdlDeviceStatusC) },
            "getDeviceStatus",
        )?;
        Ok(DeviceStatus {
            available_data_packets: raw.available_data_packets as usize,
            buffer_overflow: raw.buffer_overflow_flag,
            lost_data: raw.lost_data_flag,
        })
    }
    fn read_data(&mut self, requested: usize) -> Result<ReadBatch, EdlError> {
        let requested = requested.min(c_uint::MAX as usize);
        let mut buffer = vec![0f32; requested * EDL_CHANNEL_NUM];
        let mut read: c_uint = 0;
        let code = unsafe {
            (self.api.read_data)(
                requested as c_uint,
                &mut read as *mut c_uint,
                buffer.as_mut_ptr(),
            )
        };
        let read = (read as usize).min(requested);
        buffer.truncate(read * EDL_CHANNEL_NUM);
        read_outcome(code, packets_from_floats(&buffer))
    }
}

impl DeviceControl for EdlLibrary {
    fn detect_devices(&mut self) -> Result<Vec<String>, EdlError> {
        let mut raw = vec![0u8; DETECT_BUFFER_BYTES];
        let mut count: c_uint = 0;
        check(
            unsafe {
                (self.api.detect_devices)(
                    raw.as_mut_ptr() as *mut c_char,
                    raw.len() as c_uint,
                    &mut count as *mut c_uint,
                )
            },
            "detectDevices",
        )?;
        let devices = split_device_list(&raw);
        log::debug!("EDL reported {count} devices: {devices:?}");
        Ok(devices)
    }
    fn connect(&mut self, device_id: &str) -> Result<(), EdlError> {
        let id = CString::new(device_id).map_err(|_| EdlError::Vendor {
            call: "connectDevice",
            code: -1,
        })?;
        check(unsafe { (self.api.connect_device)(id.as_ptr()) }, "connectDevice")?;
        self.connected = true;
        Ok(())
    }
    fn disconnect(&mut self) -> Result<(), EdlError> {
        check(unsafe { (self.api.disconnect_device)() }, "disconnectDevice")?;
        self.connected = false;
        Ok(())
    }
    fn set_command(&mut self, command: Command, apply: bool) -> Result<(), EdlError> {
        let raw = EdlCommandC::from(command.payload());
        check(
            unsafe {
                (self.api.set_command)(command.id() as c_int, &raw as *const EdlCommandC, apply)
            },
            "setCommand",
        )
    }
}

impl Drop for EdlLibrary {
    fn drop(&mut self) {
        if self.connected {
            if let Err(e) = self.disconnect() {
                log::warn!("failed to disconnect EDL device on drop: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::ReadStatus;
    #[test]
    fn device_list_is_newline_separated_and_nul_terminated() {
        let mut raw = b"eONE-HS 123\n\neONE-HS 456\n".to_vec();
        raw.extend_from_slice(&[0, b'x', b'y']);
        assert_eq!(split_device_list(&raw), vec!["eONE-HS 123", "eONE-HS 456"]);
        assert!(split_device_list(&[0u8; 8]).is_empty());
    }
    #[test]
    fn floats_are_grouped_into_packets() {
        let packets = packets_from_floats(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(packets, vec![SamplePacket::new(1.0, 2.0), SamplePacket::new(3.0, 4.0)]);
    }
    #[test]
    fn return_codes_map_to_errors() {
        assert!(check(EDL_SUCCESS, "x").is_ok());
        assert!(matches!(check(EDL_DEVICE_NOT_CONNECTED, "x"), Err(EdlError::DeviceNotConnected)));
        assert!(matches!(check(EDL_NO_DEVICES_FOUND, "x"), Err(EdlError::NoDevicesFound)));
        assert!(matches!(
            check(42, "readData"),
            Err(EdlError::Vendor { call: "readData", code: 42 })
        ));
    }
    #[test]
    fn read_codes_keep_returned_packets() {
        let packets = packets_from_floats(&[1.0, 2.0, 3.0, 4.0]);
        let batch = read_outcome(EDL_NOT_ENOUGH_AVAILABLE_DATA, packets.clone()).unwrap();
        assert_eq!(batch.status, ReadStatus::Truncated);
        let batch = read_outcome(42, packets.clone()).unwrap();
        assert_eq!(batch.status, ReadStatus::Failed { code: 42 });
        assert_eq!(batch.packets, packets);
        assert!(matches!(
            read_outcome(EDL_DEVICE_NOT_CONNECTED, packets),
            Err(EdlError::DeviceNotConnected)
        ));
    }
    #[test]
    fn command_payload_fills_matching_field() {
        let raw = EdlCommandC::from(CommandValue::Value(-60.0));
        assert_eq!(raw.value, -60.0);
        assert_eq!(raw.radio_id, 0);
        let raw = EdlCommandC::from(CommandValue::Checkbox(true));
        assert!(raw.checkbox_checked);
    }
    #[test]
    fn missing_library_is_reported() {
        let err = EdlLibrary::open(Path::new("/nonexistent/libedl_c.so"));
        assert!(matches!(err, Err(EdlError::Library(_))));
    }
}
