//! Capture endpoint lookup via the MMDevice API.
//!
//! Wraps `IMMDeviceEnumerator` to list active capture endpoints with their
//! friendly names and to resolve a configured device name or id.

use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use audio_handoff_core::SourceInfo;

use crate::com::ComGuard;
use crate::error::{WasapiError, WasapiResultExt};
use crate::stream::{CaptureStream, MixFormat};

/// Audio endpoint enumerator using the Windows MMDevice API.
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    /// Create a new device enumerator.
    ///
    /// Requires COM to be initialized on the calling thread.
    pub fn new() -> Result<Self, WasapiError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .call("CoCreateInstance(MMDeviceEnumerator)")?;
            Ok(Self { enumerator })
        }
    }

    /// List active capture endpoints.
    pub fn list_capture_devices(&self) -> Result<Vec<SourceInfo>, WasapiError> {
        Ok(self
            .active_devices()?
            .into_iter()
            .map(|(_, info)| info)
            .collect())
    }

    /// Resolve an endpoint by id or case-insensitive friendly name. `None`
    /// selects the default console capture endpoint.
    pub(crate) fn resolve(&self, name_or_id: Option<&str>) -> Result<(IMMDevice, SourceInfo), WasapiError> {
        let Some(wanted) = name_or_id else {
            let device = unsafe { self.enumerator.GetDefaultAudioEndpoint(eCapture, eConsole) }
                .call("IMMDeviceEnumerator::GetDefaultAudioEndpoint")?;
            let info = SourceInfo {
                id: device_id(&device).unwrap_or_default(),
                name: friendly_name(&device).unwrap_or_else(|| "Default capture device".into()),
                is_default: true,
            };
            return Ok((device, info));
        };

        self.active_devices()?
            .into_iter()
            .find(|(_, info)| info.id == wanted || info.name.eq_ignore_ascii_case(wanted))
            .ok_or_else(|| WasapiError::DeviceNotFound(wanted.to_string()))
    }

    fn active_devices(&self) -> Result<Vec<(IMMDevice, SourceInfo)>, WasapiError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(eCapture, DEVICE_STATE_ACTIVE)
                .call("IMMDeviceEnumerator::EnumAudioEndpoints")?;
            let count = collection.GetCount().call("IMMDeviceCollection::GetCount")?;

            let default_id = self
                .enumerator
                .GetDefaultAudioEndpoint(eCapture, eConsole)
                .ok()
                .and_then(|d| device_id(&d));

            let mut devices = Vec::new();
            for i in 0..count {
                let Ok(device) = collection.Item(i) else {
                    continue;
                };
                let Some(id) = device_id(&device) else {
                    continue;
                };
                let name = friendly_name(&device).unwrap_or_else(|| format!("Capture device {}", i));
                let is_default = default_id.as_deref() == Some(id.as_str());
                devices.push((device, SourceInfo { id, name, is_default }));
            }
            Ok(devices)
        }
    }
}

/// Look up an endpoint and initialize a shared-mode stream on it, then
/// release everything. Returns the endpoint's mix format.
pub(crate) fn probe_endpoint(
    name_or_id: Option<&str>,
    channels: u16,
) -> Result<(SourceInfo, MixFormat), WasapiError> {
    let _com = ComGuard::init()?;
    let enumerator = DeviceEnumerator::new()?;
    let (device, info) = enumerator.resolve(name_or_id)?;
    let mix = CaptureStream::open(&device, channels, None)?.mix();
    Ok((info, mix))
}

fn device_id(device: &IMMDevice) -> Option<String> {
    unsafe {
        let raw = device.GetId().ok()?;
        let id = raw.to_string().ok();
        CoTaskMemFree(Some(raw.0 as *const _));
        id
    }
}

/// Read the PKEY_Device_FriendlyName property from a device.
fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ).ok()?;
        let value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;
        let name = value.to_string();
        (!name.is_empty()).then_some(name)
    }
}
