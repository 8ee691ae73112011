use thiserror::Error;

use audio_handoff_core::CaptureError;

/// Failures raised by the WASAPI layer before they are mapped onto
/// [`CaptureError`].
#[derive(Debug, Error)]
pub enum WasapiError {
    #[error("COM initialization failed: {0}")]
    ComInit(#[source] windows::core::Error),

    #[error("no active capture endpoint matches {0:?}")]
    DeviceNotFound(String),

    #[error("{call} failed: {source}")]
    Call {
        call: &'static str,
        #[source]
        source: windows::core::Error,
    },

    /// The shared-mode mix format is not 32-bit float.
    #[error("unsupported mix format: {0}")]
    UnsupportedFormat(String),
}

impl WasapiError {
    /// Map a failure raised while opening an endpoint.
    pub fn into_open_error(self) -> CaptureError {
        match &self {
            Self::UnsupportedFormat(_) => CaptureError::config(self.to_string()),
            _ => CaptureError::device(self.to_string()),
        }
    }
}

/// Failures after the stream is running are source failures.
impl From<WasapiError> for CaptureError {
    fn from(err: WasapiError) -> Self {
        CaptureError::SourceFailed(err.to_string())
    }
}

pub(crate) trait WasapiResultExt<T> {
    /// Tag a Windows error with the API call that produced it.
    fn call(self, call: &'static str) -> Result<T, WasapiError>;
}

impl<T> WasapiResultExt<T> for windows::core::Result<T> {
    fn call(self, call: &'static str) -> Result<T, WasapiError> {
        self.map_err(|source| WasapiError::Call { call, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use windows::Win32::Media::Audio::AUDCLNT_E_DEVICE_IN_USE;

    #[test]
    fn busy_endpoint_is_device_unavailable() {
        let err = Err::<(), _>(windows::core::Error::from_hresult(AUDCLNT_E_DEVICE_IN_USE))
            .call("IAudioClient::Initialize")
            .unwrap_err();
        assert!(matches!(err.into_open_error(), CaptureError::DeviceUnavailable(_)));
    }

    #[test]
    fn integer_mix_format_is_configuration_error() {
        let err = WasapiError::UnsupportedFormat("format tag 0x0001, 16 bits per sample".into());
        assert!(matches!(err.into_open_error(), CaptureError::ConfigurationFailed(_)));
    }

    #[test]
    fn failures_after_start_are_source_failures() {
        let err = WasapiError::DeviceNotFound("USB Mic".into());
        assert!(matches!(CaptureError::from(err), CaptureError::SourceFailed(_)));
    }
}
