use std::marker::PhantomData;

use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED};

use crate::error::WasapiError;

/// Keeps COM initialized (MTA) on the current thread until dropped.
///
/// Declare it before any COM interface so it is dropped after them.
pub(crate) struct ComGuard {
    _thread_bound: PhantomData<*const ()>,
}

impl ComGuard {
    pub(crate) fn init() -> Result<Self, WasapiError> {
        unsafe {
            CoInitializeEx(None, COINIT_MULTITHREADED)
                .ok()
                .map_err(WasapiError::ComInit)?;
        }
        Ok(Self {
            _thread_bound: PhantomData,
        })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}
