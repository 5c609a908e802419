//! NVS persistence for [`TimeConfig`](super::TimeConfig) with schema versioning.
//!
//! # Version History
//!
//! - **v1** (current): `utc_off` as i32 minutes
//!
//! A stored version newer than this build is refused rather than guessed
//! at; the in-memory defaults stay in effect.

use core::cmp::Ordering;

use thiserror::Error;

use super::TimeConfig;

#[cfg(target_os = "espidf")]
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::EspError;

/// Current NVS schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// NVS namespace for time settings.
pub const NVS_NAMESPACE: &str = "stamper_time";

/// NVS key for schema version.
const VERSION_KEY: &str = "schema_ver";

/// NVS key for the UTC offset in minutes.
const OFFSET_KEY: &str = "utc_off";

/// Outcome of a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadResult {
    /// Nothing stored; defaults kept.
    FreshInstall,
    /// Loaded.
    UpToDate,
}

/// NVS operation errors.
#[derive(Error, Debug)]
pub enum NvsError {
    #[cfg(target_os = "espidf")]
    #[error("NVS init failed: {0}")]
    InitFailed(EspError),
    #[error("stored schema v{stored_version} is newer than this build")]
    TooNew { stored_version: u32 },
    #[cfg(target_os = "espidf")]
    #[error("NVS I/O failed: {0}")]
    IoError(EspError),
    #[cfg(not(target_os = "espidf"))]
    #[error("NVS is not available on this platform")]
    NotAvailable,
}

#[cfg(target_os = "espidf")]
impl From<EspError> for NvsError {
    fn from(e: EspError) -> Self {
        NvsError::IoError(e)
    }
}

/// Decide what to do with a stored schema version.
fn check_version(stored_version: u32) -> Result<LoadResult, NvsError> {
    match stored_version.cmp(&CURRENT_SCHEMA_VERSION) {
        Ordering::Equal => Ok(LoadResult::UpToDate),
        // v0 means nothing was ever written
        Ordering::Less => Ok(LoadResult::FreshInstall),
        Ordering::Greater => Err(NvsError::TooNew { stored_version }),
    }
}

#[cfg(target_os = "espidf")]
fn open() -> Result<EspNvs<NvsDefault>, NvsError> {
    let partition = EspDefaultNvsPartition::take().map_err(NvsError::InitFailed)?;
    EspNvs::new(partition, NVS_NAMESPACE, true).map_err(NvsError::InitFailed)
}

/// Load the stored offset into `config`.
#[cfg(target_os = "espidf")]
pub fn load_time_config(config: &TimeConfig) -> Result<LoadResult, NvsError> {
    let storage = open()?;
    let stored_version = storage.get_u32(VERSION_KEY)?.unwrap_or(0);

    let result = check_version(stored_version)?;
    if result == LoadResult::UpToDate {
        if let Some(minutes) = storage.get_i32(OFFSET_KEY)? {
            config.set_offset_minutes(minutes);
        }
    }
    Ok(result)
}

/// Stub for non-ESP platforms.
#[cfg(not(target_os = "espidf"))]
pub fn load_time_config(_config: &TimeConfig) -> Result<LoadResult, NvsError> {
    Err(NvsError::NotAvailable)
}

/// Store the current offset with the version stamp.
#[cfg(target_os = "espidf")]
pub fn save_time_config(config: &TimeConfig) -> Result<(), NvsError> {
    let mut storage = open()?;
    storage.set_u32(VERSION_KEY, CURRENT_SCHEMA_VERSION)?;
    storage.set_i32(OFFSET_KEY, config.offset_minutes())?;
    Ok(())
}

/// Stub for non-ESP platforms.
#[cfg(not(target_os = "espidf"))]
pub fn save_time_config(_config: &TimeConfig) -> Result<(), NvsError> {
    Err(NvsError::NotAvailable)
}
