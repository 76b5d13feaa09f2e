//! Ignition payload handling.
//!
//! The bootstrap payload stored by the installer does not know which machine
//! it will boot, so the actuator appends an `/etc/hostname` file entry before
//! handing it to the VM.

use crate::error::ControllerError;
use serde_json::{json, Map, Value};

/// File mode of the injected hostname file (0644)
const HOSTNAME_FILE_MODE: u32 = 420;

/// Append an `/etc/hostname` file holding `hostname` to an ignition payload.
///
/// `storage` and `storage.files` are created when absent. A payload that is
/// not a JSON object is a configuration error.
pub fn add_hostname_to_user_data(payload: &[u8], hostname: &str) -> Result<Vec<u8>, ControllerError> {
    let mut document: Value = serde_json::from_slice(payload).map_err(|e| {
        ControllerError::InvalidConfig(format!("{hostname}: ignition payload is not valid JSON: {e}"))
    })?;
    let root = document.as_object_mut().ok_or_else(|| {
        ControllerError::InvalidConfig(format!("{hostname}: ignition payload is not a JSON object"))
    })?;

    let storage = root
        .entry("storage")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| ControllerError::InvalidConfig(format!("{hostname}: ignition storage is not an object")))?;
    let files = storage
        .entry("files")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| ControllerError::InvalidConfig(format!("{hostname}: ignition storage.files is not a list")))?;

    files.push(json!({
        "filesystem": "root",
        "path": "/etc/hostname",
        "mode": HOSTNAME_FILE_MODE,
        "contents": { "source": format!("data:,{hostname}") }
    }));

    serde_json::to_vec(&document).map_err(|e| {
        ControllerError::InvalidConfig(format!("{hostname}: failed to encode ignition payload: {e}"))
    })
}
