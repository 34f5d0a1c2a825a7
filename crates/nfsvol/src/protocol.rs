//! Wire types of the volume plugin protocol.
//!
//! Requests and responses use the PascalCase field names of the Docker
//! volume plugin API. Every response carries an `Err` string that is empty
//! on success; the message is the only failure detail on the wire.

use std::path::PathBuf;

use nfsvol_common::DriverResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::volume::VolumeInfo;

/// Body of `VolumeDriver.Create`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CreateRequest {
    /// Volume name.
    pub name: String,
    /// Driver options; `source` is mandatory.
    pub opts: Option<Map<String, Value>>,
}

/// Body of every request addressing a volume by name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NameRequest {
    /// Volume name.
    pub name: String,
    /// Caller identifier sent with mount and unmount requests.
    #[serde(rename = "ID")]
    pub id: String,
}

/// Response to `Plugin.Activate`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    /// Implemented plugin interfaces.
    pub implements: Vec<String>,
}

/// Response carrying nothing but the outcome.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorResponse {
    /// Failure message, empty on success.
    #[serde(rename = "Err")]
    pub err: String,
}

impl From<DriverResult<()>> for ErrorResponse {
    fn from(result: DriverResult<()>) -> Self {
        Self {
            err: result.err().map(|e| e.to_string()).unwrap_or_default(),
        }
    }
}

/// Response to `VolumeDriver.Mount` and `VolumeDriver.Path`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountpointResponse {
    /// Where the volume is mounted.
    pub mountpoint: String,
    /// Failure message, empty on success.
    pub err: String,
}

impl From<DriverResult<PathBuf>> for MountpointResponse {
    fn from(result: DriverResult<PathBuf>) -> Self {
        match result {
            Ok(path) => Self {
                mountpoint: path.display().to_string(),
                err: String::new(),
            },
            Err(e) => Self {
                mountpoint: String::new(),
                err: e.to_string(),
            },
        }
    }
}

/// A volume as presented to the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeSummary {
    /// Volume name.
    pub name: String,
    /// Mountpoint, empty if never mounted.
    pub mountpoint: String,
}

impl From<VolumeInfo> for VolumeSummary {
    fn from(info: VolumeInfo) -> Self {
        Self {
            mountpoint: info.mountpoint.display().to_string(),
            name: info.name,
        }
    }
}

/// Response to `VolumeDriver.Get`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetResponse {
    /// The volume, absent on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeSummary>,
    /// Failure message, empty on success.
    pub err: String,
}

impl From<DriverResult<VolumeInfo>> for GetResponse {
    fn from(result: DriverResult<VolumeInfo>) -> Self {
        match result {
            Ok(info) => Self {
                volume: Some(info.into()),
                err: String::new(),
            },
            Err(e) => Self {
                volume: None,
                err: e.to_string(),
            },
        }
    }
}

/// Response to `VolumeDriver.List`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListResponse {
    /// Every known volume.
    pub volumes: Vec<VolumeSummary>,
    /// Always empty; listing cannot fail.
    pub err: String,
}

impl From<Vec<VolumeInfo>> for ListResponse {
    fn from(volumes: Vec<VolumeInfo>) -> Self {
        Self {
            volumes: volumes.into_iter().map(Into::into).collect(),
            err: String::new(),
        }
    }
}

/// Scope of the volumes a driver manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Volumes exist on this host only.
    Local,
}

/// Driver capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Capabilities {
    /// Volume scope.
    pub scope: Scope,
}

/// Response to `VolumeDriver.Capabilities`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    /// Driver capabilities.
    pub capabilities: Capabilities,
}
