//! Worker method catalogue with typed params and results

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_LIST_LIMIT;

/// Methods served by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Liveness probe
    Ping,
    /// Process a staged download into the component library
    ProcessDownload,
    /// Page through imported components
    ListComponents,
    /// Free-text component search
    SearchComponents,
}

impl Method {
    /// Get the wire method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::ProcessDownload => "process_download",
            Self::ListComponents => "list_components",
            Self::SearchComponents => "search_components",
        }
    }
}

/// Caller-side options for `process_download`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOptions {
    pub library_root: Option<String>,
    pub overwrite: bool,
}

/// Params of `process_download`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessDownloadParams {
    /// Staged file path; the worker must not delete it
    pub filepath: String,
    pub source_url: Option<String>,
    pub referrer_url: Option<String>,
    pub library_root: Option<String>,
    #[serde(default)]
    pub overwrite: bool,
}

/// Caller-side options for `list_components`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOptions {
    #[serde(default)]
    pub library_root: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

/// Params of `list_components`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListComponentsParams {
    pub library_root: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl From<ListOptions> for ListComponentsParams {
    fn from(options: ListOptions) -> Self {
        Self {
            library_root: options.library_root,
            limit: options.limit.unwrap_or(DEFAULT_LIST_LIMIT),
            offset: options.offset.unwrap_or(0),
        }
    }
}

/// Caller-side options for `search_components`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    #[serde(default)]
    pub library_root: Option<String>,
}

/// Params of `search_components`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchComponentsParams {
    pub query: String,
    pub library_root: Option<String>,
}

/// Outcome discriminator of a processed download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Symbol and footprint imported
    Success,
    /// Imported with missing pieces (see warnings)
    Partial,
    /// The worker handled the request but could not import the download
    Error,
}

/// Typed view of the `process_download` result payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingResult {
    pub status: ProcessingStatus,
    #[serde(default)]
    pub mpn: Option<String>,
    #[serde(default)]
    pub symbol_name: Option<String>,
    #[serde(default)]
    pub footprint_name: Option<String>,
    #[serde(default)]
    pub has_3d_model: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ProcessingResult {
    /// Interpret a raw result payload, if it has the expected shape
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}
