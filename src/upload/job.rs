use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use super::error::{Result, UploadError};

/// How each part is put on the wire
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RequestKind {
    /// Part file is the whole request body
    #[default]
    Raw,
    /// Part file is sent as the `field` entry of a multipart form
    Multipart { field: String },
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => f.write_str("raw"),
            Self::Multipart { .. } => f.write_str("multipart"),
        }
    }
}

/// Caller's notification preferences, merged over `enabled = true`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub notification_channel: Option<String>,
    pub auto_clear: bool,
    pub enable_ring_tone: bool,
    pub on_progress_title: Option<String>,
    pub on_progress_message: Option<String>,
    pub on_complete_title: Option<String>,
    pub on_complete_message: Option<String>,
    pub on_error_title: Option<String>,
    pub on_error_message: Option<String>,
    pub on_cancelled_title: Option<String>,
    pub on_cancelled_message: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            notification_channel: None,
            auto_clear: false,
            enable_ring_tone: false,
            on_progress_title: None,
            on_progress_message: None,
            on_complete_title: None,
            on_complete_message: None,
            on_error_title: None,
            on_error_message: None,
            on_cancelled_title: None,
            on_cancelled_message: None,
        }
    }
}

/// Validated configuration of one multipart upload
#[derive(Debug, Clone)]
pub struct UploadJob {
    path: String,
    file_name: String,
    presign_endpoint: String,
    remote_upload_id: String,
    part_size: u64,
    total_parts: u32,
    begin_part: u32,
    method: String,
    custom_id: Option<String>,
    auth_token: Option<String>,
    headers: BTreeMap<String, String>,
    parameters: BTreeMap<String, String>,
    notification: NotificationConfig,
    kind: RequestKind,
}

impl UploadJob {
    /// Validate caller options into a job.
    ///
    /// No I/O happens here; every rejection is a configuration error.
    pub fn from_options(options: &Value) -> Result<Self> {
        let map = options
            .as_object()
            .ok_or_else(|| UploadError::config("options must be a map"))?;

        let path = required_string(map, "path")?;
        let file_name = required_string(map, "fileName")?;
        let presign_endpoint = required_string(map, "getPresignUrl")?;
        let remote_upload_id = required_string(map, "s3UploadId")?;

        let begin_part = required_number(map, "beginPart")?;
        let total_parts = required_number(map, "totalPart")?;
        let part_size = required_number(map, "partSize")?;

        let begin_part = u32::try_from(begin_part)
            .map_err(|_| UploadError::config("beginPart is too large."))?;
        let total_parts = u32::try_from(total_parts)
            .map_err(|_| UploadError::config("totalPart is too large."))?;
        if begin_part > total_parts {
            return Err(UploadError::config(format!(
                "beginPart ({}) must not exceed totalPart ({}).",
                begin_part, total_parts
            )));
        }

        if map.get("headers").is_some_and(|v| !v.is_object()) {
            return Err(UploadError::config("headers must be a hash."));
        }
        if map.get("notification").is_some_and(|v| !v.is_object()) {
            return Err(UploadError::config("notification must be a hash."));
        }

        let kind = match map.get("type") {
            None => RequestKind::Raw,
            Some(Value::String(t)) if t == "raw" => RequestKind::Raw,
            Some(Value::String(t)) if t == "multipart" => match map.get("field") {
                None => {
                    return Err(UploadError::config(
                        "field is required field for multipart type.",
                    ));
                }
                Some(Value::String(field)) => RequestKind::Multipart {
                    field: field.clone(),
                },
                Some(_) => return Err(UploadError::config("field must be string.")),
            },
            Some(Value::String(_)) => {
                return Err(UploadError::config(
                    "type should be string: raw or multipart.",
                ));
            }
            Some(_) => return Err(UploadError::config("type must be string.")),
        };

        let method = match map.get("method") {
            Some(Value::String(m)) => {
                let m = m.trim().to_ascii_uppercase();
                reqwest::Method::from_bytes(m.as_bytes())
                    .map_err(|_| UploadError::config(format!("method '{}' is not valid.", m)))?;
                m
            }
            _ => "POST".to_string(),
        };

        let custom_id = optional_string(map, "customUploadId");
        let auth_token = optional_string(map, "authToken");

        let notification = match map.get("notification") {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| UploadError::config(format!("notification is invalid: {}", e)))?,
            None => NotificationConfig::default(),
        };

        let parameters = match map.get("parameters") {
            None => BTreeMap::new(),
            Some(_) if kind == RequestKind::Raw => {
                return Err(UploadError::config(
                    "Parameters supported only in multipart type",
                ));
            }
            Some(v) => string_pairs(v, "Parameters must be string key/values.")?,
        };

        let headers = match map.get("headers") {
            None => BTreeMap::new(),
            Some(v) => string_pairs(v, "Headers must be string key/values.")?,
        };

        Ok(Self {
            path,
            file_name,
            presign_endpoint,
            remote_upload_id,
            part_size,
            total_parts,
            begin_part,
            method,
            custom_id,
            auth_token,
            headers,
            parameters,
            notification,
            kind,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn presign_endpoint(&self) -> &str {
        &self.presign_endpoint
    }

    pub fn remote_upload_id(&self) -> &str {
        &self.remote_upload_id
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn total_parts(&self) -> u32 {
        self.total_parts
    }

    pub fn begin_part(&self) -> u32 {
        self.begin_part
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn custom_id(&self) -> Option<&str> {
        self.custom_id.as_deref()
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn notification(&self) -> &NotificationConfig {
        &self.notification
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    /// Registry key: the custom id when given, else the remote upload id
    pub fn key(&self) -> &str {
        self.custom_id.as_deref().unwrap_or(&self.remote_upload_id)
    }

    /// Job with the token used when the options carried none
    pub fn with_default_auth_token(mut self, token: Option<String>) -> Self {
        if self.auth_token.is_none() {
            self.auth_token = token;
        }
        self
    }
}

fn required_string(map: &Map<String, Value>, key: &str) -> Result<String> {
    match map.get(key) {
        None => Err(UploadError::config(format!("Missing '{}' field.", key))),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(UploadError::config(format!("{} must be a string.", key))),
    }
}

fn required_number(map: &Map<String, Value>, key: &str) -> Result<u64> {
    let value = match map.get(key) {
        None => return Err(UploadError::config(format!("Missing '{}' field.", key))),
        Some(Value::Number(n)) => n,
        Some(_) => return Err(UploadError::config(format!("{} must be a number.", key))),
    };

    // Callers coming from JS send integral floats
    let n = value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
            .map(|f| f as u64)
    });
    match n {
        Some(n) if n > 0 => Ok(n),
        _ => Err(UploadError::config(format!(
            "{} must be a positive integer.",
            key
        ))),
    }
}

fn optional_string(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_pairs(value: &Value, message: &str) -> Result<BTreeMap<String, String>> {
    let map = value
        .as_object()
        .ok_or_else(|| UploadError::config(message.to_string()))?;
    map.iter()
        .map(|(k, v)| match v {
            Value::String(s) => Ok((k.clone(), s.clone())),
            _ => Err(UploadError::config(format!(
                "{} Value was invalid for '{}'",
                message, k
            ))),
        })
        .collect()
}
