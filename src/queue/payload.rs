//! Typed payloads for the built-in job types
//!
//! Producers may enqueue any JSON payload, but the three built-in types are
//! validated at the producer boundary so a malformed job never reaches a
//! worker. Unknown type names pass through as opaque JSON.

use crate::core::validation::{require_text, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{Display, EnumString};

pub const EMAIL_QUEUE: &str = "email";
pub const SEND_EMAIL: &str = "send-email";
pub const NOTIFICATION_QUEUE: &str = "notification";
pub const SEND_NOTIFICATION: &str = "send-notification";
pub const DATA_PROCESSING_QUEUE: &str = "data-processing";
pub const PROCESS_DATA: &str = "process-data";

/// One address or a list of addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Recipients {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Recipients::One(address) => vec![address.clone()],
            Recipients::Many(addresses) => addresses.clone(),
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Recipients::One(address) => address.trim().is_empty(),
            Recipients::Many(addresses) => {
                addresses.is_empty() || addresses.iter().any(|a| a.trim().is_empty())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailJob {
    pub to: Recipients,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationJob {
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProcessingJob {
    pub task_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Map<String, Value>>,
}

/// Payload of one of the built-in job types
#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    Email(EmailJob),
    Notification(NotificationJob),
    DataProcessing(DataProcessingJob),
}

impl JobPayload {
    /// Queue this payload is routed to
    pub fn queue_name(&self) -> &'static str {
        match self {
            JobPayload::Email(_) => EMAIL_QUEUE,
            JobPayload::Notification(_) => NOTIFICATION_QUEUE,
            JobPayload::DataProcessing(_) => DATA_PROCESSING_QUEUE,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            JobPayload::Email(_) => SEND_EMAIL,
            JobPayload::Notification(_) => SEND_NOTIFICATION,
            JobPayload::DataProcessing(_) => PROCESS_DATA,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            JobPayload::Email(email) => {
                if email.to.is_blank() {
                    return Err(ValidationError::new("Missing required field: to"));
                }
                require_text("subject", &email.subject)?;
                require_text("body", &email.body)
            }
            JobPayload::Notification(notification) => {
                require_text("userId", &notification.user_id)?;
                require_text("title", &notification.title)?;
                require_text("message", &notification.message)
            }
            JobPayload::DataProcessing(task) => {
                require_text("taskId", &task.task_id)?;
                require_text("type", &task.kind)?;
                if task.data.is_null() {
                    return Err(ValidationError::new("Missing required field: data"));
                }
                Ok(())
            }
        }
    }

    pub fn to_value(&self) -> Result<Value, ValidationError> {
        let value = match self {
            JobPayload::Email(email) => serde_json::to_value(email),
            JobPayload::Notification(notification) => serde_json::to_value(notification),
            JobPayload::DataProcessing(task) => serde_json::to_value(task),
        };
        value.map_err(|e| ValidationError::new(format!("Payload is not serializable: {}", e)))
    }

    /// Parse a raw payload of a built-in type
    ///
    /// Returns `None` when `type_name` is not one of the built-in types.
    pub fn from_parts(type_name: &str, payload: &Value) -> Option<Result<JobPayload, ValidationError>> {
        let parsed = match type_name {
            SEND_EMAIL => parse(type_name, payload).map(JobPayload::Email),
            SEND_NOTIFICATION => parse(type_name, payload).map(JobPayload::Notification),
            PROCESS_DATA => parse(type_name, payload).map(JobPayload::DataProcessing),
            _ => return None,
        };
        Some(parsed.and_then(|p| p.validate().map(|_| p)))
    }
}

fn parse<T: serde::de::DeserializeOwned>(type_name: &str, payload: &Value) -> Result<T, ValidationError> {
    T::deserialize(payload)
        .map_err(|e| ValidationError::new(format!("Invalid {} payload: {}", type_name, e)))
}

/// Validate a raw payload against its type's schema when the type is built in
pub fn validate_payload(type_name: &str, payload: &Value) -> Result<(), ValidationError> {
    if payload.is_null() {
        return Err(ValidationError::new("Missing required field: data"));
    }
    match JobPayload::from_parts(type_name, payload) {
        Some(parsed) => parsed.map(|_| ()),
        None => Ok(()),
    }
}
