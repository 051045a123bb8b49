use serde::{Deserialize, Serialize};

use crate::images::IngestReceipt;
use crate::inference::TaskView;

/// POST /photos/base64
#[derive(Debug, Deserialize)]
pub struct UploadBase64 {
    pub image_b64: String,
    pub content_type: Option<String>,
    pub media_group: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    #[serde(flatten)]
    pub receipt: IngestReceipt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_group: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PhotoStatus {
    #[serde(flatten)]
    pub view: TaskView,
    /// Short-lived link to the stored bytes; absent when presigning failed.
    pub url: Option<String>,
}
