//! JSON payloads exchanged with the service
//!
//! Field names follow the service's PascalCase convention. Response bodies
//! are parsed leniently: unknown fields are ignored and missing ones default.

use parcel_core::{ParcelError, Result, UploadedPart};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// One entry of a completion manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestPart {
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// Body of a complete-multipart-upload request
///
/// Parts are always in ascending part-number order, whatever order the
/// caller supplied them in. Duplicates are kept as given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompletionManifest {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub parts: Vec<ManifestPart>,
}

impl CompletionManifest {
    /// Build a manifest from part descriptors in any order
    pub fn from_parts<'a>(parts: impl IntoIterator<Item = &'a UploadedPart>) -> Self {
        let mut parts: Vec<ManifestPart> = parts
            .into_iter()
            .map(|part| ManifestPart {
                part_number: part.part_number,
                etag: part.etag.clone(),
            })
            .collect();
        // Stable, so equal part numbers keep the caller's relative order
        parts.sort_by_key(|part| part.part_number);
        CompletionManifest { parts }
    }

    pub fn part_numbers(&self) -> Vec<u32> {
        self.parts.iter().map(|part| part.part_number).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InitiateMultipartUploadResult {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub encoding_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CompleteMultipartUploadResult {
    pub bucket: String,
    pub key: String,
    #[serde(rename = "ETag")]
    pub etag: String,
    pub location: String,
    #[serde(rename = "CallbackResult")]
    pub callback_result: String,
}

/// A part as reported by part listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ListedPart {
    pub part_number: u32,
    pub last_modified: String,
    #[serde(rename = "ETag")]
    pub etag: String,
    pub size: u64,
}

impl ListedPart {
    /// Descriptor usable in a completion manifest
    pub fn to_uploaded_part(&self) -> UploadedPart {
        UploadedPart::new(self.part_number, self.etag.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ListPartsResult {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number_marker: u32,
    pub next_part_number_marker: u32,
    pub max_parts: u32,
    pub is_truncated: bool,
    pub storage_class: String,
    pub parts: Vec<ListedPart>,
}

/// An upload that was created but neither completed nor aborted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ListedUpload {
    pub key: String,
    pub upload_id: String,
    pub storage_class: String,
    pub initiated: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CommonPrefix {
    pub prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ListMultipartUploadsResult {
    pub bucket: String,
    pub prefix: String,
    pub key_marker: String,
    pub upload_id_marker: String,
    pub next_key_marker: String,
    pub next_upload_id_marker: String,
    pub delimiter: String,
    pub max_uploads: u32,
    pub encoding_type: String,
    pub is_truncated: bool,
    pub common_prefixes: Vec<CommonPrefix>,
    pub uploads: Vec<ListedUpload>,
}

/// Error document returned with non-success statuses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ErrorResult {
    pub code: String,
    pub message: String,
    pub request_id: String,
    pub host_id: String,
    #[serde(rename = "EC")]
    pub ec: String,
}

impl ErrorResult {
    /// Parse an error body; anything unparseable yields an empty result
    pub fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }
}

/// Decode a success body, treating an empty body as the default value
pub fn decode_body<T: DeserializeOwned + Default>(body: &[u8], request_id: &str) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        ParcelError::InvalidResponse(format!(
            "cannot decode response body: {}, request id '{}'",
            e, request_id
        ))
    })
}
