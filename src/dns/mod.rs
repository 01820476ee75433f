pub mod cloudflare;

use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

/// TTL value that lets Cloudflare pick the TTL.
pub const AUTOMATIC_TTL: i64 = 1;

/// The record types this controller manages: the address record and its ownership marker.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    #[serde(rename = "A")]
    A,
    #[serde(rename = "TXT")]
    TXT,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::TXT => "TXT",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A DNS record as stored by the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DnsRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub content: String,
    #[serde(default)]
    pub ttl: i64,
    #[serde(default)]
    pub proxied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_on: Option<DateTime<Utc>>,
}

impl DnsRecord {
    /// TXT content without the surrounding quotes Cloudflare may add.
    pub fn text(&self) -> &str {
        let content = self.content.as_str();
        content
            .strip_prefix('"')
            .and_then(|c| c.strip_suffix('"'))
            .unwrap_or(content)
    }
}

/// Request payload for creating a record.
///
/// See https://developers.cloudflare.com/api/operations/dns-records-for-a-zone-create-dns-record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewRecord {
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub name: String,
    pub content: String,
    pub ttl: i64,
    pub proxied: bool,
}

/// An entry of the `errors` array of a Cloudflare response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiMessage {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for ApiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error code {}, {}.", self.code, self.message)
    }
}

fn join_messages(errors: &[ApiMessage]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
}

#[derive(Debug, thiserror::Error)]
pub enum DnsError {
    /// The provider could not be reached or the connection failed.
    #[error("request to dns provider failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered but rejected the request.
    #[error("dns provider error (status {status}): {}", join_messages(.errors))]
    Provider { status: u16, errors: Vec<ApiMessage> },

    #[error("unexpected response from dns provider: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("dns provider response has no result")]
    EmptyResponse,

    #[error("no {record_type} record named {name:?}")]
    NotFound { record_type: RecordType, name: String },

    /// Listing a record type returned nothing.
    #[error("zone has no {0} records")]
    NoRecords(RecordType),
}

/// The operations the reconciler needs from a DNS zone.
#[async_trait::async_trait]
pub trait DnsZone: Send + Sync {
    /// All records of a type in the zone. Fails with [`DnsError::NoRecords`] if there are none.
    async fn list_records(&self, record_type: RecordType) -> Result<Vec<DnsRecord>, DnsError>;

    /// All records of a type with exactly this name. May be empty.
    async fn find_records(&self, record_type: RecordType, name: &str) -> Result<Vec<DnsRecord>, DnsError>;

    async fn create_record(&self, record: NewRecord) -> Result<DnsRecord, DnsError>;

    async fn delete_record_by_id(&self, id: &str) -> Result<(), DnsError>;

    /// The first record of a type with this name.
    async fn get_record(&self, record_type: RecordType, name: &str) -> Result<DnsRecord, DnsError> {
        self.find_records(record_type, name)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DnsError::NotFound {
                record_type,
                name: name.to_string(),
            })
    }

    /// Deletes the first record of a type with this name.
    async fn delete_record(&self, record_type: RecordType, name: &str) -> Result<(), DnsError> {
        let record = self.get_record(record_type, name).await?;
        self.delete_record_by_id(&record.id).await
    }
}
