//! Records appended to the inspection data stream.

use crate::broker::StreamEntry;
use crate::session::InspectionSession;

pub const FIELD_INSPECTION_ID: &str = "inspectionId";
pub const FIELD_SEQUENCE: &str = "sequence";
pub const FIELD_IMAGE_NAME: &str = "imagename";
pub const FIELD_IMAGE: &str = "image";
pub const FIELD_IS_DONE: &str = "isDone";

/// Fields written by the record stream itself. Session context never carries them.
pub const RESERVED_FIELDS: [&str; 5] = [
    FIELD_INSPECTION_ID,
    FIELD_SEQUENCE,
    FIELD_IMAGE_NAME,
    FIELD_IMAGE,
    FIELD_IS_DONE,
];

pub fn is_reserved_field(name: &str) -> bool {
    RESERVED_FIELDS.contains(&name)
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(u64),
    Blob(Vec<u8>),
}

impl FieldValue {
    /// Wire representation: UTF-8 text, decimal integers, raw blobs.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            FieldValue::Text(text) => text.as_bytes().to_vec(),
            FieldValue::Integer(n) => n.to_string().into_bytes(),
            FieldValue::Blob(bytes) => bytes.clone(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(text: &str) -> Self {
        FieldValue::Text(text.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(text: String) -> Self {
        FieldValue::Text(text)
    }
}

impl From<u64> for FieldValue {
    fn from(n: u64) -> Self {
        FieldValue::Integer(n)
    }
}

/// Ordered field list of one stream entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamRecord {
    fields: Vec<(String, FieldValue)>,
}

impl StreamRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.push(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// Session context, then id and sequence. Context entries named like a
    /// reserved field are skipped.
    fn for_session(session: &InspectionSession, sequence: u64) -> Self {
        let mut record = Self::new();
        for (key, value) in session.context() {
            if !is_reserved_field(key) {
                record.push(key.clone(), value.as_str());
            }
        }
        record
            .with(FIELD_INSPECTION_ID, session.session_id())
            .with(FIELD_SEQUENCE, sequence)
    }

    /// Record carrying one JPEG image.
    pub fn image(session: &InspectionSession, sequence: u64, jpeg: Vec<u8>) -> Self {
        Self::for_session(session, sequence)
            .with(FIELD_IMAGE_NAME, session.image_name(sequence))
            .with(FIELD_IMAGE, FieldValue::Blob(jpeg))
            .with(FIELD_IS_DONE, "0")
    }

    /// End-of-session marker.
    pub fn terminal(session: &InspectionSession, sequence: u64) -> Self {
        Self::for_session(session, sequence)
            .with(FIELD_IS_DONE, "1")
            .with(FIELD_IMAGE_NAME, "")
            .with(FIELD_IMAGE, "")
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.get(FIELD_IS_DONE), Some(FieldValue::Text(flag)) if flag == "1")
    }

    pub fn to_wire(&self) -> Vec<(String, Vec<u8>)> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_bytes()))
            .collect()
    }
}

/// Whether a data stream entry is a terminal record.
pub fn is_terminal_entry(entry: &StreamEntry) -> bool {
    entry.get_str(FIELD_IS_DONE) == Some("1")
}
