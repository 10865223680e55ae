//! Record definitions for the optometry store.
//!
//! Every record is serialized as JSON (camelCase field names) into an LMDB
//! value. The entity kinds are:
//!
//! - [`User`]: a practitioner account, unique by username
//! - [`Exam`]: one patient visit, the aggregation root
//! - [`Section`]: one named step of an exam, keyed by `(examId, name)`
//! - [`DocumentRecord`]: a generated rendering, keyed by `(userId, examId, sectionId)`
//! - [`SignatureRecord`]: a practitioner signature, keyed by `userId`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::credential::Credential;
use crate::store_error::{StoreError, StoreResult};

/// Well-known section names used by the exam forms.
pub mod section_names {
    /// Patient identification. Saving it also updates [`Exam::patient`](super::Exam::patient).
    pub const IDENTIFICATION: &str = "identification";
    pub const CASE_HISTORY: &str = "histoire";
    pub const OBJECTIVE_REFRACTION: &str = "refraction-objective";
    pub const SUBJECTIVE_REFRACTION: &str = "refraction-subjective";
    pub const LESIONS: &str = "lesions";
    /// Attachment list managed by [`RecordStore::add_attachment`](crate::RecordStore::add_attachment).
    pub const ATTACHMENTS: &str = "utiles-files";
}

pub const STATUS_IN_PROGRESS: &str = "in_progress";

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A practitioner account.
///
/// # Examples
///
/// ```rust
/// use optometry_record_store::local_db_model::User;
///
/// let user = User::new("jdupont", "correct horse", "Jeanne", "Dupont")?;
/// assert!(user.verify_password("correct horse"));
/// assert_eq!(user.display_name(), "Jeanne Dupont");
/// # Ok::<(), optometry_record_store::StoreError>(())
/// ```
///
/// # Field Constraints
///
/// - `id` may be left empty; the store assigns one on first save
/// - `username` must be non-empty and unique; saving an existing username
///   updates that user instead of creating a second one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub credential: Credential,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        username: impl Into<String>,
        password: &str,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> StoreResult<Self> {
        Ok(Self {
            id: String::new(),
            username: username.into(),
            credential: Credential::from_password(password)?,
            first_name: first_name.into(),
            last_name: last_name.into(),
            license_number: None,
            created_at: Utc::now(),
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    pub fn verify_password(&self, password: &str) -> bool {
        self.credential.verify(password)
    }
}

/// The patient sub-record embedded in an [`Exam`].
///
/// An open object of form field name to value (`nom`, `prenom`,
/// `dateNaissance`, ...), filled by the identification section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patient(pub Map<String, JsonValue>);

impl Patient {
    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.0.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(JsonValue::as_str)
    }

    /// Shallow merge: fields in `fields` overwrite existing ones.
    pub fn merge(&mut self, fields: &Map<String, JsonValue>) {
        for (key, value) in fields {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One patient visit. Sections and documents hang off its `id`.
///
/// `user_id` references the owning [`User`] but is not checked by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub patient: Patient,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Exam {
    /// A new in-progress exam with a generated id.
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            user_id: user_id.into(),
            patient: Patient::default(),
            status: STATUS_IN_PROGRESS.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set both timestamps, e.g. when importing an older record.
    pub fn with_timestamps(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self.updated_at = at;
        self
    }
}

/// Reference to an image or external document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// A file attached to an exam (photo, scanned referral...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub format: String,
    /// Base64 file content.
    pub data: String,
    pub updated_at: DateTime<Utc>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, format: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            format: format.into(),
            data: data.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Content of a [`Section`].
///
/// Serialized as `{"kind": "form", "value": {...}}` so the variant never has
/// to be guessed from the shape of the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SectionPayload {
    /// Structured form data, one entry per field.
    Form(Map<String, JsonValue>),
    /// Serialized annotation data, e.g. a lesion drawing.
    Annotation(String),
    ImageRef(ImageRef),
    Attachments(Vec<Attachment>),
}

impl SectionPayload {
    /// Build a form payload from a JSON object.
    ///
    /// ```rust
    /// use optometry_record_store::local_db_model::SectionPayload;
    /// use serde_json::json;
    ///
    /// let payload = SectionPayload::form(json!({"od": {"sphere": "+1.00"}}))?;
    /// assert!(payload.as_form().is_some());
    /// assert!(SectionPayload::form(json!("not an object")).is_err());
    /// # Ok::<(), optometry_record_store::StoreError>(())
    /// ```
    pub fn form(value: JsonValue) -> StoreResult<Self> {
        match value {
            JsonValue::Object(fields) => Ok(SectionPayload::Form(fields)),
            other => Err(StoreError::Validation(format!(
                "form payload must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    pub fn as_form(&self) -> Option<&Map<String, JsonValue>> {
        match self {
            SectionPayload::Form(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SectionPayload::Form(_) => "form",
            SectionPayload::Annotation(_) => "annotation",
            SectionPayload::ImageRef(_) => "image_ref",
            SectionPayload::Attachments(_) => "attachments",
        }
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// One named step of an exam. At most one per `(exam_id, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub exam_id: String,
    pub name: String,
    pub payload: SectionPayload,
    pub updated_at: DateTime<Utc>,
}

/// A generated rendering of exam data (typically a PDF).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub user_id: String,
    pub exam_id: String,
    pub section_id: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRecord {
    pub user_id: String,
    pub signature_data: String,
    pub created_at: DateTime<Utc>,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
