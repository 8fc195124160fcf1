/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Jobs are identified by a random UUID assigned at admission.
pub type JobId = uuid::Uuid;

/// Opaque identity of whoever submitted a job (chat user id, API key owner, ...).
pub type SubmitterId = String;
