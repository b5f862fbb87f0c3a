//! Wire and storage schema shared by every orchestrator.
//!
//! The JSON shape matches what existing clients of the conversion service
//! already parse: snake_case keys, upper-case status strings, and optional
//! fields omitted rather than sent as `null`.
//!
//! ## Why a separate `JobState`?
//!
//! [`JobRecord`] is what callers see. Its `result`/`error` fields must agree
//! with `status` (result iff SUCCESS, error iff FAILURE). Rather than policing
//! that on every write, the store keeps a [`JobState`] whose terminal variants
//! carry their payload, and records are only ever built from it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress of a conversion job, single or batch.
///
/// Variants are declared in progress order so `Ord` reflects it. SUCCESS and
/// FAILURE are both terminal; neither can follow the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Success,
    Failure,
}

impl JobStatus {
    /// SUCCESS or FAILURE.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure)
    }

    /// QUEUED or PROCESSING.
    pub fn is_in_progress(self) -> bool {
        !self.is_terminal()
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Only forward moves out of a non-terminal state are allowed. Skipping
    /// PROCESSING (QUEUED → FAILURE) is permitted; standing still is not a
    /// transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        !self.is_terminal() && next > self
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of image extracted from a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Table,
    Picture,
}

/// An image extracted from a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    #[serde(rename = "type")]
    pub image_type: ImageType,
    /// File name with extension, e.g. `table_1.png`.
    pub filename: String,
    /// Base64 data URI, e.g. `data:image/png;base64,iVBORw0…`.
    pub image: String,
}

/// Markdown produced for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    /// The original filename of the converted document.
    pub filename: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub markdown: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageData>,
    /// Set when this document failed; `markdown` is then empty or partial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConversionResult {
    pub fn success(filename: impl Into<String>, markdown: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            markdown: markdown.into(),
            images: Vec::new(),
            error: None,
        }
    }

    pub fn failed(filename: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            markdown: String::new(),
            images: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn with_images(mut self, images: Vec<ImageData>) -> Self {
        self.images = images;
        self
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Execution state of one job as held by the job store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Processing,
    Succeeded(ConversionResult),
    Failed(String),
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Queued => JobStatus::Queued,
            JobState::Processing => JobStatus::Processing,
            JobState::Succeeded(_) => JobStatus::Success,
            JobState::Failed(_) => JobStatus::Failure,
        }
    }
}

/// Client-facing view of one conversion job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ConversionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    pub fn from_state(job_id: impl Into<String>, state: &JobState) -> Self {
        let (result, error) = match state {
            JobState::Succeeded(result) => (Some(result.clone()), None),
            JobState::Failed(error) => (None, Some(error.clone())),
            JobState::Queued | JobState::Processing => (None, None),
        };
        Self {
            job_id: job_id.into(),
            status: state.status(),
            result,
            error,
        }
    }

    pub fn queued(job_id: impl Into<String>) -> Self {
        Self::from_state(job_id, &JobState::Queued)
    }

    pub fn failed(job_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::from_state(job_id, &JobState::Failed(error.into()))
    }
}

/// Client-facing view of a batch of conversion jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJobRecord {
    pub job_id: String,
    /// Aggregate of the sub-job statuses; never stored.
    pub status: JobStatus,
    /// Sub-jobs in submission order.
    #[serde(rename = "conversion_results", default)]
    pub sub_jobs: Vec<JobRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchJobRecord {
    /// `true` once every sub-job is terminal. An aggregate FAILURE can come
    /// earlier, while siblings are still running.
    pub fn is_settled(&self) -> bool {
        self.sub_jobs.iter().all(|j| j.status.is_terminal())
    }
}

/// Result of reading a record that may have been evicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(v) => Some(v),
            Lookup::NotFound => None,
        }
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Lookup::Found(v),
            None => Lookup::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_is_ordered_by_progress() {
        assert!(JobStatus::Queued < JobStatus::Processing);
        assert!(JobStatus::Processing < JobStatus::Success);
        assert!(JobStatus::Processing < JobStatus::Failure);
    }

    #[test]
    fn transitions_only_move_forward() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Queued.can_transition_to(Failure));
        assert!(Processing.can_transition_to(Success));
        assert!(Processing.can_transition_to(Failure));

        assert!(!Processing.can_transition_to(Queued));
        assert!(!Queued.can_transition_to(Queued));
        assert!(!Success.can_transition_to(Failure));
        assert!(!Failure.can_transition_to(Success));
        assert!(!Success.can_transition_to(Processing));
    }

    #[test]
    fn status_wire_format() {
        assert_eq!(serde_json::to_value(JobStatus::Processing).unwrap(), json!("PROCESSING"));
        let s: JobStatus = serde_json::from_value(json!("FAILURE")).unwrap();
        assert_eq!(s, JobStatus::Failure);
        assert_eq!(JobStatus::Success.to_string(), "SUCCESS");
    }

    #[test]
    fn failed_result_serialises_without_markdown() {
        let r = ConversionResult::failed("b.pdf", "Failed to process page 3");
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({"filename": "b.pdf", "error": "Failed to process page 3"})
        );
    }

    #[test]
    fn image_type_key_is_renamed() {
        let img = ImageData {
            image_type: ImageType::Table,
            filename: "table_1.png".into(),
            image: "data:image/png;base64,AAAA".into(),
        };
        let v = serde_json::to_value(&img).unwrap();
        assert_eq!(v["type"], "table");
        assert_eq!(v["image"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn record_payload_follows_state() {
        let ok = JobRecord::from_state("j1", &JobState::Succeeded(ConversionResult::success("a.pdf", "# A")));
        assert_eq!(ok.status, JobStatus::Success);
        assert!(ok.result.is_some() && ok.error.is_none());

        let bad = JobRecord::from_state("j2", &JobState::Failed("boom".into()));
        assert_eq!(bad.status, JobStatus::Failure);
        assert!(bad.result.is_none());
        assert_eq!(bad.error.as_deref(), Some("boom"));

        let queued = JobRecord::queued("j3");
        assert_eq!(
            serde_json::to_value(&queued).unwrap(),
            json!({"job_id": "j3", "status": "QUEUED"})
        );
    }

    #[test]
    fn batch_record_uses_conversion_results_key() {
        let batch = BatchJobRecord {
            job_id: "b1".into(),
            status: JobStatus::Processing,
            sub_jobs: vec![JobRecord::queued("s1")],
            error: None,
        };
        let v = serde_json::to_value(&batch).unwrap();
        assert_eq!(v["conversion_results"][0]["job_id"], "s1");
        assert!(v.get("error").is_none());
    }

    #[test]
    fn lookup_conversions() {
        let found: Lookup<u32> = Some(3).into();
        assert!(found.is_found());
        assert_eq!(found.into_option(), Some(3));
        let missing: Lookup<u32> = None.into();
        assert!(!missing.is_found());
    }
}
