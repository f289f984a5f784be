//! Shared data model for the FieldLine engine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Default attempt budget for queued mutations.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// HTTP method of a tracked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Whether responses to this method may be served from cache.
    pub fn is_cacheable(self) -> bool {
        matches!(self, HttpMethod::Get)
    }

    /// Canonical uppercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Dispatch priority of a queued mutation.
///
/// Declaration order drives dispatch order: sorting ascending drains
/// `High` before `Medium` before `Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        write!(f, "{}", name)
    }
}

/// Caller-declared type of a queued operation.
///
/// Drives the synthetic response shape for writes admitted while offline.
/// Always supplied explicitly at enqueue time, never inferred from the
/// endpoint URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    /// Marking an activity as completed.
    ActivityComplete,
    /// Creating a document (including signed documents).
    DocumentCreate,
    /// Updating an existing document.
    DocumentUpdate,
    /// Submitting a filled form.
    FormSubmit,
    /// Anything without a dedicated response shape.
    Generic,
}

/// One durable pending mutation awaiting remote confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique item ID.
    pub id: Uuid,
    /// Caller-declared operation type.
    pub op_type: OpType,
    /// Endpoint the mutation targets.
    pub endpoint: String,
    /// Method to replay with.
    pub method: HttpMethod,
    /// JSON body to replay.
    pub payload: serde_json::Value,
    /// Dispatch priority.
    pub priority: Priority,
    /// When the item was enqueued.
    pub created_at: DateTime<Utc>,
    /// Attempts made so far.
    pub attempts: u32,
    /// Attempt budget; once reached the item is terminally failed.
    pub max_attempts: u32,
    /// Message from the most recent failed attempt.
    pub last_error: Option<String>,
    /// When the most recent attempt finished.
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Create a new queue item with the default attempt budget.
    pub fn new(
        op_type: OpType,
        endpoint: impl Into<String>,
        method: HttpMethod,
        payload: serde_json::Value,
        priority: Priority,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            op_type,
            endpoint: endpoint.into(),
            method,
            payload,
            priority,
            created_at: Utc::now(),
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            last_error: None,
            last_attempt_at: None,
        }
    }

    /// Set the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Whether the attempt budget is exhausted.
    ///
    /// Exhausted items are excluded from automatic dispatch but remain
    /// enumerable until retried manually or purged.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Record a failed attempt.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.attempts += 1;
        self.last_error = Some(error.into());
        self.last_attempt_at = Some(Utc::now());
    }

    /// Reset attempt bookkeeping to re-arm a terminally failed item.
    pub fn reset_attempts(&mut self) {
        self.attempts = 0;
        self.last_error = None;
        self.last_attempt_at = None;
    }
}

/// A cached response body with its freshness bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key (`"<METHOD> <endpoint>#<body hash>"`).
    pub key: String,
    /// Cached response body.
    pub payload: serde_json::Value,
    /// When the payload was stored.
    pub stored_at: DateTime<Utc>,
    /// Endpoint that produced the payload.
    pub endpoint: String,
    /// Method that produced the payload.
    pub method: HttpMethod,
}

impl CacheEntry {
    /// Check freshness against a TTL scaled by a connectivity multiplier.
    pub fn is_fresh(&self, ttl: Duration, multiplier: u32, now: DateTime<Utc>) -> bool {
        now - self.stored_at <= ttl * multiplier as i32
    }
}

/// Entity snapshot collections kept warm for offline reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Activities,
    RecurringActivities,
    Templates,
    Documents,
}

/// How the signer expressed assent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureMethod {
    /// Drawn signature image plus acceptance statement.
    Visual,
    /// Acceptance statement only.
    Acceptance,
}

/// Lifecycle status of an offline signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    /// Waiting for remote delivery.
    PendingSync,
    /// Confirmed by the remote.
    Synced,
    /// Delivery attempts exhausted.
    Failed,
    /// Aged out while pending. Terminal.
    Expired,
}

/// Urgency class of an offline signature.
///
/// Declaration order drives delivery order: critical signatures drain first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SignaturePriority {
    Critical,
    High,
    Medium,
}

impl SignaturePriority {
    /// Queue priority for the item wrapping a signature of this urgency.
    pub fn queue_priority(self) -> Priority {
        match self {
            SignaturePriority::Critical | SignaturePriority::High => Priority::High,
            SignaturePriority::Medium => Priority::Medium,
        }
    }
}

/// Document category a signature belongs to. Fixes its priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureCategory {
    EmergencyProcedure,
    SafetyInspection,
    IncidentReport,
    EquipmentCheck,
    ShiftHandover,
    DailyReport,
}

impl SignatureCategory {
    /// Fixed category to priority mapping.
    pub fn priority(self) -> SignaturePriority {
        match self {
            SignatureCategory::EmergencyProcedure | SignatureCategory::SafetyInspection => {
                SignaturePriority::Critical
            }
            SignatureCategory::IncidentReport | SignatureCategory::EquipmentCheck => {
                SignaturePriority::High
            }
            SignatureCategory::ShiftHandover | SignatureCategory::DailyReport => {
                SignaturePriority::Medium
            }
        }
    }
}

/// A captured geolocation sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Reported accuracy radius in meters.
    pub accuracy_m: f64,
    /// When the sample was taken.
    pub captured_at: DateTime<Utc>,
}

impl GeoFix {
    /// Accuracy sentinel recorded when no real fix could be obtained.
    pub const UNKNOWN_ACCURACY_M: f64 = 9_999_999.0;

    /// Create a fix from coordinates and accuracy.
    pub fn new(lat: f64, lon: f64, accuracy_m: f64) -> Self {
        Self {
            lat,
            lon,
            accuracy_m,
            captured_at: Utc::now(),
        }
    }

    /// Fallback fix recorded when the location source is unavailable.
    pub fn unknown() -> Self {
        Self::new(0.0, 0.0, Self::UNKNOWN_ACCURACY_M)
    }

    /// Whether this is the low-confidence fallback fix.
    pub fn is_unknown(&self) -> bool {
        self.accuracy_m >= Self::UNKNOWN_ACCURACY_M
    }
}

/// Device fingerprint captured into signature payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Platform name (e.g. "ios", "android").
    pub platform: String,
    /// Operating system version.
    pub os_version: String,
    /// Application version.
    pub app_version: String,
    /// Hardware model identifier.
    pub device_model: String,
}

/// Captured content of an offline signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignaturePayload {
    /// How assent was expressed.
    pub method: SignatureMethod,
    /// Blob filename of the drawn signature image, when one was captured.
    pub visual_blob: Option<String>,
    /// Acceptance statement confirmed by the signer.
    pub acceptance_text: String,
    /// Where the signature was captured.
    pub geolocation: GeoFix,
    /// Device that captured it.
    pub device_info: DeviceInfo,
    /// When the signer confirmed.
    pub timestamp: DateTime<Utc>,
}

/// A signature captured offline, pending remote delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineSignature {
    /// Unique signature ID.
    pub id: Uuid,
    /// Document being signed.
    pub document_id: String,
    /// Signing user.
    pub user_id: String,
    /// Captured signature content.
    pub payload: SignaturePayload,
    /// Lifecycle status.
    pub status: SignatureStatus,
    /// Delivery attempts made so far.
    pub attempts: u32,
    /// Urgency class derived from the document category.
    pub priority: SignaturePriority,
    /// When the signature was captured.
    pub created_at: DateTime<Utc>,
    /// Hard validity deadline. Still pending past this point means expired.
    pub expires_at: DateTime<Utc>,
    /// Queue item wrapping this signature for dispatch.
    pub queue_item_id: Option<Uuid>,
}

impl OfflineSignature {
    /// Validity window for a pending signature, in hours.
    pub const VALIDITY_HOURS: i64 = 24;

    /// Create a pending signature for a document category.
    pub fn new(
        document_id: impl Into<String>,
        user_id: impl Into<String>,
        payload: SignaturePayload,
        category: SignatureCategory,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            document_id: document_id.into(),
            user_id: user_id.into(),
            payload,
            status: SignatureStatus::PendingSync,
            attempts: 0,
            priority: category.priority(),
            created_at: now,
            expires_at: now + Duration::hours(Self::VALIDITY_HOURS),
            queue_item_id: None,
        }
    }

    /// Whether the validity window has passed.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Mark as delivered. Expired signatures stay expired.
    pub fn mark_synced(&mut self) {
        if self.status != SignatureStatus::Expired {
            self.status = SignatureStatus::Synced;
        }
    }

    /// Record a failed delivery attempt. Terminal once the budget is spent.
    pub fn mark_attempt_failed(&mut self, max_attempts: u32) {
        self.attempts += 1;
        if self.attempts >= max_attempts {
            self.status = SignatureStatus::Failed;
        }
    }

    /// Reclassify an aged-out pending signature.
    pub fn mark_expired(&mut self) {
        self.status = SignatureStatus::Expired;
    }
}

/// An in-progress form, superseded by each save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftForm {
    /// Activity the draft belongs to.
    pub activity_id: String,
    /// Form contents.
    pub data: serde_json::Value,
    /// When the draft was last saved.
    pub saved_at: DateTime<Utc>,
}

impl DraftForm {
    /// Create a draft for an activity.
    pub fn new(activity_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            activity_id: activity_id.into(),
            data,
            saved_at: Utc::now(),
        }
    }
}
