//! Offline signature capture, validation, and delivery.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fieldline_common::{
    DeviceInfo, Error, GeoFix, HttpMethod, OfflineSignature, OpType, QueueItem, Result,
    SignatureCategory, SignatureMethod, SignaturePayload, SignaturePriority, SignatureStatus,
};
use fieldline_net::{Transport, TransportRequest};
use fieldline_store::{BlobStore, LocalStore};
use fieldline_sync::SyncQueue;

use crate::config::SigningConfig;
use crate::location::LocationSource;

/// Everything the caller supplies to capture a signature.
#[derive(Debug, Clone)]
pub struct SignatureRequest {
    /// Document being signed.
    pub document_id: String,
    /// Signing user.
    pub user_id: String,
    /// Acceptance statement the signer confirmed.
    pub acceptance_text: String,
    /// The document demands a drawn signature.
    pub requires_visual: bool,
    /// Drawn signature image (PNG bytes), when captured.
    pub visual_blob: Option<Vec<u8>>,
    /// Document category. Fixes the priority.
    pub category: SignatureCategory,
}

impl SignatureRequest {
    /// Request with no visual requirement and no image attached.
    pub fn new(
        document_id: impl Into<String>,
        user_id: impl Into<String>,
        acceptance_text: impl Into<String>,
        category: SignatureCategory,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            user_id: user_id.into(),
            acceptance_text: acceptance_text.into(),
            requires_visual: false,
            visual_blob: None,
            category,
        }
    }

    /// Mark the document as requiring a drawn signature.
    pub fn requiring_visual(mut self) -> Self {
        self.requires_visual = true;
        self
    }

    /// Attach the drawn signature image.
    pub fn with_visual_blob(mut self, image: Vec<u8>) -> Self {
        self.visual_blob = Some(image);
        self
    }
}

/// Aggregate result of one signature delivery pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureSyncReport {
    /// Signatures confirmed by the remote.
    pub synced: usize,
    /// Signatures that failed this pass.
    pub failed: usize,
    /// Error message per failed signature.
    pub errors: Vec<(Uuid, String)>,
}

/// Signature counts for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureStats {
    /// Counts per lifecycle status.
    pub by_status: HashMap<SignatureStatus, usize>,
    /// Counts per urgency class.
    pub by_priority: HashMap<SignaturePriority, usize>,
    /// Everything stored.
    pub total: usize,
}

fn signature_endpoint(document_id: &str) -> String {
    format!("/api/documents/{}/signatures", document_id)
}

/// Wire body for delivering a signature.
///
/// Carries the signature id so replays are idempotent upstream.
fn upload_body(signature: &OfflineSignature) -> Value {
    json!({
        "signature_id": signature.id,
        "document_id": signature.document_id,
        "user_id": signature.user_id,
        "method": signature.payload.method,
        "acceptance_text": signature.payload.acceptance_text,
        "visual_blob": signature.payload.visual_blob,
        "geolocation": signature.payload.geolocation,
        "device_info": signature.payload.device_info,
        "signed_at": signature.payload.timestamp,
        "priority": signature.priority,
    })
}

/// Reclassify aged-out pending signatures. Returns how many changed.
pub async fn sweep_expired(store: &LocalStore) -> Result<usize> {
    let now = Utc::now();
    let changed = store
        .update_signatures(|sig| {
            if sig.status == SignatureStatus::PendingSync && sig.is_expired_at(now) {
                sig.mark_expired();
                true
            } else {
                false
            }
        })
        .await?;
    if changed > 0 {
        info!(expired = changed, "Reclassified aged-out signatures");
    }
    Ok(changed)
}

/// Pending, non-expired signatures, most urgent first.
pub async fn pending_signatures(store: &LocalStore) -> Result<Vec<OfflineSignature>> {
    let now = Utc::now();
    let mut pending: Vec<OfflineSignature> = store
        .signatures()
        .await?
        .into_iter()
        .filter(|sig| sig.status == SignatureStatus::PendingSync && !sig.is_expired_at(now))
        .collect();
    pending.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
    Ok(pending)
}

/// Count signatures by status and priority.
pub async fn signature_stats(store: &LocalStore) -> Result<SignatureStats> {
    let signatures = store.signatures().await?;
    let mut by_status = HashMap::new();
    let mut by_priority = HashMap::new();
    for sig in &signatures {
        *by_status.entry(sig.status).or_insert(0) += 1;
        *by_priority.entry(sig.priority).or_insert(0) += 1;
    }
    Ok(SignatureStats {
        by_status,
        by_priority,
        total: signatures.len(),
    })
}

/// Captures signatures offline and delivers them when connectivity allows.
///
/// Capture validates before anything is persisted: a signature that fails
/// the geofence, completeness, or expiry checks is rejected outright and
/// leaves no trace in the store, the blob directory, or the queue.
pub struct SignatureService {
    store: Arc<LocalStore>,
    blobs: Arc<BlobStore>,
    queue: Arc<SyncQueue>,
    transport: Arc<dyn Transport>,
    location: Arc<dyn LocationSource>,
    device: DeviceInfo,
    config: SigningConfig,
}

impl SignatureService {
    /// Create a service over the given collaborators.
    pub fn new(
        store: Arc<LocalStore>,
        blobs: Arc<BlobStore>,
        queue: Arc<SyncQueue>,
        transport: Arc<dyn Transport>,
        location: Arc<dyn LocationSource>,
        device: DeviceInfo,
        config: SigningConfig,
    ) -> Self {
        Self {
            store,
            blobs,
            queue,
            transport,
            location,
            device,
            config,
        }
    }

    /// Capture a signature for later delivery.
    ///
    /// Captures a location fix (falling back to the low-confidence
    /// sentinel when the source fails), validates, writes the visual blob,
    /// persists the record, and enqueues one wrapped queue item.
    ///
    /// # Errors
    /// - `ValidationFailed` with an itemized error list; nothing persisted
    pub async fn create_offline_signature(
        &self,
        request: SignatureRequest,
    ) -> Result<OfflineSignature> {
        let fix = match self.location.current().await {
            Ok(fix) => fix,
            Err(err) => {
                warn!("Location capture failed, recording fallback fix: {}", err);
                GeoFix::unknown()
            }
        };

        let method = if request.visual_blob.is_some() {
            SignatureMethod::Visual
        } else {
            SignatureMethod::Acceptance
        };
        let payload = SignaturePayload {
            method,
            visual_blob: None,
            acceptance_text: request.acceptance_text.clone(),
            geolocation: fix,
            device_info: self.device.clone(),
            timestamp: Utc::now(),
        };
        let mut signature = OfflineSignature::new(
            request.document_id.clone(),
            request.user_id.clone(),
            payload,
            request.category,
        );

        self.validate(
            &signature,
            request.requires_visual,
            request.visual_blob.is_some(),
        )?;

        if let Some(image) = &request.visual_blob {
            let name = format!("sig_{}.png", signature.id);
            self.blobs.put(&name, image).await?;
            signature.payload.visual_blob = Some(name);
        }

        self.store.push_signature(&signature).await?;

        let item = QueueItem::new(
            OpType::DocumentCreate,
            signature_endpoint(&signature.document_id),
            HttpMethod::Post,
            upload_body(&signature),
            signature.priority.queue_priority(),
        )
        .with_max_attempts(self.config.max_attempts);
        let item_id = self.queue.enqueue(item).await?;

        signature.queue_item_id = Some(item_id);
        self.store
            .update_signature(signature.id, |sig| sig.queue_item_id = Some(item_id))
            .await?;

        info!(
            id = %signature.id,
            document = %signature.document_id,
            priority = ?signature.priority,
            "Offline signature captured"
        );
        Ok(signature)
    }

    /// Deliver pending signatures directly, most urgent first.
    ///
    /// Each delivered signature's wrapped queue item is removed so the
    /// dispatcher cannot replay it. Failures spend the shared attempt
    /// budget; a signature is marked `failed` once the budget is gone.
    pub async fn sync_pending(&self) -> Result<SignatureSyncReport> {
        let pending = pending_signatures(&self.store).await?;
        if pending.is_empty() {
            return Ok(SignatureSyncReport {
                synced: 0,
                failed: 0,
                errors: Vec::new(),
            });
        }

        info!(count = pending.len(), "Signature delivery pass started");
        let mut synced = 0;
        let mut failed = 0;
        let mut errors = Vec::new();

        for signature in pending {
            // Listed while valid, but a slow pass can outlive the window
            if signature.is_expired_at(Utc::now()) {
                self.store
                    .update_signature(signature.id, |sig| sig.mark_expired())
                    .await?;
                let err = Error::Expired(
                    "validity window passed before delivery; re-signing required".to_string(),
                );
                errors.push((signature.id, err.to_string()));
                failed += 1;
                continue;
            }

            let request = TransportRequest::new(
                HttpMethod::Post,
                signature_endpoint(&signature.document_id),
            )
            .with_body(upload_body(&signature));

            match self.transport.send(request).await {
                Ok(_) => {
                    self.store
                        .update_signature(signature.id, |sig| sig.mark_synced())
                        .await?;
                    if let Some(item_id) = signature.queue_item_id {
                        // The wrapped item must not replay a delivered signature
                        self.queue.remove(item_id).await?;
                    }
                    synced += 1;
                }
                Err(err) => {
                    let max_attempts = self.config.max_attempts;
                    self.store
                        .update_signature(signature.id, |sig| {
                            sig.mark_attempt_failed(max_attempts)
                        })
                        .await?;
                    errors.push((signature.id, err.to_string()));
                    failed += 1;
                }
            }
        }

        info!(synced, failed, "Signature delivery pass finished");
        Ok(SignatureSyncReport {
            synced,
            failed,
            errors,
        })
    }

    /// Reclassify aged-out pending signatures.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        sweep_expired(&self.store).await
    }

    /// Mark signatures delivered through the queue as synced.
    ///
    /// A pending signature whose wrapped queue item no longer exists was
    /// delivered by the dispatcher; queue items vanish only on confirmed
    /// remote success. Run after each completed sync pass.
    pub async fn reconcile_with_queue(&self) -> Result<usize> {
        let queued: HashSet<Uuid> = self
            .queue
            .items()
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect();
        let now = Utc::now();

        let changed = self
            .store
            .update_signatures(|sig| {
                let Some(item_id) = sig.queue_item_id else {
                    return false;
                };
                if sig.status == SignatureStatus::PendingSync
                    && !sig.is_expired_at(now)
                    && !queued.contains(&item_id)
                {
                    sig.mark_synced();
                    true
                } else {
                    false
                }
            })
            .await?;
        if changed > 0 {
            debug!(reconciled = changed, "Signatures delivered via the queue");
        }
        Ok(changed)
    }

    /// Pending, non-expired signatures, most urgent first.
    pub async fn pending(&self) -> Result<Vec<OfflineSignature>> {
        pending_signatures(&self.store).await
    }

    /// Counts by status and priority.
    pub async fn stats(&self) -> Result<SignatureStats> {
        signature_stats(&self.store).await
    }

    fn validate(
        &self,
        signature: &OfflineSignature,
        requires_visual: bool,
        has_visual: bool,
    ) -> Result<()> {
        let mut errors = Vec::new();
        let now = Utc::now();

        if signature.is_expired_at(now) {
            errors.push("Signature validity window has already passed".to_string());
        }

        let fix = &signature.payload.geolocation;
        if fix.is_unknown() {
            if !self.config.allow_unknown_location {
                errors.push(
                    "Location could not be determined and unverified locations are not accepted"
                        .to_string(),
                );
            }
        } else if !self.config.region.contains(fix) {
            errors.push(format!(
                "Location ({:.4}, {:.4}) is outside the authorized region",
                fix.lat, fix.lon
            ));
        }

        if signature.payload.acceptance_text.trim().is_empty() {
            errors.push("Acceptance text is required".to_string());
        }

        let device = &signature.payload.device_info;
        if device.platform.is_empty() || device.app_version.is_empty() {
            errors.push("Device information is incomplete".to_string());
        }

        if requires_visual && !has_visual {
            errors.push("A drawn signature is required for this document".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::ValidationFailed(errors))
        }
    }
}
