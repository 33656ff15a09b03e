//! Resident import request handlers

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::services::cancellation::{CancelError, CancelOutcome, CancellationRegistry, CANCELLATION};
use crate::services::import_processor::ImportProcessor;
use crate::services::job_history::JOB_HISTORY;
use crate::types::{
    ErrorResponse, ImportJobCancelRequest, ImportJobCancelResponse, ImportJobRequest, JobHistoryRequest, Request,
    SuccessResponse,
};

/// Upper bound on history entries per request
const MAX_HISTORY_LIMIT: usize = 100;

async fn reply_json<T: Serialize>(client: &Client, reply: async_nats::Subject, body: &T) -> Result<()> {
    let _ = client.publish(reply, serde_json::to_vec(body)?.into()).await;
    Ok(())
}

/// Parse a request envelope and require a user id.
/// On failure the matching error response is returned instead.
fn authorized_request<T>(payload: &[u8]) -> std::result::Result<(Request<T>, Uuid), ErrorResponse>
where
    T: serde::de::DeserializeOwned,
{
    let request: Request<T> = serde_json::from_slice(payload)
        .map_err(|e| ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string()))?;
    match request.user_id {
        Some(user_id) => Ok((request, user_id)),
        None => Err(ErrorResponse::new(request.id, "UNAUTHORIZED", "user_id required")),
    }
}

/// Cancel a queued or running job on behalf of `user_id`
pub fn cancel_job(
    registry: &CancellationRegistry,
    job_id: Uuid,
    user_id: Uuid,
) -> std::result::Result<ImportJobCancelResponse, CancelError> {
    let (cancelled, message) = match registry.cancel(&job_id, user_id)? {
        CancelOutcome::Running => (true, "Import sedang dihentikan"),
        CancelOutcome::Queued => (true, "Import dibatalkan sebelum diproses"),
        CancelOutcome::NotFound => (false, "Job tidak ditemukan atau sudah selesai"),
    };
    Ok(ImportJobCancelResponse {
        job_id,
        cancelled,
        message: message.to_string(),
    })
}

/// Handle desa.import.submit requests
pub async fn handle_import_submit(
    client: Client,
    mut subscriber: Subscriber,
    processor: Arc<ImportProcessor>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let (request, user_id) = match authorized_request::<ImportJobRequest>(&msg.payload) {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!("Rejected import submit request: {}", error.error.message);
                reply_json(&client, reply, &error).await?;
                continue;
            }
        };

        match processor.submit_job(user_id, request.payload).await {
            Ok(response) => {
                let success = SuccessResponse::new(request.id, response);
                reply_json(&client, reply, &success).await?;
            }
            Err(e) => {
                error!("Failed to submit import job: {:#}", e);
                let error = ErrorResponse::new(request.id, "SUBMIT_ERROR", format!("{:#}", e));
                reply_json(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}

/// Handle desa.import.cancel requests
pub async fn handle_import_cancel(client: Client, mut subscriber: Subscriber) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let (request, user_id) = match authorized_request::<ImportJobCancelRequest>(&msg.payload) {
            Ok(parsed) => parsed,
            Err(error) => {
                reply_json(&client, reply, &error).await?;
                continue;
            }
        };

        let job_id = request.payload.job_id;
        info!("User {} requested cancellation of import job {}", user_id, job_id);

        match cancel_job(&CANCELLATION, job_id, user_id) {
            Ok(response) => {
                let success = SuccessResponse::new(request.id, response);
                reply_json(&client, reply, &success).await?;
            }
            Err(CancelError::NotOwner) => {
                warn!("User {} may not cancel import job {}", user_id, job_id);
                let error = ErrorResponse::new(request.id, "FORBIDDEN", "Job milik pengguna lain");
                reply_json(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}

/// Handle desa.import.history requests
pub async fn handle_import_history(client: Client, mut subscriber: Subscriber) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let (request, user_id) = match authorized_request::<JobHistoryRequest>(&msg.payload) {
            Ok(parsed) => parsed,
            Err(error) => {
                reply_json(&client, reply, &error).await?;
                continue;
            }
        };

        let limit = request.payload.limit.min(MAX_HISTORY_LIMIT);
        let history = JOB_HISTORY.get_recent_for_user(user_id, limit);
        let success = SuccessResponse::new(request.id, history);
        reply_json(&client, reply, &success).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImportFileSource;

    #[test]
    fn test_submit_request_parses() {
        let user_id = Uuid::new_v4();
        let request = Request::new(
            user_id,
            ImportJobRequest {
                filename: "penduduk.xlsx".into(),
                source: ImportFileSource::Path { path: "penduduk.xlsx".into() },
            },
        );
        let payload = serde_json::to_vec(&request).unwrap();

        let (parsed, parsed_user) = authorized_request::<ImportJobRequest>(&payload).unwrap();
        assert_eq!(parsed_user, user_id);
        assert_eq!(parsed.payload.filename, "penduduk.xlsx");
    }

    #[test]
    fn test_missing_user_id_is_unauthorized() {
        let json = format!(
            r#"{{"id":"{}","timestamp":"2025-01-01T00:00:00Z","payload":{{"jobId":"{}"}}}}"#,
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let error = authorized_request::<ImportJobCancelRequest>(json.as_bytes()).unwrap_err();
        assert_eq!(error.error.code, "UNAUTHORIZED");
    }

    #[test]
    fn test_garbage_is_invalid_request() {
        let error = authorized_request::<JobHistoryRequest>(b"not json").unwrap_err();
        assert_eq!(error.error.code, "INVALID_REQUEST");
        assert_eq!(error.id, Uuid::nil());
    }

    #[test]
    fn test_cancel_running_job() {
        let registry = CancellationRegistry::default();
        let job_id = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let guard = registry.register(job_id, owner);

        let response = cancel_job(&registry, job_id, owner).unwrap();

        assert!(response.cancelled);
        assert_eq!(response.message, "Import sedang dihentikan");
        assert!(guard.token().is_cancelled());
    }

    #[test]
    fn test_cancel_queued_job_is_remembered() {
        let registry = CancellationRegistry::default();
        let job_id = Uuid::new_v4();
        let owner = Uuid::new_v4();
        registry.enqueue(job_id, owner);

        let response = cancel_job(&registry, job_id, owner).unwrap();
        assert!(response.cancelled);
        assert_eq!(response.message, "Import dibatalkan sebelum diproses");

        let guard = registry.register(job_id, owner);
        assert!(guard.token().is_cancelled());
    }

    #[test]
    fn test_cancel_finished_job_is_not_found() {
        let registry = CancellationRegistry::default();
        let job_id = Uuid::new_v4();
        let owner = Uuid::new_v4();
        registry.enqueue(job_id, owner);
        drop(registry.register(job_id, owner));

        let response = cancel_job(&registry, job_id, owner).unwrap();

        assert!(!response.cancelled);
        assert_eq!(response.message, "Job tidak ditemukan atau sudah selesai");
        assert!(!registry.contains(&job_id));
    }

    #[test]
    fn test_cancel_unknown_job_is_not_found() {
        let registry = CancellationRegistry::default();
        let job_id = Uuid::new_v4();

        let response = cancel_job(&registry, job_id, Uuid::new_v4()).unwrap();

        assert!(!response.cancelled);
        assert!(!registry.contains(&job_id));
    }

    #[test]
    fn test_cancel_foreign_job_is_forbidden() {
        let registry = CancellationRegistry::default();
        let job_id = Uuid::new_v4();
        let _guard = registry.register(job_id, Uuid::new_v4());

        assert_eq!(
            cancel_job(&registry, job_id, Uuid::new_v4()).unwrap_err(),
            CancelError::NotOwner
        );
    }
}
