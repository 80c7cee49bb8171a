//! Fire-and-forget audit log sink (spec SUPPLEMENT, grounded in
//! `admin-module/app/middleware/audit_middleware.py`): the request path
//! never waits on, or fails because of, an audit write.

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// Who performed the audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    AdminUser,
    ServiceAccount,
    Anonymous,
}

impl ActorType {
    fn as_str(self) -> &'static str {
        match self {
            ActorType::AdminUser => "ADMIN_USER",
            ActorType::ServiceAccount => "SERVICE_ACCOUNT",
            ActorType::Anonymous => "ANONYMOUS",
        }
    }
}

/// Whether the audited action succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "SUCCESS",
            Outcome::Failure => "FAILURE",
        }
    }
}

/// One audit entry to record.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub outcome: Outcome,
    pub detail: Value,
}

/// Record `event` on a detached task with its own short-lived connection
/// acquisition from `pool`. Never propagates a failure to the caller;
/// write errors are logged at `warn`.
pub fn record(pool: PgPool, event: AuditEvent) {
    tokio::spawn(async move {
        let result = sqlx::query(
            "INSERT INTO audit_log (id, actor_type, actor_id, action, resource_type, resource_id,
                                     ip_address, user_agent, outcome, detail)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(Uuid::new_v4())
        .bind(event.actor_type.as_str())
        .bind(&event.actor_id)
        .bind(&event.action)
        .bind(&event.resource_type)
        .bind(&event.resource_id)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(event.outcome.as_str())
        .bind(&event.detail)
        .execute(&pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, action = %event.action, "audit log write failed");
        }
    });
}
