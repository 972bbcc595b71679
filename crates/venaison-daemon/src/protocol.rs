//! Line-delimited JSON protocol.
//!
//! One request per line, one response per line. The principal arrives
//! pre-authenticated in the envelope: authentication itself is the
//! identity provider's job, outside this boundary. Every error response
//! carries a coarse [`ErrorCode`] so clients branch on recovery strategy
//! (fix the named field, refetch on conflict, discard on not-found)
//! without parsing messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use venaison_core::dispatch::DispatchPlan;
use venaison_core::identity::{OwnerRef, Principal, Role};
use venaison_core::keys::EntityKey;
use venaison_core::ledger::Decision;
use venaison_core::merge::FieldPatch;

use crate::service::{
    CustodyService, ErrorCode, Findings, NewCarcass, NewFiche, ServiceError,
};
use crate::store::Page;

/// A request wrapped with its authenticated principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    /// The authenticated actor.
    pub principal: Principal,
    /// The operation to perform.
    pub request: Request,
}

/// Protocol requests, one per service operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Create a fiche.
    CreateFiche {
        /// Creation data.
        new: NewFiche,
    },
    /// Add a carcass to a fiche.
    AddCarcass {
        /// Creation data.
        new: NewCarcass,
    },
    /// Soft-delete a carcass.
    DeleteCarcass {
        /// The fiche.
        fiche_numero: String,
        /// The carcass.
        bracelet: String,
    },
    /// Record examiner findings on a carcass.
    RecordExamination {
        /// The fiche.
        fiche_numero: String,
        /// The carcass.
        bracelet: String,
        /// The findings.
        findings: Findings,
    },
    /// Approve market release.
    ApproveMarketRelease {
        /// The fiche.
        fiche_numero: String,
    },
    /// Propose a next custodian.
    ProposeTransfer {
        /// The fiche.
        fiche_numero: String,
        /// The proposed custodian.
        next: OwnerRef,
    },
    /// Confirm custody of the fiche or of a dispatch group.
    TakeCharge {
        /// The fiche.
        fiche_numero: String,
        /// Row version the caller fetched.
        expected_version: u64,
    },
    /// Reject a pending transfer.
    RejectTransfer {
        /// The fiche.
        fiche_numero: String,
    },
    /// Re-propose to a different custodian.
    ReproposeTransfer {
        /// The fiche.
        fiche_numero: String,
        /// The new proposed custodian.
        next: OwnerRef,
    },
    /// Submit a dispatch plan.
    SubmitDispatch {
        /// The fiche.
        fiche_numero: String,
        /// The plan.
        plan: DispatchPlan,
        /// Row version the caller fetched.
        expected_version: u64,
    },
    /// Record an inspection decision.
    RecordDecision {
        /// The fiche.
        fiche_numero: String,
        /// The carcass.
        bracelet: String,
        /// The deciding episode.
        episode_id: String,
        /// The decision.
        decision: Decision,
        /// Optional comment.
        comment: Option<String>,
    },
    /// Close out an episode's inspection work.
    FinishCheck {
        /// The episode.
        episode_id: String,
    },
    /// Record a veterinary seizure.
    SeizeCarcass {
        /// The fiche.
        fiche_numero: String,
        /// The carcass.
        bracelet: String,
        /// Seizure reasons from the catalog.
        reasons: Vec<String>,
        /// Optional comment.
        comment: Option<String>,
    },
    /// Veterinary sign-off.
    CloseFiche {
        /// The fiche.
        fiche_numero: String,
        /// Row version the caller fetched.
        expected_version: u64,
    },
    /// Apply an offline field patch.
    MergeSubmit {
        /// Role under which the patch was built.
        acting_role: Role,
        /// Target entity.
        key: EntityKey,
        /// The field patch.
        patch: FieldPatch,
    },
    /// Fetch one entity.
    Fetch {
        /// Target entity.
        key: EntityKey,
    },
    /// List an episode's visible carcasses.
    VisibleCarcasses {
        /// The episode.
        episode_id: String,
    },
    /// Resolve every carcass status of a fiche.
    CarcassStatuses {
        /// The fiche.
        fiche_numero: String,
    },
    /// Registry listing of carcasses for a handling authority.
    RegistryCarcasses {
        /// The authority entity.
        entity_id: String,
        /// Only rows modified at or after this instant.
        modified_since: Option<DateTime<Utc>>,
        /// Include soft-deleted rows.
        include_deleted: bool,
        /// Maximum rows.
        limit: u32,
        /// Rows to skip.
        offset: u32,
    },
}

/// Protocol responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// The operation succeeded.
    Ok {
        /// Operation result, entity-shaped JSON.
        result: Value,
    },
    /// The operation failed.
    Error {
        /// Recovery class.
        code: ErrorCode,
        /// Human-readable message naming the exact precondition.
        message: String,
    },
}

impl Response {
    fn error(err: &ServiceError) -> Self {
        Self::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl From<Result<Value, ServiceError>> for Response {
    fn from(result: Result<Value, ServiceError>) -> Self {
        match result {
            Ok(result) => Self::Ok { result },
            Err(err) => Self::error(&err),
        }
    }
}

/// Dispatches one envelope to the service.
#[must_use]
pub fn handle(service: &CustodyService, envelope: Envelope) -> Response {
    let principal = &envelope.principal;
    let result: Result<Value, ServiceError> = match envelope.request {
        Request::CreateFiche { new } => service
            .create_fiche(principal, new)
            .map(|f| serde_json::to_value(f).unwrap_or(Value::Null)),
        Request::AddCarcass { new } => service
            .add_carcass(principal, new)
            .map(|c| serde_json::to_value(c).unwrap_or(Value::Null)),
        Request::DeleteCarcass {
            fiche_numero,
            bracelet,
        } => service
            .delete_carcass(principal, &fiche_numero, &bracelet)
            .map(|c| serde_json::to_value(c).unwrap_or(Value::Null)),
        Request::RecordExamination {
            fiche_numero,
            bracelet,
            findings,
        } => service
            .record_examination(principal, &fiche_numero, &bracelet, findings)
            .map(|c| serde_json::to_value(c).unwrap_or(Value::Null)),
        Request::ApproveMarketRelease { fiche_numero } => service
            .approve_market_release(principal, &fiche_numero)
            .map(|f| serde_json::to_value(f).unwrap_or(Value::Null)),
        Request::ProposeTransfer { fiche_numero, next } => service
            .propose_transfer(principal, &fiche_numero, next)
            .map(|f| serde_json::to_value(f).unwrap_or(Value::Null)),
        Request::TakeCharge {
            fiche_numero,
            expected_version,
        } => service
            .take_charge(principal, &fiche_numero, expected_version)
            .map(|o| serde_json::to_value(o).unwrap_or(Value::Null)),
        Request::RejectTransfer { fiche_numero } => service
            .reject_transfer(principal, &fiche_numero)
            .map(|f| serde_json::to_value(f).unwrap_or(Value::Null)),
        Request::ReproposeTransfer { fiche_numero, next } => service
            .repropose_transfer(principal, &fiche_numero, next)
            .map(|f| serde_json::to_value(f).unwrap_or(Value::Null)),
        Request::SubmitDispatch {
            fiche_numero,
            plan,
            expected_version,
        } => service
            .submit_dispatch(principal, &fiche_numero, plan, expected_version)
            .map(|f| serde_json::to_value(f).unwrap_or(Value::Null)),
        Request::RecordDecision {
            fiche_numero,
            bracelet,
            episode_id,
            decision,
            comment,
        } => service
            .record_decision(
                principal,
                &fiche_numero,
                &bracelet,
                &episode_id,
                decision,
                comment,
            )
            .map(|r| serde_json::to_value(r).unwrap_or(Value::Null)),
        Request::FinishCheck { episode_id } => service
            .finish_check(principal, &episode_id)
            .map(|e| serde_json::to_value(e).unwrap_or(Value::Null)),
        Request::SeizeCarcass {
            fiche_numero,
            bracelet,
            reasons,
            comment,
        } => service
            .seize_carcass(principal, &fiche_numero, &bracelet, reasons, comment)
            .map(|c| serde_json::to_value(c).unwrap_or(Value::Null)),
        Request::CloseFiche {
            fiche_numero,
            expected_version,
        } => service
            .close_fiche(principal, &fiche_numero, expected_version)
            .map(|f| serde_json::to_value(f).unwrap_or(Value::Null)),
        Request::MergeSubmit {
            acting_role,
            key,
            patch,
        } => service.merge_submit(principal, acting_role, &key, patch),
        Request::Fetch { key } => service
            .fetch(&key)
            .map(|v| v.unwrap_or(Value::Null)),
        Request::VisibleCarcasses { episode_id } => service
            .visible_carcasses(principal, &episode_id)
            .map(|c| serde_json::to_value(c).unwrap_or(Value::Null)),
        Request::CarcassStatuses { fiche_numero } => service
            .carcass_statuses(&fiche_numero)
            .map(|s| serde_json::to_value(s).unwrap_or(Value::Null)),
        Request::RegistryCarcasses {
            entity_id,
            modified_since,
            include_deleted,
            limit,
            offset,
        } => service
            .registry_carcasses(
                &entity_id,
                modified_since,
                include_deleted,
                Page { limit, offset },
            )
            .map(|c| serde_json::to_value(c).unwrap_or(Value::Null)),
    };
    if let Err(err) = &result {
        warn!(code = ?err.code(), error = %err, "request rejected");
    }
    Response::from(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serde_round_trip() {
        let request = Request::TakeCharge {
            fiche_numero: "F-1".to_string(),
            expected_version: 3,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"op\":\"take_charge\""));
        let back: Request = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Request::TakeCharge { expected_version: 3, .. }));
    }

    #[test]
    fn unknown_op_is_rejected() {
        let raw = r#"{"op":"drop_all_fiches"}"#;
        assert!(serde_json::from_str::<Request>(raw).is_err());
    }

    #[test]
    fn decision_request_nests_the_reason() {
        let raw = r#"{
            "op": "record_decision",
            "fiche_numero": "F-1",
            "bracelet": "B-1",
            "episode_id": "ep-1",
            "decision": {"decision": "REFUSED", "reason": "Présence de souillures"},
            "comment": null
        }"#;
        let request: Request = serde_json::from_str(raw).unwrap();
        let Request::RecordDecision { decision, .. } = request else {
            panic!("wrong variant");
        };
        assert!(decision.is_refused());
    }

    #[test]
    fn response_error_carries_code() {
        let response = Response::Error {
            code: ErrorCode::Conflict,
            message: "fiche F-1 changed concurrently".to_string(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["code"], "CONFLICT");
    }
}
