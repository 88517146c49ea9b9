use k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    chrono::Utc,
};

pub const CONDITION_ACCEPTED: &str = "Accepted";
pub const CONDITION_PROGRAMMED: &str = "Programmed";

pub const REASON_ACCEPTED: &str = "Accepted";
pub const REASON_PROGRAMMED: &str = "Programmed";
pub const REASON_INVALID_TLS: &str = "InvalidTLS";
pub const REASON_INVALID_GATEWAY: &str = "InvalidGateway";
pub const REASON_CREATED: &str = "Created";
pub const REASON_SYNC_FAILED: &str = "SyncFailed";
pub const REASON_SYNC_TLS_FAILED: &str = "SyncTLSFailed";
pub const REASON_NO_LONGER_MANAGED: &str = "NoLongerManaged";

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";

pub fn new_condition(type_: &str, status: bool, reason: &str, message: &str, observed_generation: Option<i64>) -> Condition {
    Condition {
        last_transition_time: Time(Utc::now()),
        message: message.to_owned(),
        observed_generation,
        reason: reason.to_owned(),
        status: if status { STATUS_TRUE } else { STATUS_FALSE }.to_owned(),
        type_: type_.to_owned(),
    }
}

/// Replaces the condition of the same type. The transition time only moves when the status flips.
/// Returns `true` when anything other than the timestamp changed.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time.clone();
            }
            let changed = existing.status != condition.status
                || existing.reason != condition.reason
                || existing.message != condition.message
                || existing.observed_generation != condition.observed_generation;
            *existing = condition;
            changed
        },
        None => {
            conditions.push(condition);
            true
        },
    }
}
