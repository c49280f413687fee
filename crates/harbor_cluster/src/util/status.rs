use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

use crate::api::v1beta1::harborcluster::ConditionStatus;

/// Sets the condition of `new_condition.type_` in conditions and returns
/// whether anything changed.
///
/// 1. If a condition of that type exists and its status, reason and message are
///    all unchanged, nothing happens.
/// 2. Otherwise the three fields are overwritten and LastTransitionTime is set to now.
/// 3. If no condition of that type exists, new_condition is appended with
///    LastTransitionTime set to now.
pub fn set_status_condition(conditions: &mut Vec<Condition>, mut new_condition: Condition) -> bool {
    match find_status_condition_mut(conditions, &new_condition.type_) {
        Some(existing) => {
            if existing.status == new_condition.status
                && existing.reason == new_condition.reason
                && existing.message == new_condition.message
            {
                return false;
            }
            existing.status = new_condition.status;
            existing.reason = new_condition.reason;
            existing.message = new_condition.message;
            existing.observed_generation = new_condition.observed_generation;
            existing.last_transition_time = Time(Utc::now());
        }
        None => {
            new_condition.last_transition_time = Time(Utc::now());
            conditions.push(new_condition);
        }
    }
    true
}

/// Finds the condition_type in conditions.
pub fn find_status_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|condition| condition.type_ == condition_type)
}

/// Finds the condition_type in conditions and returns a mutable reference.
pub fn find_status_condition_mut<'a>(
    conditions: &'a mut [Condition],
    condition_type: &str,
) -> Option<&'a mut Condition> {
    conditions
        .iter_mut()
        .find(|condition| condition.type_ == condition_type)
}

/// Returns true when the condition_type is present and set to `True`
pub fn is_status_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    is_status_condition_present_and_equal(conditions, condition_type, ConditionStatus::True)
}

/// Returns true when condition_type is present and equal to status.
fn is_status_condition_present_and_equal(
    conditions: &[Condition],
    condition_type: &str,
    status: ConditionStatus,
) -> bool {
    conditions
        .iter()
        .any(|condition| condition.type_ == condition_type && condition.status == status.as_str())
}
