//! Condition evaluation against the execution context.
//!
//! A condition list is combined by a *sequential left fold*: the
//! `logical_operator` declared on condition `i` joins the accumulated result
//! with condition `i`'s own outcome. There is no precedence grammar —
//! `[a, OR b, AND c]` evaluates as `(a || b) && c`. The first condition's
//! operator is never consulted.

use serde_json::Value;

use crate::model::{ConditionOperator, Context, LogicalOperator, WorkflowCondition};

/// Evaluate a condition list against the context. An empty list is true.
pub fn evaluate_conditions(conditions: &[WorkflowCondition], context: &Context) -> bool {
    let mut iter = conditions.iter();
    let Some(first) = iter.next() else {
        return true;
    };

    let mut acc = evaluate_condition(first, context);
    for condition in iter {
        let outcome = evaluate_condition(condition, context);
        acc = match condition.logical_operator {
            LogicalOperator::And => acc && outcome,
            LogicalOperator::Or => acc || outcome,
        };
    }
    acc
}

/// Evaluate one condition. A field that fails to resolve satisfies only
/// `Ne` (it is not equal to anything) and fails every other operator.
pub fn evaluate_condition(condition: &WorkflowCondition, context: &Context) -> bool {
    let resolved = resolve_path(context, &condition.field);

    match condition.operator {
        ConditionOperator::Eq => resolved == Some(&condition.value),
        ConditionOperator::Ne => resolved != Some(&condition.value),
        ConditionOperator::Gt => compare_numeric(resolved, &condition.value, |a, b| a > b),
        ConditionOperator::Gte => compare_numeric(resolved, &condition.value, |a, b| a >= b),
        ConditionOperator::Lt => compare_numeric(resolved, &condition.value, |a, b| a < b),
        ConditionOperator::Lte => compare_numeric(resolved, &condition.value, |a, b| a <= b),
        ConditionOperator::In => match (&condition.value, resolved) {
            (Value::Array(haystack), Some(needle)) => haystack.contains(needle),
            _ => false,
        },
        ConditionOperator::Contains => match resolved {
            Some(Value::String(s)) => condition
                .value
                .as_str()
                .is_some_and(|needle| s.contains(needle)),
            Some(Value::Array(items)) => items.contains(&condition.value),
            _ => false,
        },
        ConditionOperator::Exists => resolved.is_some_and(|v| !v.is_null()),
    }
}

fn compare_numeric(resolved: Option<&Value>, expected: &Value, cmp: fn(f64, f64) -> bool) -> bool {
    match (resolved.and_then(Value::as_f64), expected.as_f64()) {
        (Some(actual), Some(expected)) => cmp(actual, expected),
        _ => false,
    }
}

/// Resolve a dot-path into the context. Path segments index into objects by
/// key and into arrays by numeric position.
pub fn resolve_path<'a>(context: &'a Context, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;

    for segment in segments {
        match current {
            Value::Object(map) => current = map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                current = items.get(index)?;
            }
            _ => return None,
        }
    }

    Some(current)
}
