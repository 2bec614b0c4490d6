//! Field-level task matching for `find` and `exists`.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::domain::Task;
use crate::error::{Result, StewardError};

/// A searchable task field.
///
/// Values compare in their JSON form: ids and timestamps as strings,
/// timeouts as seconds, the schedule as its kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskField {
    Id,
    ClassName,
    MethodName,
    Args,
    Kwargs,
    State,
    ScheduledTime,
    StartTime,
    FinishTime,
    Result,
    Exception,
    Traceback,
    Progress,
    Timeout,
    Scheduler,
}

impl TaskField {
    pub const ALL: [TaskField; 15] = [
        TaskField::Id,
        TaskField::ClassName,
        TaskField::MethodName,
        TaskField::Args,
        TaskField::Kwargs,
        TaskField::State,
        TaskField::ScheduledTime,
        TaskField::StartTime,
        TaskField::FinishTime,
        TaskField::Result,
        TaskField::Exception,
        TaskField::Traceback,
        TaskField::Progress,
        TaskField::Timeout,
        TaskField::Scheduler,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TaskField::Id => "id",
            TaskField::ClassName => "class_name",
            TaskField::MethodName => "method_name",
            TaskField::Args => "args",
            TaskField::Kwargs => "kwargs",
            TaskField::State => "state",
            TaskField::ScheduledTime => "scheduled_time",
            TaskField::StartTime => "start_time",
            TaskField::FinishTime => "finish_time",
            TaskField::Result => "result",
            TaskField::Exception => "exception",
            TaskField::Traceback => "traceback",
            TaskField::Progress => "progress",
            TaskField::Timeout => "timeout",
            TaskField::Scheduler => "scheduler",
        }
    }

    pub fn value_of(self, task: &Task) -> Value {
        fn opt<T: serde::Serialize>(v: Option<T>) -> Value {
            v.and_then(|v| serde_json::to_value(v).ok())
                .unwrap_or(Value::Null)
        }

        match self {
            TaskField::Id => Value::String(task.id().to_string()),
            TaskField::ClassName => opt(task.class_name()),
            TaskField::MethodName => Value::String(task.method_name().to_string()),
            TaskField::Args => Value::Array(task.arguments().to_vec()),
            TaskField::Kwargs => opt(Some(task.keyword_arguments())),
            TaskField::State => Value::String(task.state().as_str().to_string()),
            TaskField::ScheduledTime => opt(Some(task.scheduled_time())),
            TaskField::StartTime => opt(task.start_time()),
            TaskField::FinishTime => opt(task.finish_time()),
            TaskField::Result => task.result().cloned().unwrap_or(Value::Null),
            TaskField::Exception => opt(task.exception()),
            TaskField::Traceback => opt(task.traceback()),
            TaskField::Progress => task.progress().unwrap_or(Value::Null),
            TaskField::Timeout => opt(task.timeout_duration().map(|d| d.as_secs_f64())),
            TaskField::Scheduler => Value::String(task.schedule_policy().kind().to_string()),
        }
    }
}

impl FromStr for TaskField {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self> {
        TaskField::ALL
            .into_iter()
            .find(|f| f.name() == s)
            .ok_or_else(|| StewardError::UnknownField(s.to_string()))
    }
}

impl fmt::Display for TaskField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Conjunction of `field == value` terms. Empty criteria match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    terms: Vec<(String, Value)>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.push((field.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Resolve field names. Fails on the first unknown one.
    pub(crate) fn resolve(&self) -> Result<Vec<(TaskField, &Value)>> {
        self.terms
            .iter()
            .map(|(name, value)| Ok((name.parse::<TaskField>()?, value)))
            .collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Criteria {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            terms: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

pub(crate) fn matches(task: &Task, terms: &[(TaskField, &Value)]) -> bool {
    terms.iter().all(|(field, value)| field.value_of(task) == **value)
}

/// Parse a list of field names, rejecting unknown ones.
pub(crate) fn parse_fields(names: &[&str]) -> Result<Vec<TaskField>> {
    names.iter().map(|name| name.parse()).collect()
}

/// Do `a` and `b` agree on every field in `fields`?
pub(crate) fn agree_on(a: &Task, b: &Task, fields: &[TaskField]) -> bool {
    fields.iter().all(|f| f.value_of(a) == f.value_of(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CallableRef;
    use crate::runtime::callable;
    use rstest::rstest;
    use serde_json::json;

    fn install_task() -> Task {
        Task::new(callable(CallableRef::method("Dispatcher", "install"), |_c, _a, _k| async {
            Ok(Value::Null)
        }))
        .args([json!([{ "type_id": "rpm" }])])
    }

    #[rstest]
    #[case("method_name", json!("install"), true)]
    #[case("class_name", json!("Dispatcher"), true)]
    #[case("state", json!("waiting"), true)]
    #[case("scheduler", json!("immediate"), true)]
    #[case("state", json!("running"), false)]
    #[case("result", Value::Null, true)]
    fn single_term(#[case] field: &str, #[case] value: Value, #[case] expected: bool) {
        let task = install_task();
        let criteria = Criteria::new().with(field, value);
        let terms = criteria.resolve().unwrap();
        assert_eq!(matches(&task, &terms), expected);
    }

    #[test]
    fn every_field_name_roundtrips() {
        for field in TaskField::ALL {
            assert_eq!(field.name().parse::<TaskField>().unwrap(), field);
        }
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = Criteria::new().with("colour", "blue").resolve().unwrap_err();
        assert!(matches!(err, StewardError::UnknownField(f) if f == "colour"));
        assert!(parse_fields(&["method_name", "nope"]).is_err());
    }

    #[test]
    fn agree_on_compares_selected_fields_only() {
        let a = install_task();
        let b = install_task();
        let fields = parse_fields(&["method_name", "args"]).unwrap();
        assert!(agree_on(&a, &b, &fields));
        assert!(!agree_on(&a, &b, &[TaskField::Id]));
    }

    #[test]
    fn criteria_from_pairs() {
        let criteria: Criteria = [("method_name", json!("install")), ("state", json!("waiting"))]
            .into_iter()
            .collect();
        assert_eq!(criteria.resolve().unwrap().len(), 2);
        assert!(matches(&install_task(), &criteria.resolve().unwrap()));
    }
}
