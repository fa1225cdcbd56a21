use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use super::config::IsEqual;
use super::path::FieldPath;
use super::submit::SubmitState;
use super::subscription::{KeyedSnapshot, StateKey, Subscription};
use super::value::Value;

/// A validation or submission message attached to a field or to the form.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldError(String);

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for FieldError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum FormStateKey {
    Active,
    Dirty,
    DirtyFields,
    DirtySinceLastSubmit,
    Error,
    Errors,
    HasSubmitErrors,
    HasValidationErrors,
    InitialValues,
    Invalid,
    LastSubmittedValues,
    Modified,
    ModifiedSinceLastSubmit,
    Pristine,
    SubmitCount,
    SubmitError,
    SubmitErrors,
    SubmitFailed,
    SubmitPhase,
    SubmitSucceeded,
    Submitting,
    Touched,
    Valid,
    Validating,
    Values,
    Visited,
    Warnings,
}

impl StateKey for FormStateKey {
    const ALL: &'static [Self] = &[
        FormStateKey::Active,
        FormStateKey::Dirty,
        FormStateKey::DirtyFields,
        FormStateKey::DirtySinceLastSubmit,
        FormStateKey::Error,
        FormStateKey::Errors,
        FormStateKey::HasSubmitErrors,
        FormStateKey::HasValidationErrors,
        FormStateKey::InitialValues,
        FormStateKey::Invalid,
        FormStateKey::LastSubmittedValues,
        FormStateKey::Modified,
        FormStateKey::ModifiedSinceLastSubmit,
        FormStateKey::Pristine,
        FormStateKey::SubmitCount,
        FormStateKey::SubmitError,
        FormStateKey::SubmitErrors,
        FormStateKey::SubmitFailed,
        FormStateKey::SubmitPhase,
        FormStateKey::SubmitSucceeded,
        FormStateKey::Submitting,
        FormStateKey::Touched,
        FormStateKey::Valid,
        FormStateKey::Validating,
        FormStateKey::Values,
        FormStateKey::Visited,
        FormStateKey::Warnings,
    ];
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum FieldStateKey {
    Active,
    Dirty,
    DirtySinceLastSubmit,
    Error,
    Initial,
    Invalid,
    Length,
    Modified,
    ModifiedSinceLastSubmit,
    Pristine,
    SubmitError,
    SubmitFailed,
    SubmitSucceeded,
    Submitting,
    Touched,
    Valid,
    Validating,
    Value,
    Visited,
    Warning,
}

impl StateKey for FieldStateKey {
    const ALL: &'static [Self] = &[
        FieldStateKey::Active,
        FieldStateKey::Dirty,
        FieldStateKey::DirtySinceLastSubmit,
        FieldStateKey::Error,
        FieldStateKey::Initial,
        FieldStateKey::Invalid,
        FieldStateKey::Length,
        FieldStateKey::Modified,
        FieldStateKey::ModifiedSinceLastSubmit,
        FieldStateKey::Pristine,
        FieldStateKey::SubmitError,
        FieldStateKey::SubmitFailed,
        FieldStateKey::SubmitSucceeded,
        FieldStateKey::Submitting,
        FieldStateKey::Touched,
        FieldStateKey::Valid,
        FieldStateKey::Validating,
        FieldStateKey::Value,
        FieldStateKey::Visited,
        FieldStateKey::Warning,
    ];
}

pub type FormSubscription = Subscription<FormStateKey>;
pub type FieldSubscription = Subscription<FieldStateKey>;

/// Immutable snapshot of the whole form handed to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct FormState {
    pub active: Option<FieldPath>,
    pub dirty: bool,
    pub dirty_fields: BTreeSet<FieldPath>,
    pub dirty_since_last_submit: bool,
    pub error: Option<FieldError>,
    pub errors: BTreeMap<FieldPath, FieldError>,
    pub has_submit_errors: bool,
    pub has_validation_errors: bool,
    pub initial_values: Value,
    pub invalid: bool,
    pub last_submitted_values: Option<Value>,
    pub modified: BTreeSet<FieldPath>,
    pub modified_since_last_submit: BTreeSet<FieldPath>,
    pub pristine: bool,
    pub submit_count: u32,
    pub submit_error: Option<FieldError>,
    pub submit_errors: BTreeMap<FieldPath, FieldError>,
    pub submit_failed: bool,
    pub submit_phase: SubmitState,
    pub submit_succeeded: bool,
    pub submitting: bool,
    pub touched: BTreeSet<FieldPath>,
    pub valid: bool,
    pub validating: bool,
    pub values: Value,
    pub visited: BTreeSet<FieldPath>,
    pub warnings: BTreeMap<FieldPath, FieldError>,
}

impl FormState {
    pub fn value(&self, path: &FieldPath) -> Option<&Value> {
        self.values.get_in(path)
    }

    pub fn error_for(&self, path: &FieldPath) -> Option<&FieldError> {
        self.errors.get(path)
    }
}

impl KeyedSnapshot for FormState {
    type Key = FormStateKey;

    fn key_changed(&self, next: &Self, key: FormStateKey, _is_equal: Option<&IsEqual>) -> bool {
        match key {
            FormStateKey::Active => self.active != next.active,
            FormStateKey::Dirty => self.dirty != next.dirty,
            FormStateKey::DirtyFields => self.dirty_fields != next.dirty_fields,
            FormStateKey::DirtySinceLastSubmit => {
                self.dirty_since_last_submit != next.dirty_since_last_submit
            }
            FormStateKey::Error => self.error != next.error,
            FormStateKey::Errors => self.errors != next.errors,
            FormStateKey::HasSubmitErrors => self.has_submit_errors != next.has_submit_errors,
            FormStateKey::HasValidationErrors => {
                self.has_validation_errors != next.has_validation_errors
            }
            FormStateKey::InitialValues => self.initial_values != next.initial_values,
            FormStateKey::Invalid => self.invalid != next.invalid,
            FormStateKey::LastSubmittedValues => {
                self.last_submitted_values != next.last_submitted_values
            }
            FormStateKey::Modified => self.modified != next.modified,
            FormStateKey::ModifiedSinceLastSubmit => {
                self.modified_since_last_submit != next.modified_since_last_submit
            }
            FormStateKey::Pristine => self.pristine != next.pristine,
            FormStateKey::SubmitCount => self.submit_count != next.submit_count,
            FormStateKey::SubmitError => self.submit_error != next.submit_error,
            FormStateKey::SubmitErrors => self.submit_errors != next.submit_errors,
            FormStateKey::SubmitFailed => self.submit_failed != next.submit_failed,
            FormStateKey::SubmitPhase => self.submit_phase != next.submit_phase,
            FormStateKey::SubmitSucceeded => self.submit_succeeded != next.submit_succeeded,
            FormStateKey::Submitting => self.submitting != next.submitting,
            FormStateKey::Touched => self.touched != next.touched,
            FormStateKey::Valid => self.valid != next.valid,
            FormStateKey::Validating => self.validating != next.validating,
            FormStateKey::Values => self.values != next.values,
            FormStateKey::Visited => self.visited != next.visited,
            FormStateKey::Warnings => self.warnings != next.warnings,
        }
    }
}

/// Immutable snapshot of one field handed to its registrations.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldState {
    pub name: FieldPath,
    pub active: bool,
    pub dirty: bool,
    pub dirty_since_last_submit: bool,
    pub error: Option<FieldError>,
    pub initial: Value,
    pub invalid: bool,
    pub length: Option<usize>,
    pub modified: bool,
    pub modified_since_last_submit: bool,
    pub pristine: bool,
    pub submit_error: Option<FieldError>,
    pub submit_failed: bool,
    pub submit_succeeded: bool,
    pub submitting: bool,
    pub touched: bool,
    pub valid: bool,
    pub validating: bool,
    pub value: Value,
    pub visited: bool,
    pub warning: Option<FieldError>,
}

impl KeyedSnapshot for FieldState {
    type Key = FieldStateKey;

    fn key_changed(&self, next: &Self, key: FieldStateKey, is_equal: Option<&IsEqual>) -> bool {
        let values_differ = |left: &Value, right: &Value| match is_equal {
            Some(is_equal) => !is_equal.equal(left, right),
            None => left != right,
        };
        match key {
            FieldStateKey::Active => self.active != next.active,
            FieldStateKey::Dirty => self.dirty != next.dirty,
            FieldStateKey::DirtySinceLastSubmit => {
                self.dirty_since_last_submit != next.dirty_since_last_submit
            }
            FieldStateKey::Error => self.error != next.error,
            FieldStateKey::Initial => values_differ(&self.initial, &next.initial),
            FieldStateKey::Invalid => self.invalid != next.invalid,
            FieldStateKey::Length => self.length != next.length,
            FieldStateKey::Modified => self.modified != next.modified,
            FieldStateKey::ModifiedSinceLastSubmit => {
                self.modified_since_last_submit != next.modified_since_last_submit
            }
            FieldStateKey::Pristine => self.pristine != next.pristine,
            FieldStateKey::SubmitError => self.submit_error != next.submit_error,
            FieldStateKey::SubmitFailed => self.submit_failed != next.submit_failed,
            FieldStateKey::SubmitSucceeded => self.submit_succeeded != next.submit_succeeded,
            FieldStateKey::Submitting => self.submitting != next.submitting,
            FieldStateKey::Touched => self.touched != next.touched,
            FieldStateKey::Valid => self.valid != next.valid,
            FieldStateKey::Validating => self.validating != next.validating,
            FieldStateKey::Value => values_differ(&self.value, &next.value),
            FieldStateKey::Visited => self.visited != next.visited,
            FieldStateKey::Warning => self.warning != next.warning,
        }
    }
}
