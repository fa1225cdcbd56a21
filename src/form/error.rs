use thiserror::Error;

use super::path::FieldPath;
use super::submit::SubmitState;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum PathError {
    #[error("field path is empty")]
    Empty,
    #[error("empty segment at offset {offset} in field path `{path}`")]
    EmptySegment { path: String, offset: usize },
    #[error("unclosed `[` at offset {offset} in field path `{path}`")]
    UnclosedBracket { path: String, offset: usize },
    #[error("unexpected `]` at offset {offset} in field path `{path}`")]
    UnexpectedBracket { path: String, offset: usize },
    #[error("invalid index `{index}` in field path `{path}`")]
    InvalidIndex { path: String, index: String },
}

/// Problems with a registration that do not stop it from taking effect.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ConfigError {
    #[error("field `{path}` already has a different validator registered")]
    ConflictingValidator { path: FieldPath },
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ValueError {
    #[error("expected {expected} at `{path}`, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("missing value at `{path}`")]
    Missing { path: String },
    #[error("number at `{path}` is out of range for {target}")]
    OutOfRange { path: String, target: &'static str },
    #[error("index {index} is too far past the end of `{path}` (length {len})")]
    IndexTooFar {
        path: String,
        index: usize,
        len: usize,
    },
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FormError {
    #[error("form has been destroyed")]
    Destroyed,
    #[error("form state lock poisoned while {0}")]
    StatePoisoned(&'static str),
    #[error(transparent)]
    InvalidPath(#[from] PathError),
    #[error("no field value at `{0}`")]
    UnknownField(FieldPath),
    #[error("`{0}` is not a list")]
    NotAList(FieldPath),
    #[error("index {index} is out of bounds for `{path}` (length {len})")]
    IndexOutOfBounds {
        path: FieldPath,
        index: usize,
        len: usize,
    },
    #[error("no mutator named `{0}`")]
    UnknownMutator(String),
    #[error("invalid submit state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: SubmitState, to: SubmitState },
    #[error("cannot reset while a submit is in progress")]
    ResetWhileSubmitting,
    #[error(transparent)]
    ValueConversion(#[from] ValueError),
}

pub type FormResult<T> = Result<T, FormError>;
