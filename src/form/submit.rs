use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::controller::FormApi;
use super::error::{FormError, FormResult};
use super::path::FieldPath;
use super::state::FieldError;
use super::validation::{FormErrors, ValidationResult};
use super::value::Value;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SubmitState {
    #[default]
    Idle,
    Validating,
    Submitting,
    Succeeded,
    Failed,
}

impl SubmitState {
    pub fn can_transition_to(self, next: SubmitState) -> bool {
        self == next
            || matches!(
                (self, next),
                (SubmitState::Idle, SubmitState::Validating)
                    | (SubmitState::Validating, SubmitState::Submitting)
                    | (SubmitState::Validating, SubmitState::Failed)
                    | (SubmitState::Submitting, SubmitState::Succeeded)
                    | (SubmitState::Submitting, SubmitState::Failed)
                    | (SubmitState::Succeeded, SubmitState::Validating)
                    | (SubmitState::Failed, SubmitState::Validating)
                    | (_, SubmitState::Idle)
            )
    }
}

/// Submit bookkeeping owned by the engine.
#[derive(Clone, Debug, Default)]
pub(super) struct SubmitStatus {
    pub(super) phase: SubmitState,
    pub(super) count: u32,
    pub(super) failed: bool,
    pub(super) succeeded: bool,
    pub(super) error: Option<FieldError>,
    pub(super) errors: BTreeMap<FieldPath, FieldError>,
}

impl SubmitStatus {
    pub(super) fn transition(&mut self, next: SubmitState) -> FormResult<()> {
        if !self.phase.can_transition_to(next) {
            return Err(FormError::InvalidStateTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    pub(super) fn is_submitting(&self) -> bool {
        self.phase == SubmitState::Submitting
    }

    pub(super) fn is_busy(&self) -> bool {
        matches!(self.phase, SubmitState::Validating | SubmitState::Submitting)
    }

    pub(super) fn reset(&mut self) {
        *self = Self::default();
    }

    pub(super) fn clear_errors(&mut self) {
        self.error = None;
        self.errors.clear();
    }

    /// Drops submit errors at `path` and below; a changed value makes them
    /// stale.
    pub(super) fn clear_errors_under(&mut self, path: &FieldPath) {
        self.errors.retain(|field, _| !field.starts_with(path));
    }
}

/// `Err` carries field-level and whole-form submission errors.
pub type SubmitResult = Result<(), FormErrors>;

type SubmitFn = dyn Fn(Value, FormApi) -> BoxFuture<'static, SubmitResult> + Send + Sync;

/// Caller-supplied submit function. Receives the values being submitted and
/// a handle to the form.
#[derive(Clone)]
pub struct SubmitHandler(Arc<SubmitFn>);

impl SubmitHandler {
    pub fn new<F, Fut>(submit: F) -> Self
    where
        F: Fn(Value, FormApi) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SubmitResult> + Send + 'static,
    {
        Self(Arc::new(move |values, form| submit(values, form).boxed()))
    }

    pub fn sync(submit: impl Fn(&Value) -> SubmitResult + Send + Sync + 'static) -> Self {
        Self(Arc::new(move |values, _| {
            let result = submit(&values);
            async move { result }.boxed()
        }))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SubmitOutcome {
    /// Another submit is validating or submitting; nothing was done.
    AlreadySubmitting,
    /// A field's `before_submit` hook vetoed the submit.
    Cancelled,
    /// Validation failed; the submit function was not called.
    Invalid(ValidationResult),
    Succeeded,
    Failed(FormErrors),
}

impl FormApi {
    /// Validates everything (async validators included) and, when valid,
    /// hands the values to `on_submit`.
    pub async fn submit(&self) -> FormResult<SubmitOutcome> {
        {
            let mut engine = self.lock("preparing submit")?;
            engine.ensure_live()?;
            if engine.submit.is_busy() {
                log::debug!("submit ignored while {:?}", engine.submit.phase);
                return Ok(SubmitOutcome::AlreadySubmitting);
            }
            engine.submit.transition(SubmitState::Validating)?;
        }
        log::debug!("submit: validating");
        self.notify()?;

        let validation = self.validate_async().await?;
        if !validation.is_valid() {
            {
                let mut engine = self.lock("handling submit validation failure")?;
                engine.ensure_live()?;
                engine.mark_all_touched();
                engine.reset_modified_since_last_submit();
                engine.submit.count = engine.submit.count.saturating_add(1);
                engine.submit.failed = true;
                engine.submit.succeeded = false;
                engine.submit.transition(SubmitState::Failed)?;
            }
            log::debug!("submit: blocked by {} field error(s)", validation.errors.len());
            self.notify()?;
            return Ok(SubmitOutcome::Invalid(validation));
        }

        let hooks = self.lock("reading before-submit hooks")?.before_submit_hooks();
        if hooks.iter().any(|hook| !hook()) {
            self.lock("cancelling submit")?.submit.transition(SubmitState::Idle)?;
            log::debug!("submit: cancelled by before-submit hook");
            self.notify()?;
            return Ok(SubmitOutcome::Cancelled);
        }

        let (handler, values) = {
            let mut engine = self.lock("moving submit to submitting")?;
            engine.ensure_live()?;
            engine.submit.transition(SubmitState::Submitting)?;
            engine.submit.clear_errors();
            engine.submit.failed = false;
            engine.submit.succeeded = false;
            (engine.config.on_submit.clone(), engine.values.clone())
        };
        log::debug!("submit: submitting");
        self.notify()?;

        let result = match handler {
            Some(handler) => (handler.0)(values.clone(), self.clone()).await,
            None => {
                log::warn!("submit called without an on_submit handler");
                Ok(())
            }
        };

        let after_submit = {
            let mut engine = self.lock("settling submit")?;
            engine.ensure_live()?;
            engine.submit.count = engine.submit.count.saturating_add(1);
            engine.last_submitted_values = Some(values);
            engine.reset_modified_since_last_submit();
            match &result {
                Ok(()) => {
                    engine.submit.succeeded = true;
                    engine.submit.transition(SubmitState::Succeeded)?;
                    engine.after_submit_hooks()
                }
                Err(errors) => {
                    engine.submit.failed = true;
                    engine.submit.error = errors.form.clone();
                    engine.submit.errors = errors.fields.clone();
                    engine.submit.transition(SubmitState::Failed)?;
                    Vec::new()
                }
            }
        };
        for hook in &after_submit {
            hook();
        }
        log::debug!("submit: settled ({})", if result.is_ok() { "ok" } else { "failed" });
        self.notify()?;

        Ok(match result {
            Ok(()) => SubmitOutcome::Succeeded,
            Err(errors) => SubmitOutcome::Failed(errors),
        })
    }
}
