use std::collections::BTreeMap;
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{AbortHandle, AbortRegistration, Abortable, BoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use futures_timer::Delay;

use super::controller::{Engine, FormApi};
use super::error::FormResult;
use super::path::FieldPath;
use super::state::{FieldError, FieldState};
use super::value::Value;

pub type BoxError = Box<dyn Error + Send + Sync>;
pub type ValidationFuture<T> = BoxFuture<'static, Result<T, BoxError>>;

/// Outcome of invoking a validator: either known right away or still running.
pub enum Validation<T> {
    Ready(T),
    Pending(ValidationFuture<T>),
}

impl<T> Validation<T> {
    pub fn ready(value: T) -> Self {
        Self::Ready(value)
    }

    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        Self::Pending(future.boxed())
    }
}

type FieldValidatorFn =
    dyn Fn(&Value, &Value, &FieldState) -> Validation<Option<FieldError>> + Send + Sync;

/// Field-level validator over (field value, all values, field state).
///
/// Two registrations share a validator when they hold clones of the same
/// `FieldValidator`; that is what makes double registration idempotent.
#[derive(Clone)]
pub struct FieldValidator(Arc<FieldValidatorFn>);

impl FieldValidator {
    pub fn new(
        validate: impl Fn(&Value, &Value, &FieldState) -> Validation<Option<FieldError>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self(Arc::new(validate))
    }

    pub fn sync(
        validate: impl Fn(&Value, &Value) -> Option<FieldError> + Send + Sync + 'static,
    ) -> Self {
        Self::new(move |value, values, _| Validation::Ready(validate(value, values)))
    }

    /// Validator that always resolves later. The closure receives owned
    /// copies of the field value and of all values.
    pub fn future<F, Fut>(validate: F) -> Self
    where
        F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<FieldError>, BoxError>> + Send + 'static,
    {
        Self::new(move |value, values, _| {
            Validation::pending(validate(value.clone(), values.clone()))
        })
    }

    /// Fails with `message` when the value is null, empty text or an empty
    /// list.
    pub fn required(message: impl Into<FieldError>) -> Self {
        let message = message.into();
        Self::sync(move |value, _| value.is_blank().then(|| message.clone()))
    }

    pub fn same_as(&self, other: &FieldValidator) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn run(&self, value: &Value, values: &Value, state: &FieldState) -> Validation<Option<FieldError>> {
        (self.0)(value, values, state)
    }
}

/// Whole-form validator.
#[derive(Clone)]
pub struct FormValidator(Arc<dyn Fn(&Value) -> Validation<FormErrors> + Send + Sync>);

impl FormValidator {
    pub fn new(validate: impl Fn(&Value) -> Validation<FormErrors> + Send + Sync + 'static) -> Self {
        Self(Arc::new(validate))
    }

    pub fn sync(validate: impl Fn(&Value) -> FormErrors + Send + Sync + 'static) -> Self {
        Self::new(move |values| Validation::Ready(validate(values)))
    }

    pub fn future<F, Fut>(validate: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FormErrors, BoxError>> + Send + 'static,
    {
        Self::new(move |values| Validation::pending(validate(values.clone())))
    }

    fn run(&self, values: &Value) -> Validation<FormErrors> {
        (self.0)(values)
    }
}

/// Synchronous, non-blocking advisory check. Warnings never affect `valid`.
#[derive(Clone)]
pub struct WarningValidator(Arc<dyn Fn(&Value, &Value) -> Option<FieldError> + Send + Sync>);

impl WarningValidator {
    pub fn new(warn: impl Fn(&Value, &Value) -> Option<FieldError> + Send + Sync + 'static) -> Self {
        Self(Arc::new(warn))
    }

    pub fn same_as(&self, other: &WarningValidator) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Errors reported by a whole-form validator or by a submit handler.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FormErrors {
    pub form: Option<FieldError>,
    pub fields: BTreeMap<FieldPath, FieldError>,
}

impl FormErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.form.is_none() && self.fields.is_empty()
    }

    pub fn with_form(mut self, error: impl Into<FieldError>) -> Self {
        self.form = Some(error.into());
        self
    }

    /// Adds an error for `name`. Unparseable names are logged and skipped.
    pub fn field(mut self, name: &str, error: impl Into<FieldError>) -> Self {
        match FieldPath::parse(name) {
            Ok(path) => {
                self.fields.insert(path, error.into());
            }
            Err(err) => log::warn!("dropping error for invalid path `{name}`: {err}"),
        }
        self
    }

    pub fn insert(&mut self, path: FieldPath, error: impl Into<FieldError>) {
        self.fields.insert(path, error.into());
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ValidationResult {
    pub error: Option<FieldError>,
    pub errors: BTreeMap<FieldPath, FieldError>,
    /// Async validations still outstanding when the result was taken.
    pub pending: usize,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.error.is_none() && self.errors.is_empty()
    }
}

#[derive(Default)]
pub(super) struct FieldValidationSlot {
    pub(super) generation: u64,
    pub(super) sync_error: Option<FieldError>,
    pub(super) async_error: Option<FieldError>,
    /// Whether an async result has landed for the current generation.
    pub(super) async_fresh: bool,
    pub(super) pending: usize,
    pub(super) warning: Option<FieldError>,
}

/// Errors from the whole-form validator. While an async run is pending, the
/// errors of the previous run stay published. They are replaced together when
/// the new result lands.
#[derive(Default)]
pub(super) struct FormValidationSlot {
    pub(super) generation: u64,
    pub(super) sync_errors: FormErrors,
    pub(super) async_errors: FormErrors,
    pub(super) pending: usize,
}

impl FormValidationSlot {
    fn form_error(&self) -> Option<&FieldError> {
        self.sync_errors
            .form
            .as_ref()
            .or(self.async_errors.form.as_ref())
    }

    fn field_error(&self, path: &FieldPath) -> Option<&FieldError> {
        self.sync_errors
            .fields
            .get(path)
            .or_else(|| self.async_errors.fields.get(path))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) enum ValidationScope {
    All,
    /// The value at this path changed.
    Changed(FieldPath),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) enum PendingTarget {
    Field(FieldPath),
    Form,
}

enum PendingWork {
    Field(ValidationFuture<Option<FieldError>>),
    Form(ValidationFuture<FormErrors>),
}

/// A dispatched async validation waiting for someone to drive it.
pub(super) struct PendingValidation {
    target: PendingTarget,
    generation: u64,
    debounce: Duration,
    work: PendingWork,
    registration: AbortRegistration,
}

/// Abort side of a queued validation. Aborted as soon as its generation is
/// superseded, so a validator that never resolves cannot hold up a driver.
pub(super) struct InFlight {
    target: PendingTarget,
    generation: u64,
    handle: AbortHandle,
}

enum Resolution {
    Field(Option<FieldError>),
    Form(FormErrors),
    Superseded,
}

struct Resolved {
    target: PendingTarget,
    generation: u64,
    resolution: Resolution,
}

struct PlannedField {
    path: FieldPath,
    generation: u64,
    value: Value,
    state: FieldState,
    validators: Vec<(FieldValidator, Duration)>,
    warnings: Vec<WarningValidator>,
}

struct Plan {
    values: Value,
    form: Option<(FormValidator, u64)>,
    fields: Vec<PlannedField>,
}

struct FieldOutcome {
    path: FieldPath,
    generation: u64,
    sync_error: Option<FieldError>,
    warning: Option<FieldError>,
    pending: Vec<(ValidationFuture<Option<FieldError>>, Duration)>,
}

impl Engine {
    /// Bumps the generation of every slot whose inputs include `path`, so
    /// results dispatched before the change are dropped when they land.
    pub(super) fn invalidate_validation(&mut self, path: &FieldPath) {
        let affected = self
            .fields
            .keys()
            .filter(|field| field.starts_with(path) || path.starts_with(field))
            .cloned()
            .collect::<Vec<_>>();
        for field in affected {
            let generation = self.next_generation();
            if let Some(entry) = self.fields.get_mut(&field) {
                entry.validation.generation = generation;
                entry.validation.pending = 0;
            }
        }
        if self.config.validate.is_some() {
            let generation = self.next_generation();
            self.form_validation.generation = generation;
            self.form_validation.pending = 0;
        }
        self.abort_stale_validations();
    }

    /// Field error as published: the field's own validators first, then the
    /// whole-form validator's error for that path.
    pub(super) fn effective_error(&self, path: &FieldPath) -> Option<FieldError> {
        self.fields
            .get(path)
            .and_then(|entry| {
                entry
                    .validation
                    .sync_error
                    .as_ref()
                    .or(entry.validation.async_error.as_ref())
            })
            .or_else(|| self.form_validation.field_error(path))
            .cloned()
    }

    pub(super) fn form_error(&self) -> Option<FieldError> {
        self.form_validation.form_error().cloned()
    }

    /// Every path with an effective validation error, registered or not.
    pub(super) fn validation_errors(&self) -> BTreeMap<FieldPath, FieldError> {
        let mut errors = BTreeMap::new();
        for path in self.fields.keys() {
            if let Some(error) = self.effective_error(path) {
                errors.insert(path.clone(), error);
            }
        }
        for (path, error) in self
            .form_validation
            .async_errors
            .fields
            .iter()
            .chain(&self.form_validation.sync_errors.fields)
        {
            if !self.fields.contains_key(path) {
                errors.insert(path.clone(), error.clone());
            }
        }
        errors
    }

    pub(super) fn warnings(&self) -> BTreeMap<FieldPath, FieldError> {
        self.fields
            .iter()
            .filter_map(|(path, entry)| {
                entry
                    .validation
                    .warning
                    .clone()
                    .map(|warning| (path.clone(), warning))
            })
            .collect()
    }

    pub(super) fn is_validating(&self) -> bool {
        self.form_validation.pending > 0
            || self.fields.values().any(|entry| entry.validation.pending > 0)
    }

    pub(super) fn validation_result(&self) -> ValidationResult {
        ValidationResult {
            error: self.form_error(),
            errors: self.validation_errors(),
            pending: self.form_validation.pending
                + self
                    .fields
                    .values()
                    .map(|entry| entry.validation.pending)
                    .sum::<usize>(),
        }
    }

    fn scope_paths(&self, scope: &ValidationScope) -> Vec<FieldPath> {
        let ValidationScope::Changed(changed) = scope else {
            return self.fields.keys().cloned().collect();
        };
        let Some(declared) = self
            .fields
            .get(changed)
            .and_then(|entry| entry.validate_fields())
        else {
            return self.fields.keys().cloned().collect();
        };
        self.fields
            .keys()
            .filter(|path| {
                path.starts_with(changed) || changed.starts_with(path) || declared.contains(path)
            })
            .cloned()
            .collect()
    }

    fn plan_validation(&mut self, scope: &ValidationScope) -> Plan {
        let mut fields = Vec::new();
        for path in self.scope_paths(scope) {
            let Some(entry) = self.fields.get(&path) else {
                continue;
            };
            if !entry.has_validation() {
                continue;
            }
            let validators = entry.validators();
            let warnings = entry.warnings();
            let state = self.field_state(&path);
            let generation = self.next_generation();
            if let Some(entry) = self.fields.get_mut(&path) {
                entry.validation.generation = generation;
            }
            fields.push(PlannedField {
                value: state.value.clone(),
                path,
                generation,
                state,
                validators,
                warnings,
            });
        }

        let form = match self.config.validate.clone() {
            Some(validator) => {
                let generation = self.next_generation();
                self.form_validation.generation = generation;
                Some((validator, generation))
            }
            None => None,
        };
        self.abort_stale_validations();

        Plan {
            values: self.values.clone(),
            form,
            fields,
        }
    }

    fn apply_field_outcome(&mut self, outcome: FieldOutcome) {
        let Some(entry) = self.fields.get_mut(&outcome.path) else {
            return;
        };
        let slot = &mut entry.validation;
        if slot.generation != outcome.generation {
            return;
        }
        slot.sync_error = outcome.sync_error;
        slot.warning = outcome.warning;
        slot.pending = outcome.pending.len();
        slot.async_fresh = false;
        if outcome.pending.is_empty() {
            slot.async_error = None;
        }
        for (future, debounce) in outcome.pending {
            self.queue_pending(
                PendingTarget::Field(outcome.path.clone()),
                outcome.generation,
                debounce,
                PendingWork::Field(future),
            );
        }
    }

    fn apply_form_outcome(&mut self, generation: u64, outcome: Validation<FormErrors>) {
        if self.form_validation.generation != generation {
            return;
        }
        match outcome {
            Validation::Ready(errors) => {
                self.form_validation.sync_errors = errors;
                self.form_validation.async_errors = FormErrors::default();
                self.form_validation.pending = 0;
            }
            Validation::Pending(future) => {
                self.form_validation.pending = 1;
                self.queue_pending(
                    PendingTarget::Form,
                    generation,
                    Duration::ZERO,
                    PendingWork::Form(future),
                );
            }
        }
    }

    fn queue_pending(
        &mut self,
        target: PendingTarget,
        generation: u64,
        debounce: Duration,
        work: PendingWork,
    ) {
        let (handle, registration) = AbortHandle::new_pair();
        self.in_flight.push(InFlight {
            target: target.clone(),
            generation,
            handle,
        });
        self.pending.push(PendingValidation {
            target,
            generation,
            debounce,
            work,
            registration,
        });
    }

    /// Aborts every queued or running validation whose generation has been
    /// superseded and drops stale entries from the queue.
    pub(super) fn abort_stale_validations(&mut self) {
        let in_flight = std::mem::take(&mut self.in_flight);
        let (current, stale): (Vec<_>, Vec<_>) = in_flight
            .into_iter()
            .partition(|entry| self.is_current(&entry.target, entry.generation));
        for entry in &stale {
            log::trace!("aborting stale validation for {:?}", entry.target);
            entry.handle.abort();
        }
        self.in_flight = current;
        let pending = std::mem::take(&mut self.pending);
        self.pending = pending
            .into_iter()
            .filter(|pending| self.is_current(&pending.target, pending.generation))
            .collect();
    }

    pub(super) fn abort_all_validations(&mut self) {
        for entry in self.in_flight.drain(..) {
            entry.handle.abort();
        }
        self.pending.clear();
    }

    fn is_current(&self, target: &PendingTarget, generation: u64) -> bool {
        match target {
            PendingTarget::Field(path) => self
                .fields
                .get(path)
                .is_some_and(|entry| entry.validation.generation == generation),
            PendingTarget::Form => self.form_validation.generation == generation,
        }
    }

    /// Applies a landed async result. Returns whether anything changed.
    fn apply_resolution(&mut self, resolved: Resolved) -> bool {
        if !self.is_current(&resolved.target, resolved.generation) {
            log::trace!("discarding stale validation for {:?}", resolved.target);
            return false;
        }
        match (resolved.target, resolved.resolution) {
            (PendingTarget::Field(path), Resolution::Field(error)) => {
                let Some(entry) = self.fields.get_mut(&path) else {
                    return false;
                };
                let slot = &mut entry.validation;
                slot.pending = slot.pending.saturating_sub(1);
                if !slot.async_fresh {
                    slot.async_error = error;
                    slot.async_fresh = true;
                } else if slot.async_error.is_none() {
                    slot.async_error = error;
                }
                true
            }
            (PendingTarget::Form, Resolution::Form(errors)) => {
                self.form_validation.sync_errors = FormErrors::default();
                self.form_validation.async_errors = errors;
                self.form_validation.pending = 0;
                true
            }
            (target, Resolution::Superseded) => {
                log::trace!("validation for {target:?} superseded before it resolved");
                false
            }
            (target, _) => {
                log::warn!("validation result kind does not match {target:?}");
                false
            }
        }
    }
}

impl PendingValidation {
    fn into_future(self, form: FormApi) -> BoxFuture<'static, Resolved> {
        let PendingValidation {
            target,
            generation,
            debounce,
            work,
            registration,
        } = self;
        let aborted_target = target.clone();
        let validation = async move {
            if !debounce.is_zero() {
                Delay::new(debounce).await;
                let current = form
                    .lock("checking debounced validation")
                    .map(|engine| engine.is_current(&target, generation))
                    .unwrap_or(false);
                if !current {
                    return Resolved {
                        target,
                        generation,
                        resolution: Resolution::Superseded,
                    };
                }
            }
            let resolution = match work {
                PendingWork::Field(future) => Resolution::Field(future.await.unwrap_or_else(|err| {
                    log::warn!("async validator for {target:?} failed: {err}");
                    None
                })),
                PendingWork::Form(future) => Resolution::Form(future.await.unwrap_or_else(|err| {
                    log::warn!("async form validator failed: {err}");
                    FormErrors::default()
                })),
            };
            Resolved {
                target,
                generation,
                resolution,
            }
        };
        Abortable::new(validation, registration)
            .map(move |result| {
                result.unwrap_or_else(|_| Resolved {
                    target: aborted_target,
                    generation,
                    resolution: Resolution::Superseded,
                })
            })
            .boxed()
    }
}

impl FormApi {
    /// Runs the validators covered by `scope`. Synchronous results are applied
    /// right away; async ones are queued for [`FormApi::wait_for_validation`].
    pub(super) fn run_validation(&self, scope: ValidationScope) -> FormResult<()> {
        let plan = {
            let mut engine = self.lock("planning validation")?;
            engine.ensure_live()?;
            if engine.validation_paused {
                engine.validation_blocked = true;
                return Ok(());
            }
            engine.plan_validation(&scope)
        };
        log::trace!(
            "validating {} field(s){}",
            plan.fields.len(),
            if plan.form.is_some() { " and form" } else { "" }
        );

        let form_outcome = plan
            .form
            .map(|(validator, generation)| (generation, validator.run(&plan.values)));
        let field_outcomes = plan
            .fields
            .into_iter()
            .map(|field| {
                let mut sync_error = None;
                let mut pending = Vec::new();
                for (validator, debounce) in &field.validators {
                    match validator.run(&field.value, &plan.values, &field.state) {
                        Validation::Ready(error) => {
                            if sync_error.is_none() {
                                sync_error = error;
                            }
                        }
                        Validation::Pending(future) => pending.push((future, *debounce)),
                    }
                }
                let warning = field
                    .warnings
                    .iter()
                    .find_map(|warn| (warn.0)(&field.value, &plan.values));
                FieldOutcome {
                    path: field.path,
                    generation: field.generation,
                    sync_error,
                    warning,
                    pending,
                }
            })
            .collect::<Vec<_>>();

        let mut engine = self.lock("applying validation")?;
        for outcome in field_outcomes {
            engine.apply_field_outcome(outcome);
        }
        if let Some((generation, outcome)) = form_outcome {
            engine.apply_form_outcome(generation, outcome);
        }
        Ok(())
    }

    /// Runs every validator synchronously, publishes the result and returns
    /// it. Async validators are dispatched but not awaited.
    pub fn validate(&self) -> FormResult<ValidationResult> {
        self.run_validation(ValidationScope::All)?;
        self.notify()?;
        Ok(self.lock("reading validation result")?.validation_result())
    }

    /// Like [`FormApi::validate`], then drives every outstanding async
    /// validation to completion.
    pub async fn validate_async(&self) -> FormResult<ValidationResult> {
        self.run_validation(ValidationScope::All)?;
        self.notify()?;
        self.wait_for_validation().await?;
        Ok(self.lock("reading async validation result")?.validation_result())
    }

    /// Drives queued async validations, including ones queued while waiting,
    /// until none are left. Each landed result is applied and published on
    /// its own.
    pub async fn wait_for_validation(&self) -> FormResult<()> {
        let mut in_flight = FuturesUnordered::new();
        loop {
            let queued = {
                let mut engine = self.lock("collecting pending validations")?;
                engine.abort_stale_validations();
                std::mem::take(&mut engine.pending)
            };
            for pending in queued {
                in_flight.push(pending.into_future(self.clone()));
            }
            let Some(resolved) = in_flight.next().await else {
                break;
            };
            let changed = {
                let mut engine = self.lock("applying async validation")?;
                engine.ensure_live()?;
                engine.apply_resolution(resolved)
            };
            if changed {
                self.notify()?;
            }
        }
        Ok(())
    }

    /// Boxed form of [`FormApi::wait_for_validation`] for handing to an
    /// executor.
    pub fn drive(&self) -> BoxFuture<'static, FormResult<()>> {
        let form = self.clone();
        async move { form.wait_for_validation().await }.boxed()
    }

    /// Suspends validation. Requests made while paused collapse into one run
    /// when [`FormApi::resume_validation`] is called.
    pub fn pause_validation(&self) -> FormResult<()> {
        let mut engine = self.lock("pausing validation")?;
        engine.ensure_live()?;
        engine.validation_paused = true;
        Ok(())
    }

    pub fn resume_validation(&self) -> FormResult<()> {
        let blocked = {
            let mut engine = self.lock("resuming validation")?;
            engine.ensure_live()?;
            engine.validation_paused = false;
            std::mem::take(&mut engine.validation_blocked)
        };
        if blocked {
            self.run_validation(ValidationScope::All)?;
            self.notify()?;
        }
        Ok(())
    }

    pub fn is_validation_paused(&self) -> FormResult<bool> {
        Ok(self.lock("reading validation pause")?.validation_paused)
    }
}
