use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::config::{AfterSubmit, BeforeSubmit, FieldConfig, IsEqual};
use super::controller::{Engine, FormApi};
use super::error::{ConfigError, FormResult};
use super::path::FieldPath;
use super::state::{FieldState, FieldSubscription};
use super::subscription::{SubscriberId, SubscriberTable};
use super::validation::{
    FieldValidationSlot, FieldValidator, ValidationScope, WarningValidator,
};
use super::value::Value;

pub(super) struct RegistrationConfig {
    pub(super) validator: Option<FieldValidator>,
    pub(super) warn: Option<WarningValidator>,
    pub(super) validate_fields: Option<Vec<FieldPath>>,
    pub(super) is_equal: Option<IsEqual>,
    pub(super) debounce: Duration,
    pub(super) before_submit: Option<BeforeSubmit>,
    pub(super) after_submit: Option<AfterSubmit>,
}

/// Everything the engine knows about one path with at least one registration.
#[derive(Default)]
pub(super) struct FieldEntry {
    pub(super) touched: bool,
    pub(super) visited: bool,
    pub(super) modified: bool,
    pub(super) modified_since_last_submit: bool,
    pub(super) listeners: SubscriberTable<FieldState>,
    pub(super) registrations: BTreeMap<SubscriberId, RegistrationConfig>,
    pub(super) validation: FieldValidationSlot,
}

impl FieldEntry {
    /// The first registration that supplied an equality wins.
    pub(super) fn is_equal(&self) -> Option<IsEqual> {
        self.registrations
            .values()
            .find_map(|registration| registration.is_equal.clone())
    }

    pub(super) fn values_equal(&self, left: &Value, right: &Value) -> bool {
        match self.is_equal() {
            Some(is_equal) => is_equal.equal(left, right),
            None => left == right,
        }
    }

    /// Distinct validators across registrations, in registration order.
    pub(super) fn validators(&self) -> Vec<(FieldValidator, Duration)> {
        let mut validators: Vec<(FieldValidator, Duration)> = Vec::new();
        for registration in self.registrations.values() {
            let Some(validator) = &registration.validator else {
                continue;
            };
            if validators
                .iter()
                .any(|(known, _)| known.same_as(validator))
            {
                continue;
            }
            validators.push((validator.clone(), registration.debounce));
        }
        validators
    }

    pub(super) fn warnings(&self) -> Vec<WarningValidator> {
        let mut warnings: Vec<WarningValidator> = Vec::new();
        for warn in self.registrations.values().filter_map(|r| r.warn.as_ref()) {
            if !warnings.iter().any(|known| known.same_as(warn)) {
                warnings.push(warn.clone());
            }
        }
        warnings
    }

    /// Union of the `validate_fields` lists; `None` when no registration
    /// restricts revalidation.
    pub(super) fn validate_fields(&self) -> Option<Vec<FieldPath>> {
        let mut restricted = false;
        let mut fields = Vec::new();
        for list in self
            .registrations
            .values()
            .filter_map(|r| r.validate_fields.as_ref())
        {
            restricted = true;
            for path in list {
                if !fields.contains(path) {
                    fields.push(path.clone());
                }
            }
        }
        restricted.then_some(fields)
    }

    pub(super) fn has_validation(&self) -> bool {
        self.registrations
            .values()
            .any(|r| r.validator.is_some() || r.warn.is_some())
    }
}

/// Handle returned by [`FormApi::register_field`].
pub struct FieldRegistration {
    id: SubscriberId,
    path: FieldPath,
    config_error: Option<ConfigError>,
    form: FormApi,
}

impl FieldRegistration {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Path the field was registered under. Array mutations may move the
    /// registration afterwards.
    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    /// Non-fatal problem detected while registering, such as a second,
    /// different validator on a path that already had one.
    pub fn config_error(&self) -> Option<&ConfigError> {
        self.config_error.as_ref()
    }

    /// Removes this registration. A registration already dropped by an array
    /// mutation is a no-op.
    pub fn unregister(self) -> FormResult<()> {
        self.form.unregister_field(self.id)
    }
}

impl FormApi {
    pub fn register_field<F>(
        &self,
        name: &str,
        listener: F,
        subscription: FieldSubscription,
        config: FieldConfig,
    ) -> FormResult<FieldRegistration>
    where
        F: Fn(&FieldState) + Send + Sync + 'static,
    {
        let path = FieldPath::parse(name)?;
        let validate_fields = config
            .validate_fields
            .as_ref()
            .map(|names| {
                names
                    .iter()
                    .map(|name| FieldPath::parse(name))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;
        let validates = config.validate.is_some() || config.warn.is_some();

        let (id, config_error) = {
            let mut engine = self.lock("registering field")?;
            engine.ensure_live()?;
            let id = engine.allocate_subscriber();
            let config_error = engine.register(
                id,
                &path,
                Arc::new(listener),
                subscription,
                config,
                validate_fields,
            )?;
            (id, config_error)
        };

        match &config_error {
            Some(error) => log::warn!("{error}; both validators will run"),
            None => log::debug!("registered field `{path}` as {id:?}"),
        }

        if validates {
            self.run_validation(ValidationScope::All)?;
        }
        self.notify()?;

        Ok(FieldRegistration {
            id,
            path,
            config_error,
            form: self.clone(),
        })
    }

    pub(super) fn unregister_field(&self, id: SubscriberId) -> FormResult<()> {
        let had_validation = {
            let mut engine = self.lock("unregistering field")?;
            engine.ensure_live()?;
            match engine.unregister(id) {
                Some(had_validation) => had_validation,
                None => return Ok(()),
            }
        };
        log::debug!("unregistered {id:?}");
        if had_validation {
            self.run_validation(ValidationScope::All)?;
        }
        self.notify()
    }
}

impl Engine {
    fn register(
        &mut self,
        id: SubscriberId,
        path: &FieldPath,
        listener: Arc<dyn Fn(&FieldState) + Send + Sync>,
        subscription: FieldSubscription,
        config: FieldConfig,
        validate_fields: Option<Vec<FieldPath>>,
    ) -> FormResult<Option<ConfigError>> {
        if config.initial_value.is_some() || config.default_value.is_some() {
            self.values.check_writable(path)?;
        }
        if config.initial_value.is_some() {
            self.initial_values.check_writable(path)?;
        }
        if let Some(initial) = &config.initial_value {
            if self.initial_values.get_in(path) != Some(initial) {
                let pristine =
                    self.values.get_or_null(path) == self.initial_values.get_or_null(path);
                self.initial_values.set_in(path, initial.clone())?;
                if pristine {
                    self.values.set_in(path, initial.clone())?;
                }
            }
        }
        if let Some(default) = &config.default_value {
            if self.values.get_in(path).is_none_or(Value::is_null) {
                self.values.set_in(path, default.clone())?;
            }
        }

        let entry = self.fields.entry(path.clone()).or_default();
        let config_error = match &config.validate {
            Some(validator)
                if validate_fields.is_none()
                    && entry.registrations.values().any(|registration| {
                        registration
                            .validator
                            .as_ref()
                            .is_some_and(|known| !known.same_as(validator))
                    }) =>
            {
                Some(ConfigError::ConflictingValidator { path: path.clone() })
            }
            _ => None,
        };

        let is_equal = config.is_equal.clone().or_else(|| entry.is_equal());
        entry.listeners.insert(id, subscription, listener, is_equal);
        entry.registrations.insert(
            id,
            RegistrationConfig {
                validator: config.validate,
                warn: config.warn,
                validate_fields,
                is_equal: config.is_equal,
                debounce: config.async_debounce,
                before_submit: config.before_submit,
                after_submit: config.after_submit,
            },
        );
        self.registrations.insert(id, path.clone());
        Ok(config_error)
    }

    /// Returns whether the removed registration contributed validation, or
    /// `None` when the id is unknown.
    fn unregister(&mut self, id: SubscriberId) -> Option<bool> {
        let path = self.registrations.remove(&id)?;
        let entry = self.fields.get_mut(&path)?;
        entry.listeners.remove(id);
        let removed = entry.registrations.remove(&id);
        let had_validation = removed.is_some_and(|r| r.validator.is_some() || r.warn.is_some());
        if entry.registrations.is_empty() {
            self.fields.remove(&path);
            if self.active.as_ref() == Some(&path) {
                self.active = None;
            }
            if self.config.destroy_on_unregister {
                self.values.remove_in(&path);
            }
            self.abort_stale_validations();
        }
        Some(had_validation)
    }

    /// Writes a value and invalidates in-flight validation for every field it
    /// affects. `mark_modified` is false for engine-internal writes.
    pub(super) fn write_value(
        &mut self,
        path: &FieldPath,
        value: Value,
        mark_modified: bool,
    ) -> FormResult<()> {
        let previous = self.values.get_or_null(path);
        let unchanged = match self.fields.get(path) {
            Some(entry) => entry.values_equal(&previous, &value),
            None => previous == value,
        };
        self.values.set_in(path, value)?;
        if mark_modified {
            if let Some(entry) = self.fields.get_mut(path) {
                entry.modified = true;
                entry.modified_since_last_submit = true;
            }
            self.submit.clear_errors_under(path);
        }
        if !unchanged {
            self.invalidate_validation(path);
        }
        Ok(())
    }

    pub(super) fn field_is_dirty(&self, path: &FieldPath) -> bool {
        let value = self.values.get_or_null(path);
        let initial = self.initial_values.get_or_null(path);
        match self.fields.get(path) {
            Some(entry) => !entry.values_equal(&value, &initial),
            None => value != initial,
        }
    }

    pub(super) fn field_state(&self, path: &FieldPath) -> FieldState {
        let value = self.values.get_or_null(path);
        let initial = self.initial_values.get_or_null(path);
        let entry = self.fields.get(path);
        let equal = |left: &Value, right: &Value| match entry {
            Some(entry) => entry.values_equal(left, right),
            None => left == right,
        };
        let dirty = !equal(&value, &initial);
        let dirty_since_last_submit = self
            .last_submitted_values
            .as_ref()
            .is_some_and(|submitted| !equal(&value, &submitted.get_or_null(path)));
        let error = self.effective_error(path);
        let submit_error = self.submit.errors.get(path).cloned();
        let valid = error.is_none() && submit_error.is_none();
        let length = value.as_list().map(<[Value]>::len);

        FieldState {
            name: path.clone(),
            active: self.active.as_ref() == Some(path),
            dirty,
            dirty_since_last_submit,
            error,
            initial,
            invalid: !valid,
            length,
            modified: entry.is_some_and(|e| e.modified),
            modified_since_last_submit: entry.is_some_and(|e| e.modified_since_last_submit),
            pristine: !dirty,
            submit_error,
            submit_failed: self.submit.failed,
            submit_succeeded: self.submit.succeeded,
            submitting: self.submit.is_submitting(),
            touched: entry.is_some_and(|e| e.touched),
            valid,
            validating: entry.is_some_and(|e| e.validation.pending > 0),
            value,
            visited: entry.is_some_and(|e| e.visited),
            warning: entry.and_then(|e| e.validation.warning.clone()),
        }
    }

    pub(super) fn mark_all_touched(&mut self) {
        for entry in self.fields.values_mut() {
            entry.touched = true;
        }
    }

    pub(super) fn reset_modified_since_last_submit(&mut self) {
        for entry in self.fields.values_mut() {
            entry.modified_since_last_submit = false;
        }
    }

    pub(super) fn before_submit_hooks(&self) -> Vec<BeforeSubmit> {
        self.fields
            .values()
            .flat_map(|entry| entry.registrations.values())
            .filter_map(|registration| registration.before_submit.clone())
            .collect()
    }

    pub(super) fn after_submit_hooks(&self) -> Vec<AfterSubmit> {
        self.fields
            .values()
            .flat_map(|entry| entry.registrations.values())
            .filter_map(|registration| registration.after_submit.clone())
            .collect()
    }
}
