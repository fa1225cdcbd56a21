use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use super::mutators::Mutator;
use super::path::FieldPath;
use super::state::{FieldState, FormState};
use super::submit::SubmitHandler;
use super::validation::{FieldValidator, FormValidator, WarningValidator};
use super::value::{FormModel, Value};

/// Value equality override for one field.
///
/// The closure runs while the form's state lock is held, so it must not call
/// back into [`FormApi`](super::FormApi). Doing so deadlocks.
#[derive(Clone)]
pub struct IsEqual(Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>);

impl IsEqual {
    pub fn new(is_equal: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(is_equal))
    }

    pub fn equal(&self, left: &Value, right: &Value) -> bool {
        (self.0)(left, right)
    }
}

impl Debug for IsEqual {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("IsEqual(..)")
    }
}

pub type BeforeSubmit = Arc<dyn Fn() -> bool + Send + Sync>;
pub type AfterSubmit = Arc<dyn Fn() + Send + Sync>;
pub type DebugHook = Arc<dyn Fn(&FormState, &BTreeMap<FieldPath, FieldState>) + Send + Sync>;

/// Options recognised when a form is created.
///
/// - `initial_values`: starting values, also the baseline for `dirty`.
/// - `on_submit`: invoked by [`FormApi::submit`](super::FormApi::submit) with
///   the current values once validation passes.
/// - `validate`: whole-form validator, re-run on every value change.
/// - `validate_on_blur`: validate on blur and submit only, not per change.
/// - `mutators`: named state transforms callable through `mutate`.
/// - `debug`: called with every snapshot after each notification pass.
/// - `destroy_on_unregister`: drop a field's value when its last
///   registration goes away.
/// - `keep_dirty_on_reinitialize`: `initialize` leaves dirty fields alone.
#[derive(Clone, Default)]
pub struct FormConfig {
    pub initial_values: Value,
    pub on_submit: Option<SubmitHandler>,
    pub validate: Option<FormValidator>,
    pub validate_on_blur: bool,
    pub mutators: BTreeMap<String, Mutator>,
    pub debug: Option<DebugHook>,
    pub destroy_on_unregister: bool,
    pub keep_dirty_on_reinitialize: bool,
}

impl FormConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_values(mut self, values: Value) -> Self {
        self.initial_values = values;
        self
    }

    pub fn initial_model<T: FormModel>(mut self, model: &T) -> Self {
        self.initial_values = model.to_values();
        self
    }

    pub fn on_submit(mut self, handler: SubmitHandler) -> Self {
        self.on_submit = Some(handler);
        self
    }

    pub fn validate(mut self, validator: FormValidator) -> Self {
        self.validate = Some(validator);
        self
    }

    pub fn validate_on_blur(mut self, enabled: bool) -> Self {
        self.validate_on_blur = enabled;
        self
    }

    pub fn mutator(mut self, name: impl Into<String>, mutator: Mutator) -> Self {
        self.mutators.insert(name.into(), mutator);
        self
    }

    pub fn debug(
        mut self,
        hook: impl Fn(&FormState, &BTreeMap<FieldPath, FieldState>) + Send + Sync + 'static,
    ) -> Self {
        self.debug = Some(Arc::new(hook));
        self
    }

    pub fn destroy_on_unregister(mut self, enabled: bool) -> Self {
        self.destroy_on_unregister = enabled;
        self
    }

    pub fn keep_dirty_on_reinitialize(mut self, enabled: bool) -> Self {
        self.keep_dirty_on_reinitialize = enabled;
        self
    }
}

/// Per-registration options.
#[derive(Clone, Default)]
pub struct FieldConfig {
    pub validate: Option<FieldValidator>,
    /// Fields whose validators re-run when this one changes. `None` means all.
    pub validate_fields: Option<Vec<String>>,
    pub warn: Option<WarningValidator>,
    pub is_equal: Option<IsEqual>,
    pub initial_value: Option<Value>,
    pub default_value: Option<Value>,
    pub async_debounce: Duration,
    pub before_submit: Option<BeforeSubmit>,
    pub after_submit: Option<AfterSubmit>,
}

impl FieldConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(mut self, validator: FieldValidator) -> Self {
        self.validate = Some(validator);
        self
    }

    pub fn validate_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validate_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn warn(mut self, validator: WarningValidator) -> Self {
        self.warn = Some(validator);
        self
    }

    pub fn is_equal(mut self, is_equal: IsEqual) -> Self {
        self.is_equal = Some(is_equal);
        self
    }

    pub fn initial_value(mut self, value: impl Into<Value>) -> Self {
        self.initial_value = Some(value.into());
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn async_debounce(mut self, debounce: Duration) -> Self {
        self.async_debounce = debounce;
        self
    }

    pub fn before_submit(mut self, hook: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.before_submit = Some(Arc::new(hook));
        self
    }

    pub fn after_submit(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.after_submit = Some(Arc::new(hook));
        self
    }
}
