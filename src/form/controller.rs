use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::config::FormConfig;
use super::error::{FormError, FormResult};
use super::path::FieldPath;
use super::registry::FieldEntry;
use super::state::{FieldState, FormState};
use super::submit::{SubmitState, SubmitStatus};
use super::subscription::{SubscriberId, SubscriberTable};
use super::validation::{FormValidationSlot, InFlight, PendingValidation, ValidationScope};
use super::value::{FormModel, Value};

static FORM_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FormId(pub u64);

impl FormId {
    pub fn next() -> Self {
        Self(FORM_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

/// Canonical form state. Only ever touched through [`FormApi`] while the
/// mutex is held; callbacks run after it is released.
pub(super) struct Engine {
    pub(super) id: FormId,
    pub(super) destroyed: bool,
    pub(super) config: FormConfig,
    pub(super) values: Value,
    pub(super) initial_values: Value,
    pub(super) last_submitted_values: Option<Value>,
    pub(super) active: Option<FieldPath>,
    pub(super) fields: BTreeMap<FieldPath, FieldEntry>,
    pub(super) registrations: BTreeMap<SubscriberId, FieldPath>,
    pub(super) subscribers: SubscriberTable<FormState>,
    pub(super) form_validation: FormValidationSlot,
    pub(super) pending: Vec<PendingValidation>,
    pub(super) in_flight: Vec<InFlight>,
    pub(super) validation_paused: bool,
    pub(super) validation_blocked: bool,
    pub(super) submit: SubmitStatus,
    pub(super) batch_depth: u32,
    pub(super) dispatching: bool,
    pub(super) notify_requested: bool,
    next_subscriber: u64,
    next_generation: u64,
}

impl Engine {
    fn new(config: FormConfig) -> Self {
        let initial_values = config.initial_values.clone();
        Self {
            id: FormId::next(),
            destroyed: false,
            config,
            values: initial_values.clone(),
            initial_values,
            last_submitted_values: None,
            active: None,
            fields: BTreeMap::new(),
            registrations: BTreeMap::new(),
            subscribers: SubscriberTable::default(),
            form_validation: FormValidationSlot::default(),
            pending: Vec::new(),
            in_flight: Vec::new(),
            validation_paused: false,
            validation_blocked: false,
            submit: SubmitStatus::default(),
            batch_depth: 0,
            dispatching: false,
            notify_requested: false,
            next_subscriber: 1,
            next_generation: 1,
        }
    }

    pub(super) fn ensure_live(&self) -> FormResult<()> {
        if self.destroyed {
            return Err(FormError::Destroyed);
        }
        Ok(())
    }

    pub(super) fn allocate_subscriber(&mut self) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber);
        self.next_subscriber += 1;
        id
    }

    /// Generations are unique per form, so a result can never match a slot
    /// that was recreated after its field re-registered.
    pub(super) fn next_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    fn initialize(&mut self, values: Value, keep_dirty: bool) {
        let mut next_values = values.clone();
        if keep_dirty {
            let dirty = self
                .fields
                .keys()
                .filter(|path| self.field_is_dirty(path))
                .cloned()
                .collect::<Vec<_>>();
            for path in dirty {
                if let Err(error) = next_values.set_in(&path, self.values.get_or_null(&path)) {
                    log::warn!("dropping dirty value at `{path}` on reinitialize: {error}");
                }
            }
        }
        self.initial_values = values;
        self.values = next_values;
        self.invalidate_validation(&FieldPath::root());
    }

    fn reset_meta(&mut self) {
        for entry in self.fields.values_mut() {
            entry.touched = false;
            entry.visited = false;
            entry.modified = false;
            entry.modified_since_last_submit = false;
        }
        self.active = None;
        self.last_submitted_values = None;
        self.submit.reset();
    }
}

/// Handle to one form engine. Cheap to clone; every clone drives the same
/// state.
#[derive(Clone)]
pub struct FormApi {
    pub(super) state: Arc<Mutex<Engine>>,
}

pub fn create_form(config: FormConfig) -> FormApi {
    FormApi::new(config)
}

impl FormApi {
    pub fn new(config: FormConfig) -> Self {
        let api = Self {
            state: Arc::new(Mutex::new(Engine::new(config))),
        };
        log::debug!("created form {:?}", api.form_id().ok());
        if let Err(error) = api.run_validation(ValidationScope::All) {
            log::warn!("initial validation failed: {error}");
        }
        api
    }

    pub(super) fn lock(&self, context: &'static str) -> FormResult<MutexGuard<'_, Engine>> {
        lock_state(&self.state, context)
    }

    pub fn form_id(&self) -> FormResult<FormId> {
        Ok(self.lock("reading form id")?.id)
    }

    pub fn is_destroyed(&self) -> FormResult<bool> {
        Ok(self.lock("reading destroyed flag")?.destroyed)
    }

    /// Tears the engine down. Every later call on this form (or on handles
    /// created from it) fails with [`FormError::Destroyed`].
    pub fn destroy(&self) -> FormResult<()> {
        let mut engine = self.lock("destroying form")?;
        engine.ensure_live()?;
        engine.destroyed = true;
        engine.fields.clear();
        engine.registrations.clear();
        engine.subscribers = SubscriberTable::default();
        engine.abort_all_validations();
        log::debug!("destroyed form {:?}", engine.id);
        Ok(())
    }

    pub fn get_state(&self) -> FormResult<FormState> {
        let engine = self.lock("reading form state")?;
        engine.ensure_live()?;
        Ok(engine.form_state())
    }

    pub fn get_field_state(&self, name: &str) -> FormResult<Option<FieldState>> {
        let path = FieldPath::parse(name)?;
        let engine = self.lock("reading field state")?;
        engine.ensure_live()?;
        Ok(engine
            .fields
            .contains_key(&path)
            .then(|| engine.field_state(&path)))
    }

    pub fn get_registered_fields(&self) -> FormResult<Vec<FieldPath>> {
        let engine = self.lock("reading registered fields")?;
        engine.ensure_live()?;
        Ok(engine.fields.keys().cloned().collect())
    }

    pub fn values_as<T: FormModel>(&self) -> FormResult<T> {
        let engine = self.lock("reading typed values")?;
        engine.ensure_live()?;
        Ok(T::from_values(&engine.values)?)
    }

    pub fn change(&self, name: &str, value: impl Into<Value>) -> FormResult<()> {
        let path = FieldPath::parse(name)?;
        let validate_now = {
            let mut engine = self.lock("changing field value")?;
            engine.ensure_live()?;
            engine.write_value(&path, value.into(), true)?;
            !engine.config.validate_on_blur
        };
        if validate_now {
            self.run_validation(ValidationScope::Changed(path))?;
        }
        self.notify()
    }

    pub fn focus(&self, name: &str) -> FormResult<()> {
        let path = FieldPath::parse(name)?;
        {
            let mut engine = self.lock("focusing field")?;
            engine.ensure_live()?;
            let Some(entry) = engine.fields.get_mut(&path) else {
                log::trace!("focus on unregistered field `{path}` ignored");
                return Ok(());
            };
            entry.visited = true;
            engine.active = Some(path);
        }
        self.notify()
    }

    pub fn blur(&self, name: &str) -> FormResult<()> {
        let path = FieldPath::parse(name)?;
        let validate_now = {
            let mut engine = self.lock("blurring field")?;
            engine.ensure_live()?;
            let Some(entry) = engine.fields.get_mut(&path) else {
                log::trace!("blur on unregistered field `{path}` ignored");
                return Ok(());
            };
            entry.touched = true;
            if engine.active.as_ref() == Some(&path) {
                engine.active = None;
            }
            engine.config.validate_on_blur
        };
        if validate_now {
            self.run_validation(ValidationScope::Changed(path))?;
        }
        self.notify()
    }

    /// Replaces the initial values (and the values, except for dirty fields
    /// when `keep_dirty_on_reinitialize` is set).
    pub fn initialize(&self, values: Value) -> FormResult<()> {
        {
            let mut engine = self.lock("initializing form")?;
            engine.ensure_live()?;
            let keep_dirty = engine.config.keep_dirty_on_reinitialize;
            engine.initialize(values, keep_dirty);
            log::debug!("initialized form {:?}", engine.id);
        }
        self.run_validation(ValidationScope::All)?;
        self.notify()
    }

    /// Returns the form to `values` (or the current initial values) and
    /// clears interaction and submit metadata.
    pub fn reset(&self, values: Option<Value>) -> FormResult<()> {
        {
            let mut engine = self.lock("resetting form")?;
            engine.ensure_live()?;
            if matches!(
                engine.submit.phase,
                SubmitState::Validating | SubmitState::Submitting
            ) {
                return Err(FormError::ResetWhileSubmitting);
            }
            let values = values.unwrap_or_else(|| engine.initial_values.clone());
            engine.reset_meta();
            engine.initialize(values, false);
            log::debug!("reset form {:?}", engine.id);
        }
        self.run_validation(ValidationScope::All)?;
        self.notify()
    }

    pub fn reset_field_state(&self, name: &str) -> FormResult<()> {
        let path = FieldPath::parse(name)?;
        {
            let mut engine = self.lock("resetting field state")?;
            engine.ensure_live()?;
            let Some(entry) = engine.fields.get_mut(&path) else {
                return Ok(());
            };
            entry.touched = false;
            entry.visited = false;
            entry.modified = false;
            entry.modified_since_last_submit = false;
            if engine.active.as_ref() == Some(&path) {
                engine.active = None;
            }
        }
        self.notify()
    }
}

pub(super) fn lock_state<'a>(
    state: &'a Mutex<Engine>,
    context: &'static str,
) -> FormResult<MutexGuard<'a, Engine>> {
    state.lock().map_err(|_| FormError::StatePoisoned(context))
}
