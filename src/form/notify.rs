use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use super::config::DebugHook;
use super::controller::{Engine, FormApi};
use super::error::FormResult;
use super::path::FieldPath;
use super::registry::FieldEntry;
use super::state::{FieldState, FormState, FormStateKey, FormSubscription};
use super::subscription::{Delivery, SubscriberId};
use super::value::Value;

enum Planned {
    Form(Delivery<FormState>),
    Field(Delivery<FieldState>),
}

impl Planned {
    fn id(&self) -> SubscriberId {
        match self {
            Planned::Form(delivery) => delivery.id,
            Planned::Field(delivery) => delivery.id,
        }
    }

    fn deliver(&self) {
        match self {
            Planned::Form(delivery) => delivery.deliver(),
            Planned::Field(delivery) => delivery.deliver(),
        }
    }
}

/// Callbacks for one notification pass, gathered under the lock and run
/// after it is released.
struct NotificationPlan {
    deliveries: Vec<Planned>,
    debug: Option<(DebugHook, Arc<FormState>, BTreeMap<FieldPath, FieldState>)>,
}

impl NotificationPlan {
    fn run(self) {
        for planned in &self.deliveries {
            planned.deliver();
        }
        if let Some((hook, form, fields)) = self.debug {
            hook(&form, &fields);
        }
    }
}

impl Engine {
    /// Deep comparison of everything not covered by a registered field.
    /// Registered paths are compared with their own `is_equal` instead.
    fn differs_outside_fields(&self, other: &Value) -> bool {
        if self.fields.is_empty() {
            return self.values != *other;
        }
        let mut current = self.values.clone();
        let mut other = other.clone();
        for path in self.fields.keys() {
            current.remove_in(path);
            other.remove_in(path);
        }
        current != other
    }

    pub(super) fn form_state(&self) -> FormState {
        let dirty_fields = self
            .fields
            .keys()
            .filter(|path| self.field_is_dirty(path))
            .cloned()
            .collect::<BTreeSet<_>>();
        let pristine = dirty_fields.is_empty() && !self.differs_outside_fields(&self.initial_values);
        let dirty_since_last_submit = match &self.last_submitted_values {
            None => false,
            Some(submitted) => {
                self.fields.iter().any(|(path, entry)| {
                    !entry.values_equal(&self.values.get_or_null(path), &submitted.get_or_null(path))
                }) || self.differs_outside_fields(submitted)
            }
        };
        let collect = |pick: fn(&FieldEntry) -> bool| {
            self.fields
                .iter()
                .filter(|(_, entry)| pick(entry))
                .map(|(path, _)| path.clone())
                .collect::<BTreeSet<_>>()
        };

        let error = self.form_error();
        let errors = self.validation_errors();
        let has_validation_errors = error.is_some() || !errors.is_empty();
        let has_submit_errors = self.submit.error.is_some() || !self.submit.errors.is_empty();
        let valid = !has_validation_errors && !has_submit_errors;

        FormState {
            active: self.active.clone(),
            dirty: !pristine,
            dirty_fields,
            dirty_since_last_submit,
            error,
            errors,
            has_submit_errors,
            has_validation_errors,
            initial_values: self.initial_values.clone(),
            invalid: !valid,
            last_submitted_values: self.last_submitted_values.clone(),
            modified: collect(|entry| entry.modified),
            modified_since_last_submit: collect(|entry| entry.modified_since_last_submit),
            pristine,
            submit_count: self.submit.count,
            submit_error: self.submit.error.clone(),
            submit_errors: self.submit.errors.clone(),
            submit_failed: self.submit.failed,
            submit_phase: self.submit.phase,
            submit_succeeded: self.submit.succeeded,
            submitting: self.submit.is_submitting(),
            touched: collect(|entry| entry.touched),
            valid,
            validating: self.is_validating(),
            values: self.values.clone(),
            visited: collect(|entry| entry.visited),
            warnings: self.warnings(),
        }
    }

    fn plan_notifications(&mut self) -> NotificationPlan {
        let form = Arc::new(self.form_state());
        let field_states = self
            .fields
            .keys()
            .map(|path| (path.clone(), Arc::new(self.field_state(path))))
            .collect::<Vec<_>>();

        let mut deliveries = self
            .subscribers
            .plan(&form)
            .into_iter()
            .map(Planned::Form)
            .collect::<Vec<_>>();
        for (path, state) in &field_states {
            if let Some(entry) = self.fields.get_mut(path) {
                deliveries.extend(entry.listeners.plan(state).into_iter().map(Planned::Field));
            }
        }
        deliveries.sort_by_key(Planned::id);

        let debug = self.config.debug.clone().map(|hook| {
            let fields = field_states
                .into_iter()
                .map(|(path, state)| (path, FieldState::clone(&state)))
                .collect();
            (hook, form, fields)
        });
        NotificationPlan { deliveries, debug }
    }
}

/// Clears `dispatching` if delivery unwinds, so the form keeps notifying.
struct DispatchGuard<'a> {
    state: &'a Mutex<Engine>,
    armed: bool,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut engine = match self.state.lock() {
            Ok(engine) => engine,
            Err(poisoned) => poisoned.into_inner(),
        };
        engine.dispatching = false;
    }
}

struct BatchGuard<'a> {
    state: &'a Mutex<Engine>,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let mut engine = match self.state.lock() {
            Ok(engine) => engine,
            Err(poisoned) => poisoned.into_inner(),
        };
        engine.batch_depth = engine.batch_depth.saturating_sub(1);
    }
}

/// Handle returned by [`FormApi::subscribe`].
pub struct SubscriptionHandle {
    id: SubscriberId,
    form: FormApi,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn unsubscribe(self) -> FormResult<()> {
        let mut engine = self.form.lock("unsubscribing")?;
        engine.ensure_live()?;
        engine.subscribers.remove(self.id);
        log::debug!("unsubscribed {:?}", self.id);
        Ok(())
    }
}

impl FormApi {
    /// Subscribes to form state. The listener is called once right away with
    /// the current state, then whenever one of the subscribed keys changes.
    pub fn subscribe<F>(
        &self,
        listener: F,
        subscription: FormSubscription,
    ) -> FormResult<SubscriptionHandle>
    where
        F: Fn(&FormState) + Send + Sync + 'static,
    {
        let id = {
            let mut engine = self.lock("subscribing")?;
            engine.ensure_live()?;
            let id = engine.allocate_subscriber();
            engine.subscribers.insert(id, subscription, Arc::new(listener), None);
            id
        };
        log::debug!("subscribed {id:?}");
        self.notify()?;
        Ok(SubscriptionHandle {
            id,
            form: self.clone(),
        })
    }

    /// Form subscribers that would be woken by a change to `key`.
    pub fn subscribers_for(&self, key: FormStateKey) -> FormResult<Vec<SubscriberId>> {
        let engine = self.lock("reading subscribers")?;
        engine.ensure_live()?;
        Ok(engine.subscribers.interested_in(key))
    }

    /// Runs `f` with notifications held back, then delivers one coalesced
    /// pass. Nested batches flush when the outermost one ends.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> FormResult<R> {
        {
            let mut engine = self.lock("opening batch")?;
            engine.ensure_live()?;
            engine.batch_depth += 1;
        }
        let result = {
            let _guard = BatchGuard { state: &self.state };
            f()
        };
        self.notify()?;
        Ok(result)
    }

    /// Publishes the current state to every subscriber whose subscribed keys
    /// changed. Calls made while a batch is open, or from inside a listener,
    /// are folded into the pass already pending.
    pub(super) fn notify(&self) -> FormResult<()> {
        {
            let mut engine = self.lock("requesting notification")?;
            if engine.destroyed {
                return Ok(());
            }
            if engine.batch_depth > 0 || engine.dispatching {
                engine.notify_requested = true;
                return Ok(());
            }
            engine.dispatching = true;
            engine.notify_requested = false;
        }

        let mut guard = DispatchGuard {
            state: &self.state,
            armed: true,
        };
        loop {
            let plan = self.lock("planning notification")?.plan_notifications();
            log::trace!("delivering {} notification(s)", plan.deliveries.len());
            plan.run();

            let mut engine = self.lock("finishing notification")?;
            if engine.notify_requested && !engine.destroyed && engine.batch_depth == 0 {
                engine.notify_requested = false;
                continue;
            }
            engine.dispatching = false;
            guard.armed = false;
            return Ok(());
        }
    }
}
