use std::sync::Arc;

use super::controller::{Engine, FormApi};
use super::error::{FormError, FormResult};
use super::path::FieldPath;
use super::validation::ValidationScope;
use super::value::Value;

type MutatorFn = dyn Fn(&[Value], &mut MutableState<'_>) -> FormResult<()> + Send + Sync;

/// Named state transform registered through `FormConfig::mutator` and run by
/// [`FormApi::mutate`].
///
/// Mutators run while the form is locked: they must only use the
/// [`MutableState`] they are given, never a captured [`FormApi`].
#[derive(Clone)]
pub struct Mutator(Arc<MutatorFn>);

impl Mutator {
    pub fn new(
        mutate: impl Fn(&[Value], &mut MutableState<'_>) -> FormResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(mutate))
    }
}

/// The view of a form handed to a [`Mutator`].
pub struct MutableState<'a> {
    engine: &'a mut Engine,
}

impl MutableState<'_> {
    pub fn values(&self) -> &Value {
        &self.engine.values
    }

    pub fn initial_values(&self) -> &Value {
        &self.engine.initial_values
    }

    pub fn registered_fields(&self) -> Vec<FieldPath> {
        self.engine.fields.keys().cloned().collect()
    }

    pub fn change_value(&mut self, name: &str, value: impl Into<Value>) -> FormResult<()> {
        let path = FieldPath::parse(name)?;
        self.engine.write_value(&path, value.into(), true)
    }

    /// Sets `touched` on a registered field. Unregistered names are ignored.
    pub fn set_touched(&mut self, name: &str, touched: bool) -> FormResult<()> {
        let path = FieldPath::parse(name)?;
        if let Some(entry) = self.engine.fields.get_mut(&path) {
            entry.touched = touched;
        }
        Ok(())
    }

    pub fn push(&mut self, name: &str, value: impl Into<Value>) -> FormResult<()> {
        self.engine.push(&FieldPath::parse(name)?, value.into())
    }

    pub fn pop(&mut self, name: &str) -> FormResult<Option<Value>> {
        self.engine.pop(&FieldPath::parse(name)?)
    }

    pub fn insert(&mut self, name: &str, index: usize, value: impl Into<Value>) -> FormResult<()> {
        self.engine.insert(&FieldPath::parse(name)?, index, value.into())
    }

    pub fn remove(&mut self, name: &str, index: usize) -> FormResult<Value> {
        self.engine.remove(&FieldPath::parse(name)?, index)
    }

    pub fn move_item(&mut self, name: &str, from: usize, to: usize) -> FormResult<()> {
        self.engine.move_item(&FieldPath::parse(name)?, from, to)
    }

    pub fn swap(&mut self, name: &str, a: usize, b: usize) -> FormResult<()> {
        self.engine.swap(&FieldPath::parse(name)?, a, b)
    }
}

impl Engine {
    fn list_len(&self, list: &FieldPath) -> FormResult<usize> {
        match self.values.get_in(list) {
            None | Some(Value::Null) => Ok(0),
            Some(Value::List(items)) => Ok(items.len()),
            Some(_) => Err(FormError::NotAList(list.clone())),
        }
    }

    /// The list at `list`, created empty when the value is missing or null.
    fn list_mut(&mut self, list: &FieldPath) -> FormResult<&mut Vec<Value>> {
        if self.values.get_in(list).is_none_or(Value::is_null) {
            self.values.set_in(list, Value::List(Vec::new()))?;
        }
        self.values
            .get_in_mut(list)
            .and_then(Value::as_list_mut)
            .ok_or_else(|| FormError::NotAList(list.clone()))
    }

    fn check_index(&self, list: &FieldPath, index: usize, len: usize) -> FormResult<()> {
        if index < len {
            return Ok(());
        }
        Err(FormError::IndexOutOfBounds {
            path: list.clone(),
            index,
            len,
        })
    }

    pub(super) fn push(&mut self, list: &FieldPath, value: Value) -> FormResult<()> {
        self.list_mut(list)?.push(value);
        self.finish_list_change(list);
        Ok(())
    }

    pub(super) fn pop(&mut self, list: &FieldPath) -> FormResult<Option<Value>> {
        let len = self.list_len(list)?;
        if len == 0 {
            return Ok(None);
        }
        let value = self.list_mut(list)?.pop();
        self.reindex_fields(list, |index| (index + 1 < len).then_some(index));
        self.finish_list_change(list);
        Ok(value)
    }

    pub(super) fn insert(&mut self, list: &FieldPath, index: usize, value: Value) -> FormResult<()> {
        let len = self.list_len(list)?;
        if index > len {
            return Err(FormError::IndexOutOfBounds {
                path: list.clone(),
                index,
                len,
            });
        }
        self.list_mut(list)?.insert(index, value);
        self.reindex_fields(list, |i| Some(if i >= index { i + 1 } else { i }));
        self.finish_list_change(list);
        Ok(())
    }

    pub(super) fn remove(&mut self, list: &FieldPath, index: usize) -> FormResult<Value> {
        let len = self.list_len(list)?;
        self.check_index(list, index, len)?;
        let value = self.list_mut(list)?.remove(index);
        self.reindex_fields(list, |i| match i.cmp(&index) {
            std::cmp::Ordering::Less => Some(i),
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Greater => Some(i - 1),
        });
        self.finish_list_change(list);
        Ok(value)
    }

    pub(super) fn move_item(&mut self, list: &FieldPath, from: usize, to: usize) -> FormResult<()> {
        let len = self.list_len(list)?;
        self.check_index(list, from, len)?;
        self.check_index(list, to, len)?;
        if from == to {
            return Ok(());
        }
        let items = self.list_mut(list)?;
        let item = items.remove(from);
        items.insert(to, item);
        self.reindex_fields(list, |i| {
            Some(if i == from {
                to
            } else if from < to && i > from && i <= to {
                i - 1
            } else if to < from && i >= to && i < from {
                i + 1
            } else {
                i
            })
        });
        self.finish_list_change(list);
        Ok(())
    }

    pub(super) fn swap(&mut self, list: &FieldPath, a: usize, b: usize) -> FormResult<()> {
        let len = self.list_len(list)?;
        self.check_index(list, a, len)?;
        self.check_index(list, b, len)?;
        if a == b {
            return Ok(());
        }
        self.list_mut(list)?.swap(a, b);
        self.reindex_fields(list, |i| {
            Some(if i == a {
                b
            } else if i == b {
                a
            } else {
                i
            })
        });
        self.finish_list_change(list);
        Ok(())
    }

    fn finish_list_change(&mut self, list: &FieldPath) {
        if let Some(entry) = self.fields.get_mut(list) {
            entry.modified = true;
            entry.modified_since_last_submit = true;
        }
        self.invalidate_validation(list);
    }

    /// Moves per-index field entries (metadata, listeners, registrations and
    /// validation slots) along with their items. `map` returns the new index
    /// of an old one, or `None` when the item is gone; registrations under a
    /// removed item are dropped.
    fn reindex_fields(&mut self, list: &FieldPath, map: impl Fn(usize) -> Option<usize>) {
        let remap = |path: &FieldPath| match path.index_under(list) {
            None => Some(path.clone()),
            Some(index) => map(index).and_then(|next| path.with_index_under(list, next)),
        };

        let affected = self
            .fields
            .keys()
            .filter(|path| path.index_under(list).is_some())
            .cloned()
            .collect::<Vec<_>>();
        let mut moved = Vec::with_capacity(affected.len());
        for path in affected {
            let Some(entry) = self.fields.remove(&path) else {
                continue;
            };
            match remap(&path) {
                Some(target) => moved.push((target, entry)),
                None => {
                    for id in entry.registrations.keys() {
                        self.registrations.remove(id);
                    }
                    log::debug!("dropped registrations under removed item `{path}`");
                }
            }
        }
        for (target, entry) in moved {
            for id in entry.registrations.keys() {
                self.registrations.insert(*id, target.clone());
            }
            self.fields.insert(target, entry);
        }

        self.active = self.active.as_ref().and_then(|active| remap(active));
        self.submit.errors = std::mem::take(&mut self.submit.errors)
            .into_iter()
            .filter_map(|(path, error)| remap(&path).map(|path| (path, error)))
            .collect();
    }
}

impl FormApi {
    fn mutate_with<R>(
        &self,
        context: &'static str,
        mutate: impl FnOnce(&mut Engine) -> FormResult<R>,
    ) -> FormResult<R> {
        let result = {
            let mut engine = self.lock(context)?;
            engine.ensure_live()?;
            mutate(&mut *engine)?
        };
        self.run_validation(ValidationScope::All)?;
        self.notify()?;
        Ok(result)
    }

    pub fn push(&self, name: &str, value: impl Into<Value>) -> FormResult<()> {
        let list = FieldPath::parse(name)?;
        let value = value.into();
        self.mutate_with("pushing list item", |engine| engine.push(&list, value))
    }

    pub fn pop(&self, name: &str) -> FormResult<Option<Value>> {
        let list = FieldPath::parse(name)?;
        self.mutate_with("popping list item", |engine| engine.pop(&list))
    }

    pub fn insert(&self, name: &str, index: usize, value: impl Into<Value>) -> FormResult<()> {
        let list = FieldPath::parse(name)?;
        let value = value.into();
        self.mutate_with("inserting list item", |engine| {
            engine.insert(&list, index, value)
        })
    }

    pub fn remove(&self, name: &str, index: usize) -> FormResult<Value> {
        let list = FieldPath::parse(name)?;
        self.mutate_with("removing list item", |engine| engine.remove(&list, index))
    }

    pub fn move_item(&self, name: &str, from: usize, to: usize) -> FormResult<()> {
        let list = FieldPath::parse(name)?;
        self.mutate_with("moving list item", |engine| {
            engine.move_item(&list, from, to)
        })
    }

    pub fn swap(&self, name: &str, a: usize, b: usize) -> FormResult<()> {
        let list = FieldPath::parse(name)?;
        self.mutate_with("swapping list items", |engine| engine.swap(&list, a, b))
    }

    /// Runs the mutator registered under `name` with `args`.
    pub fn mutate(&self, name: &str, args: &[Value]) -> FormResult<()> {
        let mutator = {
            let engine = self.lock("looking up mutator")?;
            engine.ensure_live()?;
            engine.config.mutators.get(name).cloned()
        };
        let Some(mutator) = mutator else {
            log::warn!("no mutator named `{name}`");
            return Err(FormError::UnknownMutator(name.to_string()));
        };
        log::debug!("running mutator `{name}`");
        self.mutate_with("running mutator", |engine| {
            (mutator.0)(args, &mut MutableState { engine })
        })
    }
}
