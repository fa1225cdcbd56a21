use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use super::error::ValueError;
use super::path::{FieldPath, PathSegment};

/// How far past the end of a list a write may land. Skipped slots are
/// filled with `Null`.
pub const MAX_LIST_PADDING: usize = 1024;

fn check_padding(list: &FieldPath, index: usize, len: usize) -> Result<(), ValueError> {
    if index.saturating_sub(len) > MAX_LIST_PADDING {
        return Err(ValueError::IndexTooFar {
            path: list.to_string(),
            index,
            len,
        });
    }
    Ok(())
}

/// Dynamic form data. Numbers are decimals so equality is exact.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Decimal),
    Text(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        )
    }

    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Value::List(items.into_iter().collect())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            Value::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// "Empty" in the sense a required-field check means it.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(text) => text.trim().is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Map(entries) => entries.is_empty(),
            Value::Bool(_) | Value::Number(_) => false,
        }
    }

    pub fn get_in(&self, path: &FieldPath) -> Option<&Value> {
        let mut current = self;
        for segment in path.segments() {
            current = match (segment, current) {
                (PathSegment::Key(key), Value::Map(entries)) => entries.get(key)?,
                (PathSegment::Index(index), Value::List(items)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn get_in_mut(&mut self, path: &FieldPath) -> Option<&mut Value> {
        let mut current = self;
        for segment in path.segments() {
            current = match (segment, current) {
                (PathSegment::Key(key), Value::Map(entries)) => entries.get_mut(key)?,
                (PathSegment::Index(index), Value::List(items)) => items.get_mut(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Value at `path`, or `Null` when nothing is stored there.
    pub fn get_or_null(&self, path: &FieldPath) -> Value {
        self.get_in(path).cloned().unwrap_or_default()
    }

    /// Writes `value` at `path`, creating maps and lists where nothing (or
    /// `Null`) is stored. Existing values of another shape are never
    /// replaced; the write fails and `self` is left untouched.
    pub fn set_in(&mut self, path: &FieldPath, value: Value) -> Result<(), ValueError> {
        self.check_writable(path)?;
        let mut current = self;
        for segment in path.segments() {
            current = match segment {
                PathSegment::Key(key) => {
                    if current.is_null() {
                        *current = Value::Map(BTreeMap::new());
                    }
                    let Value::Map(entries) = current else {
                        unreachable!("checked to be a map")
                    };
                    entries.entry(key.clone()).or_default()
                }
                PathSegment::Index(index) => {
                    if current.is_null() {
                        *current = Value::List(Vec::new());
                    }
                    let Value::List(items) = current else {
                        unreachable!("checked to be a list")
                    };
                    if items.len() <= *index {
                        items.resize(*index + 1, Value::Null);
                    }
                    &mut items[*index]
                }
            };
        }
        *current = value;
        Ok(())
    }

    /// Whether [`Value::set_in`] would succeed for `path`. List slots may
    /// be padded by at most [`MAX_LIST_PADDING`] nulls past the end.
    pub fn check_writable(&self, path: &FieldPath) -> Result<(), ValueError> {
        let mut current = Some(self);
        let mut walked = FieldPath::root();
        for segment in path.segments() {
            let existing = current.filter(|value| !value.is_null());
            current = match (segment, existing) {
                (PathSegment::Key(key), None) => {
                    walked = walked.key(key.clone());
                    None
                }
                (PathSegment::Key(key), Some(Value::Map(entries))) => {
                    walked = walked.key(key.clone());
                    entries.get(key)
                }
                (PathSegment::Index(index), None) => {
                    check_padding(&walked, *index, 0)?;
                    walked = walked.index(*index);
                    None
                }
                (PathSegment::Index(index), Some(Value::List(items))) => {
                    check_padding(&walked, *index, items.len())?;
                    walked = walked.index(*index);
                    items.get(*index)
                }
                (PathSegment::Key(_), Some(other)) => {
                    return Err(mismatch(other, &walked.to_string(), "map"));
                }
                (PathSegment::Index(_), Some(other)) => {
                    return Err(mismatch(other, &walked.to_string(), "list"));
                }
            };
        }
        Ok(())
    }

    /// Removes the value at `path`. Map entries are deleted; list slots are
    /// nulled so sibling indices keep their positions.
    pub fn remove_in(&mut self, path: &FieldPath) -> Option<Value> {
        let (last, parent) = path.segments().split_last()?;
        let mut current = self;
        for segment in parent {
            current = match (segment, current) {
                (PathSegment::Key(key), Value::Map(entries)) => entries.get_mut(key)?,
                (PathSegment::Index(index), Value::List(items)) => items.get_mut(*index)?,
                _ => return None,
            };
        }
        match (last, current) {
            (PathSegment::Key(key), Value::Map(entries)) => entries.remove(key),
            (PathSegment::Index(index), Value::List(items)) => {
                items.get_mut(*index).map(std::mem::take)
            }
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(Decimal::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(Decimal::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Number(Decimal::from(value))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Number(Decimal::from(value))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Number(Decimal::from(value))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Value::Map(entries)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Conversion between a Rust type and its [`Value`] form. `path` is only used
/// for error messages.
pub trait FieldValue: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: &Value, path: &str) -> Result<Self, ValueError>;
}

/// Typed form model, normally produced by `#[derive(FormModel)]`.
pub trait FormModel: FieldValue {
    type Fields;

    fn fields() -> Self::Fields;

    fn to_values(&self) -> Value {
        self.to_value()
    }

    fn from_values(values: &Value) -> Result<Self, ValueError> {
        Self::from_value(values, "")
    }
}

#[doc(hidden)]
pub fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

#[doc(hidden)]
pub fn field_of<'a>(value: &'a Value, path: &str) -> Result<&'a BTreeMap<String, Value>, ValueError> {
    value.as_map().ok_or_else(|| ValueError::TypeMismatch {
        path: path.to_string(),
        expected: "map",
        found: value.kind(),
    })
}

fn mismatch(value: &Value, path: &str, expected: &'static str) -> ValueError {
    ValueError::TypeMismatch {
        path: path.to_string(),
        expected,
        found: value.kind(),
    }
}

impl FieldValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: &Value, _path: &str) -> Result<Self, ValueError> {
        Ok(value.clone())
    }
}

impl FieldValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: &Value, path: &str) -> Result<Self, ValueError> {
        match value {
            Value::Text(text) => Ok(text.clone()),
            Value::Null => Ok(String::new()),
            other => Err(mismatch(other, path, "text")),
        }
    }
}

impl FieldValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: &Value, path: &str) -> Result<Self, ValueError> {
        match value {
            Value::Bool(flag) => Ok(*flag),
            Value::Null => Ok(false),
            other => Err(mismatch(other, path, "bool")),
        }
    }
}

impl FieldValue for Decimal {
    fn to_value(&self) -> Value {
        Value::Number(*self)
    }

    fn from_value(value: &Value, path: &str) -> Result<Self, ValueError> {
        match value {
            Value::Number(number) => Ok(*number),
            Value::Null => Err(ValueError::Missing {
                path: path.to_string(),
            }),
            other => Err(mismatch(other, path, "number")),
        }
    }
}

impl FieldValue for f64 {
    fn to_value(&self) -> Value {
        Decimal::from_f64(*self).map_or(Value::Null, Value::Number)
    }

    fn from_value(value: &Value, path: &str) -> Result<Self, ValueError> {
        Decimal::from_value(value, path)?
            .to_f64()
            .ok_or_else(|| ValueError::OutOfRange {
                path: path.to_string(),
                target: "f64",
            })
    }
}

macro_rules! integer_field_value {
    ($($ty:ty => $convert:ident),* $(,)?) => {
        $(
            impl FieldValue for $ty {
                fn to_value(&self) -> Value {
                    Value::Number(Decimal::from(*self))
                }

                fn from_value(value: &Value, path: &str) -> Result<Self, ValueError> {
                    let number = Decimal::from_value(value, path)?;
                    if !number.fract().is_zero() {
                        return Err(ValueError::OutOfRange {
                            path: path.to_string(),
                            target: stringify!($ty),
                        });
                    }
                    number.$convert().ok_or_else(|| ValueError::OutOfRange {
                        path: path.to_string(),
                        target: stringify!($ty),
                    })
                }
            }
        )*
    };
}

integer_field_value!(
    i32 => to_i32,
    i64 => to_i64,
    u32 => to_u32,
    u64 => to_u64,
    usize => to_usize,
);

impl<T> FieldValue for Option<T>
where
    T: FieldValue,
{
    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, FieldValue::to_value)
    }

    fn from_value(value: &Value, path: &str) -> Result<Self, ValueError> {
        if value.is_null() {
            return Ok(None);
        }
        T::from_value(value, path).map(Some)
    }
}

impl<T> FieldValue for Vec<T>
where
    T: FieldValue,
{
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(FieldValue::to_value).collect())
    }

    fn from_value(value: &Value, path: &str) -> Result<Self, ValueError> {
        match value {
            Value::List(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| T::from_value(item, &format!("{path}[{index}]")))
                .collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(mismatch(other, path, "list")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(input: &str) -> FieldPath {
        FieldPath::parse(input).expect("valid path")
    }

    #[test]
    fn set_in_builds_missing_containers() {
        let mut values = Value::Null;
        values
            .set_in(&path("customer.addresses[1].city"), "Ghent".into())
            .expect("write into empty tree");

        assert_eq!(
            values.get_in(&path("customer.addresses[1].city")),
            Some(&Value::from("Ghent"))
        );
        assert_eq!(
            values.get_in(&path("customer.addresses[0]")),
            Some(&Value::Null)
        );
        assert_eq!(
            values
                .get_in(&path("customer.addresses"))
                .and_then(Value::as_list)
                .map(<[Value]>::len),
            Some(2)
        );
    }

    #[test]
    fn set_in_refuses_to_replace_values_of_another_shape() {
        let original = Value::map([
            ("name", Value::from("ada")),
            ("user", Value::map([("id", Value::from(7))])),
        ]);
        let mut values = original.clone();

        assert_eq!(
            values.set_in(&path("0"), "x".into()),
            Err(ValueError::TypeMismatch {
                path: String::new(),
                expected: "list",
                found: "map",
            })
        );
        assert!(matches!(
            values.set_in(&path("user[0]"), "x".into()),
            Err(ValueError::TypeMismatch { expected: "list", found: "map", .. })
        ));
        assert!(matches!(
            values.set_in(&path("name.first"), "x".into()),
            Err(ValueError::TypeMismatch { expected: "map", found: "text", .. })
        ));
        assert_eq!(values, original);
    }

    #[test]
    fn set_in_limits_padding_past_the_end_of_a_list() {
        let mut values = Value::map([("items", Value::list(["a".into()]))]);
        values
            .set_in(&path("items[3]"), "d".into())
            .expect("small gap is padded");
        assert_eq!(
            values.get_in(&path("items")),
            Some(&Value::list(["a".into(), Value::Null, Value::Null, "d".into()]))
        );

        let before = values.clone();
        assert_eq!(
            values.set_in(&path("items[18446744073709551615]"), "x".into()),
            Err(ValueError::IndexTooFar {
                path: "items".into(),
                index: usize::MAX,
                len: 4,
            })
        );
        assert!(matches!(
            values.set_in(&path("fresh[100000000].name"), "x".into()),
            Err(ValueError::IndexTooFar { len: 0, .. })
        ));
        assert_eq!(values, before);
    }

    #[test]
    fn remove_in_deletes_keys_and_nulls_list_slots() {
        let mut values = Value::map([
            ("name", Value::from("x")),
            ("tags", Value::list(["a".into(), "b".into()])),
        ]);

        assert_eq!(values.remove_in(&path("name")), Some(Value::from("x")));
        assert_eq!(values.get_in(&path("name")), None);
        assert_eq!(values.remove_in(&path("tags[0]")), Some(Value::from("a")));
        assert_eq!(
            values.get_in(&path("tags")),
            Some(&Value::list([Value::Null, "b".into()]))
        );
        assert_eq!(values.remove_in(&path("missing.deep")), None);
    }

    #[test]
    fn numbers_compare_by_decimal_value() {
        assert_eq!(
            Value::Number(Decimal::new(150, 2)),
            Value::Number(Decimal::new(15, 1))
        );
    }

    #[test]
    fn integer_conversion_rejects_fractions_and_overflow() {
        assert_eq!(u32::from_value(&Value::from(7), "age"), Ok(7));
        assert!(matches!(
            u32::from_value(&Value::Number(Decimal::new(75, 1)), "age"),
            Err(ValueError::OutOfRange { .. })
        ));
        assert!(matches!(
            u32::from_value(&Value::from(-1), "age"),
            Err(ValueError::OutOfRange { .. })
        ));
        assert!(matches!(
            u32::from_value(&Value::from("7"), "age"),
            Err(ValueError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn list_conversion_reports_item_path() {
        let error = Vec::<bool>::from_value(&Value::list([true.into(), "no".into()]), "flags")
            .expect_err("second item is not a bool");
        assert_eq!(
            error,
            ValueError::TypeMismatch {
                path: "flags[1]".into(),
                expected: "bool",
                found: "text",
            }
        );
    }
}
