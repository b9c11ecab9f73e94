//! Filters and patches
//!
//! Both are immutable values once built. Composing methods (`and_eq`,
//! `and_inc`) return a new value and leave the receiver untouched, so one
//! filter or patch can be shared between concurrent callers.
//!
//! ## Filters
//!
//! A filter is a list of top-level equality constraints. A document matches
//! when every constrained field is present and equal. Numbers compare by
//! value, so `5` matches `5.0`.
//!
//! ## Patches
//!
//! A patch is a list of field operations applied in order: `Set`, `Unset`
//! and `Inc`. Applying a patch follows the usual document-store operator
//! rules: each field may be targeted once, `_id` is immutable, and `Inc`
//! needs a numeric field (a missing field starts from the increment).

use serde_json::{Number, Value};

use crate::document::{Document, ID_FIELD};
use crate::store::{StoreError, StoreResult};

/// Equality constraints selecting documents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    constraints: Vec<(String, Value)>,
}

impl Filter {
    /// An empty filter (matches every document)
    pub fn new() -> Self {
        Self::default()
    }

    /// A filter selecting one document by identity
    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().eq(ID_FIELD, Value::String(id.into()))
    }

    /// Add an equality constraint, replacing any existing one on `field`
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field = field.into();
        let value = value.into();
        match self.constraints.iter_mut().find(|(f, _)| *f == field) {
            Some(existing) => existing.1 = value,
            None => self.constraints.push((field, value)),
        }
        self
    }

    /// Compose a new filter with an extra equality constraint
    pub fn and_eq(&self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clone().eq(field, value)
    }

    /// The value constrained for `field`, if any
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.constraints
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v)
    }

    /// The `_id` constraint, when it is a string
    pub fn id(&self) -> Option<&str> {
        self.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.constraints.iter().map(|(f, v)| (f.as_str(), v))
    }

    /// Check whether a document satisfies every constraint
    pub fn matches(&self, doc: &Document) -> bool {
        self.constraints.iter().all(|(field, expected)| {
            doc.get(field)
                .map(|actual| values_equal(actual, expected))
                .unwrap_or(false)
        })
    }
}

/// A single field mutation
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    Set { field: String, value: Value },
    Unset { field: String },
    Inc { field: String, by: Number },
}

impl PatchOp {
    pub fn field(&self) -> &str {
        match self {
            PatchOp::Set { field, .. } | PatchOp::Unset { field } | PatchOp::Inc { field, .. } => {
                field
            }
        }
    }
}

/// Field mutations to apply to a matched document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    ops: Vec<PatchOp>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `value` to `field`
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(PatchOp::Set {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Remove `field`
    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.ops.push(PatchOp::Unset {
            field: field.into(),
        });
        self
    }

    /// Add `by` to the numeric `field`
    pub fn inc(mut self, field: impl Into<String>, by: impl Into<Number>) -> Self {
        self.ops.push(PatchOp::Inc {
            field: field.into(),
            by: by.into(),
        });
        self
    }

    /// Compose a new patch with an extra increment
    pub fn and_inc(&self, field: impl Into<String>, by: impl Into<Number>) -> Self {
        self.clone().inc(field, by)
    }

    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Check the patch can be applied to `doc` without touching it
    pub fn validate(&self, doc: &Document) -> StoreResult<()> {
        for (i, op) in self.ops.iter().enumerate() {
            let field = op.field();
            if field == ID_FIELD {
                return Err(StoreError::invalid_patch(field, "_id is immutable"));
            }
            if self.ops[..i].iter().any(|prev| prev.field() == field) {
                return Err(StoreError::invalid_patch(
                    field,
                    "field is targeted by more than one operation",
                ));
            }
            if let PatchOp::Inc { by, .. } = op {
                match doc.get(field) {
                    None => {}
                    Some(Value::Number(current)) => {
                        add_numbers(current, by).ok_or_else(|| {
                            StoreError::invalid_patch(field, "increment overflows")
                        })?;
                    }
                    Some(_) => {
                        return Err(StoreError::invalid_patch(
                            field,
                            "cannot increment a non-numeric value",
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply every operation to `doc`
    ///
    /// The patch is validated first; on error `doc` is left unchanged.
    pub fn apply(&self, doc: &mut Document) -> StoreResult<()> {
        self.validate(doc)?;

        for op in &self.ops {
            match op {
                PatchOp::Set { field, value } => doc.set(field.clone(), value.clone()),
                PatchOp::Unset { field } => {
                    doc.remove(field);
                }
                PatchOp::Inc { field, by } => {
                    let next = match doc.get(field) {
                        Some(Value::Number(current)) => add_numbers(current, by)
                            .ok_or_else(|| StoreError::invalid_patch(field, "increment overflows"))?,
                        _ => by.clone(),
                    };
                    doc.set(field.clone(), Value::Number(next));
                }
            }
        }
        Ok(())
    }
}

/// Add two JSON numbers
///
/// An integer increment of a whole number stays integral, so a counter
/// stored as `5.0` becomes `6`. Anything else is added as `f64`.
fn add_numbers(a: &Number, b: &Number) -> Option<Number> {
    match (whole_i64(a), b.as_i64()) {
        (Some(x), Some(y)) => x.checked_add(y).map(Number::from),
        _ => {
            let sum = a.as_f64()? + b.as_f64()?;
            Number::from_f64(sum)
        }
    }
}

fn whole_i64(n: &Number) -> Option<i64> {
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

/// Equality with numeric coercion
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => match (x.as_u64(), y.as_u64()) {
                (Some(x), Some(y)) => x == y,
                _ => x.as_f64() == y.as_f64(),
            },
        },
        _ => a == b,
    }
}
