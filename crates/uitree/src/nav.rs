//! Path navigation: walks a `Vec<PathSegment>` against a source value with
//! nullish coalescing on reads and no-partial-write semantics on writes.

use serde_json::Value;

use uiproto::PathSegment;

/// Backend-supplied hooks for segments the tree cannot resolve on its
/// own: method calls and `@NAME` standard-variable lookups.
pub trait NavContext {
    fn call_method(&self, name: &str, arg: Option<&Value>) -> Result<Value, NavError>;
    fn standard_var(&self, name: &str) -> Option<Value>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavError {
    #[error("path failure: {0}")]
    PathFailure(String),
    #[error("standard variable not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavOutcome {
    Value(Value),
    /// A nullish intermediate was encountered on a read; the empty result
    /// carries no error.
    Empty,
}

/// Navigates `segments` against `root` for a read. Nullish intermediates
/// short-circuit to `NavOutcome::Empty` rather than erroring.
pub fn navigate_read<C: NavContext>(
    ctx: &C,
    root: &Value,
    segments: &[PathSegment],
) -> Result<NavOutcome, NavError> {
    let mut current = root.clone();
    for segment in segments {
        if current.is_null() {
            return Ok(NavOutcome::Empty);
        }
        current = match segment {
            PathSegment::Field(name) => step_field(&current, name),
            PathSegment::Parent => {
                // Parent ascension within the raw value graph is not
                // meaningful here: the tree resolves `..` by re-deriving
                // from the parent *variable's* value before navigation
                // begins, so a bare `Parent` segment mid-path (no such
                // case is produced by the current parser ordering rules)
                // is treated as a no-op on the current value.
                current
            }
            PathSegment::Method { name, with_arg } => {
                let arg = if *with_arg { Some(&current) } else { None };
                ctx.call_method(name, arg)?
            }
            PathSegment::StandardVar(name) => {
                ctx.standard_var(name).ok_or_else(|| NavError::NotFound(name.clone()))?
            }
        };
    }
    Ok(NavOutcome::Value(current))
}

fn step_field(current: &Value, name: &str) -> Value {
    if let Ok(index) = name.parse::<usize>() {
        if index == 0 {
            return Value::Null;
        }
        return current
            .as_array()
            .and_then(|arr| arr.get(index - 1))
            .cloned()
            .unwrap_or(Value::Null);
    }
    current
        .as_object()
        .and_then(|obj| obj.get(name))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Navigates `segments` against `root` for a write of `write_value`,
/// returning the new root value. Any nullish intermediate is a hard
/// `path-failure` (no partial write).
pub fn navigate_write(
    ctx: &impl NavContext,
    root: &Value,
    segments: &[PathSegment],
    write_value: Value,
) -> Result<Value, NavError> {
    let Some((last, init)) = segments.split_last() else {
        return Ok(write_value);
    };

    let mut current = root.clone();
    let mut parents: Vec<Value> = Vec::with_capacity(init.len());
    for segment in init {
        if current.is_null() {
            return Err(NavError::PathFailure(
                "nullish intermediate on write path".to_owned(),
            ));
        }
        parents.push(current.clone());
        current = match segment {
            PathSegment::Field(name) => step_field(&current, name),
            PathSegment::Parent => current,
            PathSegment::Method { name, with_arg: _ } => {
                return Err(NavError::PathFailure(format!(
                    "cannot write through method segment {name}"
                )))
            }
            PathSegment::StandardVar(name) => ctx
                .standard_var(name)
                .ok_or_else(|| NavError::NotFound(name.clone()))?,
        };
    }

    if current.is_null() {
        return Err(NavError::PathFailure(
            "nullish intermediate on write path".to_owned(),
        ));
    }

    let mut updated = set_field(&current, last, write_value)?;
    for (segment, parent) in init.iter().rev().zip(parents.into_iter().rev()) {
        updated = match segment {
            PathSegment::Field(name) => set_field(&parent, &PathSegment::Field(name.clone()), updated)?,
            _ => {
                return Err(NavError::PathFailure(
                    "cannot write back through non-field segment".to_owned(),
                ))
            }
        };
    }
    Ok(updated)
}

fn set_field(current: &Value, segment: &PathSegment, write_value: Value) -> Result<Value, NavError> {
    let PathSegment::Field(name) = segment else {
        return Err(NavError::PathFailure(
            "cannot write through a non-field segment".to_owned(),
        ));
    };
    if let Ok(index) = name.parse::<usize>() {
        if index == 0 {
            return Err(NavError::PathFailure("0 is not a valid 1-based index".to_owned()));
        }
        let mut arr = current.as_array().cloned().unwrap_or_default();
        if index > arr.len() {
            arr.resize(index, Value::Null);
        }
        arr[index - 1] = write_value;
        return Ok(Value::Array(arr));
    }
    let mut obj = current.as_object().cloned().unwrap_or_default();
    obj.insert(name.clone(), write_value);
    Ok(Value::Object(obj))
}
