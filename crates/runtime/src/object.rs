//! Heap objects (§3 "Object"): the `Rc<RefCell<..>>` payloads a
//! [`crate::value::Value::Object`] points at. `String`/`Array`/`Map`/
//! `Struct`/`Function`/`Closure` are the header kinds §3 requires; there is
//! no separate `Native` kind because a native function still occupies a
//! slot in the package's function table (`Function { native: true, .. }`,
//! from `matiria-compiler::codegen`) and is told apart only by that flag,
//! not by a different `Value` shape.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;

/// A hashable subset of [`Value`], restricted to `Bool`/`Int`/`Float`/
/// `String` per the map-key-type decision. `Float` keys hash/compare on
/// the host bit pattern, so `0.0` and `-0.0` are distinct keys and `NaN`
/// is usable (if unhelpfully, since it never equals itself) as one —
/// consistent with [`Value`]'s own no-special-casing float equality.
#[derive(Debug, Clone)]
pub enum MapKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(Rc<str>),
}

impl MapKey {
    pub fn from_value(value: &Value) -> Option<MapKey> {
        match value {
            Value::Bool(b) => Some(MapKey::Bool(*b)),
            Value::Int(n) => Some(MapKey::Int(*n)),
            Value::Float(f) => Some(MapKey::Float(f.to_bits())),
            Value::Object(obj) => match &**obj {
                Object::String(s) => Some(MapKey::Str(s.clone())),
                _ => None,
            },
            Value::Nil => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            MapKey::Bool(b) => Value::Bool(*b),
            MapKey::Int(n) => Value::Int(*n),
            MapKey::Float(bits) => Value::Float(f64::from_bits(*bits)),
            MapKey::Str(s) => Value::Object(Rc::new(Object::String(s.clone()))),
        }
    }
}

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MapKey::Bool(a), MapKey::Bool(b)) => a == b,
            (MapKey::Int(a), MapKey::Int(b)) => a == b,
            (MapKey::Float(a), MapKey::Float(b)) => a == b,
            (MapKey::Str(a), MapKey::Str(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for MapKey {}

impl std::hash::Hash for MapKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            MapKey::Bool(b) => b.hash(state),
            MapKey::Int(n) => n.hash(state),
            MapKey::Float(bits) => bits.hash(state),
            MapKey::Str(s) => s.hash(state),
        }
    }
}

#[derive(Debug)]
pub enum Object {
    String(Rc<str>),
    Array(RefCell<Vec<Value>>),
    Map(RefCell<HashMap<MapKey, Value>>),
    /// `CONSTRUCTOR` carries only a field count, not a type name (struct
    /// identity is erased after validation, the way a Rust struct's name
    /// doesn't survive into its layout) — field access is by position,
    /// resolved against the static type at validation time.
    Struct { fields: RefCell<Vec<Value>> },
    /// A reference to a top-level function: no captures are possible at
    /// file scope, so there is nothing beyond the function-table index.
    Function { index: u32 },
    /// A nested `fn` together with the upvalue cells the `CLOSURE` opcode
    /// captured at creation time (§4.6 "Closures").
    Closure {
        index: u32,
        upvalues: Vec<Rc<RefCell<Value>>>,
    },
}

impl Object {
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::String(_) => "String",
            Object::Array(_) => "Array",
            Object::Map(_) => "Map",
            Object::Struct { .. } => "Struct",
            Object::Function { .. } | Object::Closure { .. } => "Function",
        }
    }

    /// The function-table index a `CALL` dispatches to, for either kind of
    /// callable object.
    pub fn function_index(&self) -> Option<u32> {
        match self {
            Object::Function { index } | Object::Closure { index, .. } => Some(*index),
            _ => None,
        }
    }
}

impl PartialEq for Object {
    /// Identity, not structural comparison: this language never exposes an
    /// `==` operator over non-numeric operands (the validator only unifies
    /// numeric/bool operands for `Eq`/`NotEq`), so object equality only
    /// ever matters for things like deduplicating map keys, which goes
    /// through [`MapKey`] instead.
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_key_round_trips_through_value() {
        let key = MapKey::from_value(&Value::Int(7)).unwrap();
        assert_eq!(key.to_value(), Value::Int(7));
    }

    #[test]
    fn float_object_values_are_not_valid_map_keys() {
        let array_value = Value::Object(Rc::new(Object::Array(RefCell::new(vec![]))));
        assert!(MapKey::from_value(&array_value).is_none());
    }

    #[test]
    fn distinct_float_bit_patterns_are_distinct_keys() {
        let a = MapKey::from_value(&Value::Float(0.0)).unwrap();
        let b = MapKey::from_value(&Value::Float(-0.0)).unwrap();
        assert_ne!(a, b);
    }
}
