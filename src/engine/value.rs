//! Host value model as seen by the debugger
//!
//! The engine never owns script data. It sees values through these types,
//! and objects through the [`DebugObject`] trait the host implements.

use std::fmt;
use std::rc::Rc;

/// Shared handle to a host object
pub type ObjectRef = Rc<dyn DebugObject>;

/// A script value
#[derive(Clone)]
pub enum Value {
    /// An unset variable
    Undefined,
    String(String),
    Integer(i64),
    Float(f64),
    Object(ObjectRef),
}

impl Value {
    /// DBGp type name, as listed by `typemap_get`
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Object(_) => "object",
        }
    }

    /// Script truthiness: empty, `"0"` and zero are false
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::String(s) => !s.is_empty() && s != "0",
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Object(_) => true,
        }
    }

    /// Text sent as property data; `None` for objects
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Undefined => Some(String::new()),
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(format_float(*f)),
            Value::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "Undefined"),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Integer(i) => write!(f, "Integer({})", i),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Object(obj) => write!(f, "Object({})", obj.class_name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

/// Key token for a child of an object
///
/// Map-like and array-like hosts share one traversal path by describing
/// their children with these.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    /// Named member: `obj.name`
    Name(String),
    /// Integer key: `obj[3]`
    Index(i64),
    /// String key: `obj["key"]`
    Str(String),
}

impl Key {
    /// Name of the child property as shown to the client
    pub fn display_name(&self) -> String {
        match self {
            Key::Name(name) => name.clone(),
            Key::Index(i) => format!("[{}]", i),
            Key::Str(s) => format!("[\"{}\"]", s.replace('"', "\"\"")),
        }
    }

    /// Append this key to a parent's full name
    pub fn append_to(&self, fullname: &mut String) {
        if let Key::Name(name) = self {
            fullname.push('.');
            fullname.push_str(name);
        } else {
            fullname.push_str(&self.display_name());
        }
    }
}

/// Object introspection surface implemented by the host
///
/// Interior mutability is up to the host; the engine only calls
/// [`DebugObject::set`] from `property_set`.
pub trait DebugObject {
    /// Class name shown in the `classname` attribute
    fn class_name(&self) -> String;

    /// Named members, in display order
    fn properties(&self) -> Vec<(String, Value)>;

    /// Enumerated entries (array elements, map items)
    fn items(&self) -> Vec<(Key, Value)> {
        Vec::new()
    }

    /// Whether items are listed alongside the members
    ///
    /// When false, they are grouped under an `<enum>` pseudo-child instead.
    fn items_inline(&self) -> bool {
        true
    }

    /// Base object / prototype, shown as the `<base>` pseudo-child
    fn base(&self) -> Option<ObjectRef> {
        None
    }

    /// Look up one child
    fn get(&self, key: &Key) -> Option<Value> {
        match key {
            Key::Name(name) => self
                .properties()
                .into_iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v),
            _ => self
                .items()
                .into_iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v),
        }
    }

    /// Assign one child
    fn set(&self, key: &Key, _value: Value) -> Result<(), String> {
        Err(format!("{} is read-only", key.display_name()))
    }
}

/// Variable facets reported in the `facet` attribute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Facets {
    pub alias: bool,
    pub builtin: bool,
    pub is_static: bool,
}

impl Facets {
    /// Space-separated facet list
    pub fn to_attribute(self) -> String {
        let mut parts = Vec::new();
        if self.alias {
            parts.push("Alias");
        }
        if self.builtin {
            parts.push("Builtin");
        }
        if self.is_static {
            parts.push("Static");
        }
        parts.join(" ")
    }
}

/// A named variable snapshot handed to the engine by the host
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub value: Value,
    pub facets: Facets,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            facets: Facets::default(),
        }
    }

    pub fn with_facets(mut self, facets: Facets) -> Self {
        self.facets = facets;
        self
    }
}
