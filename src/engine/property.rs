//! Property serializer
//!
//! Turns a variable, literal or object into a `<property>` tree bounded by
//! depth, child count and data size. The full name of each node is built in
//! one shared `String` that is truncated back after every child.

use std::fmt;
use std::rc::Rc;

use crate::common::{Error, Result};
use crate::protocol::{Buffer, BufferFull};

use super::value::{Facets, Key, ObjectRef, Value, Variable};

/// Name of the pseudo-child holding an object's base
pub const BASE_NAME: &str = "<base>";
/// Name of the pseudo-child grouping an object's enumerated items
pub const ENUM_NAME: &str = "<enum>";
/// Pseudo-variable exposing the exception being reported
pub const EXCEPTION_NAME: &str = "<exception>";

/// Feature-negotiated serialization limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyLimits {
    /// Bytes of scalar data sent inline; 0 means unlimited
    pub max_data: usize,
    /// Children per page
    pub max_children: usize,
    /// Levels of children below the requested property
    pub max_depth: usize,
}

impl Default for PropertyLimits {
    fn default() -> Self {
        Self {
            max_data: 1024,
            max_children: 1000,
            max_depth: 1,
        }
    }
}

/// A thing to serialize
#[derive(Clone)]
pub enum PropertySource {
    /// A live variable
    Var(Variable),
    /// A variable of an older invocation, read from its backup
    Backup(Variable),
    /// A read-only value, such as an expression result
    Literal(Value),
    /// The enumerated items of an object
    Enum(ObjectRef),
}

impl fmt::Debug for PropertySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(var) => write!(f, "Var({:?})", var),
            Self::Backup(var) => write!(f, "Backup({:?})", var),
            Self::Literal(value) => write!(f, "Literal({:?})", value),
            Self::Enum(obj) => write!(f, "Enum({})", obj.class_name()),
        }
    }
}

impl PropertySource {
    /// Underlying value; `None` for the enumeration pseudo-object
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Var(var) | Self::Backup(var) => Some(&var.value),
            Self::Literal(value) => Some(value),
            Self::Enum(_) => None,
        }
    }

    fn facets(&self) -> Facets {
        match self {
            Self::Var(var) | Self::Backup(var) => var.facets,
            _ => Facets::default(),
        }
    }

    fn object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Enum(obj) => Some(obj),
            _ => self.value().and_then(Value::as_object),
        }
    }

    /// DBGp type name
    pub fn type_name(&self) -> &'static str {
        match self.value() {
            Some(value) => value.type_name(),
            None => "object",
        }
    }

    /// Raw scalar data; `None` for objects
    pub fn text(&self) -> Option<String> {
        self.value().and_then(Value::to_text)
    }
}

/// How a child is reached from its parent
enum ChildName {
    Base,
    Enum,
    Key(Key),
}

impl ChildName {
    fn display(&self) -> String {
        match self {
            Self::Base => BASE_NAME.to_string(),
            Self::Enum => ENUM_NAME.to_string(),
            Self::Key(key) => key.display_name(),
        }
    }

    fn append_to(&self, fullname: &mut String) {
        match self {
            Self::Base => {
                fullname.push('.');
                fullname.push_str(BASE_NAME);
            }
            Self::Enum => {
                fullname.push('.');
                fullname.push_str(ENUM_NAME);
            }
            Self::Key(key) => key.append_to(fullname),
        }
    }
}

/// Children of an object in display order: base, members, then items
fn children(source: &PropertySource) -> Vec<(ChildName, PropertySource)> {
    let mut out = Vec::new();
    match source {
        PropertySource::Enum(obj) => {
            for (key, value) in obj.items() {
                out.push((ChildName::Key(key), PropertySource::Literal(value)));
            }
        }
        _ => {
            let Some(obj) = source.object() else {
                return out;
            };
            if let Some(base) = obj.base() {
                out.push((ChildName::Base, PropertySource::Literal(Value::Object(base))));
            }
            for (name, value) in obj.properties() {
                out.push((ChildName::Key(Key::Name(name)), PropertySource::Literal(value)));
            }
            if obj.items_inline() {
                for (key, value) in obj.items() {
                    out.push((ChildName::Key(key), PropertySource::Literal(value)));
                }
            } else if !obj.items().is_empty() {
                out.push((ChildName::Enum, PropertySource::Enum(Rc::clone(obj))));
            }
        }
    }
    out
}

fn object_id(obj: &ObjectRef) -> *const () {
    Rc::as_ptr(obj) as *const ()
}

/// The `page`-th slice of `max_data` bytes; `max_data` 0 means all of it
pub fn data_page(data: &[u8], max_data: usize, page: usize) -> &[u8] {
    if max_data == 0 {
        return data;
    }
    let start = page.saturating_mul(max_data).min(data.len());
    let end = start.saturating_add(max_data).min(data.len());
    &data[start..end]
}

/// Request-scoped serializer state
pub struct PropertyWriter<'a> {
    buf: &'a mut Buffer,
    limits: PropertyLimits,
    page: usize,
    fullname: String,
    // Objects on the path from the root, for cycle detection
    path: Vec<*const ()>,
}

impl<'a> PropertyWriter<'a> {
    pub fn new(buf: &'a mut Buffer, limits: PropertyLimits) -> Self {
        Self {
            buf,
            limits,
            page: 0,
            fullname: String::new(),
            path: Vec::new(),
        }
    }

    /// Page of children (or of scalar data) for the top-level property
    pub fn with_page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    /// Write one top-level property
    pub fn write(
        &mut self,
        name: &str,
        fullname: &str,
        source: &PropertySource,
    ) -> std::result::Result<(), BufferFull> {
        self.fullname.clear();
        self.fullname.push_str(fullname);
        self.path.clear();
        let page = self.page;
        self.write_node(name, source, 0, page)
    }

    fn write_node(
        &mut self,
        name: &str,
        source: &PropertySource,
        depth: usize,
        page: usize,
    ) -> std::result::Result<(), BufferFull> {
        self.buf.write_str("<property name=\"")?;
        self.buf.write_escaped(name)?;
        self.buf.write_str("\" fullname=\"")?;
        self.buf.write_escaped(&self.fullname)?;
        write!(self.buf, "\" type=\"{}\"", source.type_name())?;
        let facet = source.facets().to_attribute();
        if !facet.is_empty() {
            write!(self.buf, " facet=\"{}\"", facet)?;
        }

        match source.object() {
            Some(obj) => self.write_object(obj, source, depth, page),
            None => {
                let text = source.text().unwrap_or_default();
                self.write_scalar(text.as_bytes(), page)
            }
        }
    }

    fn write_scalar(&mut self, data: &[u8], page: usize) -> std::result::Result<(), BufferFull> {
        let chunk = data_page(data, self.limits.max_data, page);
        write!(self.buf, " size=\"{}\" encoding=\"base64\">", data.len())?;
        self.buf.write_base64(chunk)?;
        self.buf.write_str("</property>")
    }

    fn write_object(
        &mut self,
        obj: &ObjectRef,
        source: &PropertySource,
        depth: usize,
        page: usize,
    ) -> std::result::Result<(), BufferFull> {
        let class_name = match source {
            PropertySource::Enum(_) => "Enumerator".to_string(),
            _ => obj.class_name(),
        };
        let children = children(source);
        let page_size = self.limits.max_children.max(1);

        self.buf.write_str(" classname=\"")?;
        self.buf.write_escaped(&class_name)?;
        write!(
            self.buf,
            "\" children=\"{}\" numchildren=\"{}\" page=\"{}\" pagesize=\"{}\">",
            !children.is_empty() as u8,
            children.len(),
            page,
            page_size
        )?;

        let id = object_id(obj);
        let expand = depth < self.limits.max_depth && !self.path.contains(&id);
        if expand {
            self.path.push(id);
            let parent_len = self.fullname.len();
            for (child_name, child) in children.iter().skip(page.saturating_mul(page_size)).take(page_size) {
                child_name.append_to(&mut self.fullname);
                let result = self.write_node(&child_name.display(), child, depth + 1, 0);
                self.fullname.truncate(parent_len);
                result?;
            }
            self.path.pop();
        }
        self.buf.write_str("</property>")
    }
}

/// One step of a property name after the root
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Key(Key),
    Base,
    Enum,
}

/// A parsed property full name
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyPath {
    pub root: String,
    pub segments: Vec<Segment>,
}

impl PropertyPath {
    /// Parse `root(.name | [int] | ["str"] | .<base> | .<enum>)*`
    pub fn parse(fullname: &str) -> Result<Self> {
        let unknown = || Error::UnknownProperty(fullname.to_string());
        let bytes = fullname.as_bytes();

        let root_end = if fullname.starts_with('<') {
            fullname.find('>').map(|i| i + 1).ok_or_else(unknown)?
        } else {
            fullname.find(['.', '[']).unwrap_or(fullname.len())
        };
        let root = &fullname[..root_end];
        if root.is_empty() {
            return Err(unknown());
        }

        let mut segments = Vec::new();
        let mut i = root_end;
        while i < bytes.len() {
            match bytes[i] {
                b'.' => {
                    let rest = &fullname[i + 1..];
                    if let Some(after) = rest.strip_prefix(BASE_NAME) {
                        segments.push(Segment::Base);
                        i = fullname.len() - after.len();
                        continue;
                    }
                    if let Some(after) = rest.strip_prefix(ENUM_NAME) {
                        segments.push(Segment::Enum);
                        i = fullname.len() - after.len();
                        continue;
                    }
                    let len = rest.find(['.', '[']).unwrap_or(rest.len());
                    if len == 0 {
                        return Err(unknown());
                    }
                    segments.push(Segment::Key(Key::Name(rest[..len].to_string())));
                    i += 1 + len;
                }
                b'[' if bytes.get(i + 1) == Some(&b'"') => {
                    let (key, consumed) = parse_quoted(&fullname[i + 2..]).ok_or_else(unknown)?;
                    segments.push(Segment::Key(Key::Str(key)));
                    i += 2 + consumed;
                }
                b'[' => {
                    let rest = &fullname[i + 1..];
                    let close = rest.find(']').ok_or_else(unknown)?;
                    let index = rest[..close].trim().parse().map_err(|_| unknown())?;
                    segments.push(Segment::Key(Key::Index(index)));
                    i += close + 2;
                }
                _ => return Err(unknown()),
            }
        }

        Ok(Self {
            root: root.to_string(),
            segments,
        })
    }

    /// Display name of the last element
    pub fn leaf_name(&self) -> String {
        match self.segments.last() {
            None => self.root.clone(),
            Some(Segment::Base) => BASE_NAME.to_string(),
            Some(Segment::Enum) => ENUM_NAME.to_string(),
            Some(Segment::Key(key)) => key.display_name(),
        }
    }
}

// Parses `key"]` (after the opening `["`), where `""` is a literal quote.
// Returns the key and the bytes consumed including the closing `"]`.
fn parse_quoted(s: &str) -> Option<(String, usize)> {
    let mut key = String::new();
    let mut chars = s.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '"' {
            key.push(c);
            continue;
        }
        match chars.peek() {
            Some((_, '"')) => {
                key.push('"');
                chars.next();
            }
            Some((j, ']')) => return Some((key, j + 1)),
            _ => return None,
        }
    }
    None
}

/// Follow `segments` from a root property
pub fn resolve(root: PropertySource, segments: &[Segment], fullname: &str) -> Result<PropertySource> {
    let unknown = || Error::UnknownProperty(fullname.to_string());
    let mut current = root;
    for segment in segments {
        let next = match (&current, segment) {
            (PropertySource::Enum(obj), Segment::Key(key)) => obj
                .items()
                .into_iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| PropertySource::Literal(v))
                .ok_or_else(unknown)?,
            (PropertySource::Enum(_), _) => return Err(unknown()),
            (_, Segment::Base) => {
                let obj = current.object().ok_or_else(unknown)?;
                let base = obj.base().ok_or_else(unknown)?;
                PropertySource::Literal(Value::Object(base))
            }
            (_, Segment::Enum) => {
                let obj = current.object().ok_or_else(unknown)?;
                PropertySource::Enum(Rc::clone(obj))
            }
            (_, Segment::Key(key)) => {
                let obj = current.object().ok_or_else(unknown)?;
                obj.get(key).map(PropertySource::Literal).ok_or_else(unknown)?
            }
        };
        current = next;
    }
    Ok(current)
}

/// Assign through an object member path; `segments` must not be empty
pub fn assign(root: PropertySource, segments: &[Segment], fullname: &str, value: Value) -> Result<()> {
    let Some((last, parents)) = segments.split_last() else {
        return Err(Error::EvalFailed(format!("{} is not a member", fullname)));
    };
    let parent = resolve(root, parents, fullname)?;
    let key = match last {
        Segment::Key(key) => key,
        _ => {
            return Err(Error::EvalFailed(format!(
                "{} cannot be assigned",
                fullname
            )))
        }
    };
    let obj = match &parent {
        PropertySource::Enum(obj) => Rc::clone(obj),
        other => other
            .object()
            .cloned()
            .ok_or_else(|| Error::UnknownProperty(fullname.to_string()))?,
    };
    obj.set(key, value).map_err(Error::EvalFailed)
}

/// Convert `property_set` data into a value of the requested type
///
/// Without a type the text is stored as a string exactly as sent, so
/// "007" reads back as "007".
pub fn parse_typed_value(data: &str, type_name: Option<&str>) -> Result<Value> {
    match type_name {
        Some("integer") | Some("int") => data
            .trim()
            .parse()
            .map(Value::Integer)
            .map_err(|_| Error::EvalFailed(format!("'{}' is not an integer", data))),
        Some("float") => data
            .trim()
            .parse()
            .map(Value::Float)
            .map_err(|_| Error::EvalFailed(format!("'{}' is not a float", data))),
        Some("string") | None => Ok(Value::String(data.to_string())),
        Some(other) => Err(Error::InvalidOptions(format!("unsupported type '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::value::DebugObject;
    use std::cell::RefCell;

    struct TestObject {
        class: &'static str,
        members: RefCell<Vec<(String, Value)>>,
        items: Vec<(Key, Value)>,
        inline: bool,
        base: Option<ObjectRef>,
        me: RefCell<Option<std::rc::Weak<TestObject>>>,
    }

    impl TestObject {
        fn new(class: &'static str) -> Self {
            Self {
                class,
                members: RefCell::new(Vec::new()),
                items: Vec::new(),
                inline: true,
                base: None,
                me: RefCell::new(None),
            }
        }
    }

    impl DebugObject for TestObject {
        fn class_name(&self) -> String {
            self.class.to_string()
        }

        fn properties(&self) -> Vec<(String, Value)> {
            let mut props = self.members.borrow().clone();
            if let Some(me) = self.me.borrow().as_ref().and_then(|w| w.upgrade()) {
                props.push(("self".into(), Value::Object(me)));
            }
            props
        }

        fn items(&self) -> Vec<(Key, Value)> {
            self.items.clone()
        }

        fn items_inline(&self) -> bool {
            self.inline
        }

        fn base(&self) -> Option<ObjectRef> {
            self.base.clone()
        }

        fn set(&self, key: &Key, value: Value) -> std::result::Result<(), String> {
            let Key::Name(name) = key else {
                return Err("items are read-only".into());
            };
            let mut members = self.members.borrow_mut();
            match members.iter_mut().find(|(n, _)| n == name) {
                Some(slot) => slot.1 = value,
                None => members.push((name.clone(), value)),
            }
            Ok(())
        }
    }

    fn render(name: &str, source: &PropertySource, limits: PropertyLimits, page: usize) -> String {
        let mut buf = Buffer::new();
        PropertyWriter::new(&mut buf, limits)
            .with_page(page)
            .write(name, name, source)
            .unwrap();
        String::from_utf8(buf.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn test_scalar_property() {
        let source = PropertySource::Var(Variable::new("x", Value::Integer(42)));
        let xml = render("x", &source, PropertyLimits::default(), 0);
        assert_eq!(
            xml,
            "<property name=\"x\" fullname=\"x\" type=\"integer\" size=\"2\" encoding=\"base64\">NDI=</property>"
        );
    }

    #[test]
    fn test_long_scalar_is_truncated_and_pageable() {
        let text = "abcdefghij";
        let source = PropertySource::Literal(Value::from(text));
        let limits = PropertyLimits {
            max_data: 4,
            ..Default::default()
        };
        let first = render("s", &source, limits, 0);
        assert!(first.contains("size=\"10\""));
        assert!(first.contains(">YWJjZA==<"));
        let last = render("s", &source, limits, 2);
        assert!(last.contains(">aWo=<"));

        let unlimited = PropertyLimits {
            max_data: 0,
            ..Default::default()
        };
        assert!(render("s", &source, unlimited, 0).contains(">YWJjZGVmZ2hpag==<"));
    }

    #[test]
    fn test_object_children_and_fullnames() {
        let base: ObjectRef = Rc::new(TestObject::new("Base"));
        let mut obj = TestObject::new("Point");
        obj.members
            .borrow_mut()
            .push(("x".into(), Value::Integer(1)));
        obj.items = vec![(Key::Index(1), Value::from("one")), (Key::Str("k".into()), Value::from("v"))];
        obj.base = Some(base);
        let obj: ObjectRef = Rc::new(obj);

        let xml = render("p", &PropertySource::Literal(Value::Object(obj)), PropertyLimits::default(), 0);
        assert!(xml.starts_with(
            "<property name=\"p\" fullname=\"p\" type=\"object\" classname=\"Point\" children=\"1\" numchildren=\"4\" page=\"0\" pagesize=\"1000\">"
        ));
        let base_at = xml.find("fullname=\"p.&lt;base&gt;\"").unwrap();
        let x_at = xml.find("fullname=\"p.x\"").unwrap();
        let one_at = xml.find("fullname=\"p[1]\"").unwrap();
        let k_at = xml.find("fullname=\"p[&quot;k&quot;]\"").unwrap();
        assert!(base_at < x_at && x_at < one_at && one_at < k_at);
    }

    #[test]
    fn test_depth_limit() {
        let inner: ObjectRef = Rc::new(TestObject::new("Inner"));
        let outer = TestObject::new("Outer");
        outer
            .members
            .borrow_mut()
            .push(("inner".into(), Value::Object(inner)));
        let outer: ObjectRef = Rc::new(outer);
        let source = PropertySource::Literal(Value::Object(outer));

        let shallow = PropertyLimits {
            max_depth: 0,
            ..Default::default()
        };
        let xml = render("o", &source, shallow, 0);
        assert!(xml.contains("numchildren=\"1\""));
        assert!(!xml.contains("o.inner"));

        let xml = render("o", &source, PropertyLimits::default(), 0);
        assert!(xml.contains("fullname=\"o.inner\""));
    }

    #[test]
    fn test_cycle_is_not_expanded_twice() {
        let obj = Rc::new(TestObject::new("Loop"));
        *obj.me.borrow_mut() = Some(Rc::downgrade(&obj));
        let obj: ObjectRef = obj;
        let limits = PropertyLimits {
            max_depth: 50,
            ..Default::default()
        };
        let xml = render("a", &PropertySource::Literal(Value::Object(obj)), limits, 0);
        assert_eq!(xml.matches("<property ").count(), 2);
        assert!(xml.contains("fullname=\"a.self\""));
        assert!(!xml.contains("a.self.self"));
    }

    #[test]
    fn test_paging_children() {
        let mut obj = TestObject::new("Array");
        obj.items = (1..=5).map(|i| (Key::Index(i), Value::Integer(i * 10))).collect();
        let obj: ObjectRef = Rc::new(obj);
        let limits = PropertyLimits {
            max_children: 2,
            ..Default::default()
        };
        let source = PropertySource::Literal(Value::Object(obj));
        let xml = render("arr", &source, limits, 1);
        assert!(xml.contains("numchildren=\"5\" page=\"1\" pagesize=\"2\""));
        assert!(xml.contains("fullname=\"arr[3]\""));
        assert!(xml.contains("fullname=\"arr[4]\""));
        assert!(!xml.contains("fullname=\"arr[2]\""));
        assert!(!xml.contains("fullname=\"arr[5]\""));
    }

    #[test]
    fn test_enum_pseudo_child() {
        let mut obj = TestObject::new("Map");
        obj.items = vec![(Key::Str("a".into()), Value::Integer(1))];
        obj.inline = false;
        let obj: ObjectRef = Rc::new(obj);
        let source = PropertySource::Literal(Value::Object(Rc::clone(&obj)));
        let xml = render("m", &source, PropertyLimits::default(), 0);
        assert!(xml.contains("name=\"&lt;enum&gt;\""));
        assert!(xml.contains("classname=\"Enumerator\""));

        let path = PropertyPath::parse("m.<enum>[\"a\"]").unwrap();
        let value = resolve(source, &path.segments, "m.<enum>[\"a\"]").unwrap();
        assert_eq!(value.value(), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_source_debug_names_object_class() {
        let obj: ObjectRef = Rc::new(TestObject::new("Map"));
        assert_eq!(format!("{:?}", PropertySource::Enum(obj)), "Enum(Map)");
        assert_eq!(
            format!("{:?}", PropertySource::Literal(Value::Integer(3))),
            "Literal(Integer(3))"
        );
    }

    #[test]
    fn test_parse_names() {
        let path = PropertyPath::parse("obj.list[3][\"say \"\"hi\"\"\"].<base>").unwrap();
        assert_eq!(path.root, "obj");
        assert_eq!(
            path.segments,
            vec![
                Segment::Key(Key::Name("list".into())),
                Segment::Key(Key::Index(3)),
                Segment::Key(Key::Str("say \"hi\"".into())),
                Segment::Base,
            ]
        );
        assert_eq!(path.leaf_name(), "<base>");

        let exc = PropertyPath::parse("<exception>.Message").unwrap();
        assert_eq!(exc.root, "<exception>");
        assert_eq!(exc.leaf_name(), "Message");
    }

    #[test]
    fn test_parse_bad_names() {
        for name in ["", ".x", "a..b", "a[", "a[x]", "a[\"open"] {
            assert!(
                matches!(PropertyPath::parse(name), Err(Error::UnknownProperty(_))),
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_resolve_unknown_member() {
        let obj: ObjectRef = Rc::new(TestObject::new("Empty"));
        let source = PropertySource::Literal(Value::Object(obj));
        let path = PropertyPath::parse("o.missing").unwrap();
        assert!(matches!(
            resolve(source, &path.segments, "o.missing"),
            Err(Error::UnknownProperty(_))
        ));
    }

    #[test]
    fn test_assign_member() {
        let obj = Rc::new(TestObject::new("Bag"));
        let handle: ObjectRef = obj.clone();
        let path = PropertyPath::parse("bag.count").unwrap();
        assign(
            PropertySource::Literal(Value::Object(handle)),
            &path.segments,
            "bag.count",
            Value::Integer(3),
        )
        .unwrap();
        assert_eq!(obj.get(&Key::Name("count".into())), Some(Value::Integer(3)));
    }

    #[test]
    fn test_parse_typed_value() {
        assert_eq!(parse_typed_value("12", Some("integer")).unwrap(), Value::Integer(12));
        assert_eq!(parse_typed_value("1.5", Some("float")).unwrap(), Value::Float(1.5));
        assert_eq!(parse_typed_value("007", None).unwrap(), Value::from("007"));
        assert_eq!(parse_typed_value("1.50", None).unwrap(), Value::from("1.50"));
        assert_eq!(parse_typed_value("12", Some("string")).unwrap(), Value::from("12"));
        assert!(matches!(
            parse_typed_value("x", Some("integer")),
            Err(Error::EvalFailed(_))
        ));
    }
}
