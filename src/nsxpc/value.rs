//! Type-directed value encode/decode: the layer above the raw codec that
//! knows about invocations, proxies, out-of-line transport objects and
//! allow-list enforcement.

use crate::error::{NsxpcError, NsxpcResult};
use crate::nsxpc::codec::{Handle, Reader, Writer, MAX_CONTAINER_DEPTH};

/// A decoded argument or return value. Structs decode as `Dict` (positional,
/// null-keyed fields), matching the wire representation exactly.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Str(String),
    Data(Vec<u8>),
    Array(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    /// `{"proxynum": n}` — a reference to an exported/imported proxy.
    Proxy(u64),
    /// Index into the message's `ool_objects` side table (endpoints,
    /// connections, file descriptors).
    OutOfLine(usize),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Dict(d) => Some(d.as_slice()),
            _ => None,
        }
    }
}

/// What an object-pointer argument is allowed to decode as. `spec.md` §4.2:
/// checked against the *encoded class name*, or any ancestor in `allowed`.
#[derive(Debug, Clone, Default)]
pub struct ClassAllowList {
    pub allowed: Vec<String>,
}

impl ClassAllowList {
    pub fn new(allowed: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ClassAllowList {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    /// `class` may itself be a `:`-joined ancestry chain (most-derived
    /// first), the way a coder protocol would report `"Sub:Base:NSObject"`.
    pub fn permits(&self, class_chain: &str) -> bool {
        class_chain
            .split(':')
            .any(|class| self.allowed.iter().any(|a| a == class))
    }
}

pub fn encode_value(w: &mut Writer, value: &Value) -> NsxpcResult<()> {
    match value {
        Value::Null => w.write_null(),
        Value::Bool(b) => w.write_bool(*b),
        Value::Int(i) => w.write_signed_int(*i),
        Value::UInt(u) => w.write_u64_fixed(*u),
        Value::Float(f) => w.write_f32(*f),
        Value::Double(d) => w.write_f64(*d),
        Value::Str(s) => w.write_string(s),
        Value::Data(d) => w.write_data(d),
        Value::Array(items) => {
            w.start_array()?;
            for item in items {
                encode_value(w, item)?;
            }
            w.end_array()?;
        }
        Value::Dict(pairs) => {
            w.start_dict()?;
            for (k, v) in pairs {
                encode_value(w, k)?;
                encode_value(w, v)?;
            }
            w.end_dict()?;
        }
        Value::Proxy(n) => {
            w.start_dict()?;
            w.write_ascii("proxynum")?;
            w.write_int(*n);
            w.end_dict()?;
        }
        Value::OutOfLine(idx) => {
            w.start_dict()?;
            w.write_ascii("oolidx")?;
            w.write_int(*idx as u64);
            w.end_dict()?;
        }
    }
    Ok(())
}

/// Decodes any object starting at `h`, without allow-list enforcement (used
/// for plain data payloads that carry no class-restricted object pointers).
pub fn decode_value(r: &Reader, h: Handle) -> NsxpcResult<Value> {
    decode_value_checked(r, h, None)
}

/// Decodes, enforcing `allow_list` on any dict that looks like a
/// proxy/generic object marker with a `"class"` key. Most dicts here are
/// plain structs or invocation argument containers; only ones tagged with a
/// class name are subject to the allow-list check described in §4.2.
pub fn decode_value_checked(
    r: &Reader,
    h: Handle,
    allow_list: Option<&ClassAllowList>,
) -> NsxpcResult<Value> {
    decode_value_at_depth(r, h, allow_list, 0)
}

/// Recursive worker behind [`decode_value_checked`]; `depth` counts container
/// nesting so a crafted payload with unbounded array/dict nesting fails with
/// a typed error instead of exhausting the stack.
fn decode_value_at_depth(
    r: &Reader,
    h: Handle,
    allow_list: Option<&ClassAllowList>,
    depth: usize,
) -> NsxpcResult<Value> {
    if depth >= MAX_CONTAINER_DEPTH {
        return Err(NsxpcError::malformed("container nesting too deep"));
    }
    if r.is_null(h)? {
        return Ok(Value::Null);
    }
    // Try each tag family; codec read_* calls return a MalformedWire error
    // on a tag mismatch, so probe in cheapest-first order.
    if let Ok(b) = r.read_bool(h) {
        return Ok(Value::Bool(b));
    }
    if let Ok(f) = r.read_f32(h) {
        return Ok(Value::Float(f));
    }
    if let Ok(d) = r.read_f64(h) {
        return Ok(Value::Double(d));
    }
    // The dedicated fixed-width tag (0xf8) is unsigned-only; the minimal-
    // width tag carries a signed, two's-complement value (see `write_int`
    // vs `write_signed_int`/`read_signed_int`).
    if let Ok(u) = r.read_u64_fixed(h) {
        return Ok(Value::UInt(u));
    }
    if let Ok(i) = r.read_signed_int(h) {
        return Ok(Value::Int(i));
    }
    if let Ok(s) = r.read_string(h) {
        return Ok(Value::Str(s));
    }
    if let Ok(data) = r.read_data(h) {
        return Ok(Value::Data(data.to_vec()));
    }
    if let Ok((first, end)) = r.start_array(h) {
        let items = r.array_items(first, end)?;
        let mut decoded = Vec::with_capacity(items.len());
        for item in items {
            decoded.push(decode_value_at_depth(r, item, allow_list, depth + 1)?);
        }
        return Ok(Value::Array(decoded));
    }
    if let Ok((first, end)) = r.start_dict(h) {
        let pairs = r.dict_items(first, end)?;
        if let Some((class_handle, _)) = pairs.first() {
            if let Ok(key) = r.read_ascii(*class_handle) {
                if key == "class" {
                    let class_value = r.read_ascii(pairs[0].1)?;
                    if let Some(allow) = allow_list {
                        if !allow.permits(&class_value) {
                            return Err(NsxpcError::InsecureDecode {
                                class: class_value,
                                argument: "object".to_string(),
                            });
                        }
                    }
                }
                if key == "proxynum" {
                    let n = r.read_int(pairs[0].1)?;
                    return Ok(Value::Proxy(n));
                }
                if key == "oolidx" {
                    let n = r.read_int(pairs[0].1)?;
                    return Ok(Value::OutOfLine(n as usize));
                }
            }
        }
        let mut decoded = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            decoded.push((
                decode_value_at_depth(r, k, allow_list, depth + 1)?,
                decode_value_at_depth(r, v, allow_list, depth + 1)?,
            ));
        }
        return Ok(Value::Dict(decoded));
    }
    Err(NsxpcError::malformed("unrecognized object tag"))
}

/// Out-of-line transport-native objects referenced by index from within a
/// message's encoded values (endpoints, connections, file descriptors).
#[derive(Debug, Clone, Default)]
pub struct OolTable {
    pub objects: Vec<OolObject>,
}

#[derive(Debug, Clone)]
pub enum OolObject {
    Endpoint(String),
    FileDescriptor(i32),
}

impl OolTable {
    pub fn push(&mut self, obj: OolObject) -> usize {
        self.objects.push(obj);
        self.objects.len() - 1
    }

    pub fn get(&self, idx: usize) -> NsxpcResult<&OolObject> {
        self.objects
            .get(idx)
            .ok_or_else(|| NsxpcError::malformed("ool_objects index out of range"))
    }
}

/// Builds the one-dict invocation payload: `selector`, `signature`, and one
/// positional array of already-encoded argument values.
pub fn build_invocation(selector: &str, signature: &str, args: Vec<Value>) -> Value {
    Value::Dict(vec![
        (Value::Str("selector".into()), Value::Str(selector.into())),
        (Value::Str("signature".into()), Value::Str(signature.into())),
        (Value::Str("args".into()), Value::Array(args)),
    ])
}

pub fn invocation_selector(v: &Value) -> NsxpcResult<&str> {
    field(v, "selector")?
        .as_str()
        .ok_or_else(|| NsxpcError::malformed("invocation selector is not a string"))
}

pub fn invocation_signature(v: &Value) -> NsxpcResult<&str> {
    field(v, "signature")?
        .as_str()
        .ok_or_else(|| NsxpcError::malformed("invocation signature is not a string"))
}

pub fn invocation_args(v: &Value) -> NsxpcResult<&[Value]> {
    match field(v, "args")? {
        Value::Array(items) => Ok(items.as_slice()),
        _ => Err(NsxpcError::malformed("invocation args is not an array")),
    }
}

/// Walks every `Value::Proxy` marker reachable from `value`, depth-first,
/// invoking `f` once per occurrence. Used to retain/bump proxy references
/// when a value tree that may carry object pointers crosses the wire.
pub fn visit_proxies(value: &Value, f: &mut impl FnMut(u64)) {
    match value {
        Value::Proxy(n) => f(*n),
        Value::Array(items) => {
            for item in items {
                visit_proxies(item, f);
            }
        }
        Value::Dict(pairs) => {
            for (k, v) in pairs {
                visit_proxies(k, f);
                visit_proxies(v, f);
            }
        }
        _ => {}
    }
}

fn field<'a>(v: &'a Value, name: &str) -> NsxpcResult<&'a Value> {
    v.as_dict()
        .and_then(|pairs| {
            pairs
                .iter()
                .find(|(k, _)| k.as_str() == Some(name))
                .map(|(_, val)| val)
        })
        .ok_or_else(|| NsxpcError::malformed("invocation payload missing expected field"))
}

/// An exception thrown on the remote side, encoded as
/// `{"error": {domain, code, userinfo}}`.
pub fn build_error(domain: &str, code: i64, message: &str) -> Value {
    Value::Dict(vec![(
        Value::Str("error".into()),
        Value::Dict(vec![
            (Value::Str("domain".into()), Value::Str(domain.into())),
            (Value::Str("code".into()), Value::Int(code)),
            (
                Value::Str("userinfo".into()),
                Value::Dict(vec![(
                    Value::Str("message".into()),
                    Value::Str(message.into()),
                )]),
            ),
        ]),
    )])
}

pub fn as_error(v: &Value) -> Option<(String, i64, String)> {
    let err = v.as_dict()?.iter().find(|(k, _)| k.as_str() == Some("error"))?.1.as_dict()?;
    let mut domain = String::new();
    let mut code = 0i64;
    let mut message = String::new();
    for (k, val) in err {
        match k.as_str() {
            Some("domain") => domain = val.as_str().unwrap_or_default().to_string(),
            Some("code") => {
                if let Value::Int(i) = val {
                    code = *i;
                } else if let Value::UInt(u) = val {
                    code = *u as i64;
                }
            }
            Some("userinfo") => {
                if let Some(fields) = val.as_dict() {
                    if let Some((_, m)) = fields.iter().find(|(k, _)| k.as_str() == Some("message")) {
                        message = m.as_str().unwrap_or_default().to_string();
                    }
                }
            }
            _ => {}
        }
    }
    Some((domain, code, message))
}
