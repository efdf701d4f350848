use std::cmp;
use std::fmt;
use std::hash::{self, Hasher};

use fnv::{FnvHashMap, FnvHasher};

use crate::chunk::Chunk;
use crate::memory::{Gc, Object, Trace, Tracer};
use crate::value::Value;
use crate::vm::Vm;

// === StrObj ===

/// Interned immutable string. The cached hash feeds every table keyed by
/// strings, so lookups never rehash the bytes.
pub struct StrObj {
    chars: String,
    hash: u64,
}

impl StrObj {
    pub(crate) fn new(chars: String) -> Self {
        let mut hasher = FnvHasher::default();
        hasher.write(chars.as_bytes());
        let hash = hasher.finish();
        StrObj { chars, hash }
    }

    pub fn as_str(&self) -> &str {
        &self.chars
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }
}

impl Trace for StrObj {
    fn trace(&self, _tracer: &mut Tracer) {}
}

impl Object for StrObj {}

// Since all strings are interned, string equality is pointer equality.
impl cmp::PartialEq for Gc<StrObj> {
    fn eq(&self, other: &Gc<StrObj>) -> bool {
        self.ptr_eq(other)
    }
}

impl cmp::Eq for Gc<StrObj> {}

impl hash::Hash for Gc<StrObj> {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for StrObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.chars)
    }
}

impl fmt::Debug for StrObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.chars)
    }
}

// === FnObj ===

/// Compiled function: bytecode chunk plus metadata. The chunk is append-only
/// while the compiler owns it and read-only once wrapped here.
pub struct FnObj {
    pub chunk: Chunk,
    arity: u8,
    upvalue_count: usize,
    name: Option<Gc<StrObj>>,
}

impl FnObj {
    pub fn new(chunk: Chunk, arity: u8, upvalue_count: usize, name: Option<Gc<StrObj>>) -> Self {
        FnObj {
            chunk,
            arity,
            upvalue_count,
            name,
        }
    }

    pub fn arity(&self) -> u8 {
        self.arity
    }

    pub fn upvalue_count(&self) -> usize {
        self.upvalue_count
    }

    pub fn name(&self) -> Option<Gc<StrObj>> {
        self.name
    }
}

impl Trace for FnObj {
    fn trace(&self, tracer: &mut Tracer) {
        if let Some(name) = self.name {
            tracer.mark(name);
        }
        for constant in self.chunk.constants() {
            constant.trace(tracer);
        }
    }
}

impl Object for FnObj {}

impl fmt::Display for FnObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name {
            Some(name) => write!(f, "<fn {}>", name.as_str()),
            None => f.write_str("<script>"),
        }
    }
}

impl fmt::Debug for FnObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// === NativeObj ===

/// Host function callable from bytecode. Receives the argument window and
/// returns one value; may re-enter the VM through `Vm::call_closure`.
pub type NativeFn = fn(&mut Vm<'_>, &[Value]) -> Value;

pub struct NativeObj {
    pub function: NativeFn,
    name: Gc<StrObj>,
}

impl NativeObj {
    pub fn new(function: NativeFn, name: Gc<StrObj>) -> Self {
        NativeObj { function, name }
    }

    pub fn name(&self) -> Gc<StrObj> {
        self.name
    }
}

impl Trace for NativeObj {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.mark(self.name);
    }
}

impl Object for NativeObj {}

impl fmt::Display for NativeObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<native fn>")
    }
}

// === UpvalueObj ===

/// Captured variable. Open upvalues address a live stack slot; closing moves
/// the value into the object. Open upvalues form a list sorted by descending
/// stack slot, headed in the VM.
#[derive(Clone, Copy)]
pub enum UpvalueState {
    Open(usize),
    Closed(Value),
}

pub struct UpvalueObj {
    pub state: UpvalueState,
    pub next: Option<Gc<UpvalueObj>>,
}

impl UpvalueObj {
    pub fn new(slot: usize) -> Self {
        UpvalueObj {
            state: UpvalueState::Open(slot),
            next: None,
        }
    }

    pub fn open_slot(&self) -> Option<usize> {
        match self.state {
            UpvalueState::Open(slot) => Some(slot),
            UpvalueState::Closed(_) => None,
        }
    }
}

impl Trace for UpvalueObj {
    fn trace(&self, tracer: &mut Tracer) {
        if let UpvalueState::Closed(value) = self.state {
            value.trace(tracer);
        }
    }
}

impl Object for UpvalueObj {}

// === ClosureObj ===

pub struct ClosureObj {
    pub function: Gc<FnObj>,
    pub upvalues: Vec<Gc<UpvalueObj>>,
}

impl ClosureObj {
    pub fn new(function: Gc<FnObj>) -> Self {
        ClosureObj {
            function,
            upvalues: Vec::with_capacity(function.upvalue_count()),
        }
    }
}

impl Trace for ClosureObj {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.mark(self.function);
        for &upvalue in &self.upvalues {
            tracer.mark(upvalue);
        }
    }
}

impl Object for ClosureObj {}

impl fmt::Display for ClosureObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.function, f)
    }
}

// === ClassObj ===

pub struct ClassObj {
    pub name: Gc<StrObj>,
    pub superclass: Option<Gc<ClassObj>>,
    pub methods: FnvHashMap<Gc<StrObj>, Value>,
    /// Names declared `private`. Recorded for tooling; dispatch does not
    /// consult this table.
    pub privates: FnvHashMap<Gc<StrObj>, Value>,
}

impl ClassObj {
    pub fn new(name: Gc<StrObj>) -> Self {
        ClassObj {
            name,
            superclass: None,
            methods: FnvHashMap::default(),
            privates: FnvHashMap::default(),
        }
    }
}

impl Trace for ClassObj {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.mark(self.name);
        if let Some(superclass) = self.superclass {
            tracer.mark(superclass);
        }
        for (&key, value) in &self.methods {
            tracer.mark(key);
            value.trace(tracer);
        }
        for (&key, value) in &self.privates {
            tracer.mark(key);
            value.trace(tracer);
        }
    }
}

impl Object for ClassObj {}

impl fmt::Display for ClassObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class {}>", self.name.as_str())
    }
}

// === InstanceObj ===

pub struct InstanceObj {
    pub class: Gc<ClassObj>,
    pub fields: FnvHashMap<Gc<StrObj>, Value>,
}

impl InstanceObj {
    pub fn new(class: Gc<ClassObj>) -> Self {
        InstanceObj {
            class,
            fields: FnvHashMap::default(),
        }
    }
}

impl Trace for InstanceObj {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.mark(self.class);
        for (&key, value) in &self.fields {
            tracer.mark(key);
            value.trace(tracer);
        }
    }
}

impl Object for InstanceObj {}

impl fmt::Display for InstanceObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<instance {}>", self.class.name.as_str())
    }
}

// === BoundMethodObj ===

/// Pairs a closure with its receiver so a property-accessed method carries
/// `self` when called later.
pub struct BoundMethodObj {
    pub receiver: Value,
    pub method: Gc<ClosureObj>,
}

impl BoundMethodObj {
    pub fn new(receiver: Value, method: Gc<ClosureObj>) -> Self {
        BoundMethodObj { receiver, method }
    }
}

impl Trace for BoundMethodObj {
    fn trace(&self, tracer: &mut Tracer) {
        self.receiver.trace(tracer);
        tracer.mark(self.method);
    }
}

impl Object for BoundMethodObj {}

impl fmt::Display for BoundMethodObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.method, f)
    }
}

// === TableObj ===

/// Lua table: dense 1-indexed array part fused with a string-keyed hash
/// part. Integer keys at or below the array count use the array; string keys
/// use the hash part.
pub struct TableObj {
    pub array: Vec<Value>,
    pub entries: FnvHashMap<Gc<StrObj>, Value>,
}

impl TableObj {
    pub fn new() -> Self {
        TableObj {
            array: Vec::new(),
            entries: FnvHashMap::default(),
        }
    }
}

impl Default for TableObj {
    fn default() -> Self {
        TableObj::new()
    }
}

impl Trace for TableObj {
    fn trace(&self, tracer: &mut Tracer) {
        for value in &self.array {
            value.trace(tracer);
        }
        for (&key, value) in &self.entries {
            tracer.mark(key);
            value.trace(tracer);
        }
    }
}

impl Object for TableObj {}

impl fmt::Display for TableObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        let mut first = true;
        for value in &self.array {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{}", value)?;
        }
        if !self.entries.is_empty() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "... {} more", self.entries.len())?;
        }
        f.write_str("}")
    }
}

// === TraitObj ===

/// Named bundle of methods copied into implementing classes at
/// `OP_IMPLEMENT` time.
pub struct TraitObj {
    pub name: Gc<StrObj>,
    pub methods: FnvHashMap<Gc<StrObj>, Value>,
}

impl TraitObj {
    pub fn new(name: Gc<StrObj>) -> Self {
        TraitObj {
            name,
            methods: FnvHashMap::default(),
        }
    }
}

impl Trace for TraitObj {
    fn trace(&self, tracer: &mut Tracer) {
        tracer.mark(self.name);
        for (&key, value) in &self.methods {
            tracer.mark(key);
            value.trace(tracer);
        }
    }
}

impl Object for TraitObj {}

impl fmt::Display for TraitObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<trait {}>", self.name.as_str())
    }
}
