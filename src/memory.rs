use std::mem;
use std::ptr::NonNull;

use fnv::FnvHashMap;

use crate::object::StrObj;

/// First collection happens once a megabyte is live.
const FIRST_GC_THRESHOLD: usize = 1024 * 1024;
const HEAP_GROW_FACTOR: usize = 2;

/// Marks the objects a value directly references. Implemented by every heap
/// object kind and by `Value`; marking is shallow, the tracer's worklist
/// drives the transitive walk.
pub trait Trace {
    fn trace(&self, tracer: &mut Tracer);
}

pub trait Object: Trace + 'static {}

/// A root set provider. The VM and the compiler each implement this over
/// their live state, so one collector serves both phases.
pub trait MarkRoots {
    fn mark_roots(&self, tracer: &mut Tracer);
}

struct GcBoxHeader {
    next: Option<NonNull<GcBox<dyn Object>>>,
    marked: bool,
}

struct GcBox<T: Object + ?Sized> {
    header: GcBoxHeader,
    value: T,
}

/// A copyable reference to a heap-allocated object. Lifetimes are managed by
/// the collector: a `Gc` is valid as long as its target is reachable from
/// the roots passed to every collection.
pub struct Gc<T: Object> {
    ptr: NonNull<GcBox<T>>,
}

impl<T: Object> Copy for Gc<T> {}

impl<T: Object> Clone for Gc<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Object> Gc<T> {
    pub fn ptr_eq(&self, other: &Gc<T>) -> bool {
        self.ptr.as_ptr() == other.ptr.as_ptr()
    }

    pub fn is_marked(&self) -> bool {
        unsafe { self.ptr.as_ref().header.marked }
    }

    fn erased(&self) -> NonNull<GcBox<dyn Object>> {
        self.ptr
    }
}

impl<T: Object> std::ops::Deref for Gc<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &self.ptr.as_ref().value }
    }
}

impl<T: Object> std::ops::DerefMut for Gc<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut self.ptr.as_mut().value }
    }
}

impl<T: Object + std::fmt::Display> std::fmt::Display for Gc<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        (**self).fmt(f)
    }
}

impl<T: Object + std::fmt::Debug> std::fmt::Debug for Gc<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        (**self).fmt(f)
    }
}

/// Gray worklist for the mark phase.
pub struct Tracer {
    gray: Vec<NonNull<GcBox<dyn Object>>>,
}

impl Tracer {
    fn new() -> Self {
        Tracer { gray: Vec::new() }
    }

    pub fn mark<T: Object>(&mut self, obj: Gc<T>) {
        self.mark_erased(obj.erased());
    }

    fn mark_erased(&mut self, ptr: NonNull<GcBox<dyn Object>>) {
        unsafe {
            if (*ptr.as_ptr()).header.marked {
                return;
            }
            (*ptr.as_ptr()).header.marked = true;
        }
        self.gray.push(ptr);
    }
}

/// Owner of every heap object. Objects are threaded on an intrusive list for
/// the sweep; interned strings live in a side table that is treated as weak
/// during collection.
pub struct Heap {
    objects: Option<NonNull<GcBox<dyn Object>>>,
    strings: FnvHashMap<String, Gc<StrObj>>,
    bytes_allocated: usize,
    next_gc: usize,
    stress: bool,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            objects: None,
            strings: FnvHashMap::default(),
            bytes_allocated: 0,
            next_gc: FIRST_GC_THRESHOLD,
            stress: false,
        }
    }

    /// Collect at every allocation point. Used by the GC stress tests.
    pub fn set_stress(&mut self, stress: bool) {
        self.stress = stress;
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Number of objects currently on the all-objects list.
    pub fn object_count(&self) -> usize {
        let mut count = 0;
        let mut current = self.objects;
        while let Some(ptr) = current {
            count += 1;
            current = unsafe { ptr.as_ref().header.next };
        }
        count
    }

    pub fn allocate<T: Object>(&mut self, value: T) -> Gc<T> {
        let size = mem::size_of::<GcBox<T>>();
        self.bytes_allocated += size;

        let boxed = Box::new(GcBox {
            header: GcBoxHeader {
                next: self.objects,
                marked: false,
            },
            value,
        });
        let ptr = NonNull::from(Box::leak(boxed));
        let erased: NonNull<GcBox<dyn Object>> = ptr;
        self.objects = Some(erased);

        log::trace!(target: "luap::gc", "allocate {} bytes ({} live)", size, self.bytes_allocated);
        Gc { ptr }
    }

    /// Returns the single `StrObj` for this content, allocating on first use.
    pub fn intern(&mut self, text: &str) -> Gc<StrObj> {
        if let Some(&interned) = self.strings.get(text) {
            return interned;
        }
        let owned = text.to_string();
        self.bytes_allocated += owned.capacity();
        let obj = self.allocate(StrObj::new(owned.clone()));
        self.strings.insert(owned, obj);
        obj
    }

    pub fn should_collect(&self) -> bool {
        self.stress || self.bytes_allocated > self.next_gc
    }

    /// Collect if the threshold was crossed. Callers invoke this immediately
    /// before allocating, while every live object is still reachable from
    /// `roots`; objects held only in host locals across a later allocation
    /// must be pushed onto the VM stack first.
    pub fn collect_if_needed(&mut self, roots: &dyn MarkRoots) {
        if self.should_collect() {
            self.collect(roots);
        }
    }

    pub fn collect(&mut self, roots: &dyn MarkRoots) {
        let before = self.bytes_allocated;
        log::debug!(target: "luap::gc", "gc begin (allocated: {} bytes)", before);

        let mut tracer = Tracer::new();
        roots.mark_roots(&mut tracer);
        while let Some(ptr) = tracer.gray.pop() {
            unsafe { ptr.as_ref() }.value.trace(&mut tracer);
        }

        self.prune_interned();
        self.sweep();

        self.next_gc = self.bytes_allocated * HEAP_GROW_FACTOR;
        log::debug!(
            target: "luap::gc",
            "gc end: collected {} bytes (from {} to {}), next at {}",
            before - self.bytes_allocated,
            before,
            self.bytes_allocated,
            self.next_gc
        );
    }

    /// The intern table holds its strings weakly: an entry whose string was
    /// not marked is dropped here, before the sweep frees the object.
    fn prune_interned(&mut self) {
        let mut freed = 0;
        self.strings.retain(|key, obj| {
            if obj.is_marked() {
                true
            } else {
                freed += key.capacity();
                false
            }
        });
        self.bytes_allocated = self.bytes_allocated.saturating_sub(freed);
    }

    fn sweep(&mut self) {
        let mut prev: Option<NonNull<GcBox<dyn Object>>> = None;
        let mut current = self.objects;
        while let Some(ptr) = current {
            unsafe {
                if (*ptr.as_ptr()).header.marked {
                    (*ptr.as_ptr()).header.marked = false;
                    prev = Some(ptr);
                    current = (*ptr.as_ptr()).header.next;
                } else {
                    let next = (*ptr.as_ptr()).header.next;
                    match prev {
                        Some(p) => (*p.as_ptr()).header.next = next,
                        None => self.objects = next,
                    }
                    self.free_object(ptr);
                    current = next;
                }
            }
        }
    }

    unsafe fn free_object(&mut self, ptr: NonNull<GcBox<dyn Object>>) {
        let size = mem::size_of_val(ptr.as_ref());
        self.bytes_allocated = self.bytes_allocated.saturating_sub(size);
        drop(Box::from_raw(ptr.as_ptr()));
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        // Teardown walks the all-objects list once; no ownership cycles
        // exist at this level.
        let mut current = self.objects.take();
        while let Some(ptr) = current {
            unsafe {
                current = (*ptr.as_ptr()).header.next;
                drop(Box::from_raw(ptr.as_ptr()));
            }
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}
