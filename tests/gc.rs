use luap::memory::{Heap, MarkRoots, Tracer};
use luap::value::Value;
use luap::{InterpretResult, Vm, VmOptions};

struct NoRoots;

impl MarkRoots for NoRoots {
    fn mark_roots(&self, _tracer: &mut Tracer) {}
}

fn run_stressed(source: &str) -> (InterpretResult, String) {
    let mut out = Vec::new();
    let options = VmOptions {
        stress_gc: true,
        ..VmOptions::default()
    };
    let result = luap::interpret_with_options(source, None, options, &mut out);
    (result, String::from_utf8(out).unwrap())
}

#[test]
fn test_interning_identity() {
    let mut heap = Heap::new();
    let a = heap.intern("shared content");
    let b = heap.intern("shared content");
    let c = heap.intern("other");
    assert!(a.ptr_eq(&b));
    assert!(!a.ptr_eq(&c));
    assert_eq!(Value::String(a), Value::String(b));
    assert_ne!(Value::String(a), Value::String(c));
}

#[test]
fn test_collect_without_roots_frees_everything() {
    let mut heap = Heap::new();
    {
        let mut out = Vec::new();
        let mut vm = Vm::new(&mut heap, &mut out, VmOptions::default());
        let result = vm.interpret(
            "function mk(n) local c = 0 function inc() c = c + n return c end \
             return inc end local a = mk(10) print(a())",
            None,
        );
        assert_eq!(result, InterpretResult::Ok);
    }
    assert!(heap.object_count() > 0);
    heap.collect(&NoRoots);
    assert_eq!(heap.object_count(), 0);
}

#[test]
fn test_collect_keeps_rooted_strings() {
    struct OneRoot(luap::memory::Gc<luap::object::StrObj>);
    impl MarkRoots for OneRoot {
        fn mark_roots(&self, tracer: &mut Tracer) {
            tracer.mark(self.0);
        }
    }

    let mut heap = Heap::new();
    let keep = heap.intern("keep me");
    heap.intern("drop me");
    assert_eq!(heap.object_count(), 2);

    heap.collect(&OneRoot(keep));
    assert_eq!(heap.object_count(), 1);

    // The surviving entry still deduplicates.
    let again = heap.intern("keep me");
    assert!(again.ptr_eq(&keep));
    // The pruned one comes back as a fresh object.
    heap.intern("drop me");
    assert_eq!(heap.object_count(), 2);
}

#[test]
fn test_stress_arithmetic() {
    let (result, output) = run_stressed("print(1+2*3)");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("7", output.trim());
}

#[test]
fn test_stress_function_call() {
    let (result, output) = run_stressed("function f(x) return x+1 end print(f(41))");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("42", output.trim());
}

#[test]
fn test_stress_closures() {
    let source = "function mk(n) local c = 0 function inc() c = c + n return c end \
                  return inc end local a = mk(10) print(a()) print(a()) print(a())";
    let (result, output) = run_stressed(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("10\n20\n30", output.trim());
}

#[test]
fn test_stress_inheritance() {
    let source = r#"
class A function greet() return "hi A" end end
class B extends A function greet() return super.greet() .. "/B" end end
print((new B()):greet())
"#;
    let (result, output) = run_stressed(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("hi A/B", output.trim());
}

#[test]
fn test_stress_tables() {
    let source = r#"
local t = {10, 20, key = "v"}
print(t[1])
print(t[2])
print(t["key"])
print(#t)
"#;
    let (result, output) = run_stressed(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("10\n20\nv\n2", output.trim());
}

#[test]
fn test_stress_loops() {
    let source = "for i=1,5 do if i==3 then continue end if i==5 then break end print(i) end";
    let (result, output) = run_stressed(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("1\n2\n4", output.trim());
}

#[test]
fn test_stress_string_churn() {
    // Builds many intermediate strings; each concatenation allocates and
    // every allocation collects.
    let source = r#"
local s = ""
for i = 1, 20 do
  s = s .. "x"
end
print(#s)
"#;
    let (result, output) = run_stressed(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("20", output.trim());
}
