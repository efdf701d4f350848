use std::fs;
use std::path::PathBuf;

use luap::memory::Heap;
use luap::{InterpretResult, Vm, VmOptions};

fn run(source: &str) -> (InterpretResult, String) {
    let mut out = Vec::new();
    let result = luap::interpret(source, &mut out);
    (result, String::from_utf8(out).unwrap())
}

/// Fresh directory for this test's module files. `require` resolves its
/// first candidate as `<name>.luapp`, so an absolute module name keeps the
/// tests independent of the working directory.
fn temp_module_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("luap_require_{}_{}", tag, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("create module dir");
    dir
}

#[test]
fn test_require_loads_module() {
    let dir = temp_module_dir("load");
    fs::write(
        dir.join("modlib.luapp"),
        "function mod_value() return 41 end\n",
    )
    .expect("write module");

    let source = format!(
        r#"
local m = require("{0}/modlib")
print(type(m))
print(mod_value() + 1)
"#,
        dir.display()
    );
    let (result, output) = run(&source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("table\n42", output.trim());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_require_caches_module() {
    let dir = temp_module_dir("cache");
    fs::write(dir.join("once.luapp"), "print(\"loading once\")\n").expect("write module");

    // The body runs on the first load only; both calls return the same
    // exports table.
    let source = format!(
        r#"print(require("{0}/once") == require("{0}/once"))"#,
        dir.display()
    );
    let (result, output) = run(&source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("loading once\ntrue", output.trim());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_require_missing_module_returns_nil() {
    let dir = temp_module_dir("missing");

    let source = format!(r#"print(require("{0}/absent"))"#, dir.display());
    let (result, output) = run(&source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("nil", output.trim());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_require_bad_argument_returns_nil() {
    let (result, output) = run("print(require(42))");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("nil", output.trim());
}

// A cyclic import must see the in-progress module's exports placeholder
// instead of re-entering the loader.
#[test]
fn test_require_cycle_returns_placeholder() {
    let dir = temp_module_dir("cycle");
    fs::write(
        dir.join("cyc_a.luapp"),
        format!(
            "local b = require(\"{0}/cyc_b\")\nfunction a_done() return \"done\" end\n",
            dir.display()
        ),
    )
    .expect("write module a");
    fs::write(
        dir.join("cyc_b.luapp"),
        format!(
            "local a = require(\"{0}/cyc_a\")\nfunction b_sees_a() return type(a) end\n",
            dir.display()
        ),
    )
    .expect("write module b");

    let source = format!(
        r#"
local a = require("{0}/cyc_a")
print(type(a))
print(b_sees_a())
print(a_done())
"#,
        dir.display()
    );
    let (result, output) = run(&source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("table\ntable\ndone", output.trim());

    let _ = fs::remove_dir_all(&dir);
}

// A failed compile evicts the cache entry, so a later require retries the
// file instead of handing back the stale placeholder.
#[test]
fn test_require_compile_failure_evicts_cache() {
    let dir = temp_module_dir("evict");
    let path = dir.join("fixme.luapp");
    fs::write(&path, "local = broken\n").expect("write module");

    let mut heap = Heap::new();
    let mut out = Vec::new();
    {
        let mut vm = Vm::new(&mut heap, &mut out, VmOptions::default());

        let first = format!(r#"print(require("{0}/fixme"))"#, dir.display());
        assert_eq!(vm.interpret(&first, None), InterpretResult::Ok);

        fs::write(&path, "function fixed() return true end\n").expect("rewrite module");

        let second = format!(r#"print(type(require("{0}/fixme")))"#, dir.display());
        assert_eq!(vm.interpret(&second, None), InterpretResult::Ok);
    }

    assert_eq!("nil\ntable", String::from_utf8(out).unwrap().trim());

    let _ = fs::remove_dir_all(&dir);
}
