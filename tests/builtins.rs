use luap::InterpretResult;

fn run(source: &str) -> (InterpretResult, String) {
    let mut out = Vec::new();
    let result = luap::interpret(source, &mut out);
    (result, String::from_utf8(out).unwrap())
}

#[test]
fn test_type_names() {
    let source = r#"
print(type(1))
print(type("s"))
print(type({}))
print(type(nil))
print(type(true))
print(type(print))
print(type())
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(
        "number\nstring\ntable\nnil\nboolean\nfunction\nnil",
        output.trim()
    );
}

#[test]
fn test_type_of_classes_and_traits() {
    let source = r#"
class C end
trait T end
print(type(C))
print(type(new C()))
print(type(T))
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("class\ninstance\ntrait", output.trim());
}

#[test]
fn test_tonumber() {
    let source = r#"
print(tonumber("3.5"))
print(tonumber("nope"))
print(tonumber(7))
print(tonumber(true))
print(tonumber("12") + 1)
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("3.5\nnil\n7\nnil\n13", output.trim());
}

#[test]
fn test_tostring() {
    let source = r#"
print(tostring(42) .. "!")
print(tostring(nil))
print(tostring(true))
print(tostring({}))
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("42!\nnil\ntrue\n<object>", output.trim());
}

// assert reports to stderr but does not unwind; it hands back its first
// argument either way.
#[test]
fn test_assert_returns_first_argument_without_interrupting() {
    let source = r#"
local ok = assert(42, "unused message")
print(ok)
local failed = assert(false, "boom")
print(failed)
print("after assert")
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("42\nfalse\nafter assert", output.trim());
}

#[test]
fn test_assert_without_arguments() {
    let (result, output) = run("print(assert())");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("nil", output.trim());
}

// error writes its message to stderr and execution carries on.
#[test]
fn test_error_does_not_interrupt() {
    let source = r#"
error("kaput")
print("still running")
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("still running", output.trim());
}

#[test]
fn test_print_separates_arguments_with_tabs() {
    let (result, output) = run(r#"print(1, 2, "three")"#);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("1\t2\tthree", output.trim());
}
