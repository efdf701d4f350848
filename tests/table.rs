use luap::InterpretResult;

fn run(source: &str) -> (InterpretResult, String) {
    let mut out = Vec::new();
    let result = luap::interpret(source, &mut out);
    (result, String::from_utf8(out).unwrap())
}

#[test]
fn test_literal_with_array_and_fields() {
    let source = r#"
local t = {10, 20, key = "v"}
print(t[1])
print(t[2])
print(t["key"])
print(#t)
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("10\n20\nv\n2", output.trim());
}

#[test]
fn test_missing_keys_are_nil() {
    let source = r#"
local t = {1}
print(t[5])
print(t["nope"])
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("nil\nnil", output.trim());
}

#[test]
fn test_set_grows_array_with_nil_padding() {
    let source = r#"
local t = {}
t[4] = "four"
print(#t)
print(t[1])
print(t[4])
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("4\nnil\nfour", output.trim());
}

#[test]
fn test_string_key_assignment() {
    let source = r#"
local t = {}
t["name"] = "luap"
print(t["name"])
print(#t)
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("luap\n0", output.trim());
}

#[test]
fn test_assignment_expression_value() {
    let source = r#"
local t = {}
local v = t[1] = "stored"
print(v)
"#;
    // t[1] = "stored" leaves the value, which initializes v.
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("stored", output.trim());
}

#[test]
fn test_nested_tables() {
    let source = r#"
local grid = {{1, 2}, {3, 4}}
print(grid[2][1])
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("3", output.trim());
}

#[test]
fn test_bare_variable_entry() {
    let source = r#"
local x = 7
local t = {x, x}
print(t[1] + t[2])
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("14", output.trim());
}

#[test]
fn test_rawget_rawset() {
    let source = r#"
local t = {}
rawset(t, 1, "one")
rawset(t, "k", "vee")
print(rawget(t, 1))
print(rawget(t, "k"))
print(rawget(t, 2))
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("one\nvee\nnil", output.trim());
}

#[test]
fn test_next_walks_array_then_hash() {
    let source = r#"
local t = {"a", "b", only = "hash"}
local first = next(t)
print(first[1])
print(first[2])
local second = next(t, 1)
print(second[1])
print(second[2])
local third = next(t, 2)
print(third[1])
print(third[2])
print(next(t, "only"))
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("1\na\n2\nb\nonly\nhash\nnil", output.trim());
}

#[test]
fn test_pairs_returns_table() {
    let source = r#"
local t = {1}
print(pairs(t) == t)
print(ipairs(t) == t)
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("true\ntrue", output.trim());
}

#[test]
fn test_index_non_table() {
    let (result, _) = run("local x = 1 print(x[1])");
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn test_illegal_table_key() {
    let (result, _) = run("local t = {} t[true] = 1");
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn test_length_of_non_table() {
    let (result, _) = run("print(#42)");
    assert_eq!(result, InterpretResult::RuntimeError);
}
