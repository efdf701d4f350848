use luap::InterpretResult;

fn run(source: &str) -> (InterpretResult, String) {
    let mut out = Vec::new();
    let result = luap::interpret(source, &mut out);
    (result, String::from_utf8(out).unwrap())
}

#[test]
fn test_capture_open() {
    let source = r#"
function outer()
  local x = "outside"
  function inner()
    print(x)
  end
  inner()
end
outer()
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("outside", output.trim());
}

#[test]
fn test_capture_close() {
    let source = r#"
function outer()
  local x = "outside"
  function inner()
    print(x)
  end
  return inner
end

local inner = outer()
inner()
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("outside", output.trim());
}

#[test]
fn test_capture_update() {
    let source = r#"
function set() end
function get() end

function main()
  local a = "initial"
  function s() a = "updated" end
  function g() print(a) end
  set = s
  get = g
end

main()
set()
get()
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("updated", output.trim());
}

#[test]
fn test_capture_nested() {
    let source = r#"
function outer()
  local x = "value"
  function middle()
    function inner()
      print(x)
    end
    print("create inner closure")
    return inner
  end
  print("return from outer")
  return middle
end

local mid = outer()
local innermost = mid()
innermost()
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!(
        "return from outer\ncreate inner closure\nvalue",
        output.trim()
    );
}

#[test]
fn test_counter_closure() {
    let source = "function mk(n) local c = 0 function inc() c = c + n return c end \
                  return inc end local a = mk(10) print(a()) print(a()) print(a())";
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("10\n20\n30", output.trim());
}

// Two closures over the same local share one upvalue: a write through one is
// visible through the other, both while the variable is still on the stack
// and after the enclosing frame returns.
#[test]
fn test_upvalue_shared_while_open() {
    let source = r#"
function main()
  local a = 1
  function bump() a = a + 1 end
  function show() print(a) end
  bump()
  show()
end
main()
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("2", output.trim());
}

#[test]
fn test_upvalue_shared_after_close() {
    let source = r#"
function bump() end
function show() end

function main()
  local a = 1
  function s() a = a + 1 end
  function g() print(a) end
  bump = s
  show = g
end

main()
bump()
bump()
show()
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("3", output.trim());
}

#[test]
fn test_local_function_recursion() {
    let source = r#"
function main()
  local function fact(n)
    if n <= 1 then return 1 end
    return n * fact(n - 1)
  end
  print(fact(5))
end
main()
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("120", output.trim());
}

#[test]
fn test_frame_overflow() {
    let source = r#"
function forever() return forever() end
forever()
"#;
    let (result, _) = run(source);
    assert_eq!(result, InterpretResult::RuntimeError);
}
