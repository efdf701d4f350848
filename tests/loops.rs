use luap::InterpretResult;

fn run(source: &str) -> (InterpretResult, String) {
    let mut out = Vec::new();
    let result = luap::interpret(source, &mut out);
    (result, String::from_utf8(out).unwrap())
}

#[test]
fn test_while_loop() {
    let source = r#"
local i = 1
local sum = 0
while i <= 4 do
  sum = sum + i
  i = i + 1
end
print(sum)
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("10", output.trim());
}

#[test]
fn test_repeat_until() {
    let source = r#"
local i = 0
repeat
  i = i + 1
  print(i)
until i >= 3
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("1\n2\n3", output.trim());
}

#[test]
fn test_repeat_condition_sees_body_local() {
    let source = r#"
local n = 0
repeat
  local done = n > 1
  n = n + 1
until done
print(n)
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("3", output.trim());
}

#[test]
fn test_numeric_for() {
    let source = r#"
for i = 1, 3 do
  print(i)
end
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("1\n2\n3", output.trim());
}

#[test]
fn test_numeric_for_with_step() {
    let source = r#"
for i = 0, 10, 5 do
  print(i)
end
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("0\n5\n10", output.trim());
}

#[test]
fn test_break_and_continue_in_for() {
    let source = "for i=1,5 do if i==3 then continue end if i==5 then break end print(i) end";
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("1\n2\n4", output.trim());
}

#[test]
fn test_continue_in_while() {
    let source = r#"
local i = 0
while i < 5 do
  i = i + 1
  if i == 2 then continue end
  print(i)
end
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("1\n3\n4\n5", output.trim());
}

#[test]
fn test_break_in_while() {
    let source = r#"
local i = 0
while true do
  i = i + 1
  if i == 3 then break end
end
print(i)
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("3", output.trim());
}

#[test]
fn test_break_pops_loop_locals() {
    let source = r#"
local keep = "kept"
for i = 1, 3 do
  local junk = i * 2
  if i == 2 then break end
  print(junk)
end
print(keep)
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("2\nkept", output.trim());
}

#[test]
fn test_continue_pops_loop_locals() {
    let source = r#"
local total = 0
for i = 1, 4 do
  local double = i * 2
  if i == 2 then continue end
  total = total + double
end
print(total)
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("16", output.trim());
}

#[test]
fn test_nested_loops() {
    let source = r#"
for i = 1, 2 do
  for j = 1, 2 do
    print(i * 10 + j)
  end
end
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("11\n12\n21\n22", output.trim());
}

#[test]
fn test_break_inner_only() {
    let source = r#"
for i = 1, 2 do
  for j = 1, 5 do
    if j == 2 then break end
    print(i * 100 + j)
  end
end
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("101\n201", output.trim());
}

#[test]
fn test_elseif_chain() {
    let source = r#"
for i = 1, 4 do
  if i == 1 then print("one")
  elseif i == 2 then print("two")
  elseif i == 3 then print("three")
  else print("many")
  end
end
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("one\ntwo\nthree\nmany", output.trim());
}

#[test]
fn test_break_outside_loop_is_compile_error() {
    let (result, _) = run("break");
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn test_continue_outside_loop_is_compile_error() {
    let (result, _) = run("continue");
    assert_eq!(result, InterpretResult::CompileError);
}

#[test]
fn test_return_at_top_level_is_compile_error() {
    let (result, _) = run("return 1");
    assert_eq!(result, InterpretResult::CompileError);
}
