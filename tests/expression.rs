use luap::InterpretResult;

fn run(source: &str) -> (InterpretResult, String) {
    let mut out = Vec::new();
    let result = luap::interpret(source, &mut out);
    (result, String::from_utf8(out).unwrap())
}

#[test]
fn test_arithmetic() {
    let (result, output) = run("print(1+2*3)");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("7", output.trim());
}

#[test]
fn test_precedence() {
    let source = r#"
print(3 * 4 + 4 * 2)
print(4 > -2 and -4 >= 2)
print(3 > 2 == -1 < -3 * -2)
print((-1 + 2) * 3 - -4)
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("20\nfalse\ntrue\n7", output.trim());
}

#[test]
fn test_unary() {
    let (result, output) = run("print(-5) print(not true) print(not nil) print(#\"hello\")");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("-5\nfalse\ntrue\n5", output.trim());
}

#[test]
fn test_comparison_and_equality() {
    let source = r#"
print(1 < 2)
print(2 <= 2)
print(3 ~= 4)
print("a" == "a")
print("a" == "b")
print(nil == false)
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("true\ntrue\ntrue\ntrue\nfalse\nfalse", output.trim());
}

#[test]
fn test_concat() {
    let (result, output) = run(r#"print("he" .. "llo" .. "!")"#);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("hello!", output.trim());
}

#[test]
fn test_modulo_and_division() {
    let (result, output) = run("print(17 % 5) print(20 / 4)");
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("2\n5", output.trim());
}

#[test]
fn test_short_circuit_yields_operand() {
    let source = r#"
print(nil or "fallback")
print(false and "never")
print(1 and 2)
"#;
    let (result, output) = run(source);
    assert_eq!(result, InterpretResult::Ok);
    assert_eq!("fallback\nfalse\n2", output.trim());
}

#[test]
fn test_arithmetic_type_error() {
    let (result, _) = run(r#"print(1 + "one")"#);
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn test_concat_type_error() {
    let (result, _) = run("local s = \"a\" .. 1 print(s)");
    assert_eq!(result, InterpretResult::RuntimeError);
}

#[test]
fn test_modulo_by_zero_is_runtime_error() {
    let (result, _) = run("local z = 0 print(1 % z)");
    assert_eq!(result, InterpretResult::RuntimeError);
}

mod folding {
    use luap::chunk::Instruction;
    use luap::compiler::{self, CompilerOptions};
    use luap::memory::Heap;
    use luap::value::Value;

    /// Collects the values pushed by CONSTANT instructions in a chunk that
    /// contains no closures.
    fn pushed_constants(source: &str) -> Vec<Value> {
        let mut heap = Heap::new();
        let result = compiler::compile(source, &mut heap, None, &CompilerOptions::default(), None);
        let function = result.function.expect("compile failed");
        let chunk = &function.chunk;

        let mut constants = Vec::new();
        let mut offset = 0;
        while offset < chunk.code_len() {
            let (instr, size) = chunk.decode(offset);
            if let Instruction::OpConstant(index) = instr {
                constants.push(chunk.constant(index));
            }
            offset += size;
        }
        constants
    }

    #[test]
    fn test_binary_folds_to_single_constant() {
        let constants = pushed_constants("print(2+3*4)");
        assert_eq!(constants.len(), 1);
        assert_eq!(constants[0], Value::Number(14.0));
    }

    #[test]
    fn test_comparison_folds() {
        let constants = pushed_constants("print(1 < 2)");
        assert_eq!(constants.len(), 1);
        assert_eq!(constants[0], Value::Boolean(true));
    }

    #[test]
    fn test_unary_folds() {
        let constants = pushed_constants("print(-(5))");
        assert_eq!(constants.len(), 1);
        assert_eq!(constants[0], Value::Number(-5.0));
    }

    #[test]
    fn test_division_by_zero_is_not_folded() {
        let constants = pushed_constants("print(1 / 0)");
        assert_eq!(constants.len(), 2);
    }

    #[test]
    fn test_folded_matches_unfolded_result() {
        let folded = super::run("print(2+3*4)");
        let unfolded = super::run("local a = 2 local b = 3 local c = 4 print(a+b*c)");
        assert_eq!(folded.1, unfolded.1);
        assert_eq!("14", folded.1.trim());
    }
}
