pub mod chunk;
pub mod compiler;
pub mod debug;
pub mod diagnostic;
pub mod error;
pub mod memory;
pub mod object;
pub mod scanner;
pub mod value;
pub mod vm;

use std::io::Write;

pub use vm::{InterpretResult, Vm, VmOptions};

/// Compiles and runs `source` in a fresh VM, writing program output to
/// `out`. Compile and runtime diagnostics go to stderr.
pub fn interpret(source: &str, out: &mut dyn Write) -> InterpretResult {
    interpret_with_options(source, None, VmOptions::default(), out)
}

pub fn interpret_with_options(
    source: &str,
    filename: Option<&str>,
    options: VmOptions,
    out: &mut dyn Write,
) -> InterpretResult {
    let mut heap = memory::Heap::new();
    let mut vm = Vm::new(&mut heap, out, options);
    vm.interpret(source, filename)
}
