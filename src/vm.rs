use std::fs;
use std::io::{self, BufRead, Write};

use fnv::FnvHashMap;

use crate::chunk::Instruction;
use crate::compiler::{self, CompilerOptions};
use crate::debug;
use crate::error::{ErrorKind, RuntimeError, StackFrame, VmError};
use crate::memory::{Gc, Heap, MarkRoots, Trace, Tracer};
use crate::object::{
    BoundMethodObj, ClassObj, ClosureObj, InstanceObj, NativeFn, NativeObj, StrObj, TableObj,
    TraitObj, UpvalueObj, UpvalueState,
};
use crate::value::Value;

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

const MODULE_EXTENSION: &str = "luapp";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

#[derive(Clone, Copy)]
pub struct VmOptions {
    pub trace_execution: bool,
    pub print_code: bool,
    pub warn_unused: bool,
    pub stress_gc: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            trace_execution: false,
            print_code: false,
            warn_unused: true,
            stress_gc: false,
        }
    }
}

struct CallFrame {
    closure: Gc<ClosureObj>,
    ip: usize,
    base: usize,
}

/// Root set of a running VM, handed to the collector at allocation points.
struct VmRoots<'a> {
    stack: &'a [Value],
    frames: &'a [CallFrame],
    globals: &'a FnvHashMap<Gc<StrObj>, Value>,
    open_upvalues: Option<Gc<UpvalueObj>>,
    init_string: Gc<StrObj>,
    modules: &'a FnvHashMap<Gc<StrObj>, Value>,
}

impl MarkRoots for VmRoots<'_> {
    fn mark_roots(&self, tracer: &mut Tracer) {
        for value in self.stack {
            value.trace(tracer);
        }
        for frame in self.frames {
            tracer.mark(frame.closure);
        }
        let mut upvalue = self.open_upvalues;
        while let Some(node) = upvalue {
            tracer.mark(node);
            upvalue = node.next;
        }
        for (&name, value) in self.globals {
            tracer.mark(name);
            value.trace(tracer);
        }
        tracer.mark(self.init_string);
        for (&name, value) in self.modules {
            tracer.mark(name);
            value.trace(tracer);
        }
    }
}

macro_rules! gc_roots {
    ($vm:expr) => {
        VmRoots {
            stack: &$vm.stack,
            frames: &$vm.frames,
            globals: &$vm.globals,
            open_upvalues: $vm.open_upvalues,
            init_string: $vm.init_string,
            modules: &$vm.modules,
        }
    };
}

/// Collects if due, then allocates. The collection happens before the new
/// object exists, so everything live must be reachable from the VM roots at
/// that moment.
macro_rules! allocate {
    ($vm:expr, $obj:expr) => {{
        let roots = gc_roots!($vm);
        $vm.heap.collect_if_needed(&roots);
        $vm.heap.allocate($obj)
    }};
}

macro_rules! intern {
    ($vm:expr, $text:expr) => {{
        let roots = gc_roots!($vm);
        $vm.heap.collect_if_needed(&roots);
        $vm.heap.intern($text)
    }};
}

pub struct Vm<'a> {
    heap: &'a mut Heap,
    out: &'a mut dyn Write,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: FnvHashMap<Gc<StrObj>, Value>,
    open_upvalues: Option<Gc<UpvalueObj>>,
    init_string: Gc<StrObj>,
    /// `require` cache, keyed by interned module name. The placeholder is
    /// inserted before the module body runs so cyclic imports see it.
    modules: FnvHashMap<Gc<StrObj>, Value>,
    options: VmOptions,
}

impl<'a> Vm<'a> {
    pub fn new(heap: &'a mut Heap, out: &'a mut dyn Write, options: VmOptions) -> Self {
        if options.stress_gc {
            heap.set_stress(true);
        }
        let init_string = heap.intern("init");

        let mut vm = Vm {
            heap,
            out,
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: FnvHashMap::default(),
            open_upvalues: None,
            init_string,
            modules: FnvHashMap::default(),
            options,
        };

        vm.define_native("print", print_native);
        vm.define_native("read", read_native);
        vm.define_native("type", type_native);
        vm.define_native("tonumber", tonumber_native);
        vm.define_native("tostring", tostring_native);
        vm.define_native("require", require_native);
        vm.define_native("pairs", pairs_native);
        vm.define_native("ipairs", ipairs_native);
        vm.define_native("next", next_native);
        vm.define_native("error", error_native);
        vm.define_native("assert", assert_native);
        vm.define_native("rawget", rawget_native);
        vm.define_native("rawset", rawset_native);

        vm
    }

    /// Compiles and runs a script, reporting runtime errors to stderr. VM
    /// state (globals, module cache) persists across calls, which is what
    /// the REPL relies on.
    pub fn interpret(&mut self, source: &str, filename: Option<&str>) -> InterpretResult {
        let compiler_options = CompilerOptions {
            warn_unused: self.options.warn_unused,
            print_code: self.options.print_code,
        };
        let roots = gc_roots!(self);
        let compiled = compiler::compile(
            source,
            self.heap,
            filename,
            &compiler_options,
            Some(&roots),
        );
        let function = match compiled.function {
            Some(function) => function,
            None => return InterpretResult::CompileError,
        };

        self.push(Value::Function(function));
        let closure = allocate!(self, ClosureObj::new(function));
        self.stack.pop();
        self.push(Value::Closure(closure));

        if let Err(err) = self.call(closure, 0) {
            eprintln!("{}", err);
            self.reset_stack();
            return InterpretResult::RuntimeError;
        }

        match self.run(0) {
            Ok(_) => InterpretResult::Ok,
            Err(err) => {
                eprintln!("{}", err);
                self.reset_stack();
                InterpretResult::RuntimeError
            }
        }
    }

    /// Invokes a compiled closure from host code, reusing the primary
    /// dispatch loop. On error the stack is reset to the window saved at
    /// entry and the caller may keep using the VM.
    pub fn call_closure(
        &mut self,
        closure: Gc<ClosureObj>,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let saved_stack = self.stack.len();
        let base_frames = self.frames.len();

        self.push(Value::Closure(closure));
        for &arg in args {
            self.push(arg);
        }

        if let Err(err) = self.call(closure, args.len() as u8) {
            self.stack.truncate(saved_stack);
            return Err(err);
        }

        match self.run(base_frames) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.close_upvalues(saved_stack);
                self.stack.truncate(saved_stack);
                self.frames.truncate(base_frames);
                Err(err)
            }
        }
    }

    // === stack ===

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        match self.stack.pop() {
            Some(value) => Ok(value),
            None => Err(self.runtime_error(ErrorKind::InternalError(VmError::EmptyStackPop))),
        }
    }

    fn peek(&self, distance: usize) -> Result<Value, RuntimeError> {
        match self.stack.iter().rev().nth(distance) {
            Some(value) => Ok(*value),
            None => Err(self.runtime_error(ErrorKind::InternalError(VmError::EmptyStackPop))),
        }
    }

    fn pop_number(&mut self, kind: fn() -> ErrorKind) -> Result<f64, RuntimeError> {
        match self.pop()? {
            Value::Number(n) => Ok(n),
            _ => Err(self.runtime_error(kind())),
        }
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;
    }

    // === frames ===

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("empty call frames stack")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("empty call frames stack")
    }

    fn constant(&self, index: u8) -> Value {
        self.frame().closure.function.chunk.constant(index)
    }

    fn constant_string(&self, index: u8) -> Result<Gc<StrObj>, RuntimeError> {
        match self.constant(index) {
            Value::String(name) => Ok(name),
            other => Err(self.runtime_error(ErrorKind::InternalError(
                VmError::UnexpectedConstant(format!("{}", other)),
            ))),
        }
    }

    fn read_pair_byte(&mut self) -> u8 {
        let byte = {
            let frame = self.frame();
            frame.closure.function.chunk.byte(frame.ip)
        };
        self.frame_mut().ip += 1;
        byte
    }

    // === errors ===

    fn runtime_error(&self, kind: ErrorKind) -> RuntimeError {
        let line = match self.frames.last() {
            Some(frame) => frame
                .closure
                .function
                .chunk
                .line(frame.ip.saturating_sub(1)),
            None => 0,
        };
        RuntimeError::new(line, kind, self.stack_trace())
    }

    fn stack_trace(&self) -> Vec<StackFrame> {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let chunk = &frame.closure.function.chunk;
            let line = chunk.line(frame.ip.saturating_sub(1));
            let name = frame
                .closure
                .function
                .name()
                .map(|name| name.as_str().to_string());
            trace.push(StackFrame::new(line, name));
        }
        trace
    }

    // === calls ===

    fn call(&mut self, closure: Gc<ClosureObj>, arg_count: u8) -> Result<(), RuntimeError> {
        let arity = closure.function.arity();
        if arg_count != arity {
            return Err(self.runtime_error(ErrorKind::ArityMismatch {
                expected: arity,
                got: arg_count,
            }));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error(ErrorKind::StackOverflow));
        }

        let base = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            base,
        });
        Ok(())
    }

    fn call_value(&mut self, callee: Value, arg_count: u8) -> Result<(), RuntimeError> {
        match callee {
            Value::Closure(closure) => self.call(closure, arg_count),
            Value::Native(native) => {
                self.call_native(native, arg_count);
                Ok(())
            }
            Value::BoundMethod(bound) => {
                let receiver_slot = self.stack.len() - arg_count as usize - 1;
                self.stack[receiver_slot] = bound.receiver;
                self.call(bound.method, arg_count)
            }
            _ => Err(self.runtime_error(ErrorKind::NotCallable)),
        }
    }

    fn call_native(&mut self, native: Gc<NativeObj>, arg_count: u8) {
        let first_arg = self.stack.len() - arg_count as usize;
        // The arguments stay on the stack while the native runs, keeping
        // them rooted for any collection it triggers.
        let args: Vec<Value> = self.stack[first_arg..].to_vec();
        let result = (native.function)(self, &args);
        self.stack.truncate(first_arg - 1);
        self.push(result);
    }

    fn invoke_from_class(
        &mut self,
        class: Gc<ClassObj>,
        name: Gc<StrObj>,
        arg_count: u8,
    ) -> Result<(), RuntimeError> {
        let method = match class.methods.get(&name) {
            Some(&method) => method,
            None => {
                return Err(
                    self.runtime_error(ErrorKind::UndefinedMethod(name.as_str().to_string()))
                )
            }
        };
        match method {
            Value::Closure(closure) => self.call(closure, arg_count),
            other => self.call_value(other, arg_count),
        }
    }

    fn invoke(&mut self, name: Gc<StrObj>, arg_count: u8) -> Result<(), RuntimeError> {
        let receiver = self.peek(arg_count as usize)?;
        let instance = match receiver {
            Value::Instance(instance) => instance,
            _ => return Err(self.runtime_error(ErrorKind::OnlyInstancesHaveMethods)),
        };

        // A field shadows a method of the same name; it may hold any
        // callable.
        if let Some(&field) = instance.fields.get(&name) {
            let receiver_slot = self.stack.len() - arg_count as usize - 1;
            self.stack[receiver_slot] = field;
            return self.call_value(field, arg_count);
        }

        self.invoke_from_class(instance.class, name, arg_count)
    }

    fn bind_method(&mut self, class: Gc<ClassObj>, name: Gc<StrObj>) -> Result<(), RuntimeError> {
        let method = match class.methods.get(&name) {
            Some(&Value::Closure(closure)) => closure,
            _ => {
                return Err(
                    self.runtime_error(ErrorKind::UndefinedProperty(name.as_str().to_string()))
                )
            }
        };
        let receiver = self.peek(0)?;
        let bound = allocate!(self, BoundMethodObj::new(receiver, method));
        self.pop()?;
        self.push(Value::BoundMethod(bound));
        Ok(())
    }

    // === upvalues ===

    fn capture_upvalue(&mut self, slot: usize) -> Gc<UpvalueObj> {
        // The open list is sorted by descending stack slot; find the first
        // node at or below the one we want.
        let mut prev: Option<Gc<UpvalueObj>> = None;
        let mut current = self.open_upvalues;
        while let Some(node) = current {
            match node.open_slot() {
                Some(s) if s > slot => {
                    prev = Some(node);
                    current = node.next;
                }
                _ => break,
            }
        }

        if let Some(node) = current {
            if node.open_slot() == Some(slot) {
                return node;
            }
        }

        let created = allocate!(self, UpvalueObj::new(slot));
        {
            let mut node = created;
            node.next = current;
        }
        match prev {
            Some(mut node) => node.next = Some(created),
            None => self.open_upvalues = Some(created),
        }
        created
    }

    fn close_upvalues(&mut self, last: usize) {
        while let Some(mut node) = self.open_upvalues {
            let slot = match node.open_slot() {
                Some(slot) if slot >= last => slot,
                _ => break,
            };
            let next = node.next.take();
            node.state = UpvalueState::Closed(self.stack[slot]);
            self.open_upvalues = next;
        }
    }

    fn read_upvalue(&self, upvalue: Gc<UpvalueObj>) -> Value {
        match upvalue.state {
            UpvalueState::Open(slot) => self.stack[slot],
            UpvalueState::Closed(value) => value,
        }
    }

    fn write_upvalue(&mut self, mut upvalue: Gc<UpvalueObj>, value: Value) {
        match upvalue.state {
            UpvalueState::Open(slot) => self.stack[slot] = value,
            UpvalueState::Closed(_) => upvalue.state = UpvalueState::Closed(value),
        }
    }

    // === natives ===

    fn define_native(&mut self, name: &str, function: NativeFn) {
        let name_obj = intern!(self, name);
        // Keep the name rooted while the native object is allocated.
        self.push(Value::String(name_obj));
        let native = allocate!(self, NativeObj::new(function, name_obj));
        self.globals.insert(name_obj, Value::Native(native));
        self.stack.pop();
    }

    // === dispatch ===

    fn trace_state(&self) {
        print!("          ");
        for value in &self.stack {
            print!("[ {} ]", value);
        }
        println!();
        let frame = self.frame();
        println!(
            "{}",
            debug::disassemble_instruction(&frame.closure.function.chunk, frame.ip)
        );
    }

    /// The dispatch loop. Runs until the frame count drops back to
    /// `base_frames`, returning the value produced by the frame that exited;
    /// both `interpret` and `call_closure` share this loop.
    fn run(&mut self, base_frames: usize) -> Result<Value, RuntimeError> {
        loop {
            if self.options.trace_execution {
                self.trace_state();
            }

            let (instr, next_ip) = {
                let frame = self.frame();
                let (instr, size) = frame.closure.function.chunk.decode(frame.ip);
                (instr, frame.ip + size)
            };
            self.frame_mut().ip = next_ip;

            match instr {
                Instruction::OpConstant(index) => {
                    let value = self.constant(index);
                    self.push(value);
                }
                Instruction::OpNil => self.push(Value::Nil),
                Instruction::OpTrue => self.push(Value::Boolean(true)),
                Instruction::OpFalse => self.push(Value::Boolean(false)),
                Instruction::OpPop => {
                    self.pop()?;
                }
                Instruction::OpPopN(count) => {
                    let len = self.stack.len().saturating_sub(count as usize);
                    self.stack.truncate(len);
                }

                Instruction::OpGetLocal(slot) => {
                    let index = self.frame().base + slot as usize;
                    match self.stack.get(index) {
                        Some(&value) => self.push(value),
                        None => {
                            return Err(self.runtime_error(ErrorKind::InternalError(
                                VmError::EmptyStackPop,
                            )))
                        }
                    }
                }
                Instruction::OpSetLocal(slot) => {
                    let value = self.peek(0)?;
                    let index = self.frame().base + slot as usize;
                    match self.stack.get_mut(index) {
                        Some(target) => *target = value,
                        None => {
                            return Err(self.runtime_error(ErrorKind::InternalError(
                                VmError::EmptyStackPop,
                            )))
                        }
                    }
                }

                Instruction::OpGetGlobal(index) => {
                    let name = self.constant_string(index)?;
                    match self.globals.get(&name) {
                        Some(&value) => self.push(value),
                        None => {
                            return Err(self.runtime_error(ErrorKind::UndefinedVariable(
                                name.as_str().to_string(),
                            )))
                        }
                    }
                }
                Instruction::OpDefineGlobal(index) => {
                    let name = self.constant_string(index)?;
                    let value = self.peek(0)?;
                    self.globals.insert(name, value);
                    self.pop()?;
                }
                Instruction::OpSetGlobal(index) => {
                    let name = self.constant_string(index)?;
                    let value = self.peek(0)?;
                    if !self.globals.contains_key(&name) {
                        return Err(self.runtime_error(ErrorKind::UndefinedVariable(
                            name.as_str().to_string(),
                        )));
                    }
                    self.globals.insert(name, value);
                }

                Instruction::OpGetUpvalue(slot) => {
                    let upvalue = self.frame().closure.upvalues[slot as usize];
                    let value = self.read_upvalue(upvalue);
                    self.push(value);
                }
                Instruction::OpSetUpvalue(slot) => {
                    let value = self.peek(0)?;
                    let upvalue = self.frame().closure.upvalues[slot as usize];
                    self.write_upvalue(upvalue, value);
                }
                Instruction::OpCloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop()?;
                }

                Instruction::OpAdd => {
                    let b = self.pop_number(|| ErrorKind::OperandsMustBeNumbers)?;
                    let a = self.pop_number(|| ErrorKind::OperandsMustBeNumbers)?;
                    self.push(Value::Number(a + b));
                }
                Instruction::OpSubtract => {
                    let b = self.pop_number(|| ErrorKind::OperandsMustBeNumbers)?;
                    let a = self.pop_number(|| ErrorKind::OperandsMustBeNumbers)?;
                    self.push(Value::Number(a - b));
                }
                Instruction::OpMultiply => {
                    let b = self.pop_number(|| ErrorKind::OperandsMustBeNumbers)?;
                    let a = self.pop_number(|| ErrorKind::OperandsMustBeNumbers)?;
                    self.push(Value::Number(a * b));
                }
                Instruction::OpDivide => {
                    let b = self.pop_number(|| ErrorKind::OperandsMustBeNumbers)?;
                    let a = self.pop_number(|| ErrorKind::OperandsMustBeNumbers)?;
                    self.push(Value::Number(a / b));
                }
                Instruction::OpModulo => {
                    let b = self.pop_number(|| ErrorKind::OperandsMustBeNumbers)?;
                    let a = self.pop_number(|| ErrorKind::OperandsMustBeNumbers)?;
                    if b == 0.0 {
                        return Err(self.runtime_error(ErrorKind::ModuloByZero));
                    }
                    self.push(Value::Number((a as i64 % b as i64) as f64));
                }
                Instruction::OpNegate => {
                    let n = self.pop_number(|| ErrorKind::OperandMustBeNumber)?;
                    self.push(Value::Number(-n));
                }
                Instruction::OpNot => {
                    let value = self.pop()?;
                    self.push(Value::Boolean(value.is_falsey()));
                }

                Instruction::OpConcat => {
                    let (a, b) = match (self.peek(1)?, self.peek(0)?) {
                        (Value::String(a), Value::String(b)) => (a, b),
                        _ => return Err(self.runtime_error(ErrorKind::OperandsMustBeStrings)),
                    };
                    // Operands stay on the stack across the interning
                    // allocation.
                    let joined = format!("{}{}", a.as_str(), b.as_str());
                    let result = intern!(self, &joined);
                    self.pop()?;
                    self.pop()?;
                    self.push(Value::String(result));
                }
                Instruction::OpLength => {
                    let value = self.pop()?;
                    match value {
                        Value::String(s) => self.push(Value::Number(s.len() as f64)),
                        Value::Table(t) => self.push(Value::Number(t.array.len() as f64)),
                        _ => return Err(self.runtime_error(ErrorKind::InvalidLengthOperand)),
                    }
                }

                Instruction::OpEqual => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Boolean(a == b));
                }
                Instruction::OpGreater => {
                    let b = self.pop_number(|| ErrorKind::OperandsMustBeNumbers)?;
                    let a = self.pop_number(|| ErrorKind::OperandsMustBeNumbers)?;
                    self.push(Value::Boolean(a > b));
                }
                Instruction::OpLess => {
                    let b = self.pop_number(|| ErrorKind::OperandsMustBeNumbers)?;
                    let a = self.pop_number(|| ErrorKind::OperandsMustBeNumbers)?;
                    self.push(Value::Boolean(a < b));
                }

                Instruction::OpJump(offset) => {
                    self.frame_mut().ip += offset as usize;
                }
                Instruction::OpJumpIfFalse(offset) => {
                    // Peeks so and/or can keep the deciding operand.
                    if self.peek(0)?.is_falsey() {
                        self.frame_mut().ip += offset as usize;
                    }
                }
                Instruction::OpLoop(offset) => {
                    self.frame_mut().ip -= offset as usize;
                }

                Instruction::OpCall(arg_count) => {
                    let callee = self.peek(arg_count as usize)?;
                    self.call_value(callee, arg_count)?;
                }
                Instruction::OpInvoke(index, arg_count) => {
                    let name = self.constant_string(index)?;
                    self.invoke(name, arg_count)?;
                }
                Instruction::OpSuperInvoke(index, arg_count) => {
                    let name = self.constant_string(index)?;
                    let superclass = match self.pop()? {
                        Value::Class(class) => class,
                        _ => {
                            return Err(self.runtime_error(ErrorKind::InternalError(
                                VmError::UnexpectedConstant("superclass".to_string()),
                            )))
                        }
                    };
                    self.invoke_from_class(superclass, name, arg_count)?;
                }

                Instruction::OpClosure(index) => {
                    let function = match self.constant(index) {
                        Value::Function(function) => function,
                        other => {
                            return Err(self.runtime_error(ErrorKind::InternalError(
                                VmError::UnexpectedConstant(format!("{}", other)),
                            )))
                        }
                    };
                    let closure = allocate!(self, ClosureObj::new(function));
                    // Rooted on the stack before upvalue capture allocates.
                    self.push(Value::Closure(closure));
                    for _ in 0..function.upvalue_count() {
                        let is_local = self.read_pair_byte();
                        let index = self.read_pair_byte() as usize;
                        let upvalue = if is_local == 1 {
                            let slot = self.frame().base + index;
                            self.capture_upvalue(slot)
                        } else {
                            self.frame().closure.upvalues[index]
                        };
                        let mut closure = closure;
                        closure.upvalues.push(upvalue);
                    }
                }

                Instruction::OpReturn => {
                    let result = self.pop()?;
                    let frame = match self.frames.pop() {
                        Some(frame) => frame,
                        None => {
                            return Err(self.runtime_error(ErrorKind::InternalError(
                                VmError::NoActiveFrame,
                            )))
                        }
                    };
                    self.close_upvalues(frame.base);
                    self.stack.truncate(frame.base);
                    if self.frames.len() == base_frames {
                        return Ok(result);
                    }
                    self.push(result);
                }

                Instruction::OpClass(index) => {
                    let name = self.constant_string(index)?;
                    let class = allocate!(self, ClassObj::new(name));
                    self.push(Value::Class(class));
                }
                Instruction::OpInherit => {
                    let superclass = match self.peek(1)? {
                        Value::Class(class) => class,
                        _ => return Err(self.runtime_error(ErrorKind::SuperclassMustBeClass)),
                    };
                    let mut subclass = match self.peek(0)? {
                        Value::Class(class) => class,
                        _ => {
                            return Err(self.runtime_error(ErrorKind::InternalError(
                                VmError::UnexpectedConstant("subclass".to_string()),
                            )))
                        }
                    };
                    // Inherited methods are copied down, so later overrides
                    // in the subclass shadow them without touching the
                    // parent.
                    let inherited: Vec<(Gc<StrObj>, Value)> = superclass
                        .methods
                        .iter()
                        .map(|(&name, &method)| (name, method))
                        .collect();
                    for (name, method) in inherited {
                        subclass.methods.insert(name, method);
                    }
                    subclass.superclass = Some(superclass);
                    self.pop()?; // subclass
                }
                Instruction::OpMethod(index, is_private) => {
                    let name = self.constant_string(index)?;
                    let method = self.peek(0)?;
                    match self.peek(1)? {
                        Value::Class(mut class) => {
                            class.methods.insert(name, method);
                            if is_private == 1 {
                                class.privates.insert(name, Value::Boolean(true));
                            }
                        }
                        Value::Trait(mut trait_obj) => {
                            trait_obj.methods.insert(name, method);
                        }
                        _ => {
                            return Err(self.runtime_error(ErrorKind::InternalError(
                                VmError::UnexpectedConstant("method target".to_string()),
                            )))
                        }
                    }
                    self.pop()?;
                }

                Instruction::OpGetProperty(index) => {
                    let instance = match self.peek(0)? {
                        Value::Instance(instance) => instance,
                        _ => {
                            return Err(self.runtime_error(ErrorKind::OnlyInstancesHaveProperties))
                        }
                    };
                    let name = self.constant_string(index)?;
                    if let Some(&value) = instance.fields.get(&name) {
                        self.pop()?;
                        self.push(value);
                    } else {
                        self.bind_method(instance.class, name)?;
                    }
                }
                Instruction::OpSetProperty(index) => {
                    let mut instance = match self.peek(1)? {
                        Value::Instance(instance) => instance,
                        _ => return Err(self.runtime_error(ErrorKind::OnlyInstancesHaveFields)),
                    };
                    let name = self.constant_string(index)?;
                    let value = self.peek(0)?;
                    instance.fields.insert(name, value);
                    self.pop()?; // value
                    self.pop()?; // instance
                    self.push(value);
                }
                Instruction::OpGetSuper(index) => {
                    let name = self.constant_string(index)?;
                    let superclass = match self.pop()? {
                        Value::Class(class) => class,
                        _ => {
                            return Err(self.runtime_error(ErrorKind::InternalError(
                                VmError::UnexpectedConstant("superclass".to_string()),
                            )))
                        }
                    };
                    self.bind_method(superclass, name)?;
                }

                Instruction::OpNew(arg_count) => {
                    let class = match self.peek(arg_count as usize)? {
                        Value::Class(class) => class,
                        _ => return Err(self.runtime_error(ErrorKind::NotAClass)),
                    };
                    let instance = allocate!(self, InstanceObj::new(class));
                    let class_slot = self.stack.len() - arg_count as usize - 1;
                    self.stack[class_slot] = Value::Instance(instance);

                    if let Some(&initializer) = class.methods.get(&self.init_string) {
                        match initializer {
                            Value::Closure(closure) => self.call(closure, arg_count)?,
                            _ => {
                                return Err(self.runtime_error(ErrorKind::InternalError(
                                    VmError::UnexpectedConstant("initializer".to_string()),
                                )))
                            }
                        }
                    } else if arg_count != 0 {
                        return Err(self.runtime_error(ErrorKind::ArityMismatch {
                            expected: 0,
                            got: arg_count,
                        }));
                    }
                }

                Instruction::OpTable => {
                    let table = allocate!(self, TableObj::new());
                    self.push(Value::Table(table));
                }
                Instruction::OpTableGet => {
                    let key = self.pop()?;
                    let table = match self.pop()? {
                        Value::Table(table) => table,
                        _ => return Err(self.runtime_error(ErrorKind::NotATable)),
                    };

                    let value = table_index(&table, key);
                    self.push(value);
                }
                Instruction::OpTableSet => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    let mut table = match self.pop()? {
                        Value::Table(table) => table,
                        _ => return Err(self.runtime_error(ErrorKind::NotATable)),
                    };

                    match key {
                        Value::Number(n) if n as i64 >= 1 => {
                            let index = n as i64 as usize;
                            while table.array.len() < index {
                                table.array.push(Value::Nil);
                            }
                            table.array[index - 1] = value;
                            self.push(value);
                        }
                        Value::String(name) => {
                            table.entries.insert(name, value);
                            self.push(value);
                        }
                        _ => return Err(self.runtime_error(ErrorKind::InvalidTableKey)),
                    }
                }
                Instruction::OpTableAdd => {
                    let value = self.pop()?;
                    match self.peek(0)? {
                        Value::Table(mut table) => table.array.push(value),
                        _ => return Err(self.runtime_error(ErrorKind::ExpectedTable)),
                    }
                }
                Instruction::OpTableSetField(index) => {
                    let name = self.constant_string(index)?;
                    let value = self.pop()?;
                    match self.peek(0)? {
                        Value::Table(mut table) => {
                            table.entries.insert(name, value);
                        }
                        _ => return Err(self.runtime_error(ErrorKind::ExpectedTable)),
                    }
                }

                Instruction::OpTrait(index) => {
                    let name = self.constant_string(index)?;
                    let trait_obj = allocate!(self, TraitObj::new(name));
                    self.push(Value::Trait(trait_obj));
                }
                Instruction::OpImplement => {
                    let mut class = match self.pop()? {
                        Value::Class(class) => class,
                        _ => return Err(self.runtime_error(ErrorKind::ClassExpected)),
                    };
                    let trait_obj = match self.pop()? {
                        Value::Trait(trait_obj) => trait_obj,
                        _ => return Err(self.runtime_error(ErrorKind::TraitExpected)),
                    };
                    let copied: Vec<(Gc<StrObj>, Value)> = trait_obj
                        .methods
                        .iter()
                        .map(|(&name, &method)| (name, method))
                        .collect();
                    for (name, method) in copied {
                        class.methods.insert(name, method);
                    }
                }

                Instruction::OpInvalid => {
                    return Err(
                        self.runtime_error(ErrorKind::InternalError(VmError::InvalidOpCode))
                    )
                }
            }
        }
    }
}

fn table_index(table: &TableObj, key: Value) -> Value {
    if let Value::Number(n) = key {
        let index = n as i64;
        if index >= 1 && (index as usize) <= table.array.len() {
            return table.array[index as usize - 1];
        }
    }
    if let Value::String(name) = key {
        if let Some(&value) = table.entries.get(&name) {
            return value;
        }
    }
    Value::Nil
}

// === native functions ===

fn print_native(vm: &mut Vm, args: &[Value]) -> Value {
    let mut first = true;
    for value in args {
        if !first {
            let _ = write!(vm.out, "\t");
        }
        first = false;
        let _ = write!(vm.out, "{}", value);
    }
    let _ = writeln!(vm.out);
    Value::Nil
}

fn read_native(vm: &mut Vm, _args: &[Value]) -> Value {
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => Value::Nil,
        Ok(_) => {
            if line.ends_with('\n') {
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
            }
            Value::String(intern!(vm, &line))
        }
    }
}

fn type_native(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return Value::Nil;
    }
    Value::String(intern!(vm, args[0].type_name()))
}

fn tonumber_native(_vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return Value::Nil;
    }
    match args[0] {
        Value::Number(n) => Value::Number(n),
        Value::String(s) => match s.as_str().parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::Nil,
        },
        _ => Value::Nil,
    }
}

fn tostring_native(vm: &mut Vm, args: &[Value]) -> Value {
    if args.len() != 1 {
        return Value::Nil;
    }
    match args[0] {
        Value::String(s) => Value::String(s),
        Value::Number(_) | Value::Boolean(_) | Value::Nil => {
            let text = format!("{}", args[0]);
            Value::String(intern!(vm, &text))
        }
        _ => Value::String(intern!(vm, "<object>")),
    }
}

/// `require(name)`: probe `name.luapp`, `lib/name.luapp`, `stdlib/name.luapp`;
/// cache the exports table before running the body so cyclic imports get the
/// placeholder; drop the entry again when the module cannot be loaded.
fn require_native(vm: &mut Vm, args: &[Value]) -> Value {
    let name = match args.first() {
        Some(&Value::String(name)) if args.len() == 1 => name,
        _ => return Value::Nil,
    };

    if let Some(&cached) = vm.modules.get(&name) {
        return cached;
    }

    let candidates = [
        format!("{}.{}", name.as_str(), MODULE_EXTENSION),
        format!("lib/{}.{}", name.as_str(), MODULE_EXTENSION),
        format!("stdlib/{}.{}", name.as_str(), MODULE_EXTENSION),
    ];
    let mut found = None;
    for path in candidates {
        if let Ok(source) = fs::read_to_string(&path) {
            found = Some((path, source));
            break;
        }
    }
    let Some((path, source)) = found else {
        eprintln!("Module not found: {}", name.as_str());
        return Value::Nil;
    };

    let exports = allocate!(vm, TableObj::new());
    vm.push(Value::Table(exports));
    vm.modules.insert(name, Value::Table(exports));

    let compiler_options = CompilerOptions {
        warn_unused: vm.options.warn_unused,
        print_code: vm.options.print_code,
    };
    let roots = gc_roots!(vm);
    let compiled = compiler::compile(
        &source,
        vm.heap,
        Some(&path),
        &compiler_options,
        Some(&roots),
    );
    let function = match compiled.function {
        Some(function) => function,
        None => {
            vm.stack.pop();
            vm.modules.remove(&name);
            return Value::Nil;
        }
    };

    vm.push(Value::Function(function));
    let closure = allocate!(vm, ClosureObj::new(function));
    vm.stack.pop();

    match vm.call_closure(closure, &[]) {
        Ok(_) => {
            vm.stack.pop(); // exports placeholder
            Value::Table(exports)
        }
        Err(err) => {
            eprintln!("{}", err);
            vm.stack.pop();
            Value::Nil
        }
    }
}

fn pairs_native(_vm: &mut Vm, args: &[Value]) -> Value {
    match args.first() {
        Some(&Value::Table(_)) if args.len() == 1 => args[0],
        _ => Value::Nil,
    }
}

fn ipairs_native(_vm: &mut Vm, args: &[Value]) -> Value {
    match args.first() {
        Some(&Value::Table(_)) if args.len() == 1 => args[0],
        _ => Value::Nil,
    }
}

/// `next(table, key)`: the successor of `key` as a `{key, value}` pair, or
/// nil when iteration is done. Array entries come first in index order, then
/// hash entries in table order.
fn next_native(vm: &mut Vm, args: &[Value]) -> Value {
    let table = match args.first() {
        Some(&Value::Table(table)) => table,
        _ => return Value::Nil,
    };
    let key = args.get(1).copied().unwrap_or(Value::Nil);

    let make_pair = |vm: &mut Vm, k: Value, v: Value| {
        let mut pair = allocate!(vm, TableObj::new());
        pair.array.push(k);
        pair.array.push(v);
        Value::Table(pair)
    };

    let first_hash_entry = |vm: &mut Vm| match table.entries.iter().next() {
        Some((&k, &v)) => make_pair(vm, Value::String(k), v),
        None => Value::Nil,
    };

    match key {
        Value::Nil => {
            if !table.array.is_empty() {
                return make_pair(vm, Value::Number(1.0), table.array[0]);
            }
            first_hash_entry(vm)
        }
        Value::Number(n) => {
            let index = n as i64;
            if index >= 1 && (index as usize) < table.array.len() {
                let next_value = table.array[index as usize];
                return make_pair(vm, Value::Number((index + 1) as f64), next_value);
            }
            if index as usize == table.array.len() {
                return first_hash_entry(vm);
            }
            Value::Nil
        }
        Value::String(name) => {
            let mut found = false;
            for (&k, &v) in table.entries.iter() {
                if found {
                    return make_pair(vm, Value::String(k), v);
                }
                if k == name {
                    found = true;
                }
            }
            Value::Nil
        }
        _ => Value::Nil,
    }
}

fn error_native(_vm: &mut Vm, args: &[Value]) -> Value {
    match args.first() {
        Some(Value::String(message)) => eprintln!("error: {}", message.as_str()),
        _ => eprintln!("error"),
    }
    Value::Nil
}

fn assert_native(_vm: &mut Vm, args: &[Value]) -> Value {
    let Some(&condition) = args.first() else {
        return Value::Nil;
    };
    if condition.is_falsey() {
        match args.get(1) {
            Some(Value::String(message)) => {
                eprintln!("assertion failed: {}", message.as_str())
            }
            _ => eprintln!("assertion failed"),
        }
    }
    condition
}

fn rawget_native(_vm: &mut Vm, args: &[Value]) -> Value {
    let table = match args.first() {
        Some(&Value::Table(table)) if args.len() == 2 => table,
        _ => return Value::Nil,
    };
    table_index(&table, args[1])
}

fn rawset_native(_vm: &mut Vm, args: &[Value]) -> Value {
    let mut table = match args.first() {
        Some(&Value::Table(table)) if args.len() == 3 => table,
        _ => return Value::Nil,
    };
    let key = args[1];
    let value = args[2];

    match key {
        Value::Number(n) if n as i64 >= 1 => {
            let index = n as i64 as usize;
            while table.array.len() < index {
                table.array.push(Value::Nil);
            }
            table.array[index - 1] = value;
            args[0]
        }
        Value::String(name) => {
            table.entries.insert(name, value);
            args[0]
        }
        _ => args[0],
    }
}
