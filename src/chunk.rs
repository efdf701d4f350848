use crate::value::Value;

// Constants & literals
const OP_CONSTANT: u8 = 0;
const OP_NIL: u8 = 1;
const OP_TRUE: u8 = 2;
const OP_FALSE: u8 = 3;

// Stack manipulation
const OP_POP: u8 = 4;
const OP_POPN: u8 = 5;

// Variables
const OP_GET_LOCAL: u8 = 6;
const OP_SET_LOCAL: u8 = 7;
const OP_GET_GLOBAL: u8 = 8;
const OP_SET_GLOBAL: u8 = 9;
const OP_DEFINE_GLOBAL: u8 = 10;
const OP_GET_UPVALUE: u8 = 11;
const OP_SET_UPVALUE: u8 = 12;
const OP_CLOSE_UPVALUE: u8 = 13;

// Arithmetic
const OP_ADD: u8 = 14;
const OP_SUBTRACT: u8 = 15;
const OP_MULTIPLY: u8 = 16;
const OP_DIVIDE: u8 = 17;
const OP_MODULO: u8 = 18;
const OP_NEGATE: u8 = 19;
const OP_CONCAT: u8 = 20;
const OP_LENGTH: u8 = 21;

// Comparison & logic
const OP_NOT: u8 = 22;
const OP_EQUAL: u8 = 23;
const OP_GREATER: u8 = 24;
const OP_LESS: u8 = 25;

// Control flow
const OP_JUMP: u8 = 26;
const OP_JUMP_IF_FALSE: u8 = 27;
const OP_LOOP: u8 = 28;

// Functions
const OP_CALL: u8 = 29;
const OP_CLOSURE: u8 = 30;
const OP_RETURN: u8 = 31;

// OOP
const OP_CLASS: u8 = 32;
const OP_INHERIT: u8 = 33;
const OP_METHOD: u8 = 34;
const OP_GET_PROPERTY: u8 = 35;
const OP_SET_PROPERTY: u8 = 36;
const OP_GET_SUPER: u8 = 37;
const OP_INVOKE: u8 = 38;
const OP_SUPER_INVOKE: u8 = 39;
const OP_NEW: u8 = 40;

// Tables
const OP_TABLE: u8 = 41;
const OP_TABLE_GET: u8 = 42;
const OP_TABLE_SET: u8 = 43;
const OP_TABLE_ADD: u8 = 44;
const OP_TABLE_SET_FIELD: u8 = 45;

// Traits
const OP_TRAIT: u8 = 46;
const OP_IMPLEMENT: u8 = 47;

const OP_INVALID: u8 = u8::MAX;

/// Decoded instruction. `OpClosure` is followed in the byte stream by one
/// `(is_local, index)` pair per upvalue of the referenced function; those
/// trailing bytes are read by the consumer, not by `decode`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instruction {
    OpConstant(u8),
    OpNil,
    OpTrue,
    OpFalse,
    OpPop,
    OpPopN(u8),
    OpGetLocal(u8),
    OpSetLocal(u8),
    OpGetGlobal(u8),
    OpSetGlobal(u8),
    OpDefineGlobal(u8),
    OpGetUpvalue(u8),
    OpSetUpvalue(u8),
    OpCloseUpvalue,
    OpAdd,
    OpSubtract,
    OpMultiply,
    OpDivide,
    OpModulo,
    OpNegate,
    OpConcat,
    OpLength,
    OpNot,
    OpEqual,
    OpGreater,
    OpLess,
    OpJump(u16),
    OpJumpIfFalse(u16),
    OpLoop(u16),
    OpCall(u8),
    OpClosure(u8),
    OpReturn,
    OpClass(u8),
    OpInherit,
    OpMethod(u8, u8),
    OpGetProperty(u8),
    OpSetProperty(u8),
    OpGetSuper(u8),
    OpInvoke(u8, u8),
    OpSuperInvoke(u8, u8),
    OpNew(u8),
    OpTable,
    OpTableGet,
    OpTableSet,
    OpTableAdd,
    OpTableSetField(u8),
    OpTrait(u8),
    OpImplement,
    OpInvalid,
}

// 16-bit operands are big-endian.
fn split_u16(operand: u16) -> (u8, u8) {
    ((operand >> 8) as u8, (operand & 0xff) as u8)
}

impl From<Instruction> for Vec<u8> {
    fn from(instr: Instruction) -> Self {
        use Instruction::*;
        match instr {
            OpConstant(k) => vec![OP_CONSTANT, k],
            OpNil => vec![OP_NIL],
            OpTrue => vec![OP_TRUE],
            OpFalse => vec![OP_FALSE],
            OpPop => vec![OP_POP],
            OpPopN(n) => vec![OP_POPN, n],
            OpGetLocal(s) => vec![OP_GET_LOCAL, s],
            OpSetLocal(s) => vec![OP_SET_LOCAL, s],
            OpGetGlobal(k) => vec![OP_GET_GLOBAL, k],
            OpSetGlobal(k) => vec![OP_SET_GLOBAL, k],
            OpDefineGlobal(k) => vec![OP_DEFINE_GLOBAL, k],
            OpGetUpvalue(s) => vec![OP_GET_UPVALUE, s],
            OpSetUpvalue(s) => vec![OP_SET_UPVALUE, s],
            OpCloseUpvalue => vec![OP_CLOSE_UPVALUE],
            OpAdd => vec![OP_ADD],
            OpSubtract => vec![OP_SUBTRACT],
            OpMultiply => vec![OP_MULTIPLY],
            OpDivide => vec![OP_DIVIDE],
            OpModulo => vec![OP_MODULO],
            OpNegate => vec![OP_NEGATE],
            OpConcat => vec![OP_CONCAT],
            OpLength => vec![OP_LENGTH],
            OpNot => vec![OP_NOT],
            OpEqual => vec![OP_EQUAL],
            OpGreater => vec![OP_GREATER],
            OpLess => vec![OP_LESS],
            OpJump(o) => {
                let (hi, lo) = split_u16(o);
                vec![OP_JUMP, hi, lo]
            }
            OpJumpIfFalse(o) => {
                let (hi, lo) = split_u16(o);
                vec![OP_JUMP_IF_FALSE, hi, lo]
            }
            OpLoop(o) => {
                let (hi, lo) = split_u16(o);
                vec![OP_LOOP, hi, lo]
            }
            OpCall(n) => vec![OP_CALL, n],
            OpClosure(k) => vec![OP_CLOSURE, k],
            OpReturn => vec![OP_RETURN],
            OpClass(k) => vec![OP_CLASS, k],
            OpInherit => vec![OP_INHERIT],
            OpMethod(k, private) => vec![OP_METHOD, k, private],
            OpGetProperty(k) => vec![OP_GET_PROPERTY, k],
            OpSetProperty(k) => vec![OP_SET_PROPERTY, k],
            OpGetSuper(k) => vec![OP_GET_SUPER, k],
            OpInvoke(k, n) => vec![OP_INVOKE, k, n],
            OpSuperInvoke(k, n) => vec![OP_SUPER_INVOKE, k, n],
            OpNew(n) => vec![OP_NEW, n],
            OpTable => vec![OP_TABLE],
            OpTableGet => vec![OP_TABLE_GET],
            OpTableSet => vec![OP_TABLE_SET],
            OpTableAdd => vec![OP_TABLE_ADD],
            OpTableSetField(k) => vec![OP_TABLE_SET_FIELD, k],
            OpTrait(k) => vec![OP_TRAIT, k],
            OpImplement => vec![OP_IMPLEMENT],
            OpInvalid => vec![OP_INVALID],
        }
    }
}

/// Bytecode for one function: code array, per-byte source lines, constant
/// pool.
pub struct Chunk {
    code: Vec<u8>,
    lines: Vec<u32>,
    constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk {
            code: Vec::new(),
            lines: Vec::new(),
            constants: Vec::new(),
        }
    }

    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    /// Appends an instruction, returning the offset of its first byte.
    pub fn push_instruction(&mut self, instr: Instruction, line: u32) -> usize {
        let at = self.code.len();
        let bytes: Vec<u8> = instr.into();
        for byte in bytes {
            self.code.push(byte);
            self.lines.push(line);
        }
        at
    }

    /// Raw byte append, used for the upvalue pairs trailing `OpClosure`.
    pub fn push_byte(&mut self, byte: u8, line: u32) {
        self.code.push(byte);
        self.lines.push(line);
    }

    pub fn push_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    pub fn constant(&self, index: u8) -> Value {
        self.constants[index as usize]
    }

    pub fn constant_checked(&self, index: u8) -> Option<&Value> {
        self.constants.get(index as usize)
    }

    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    pub fn byte(&self, offset: usize) -> u8 {
        self.code[offset]
    }

    pub fn line(&self, offset: usize) -> u32 {
        self.lines.get(offset).copied().unwrap_or(0)
    }

    /// Writes a big-endian u16 at `operand_at` (the byte after a jump
    /// opcode).
    pub fn patch_jump_offset(&mut self, operand_at: usize, jump: u16) {
        let (hi, lo) = split_u16(jump);
        self.code[operand_at] = hi;
        self.code[operand_at + 1] = lo;
    }

    /// Rewinds emitted code; used by the peephole folder to replace constant
    /// operands. Orphaned pool entries are left behind, matching the
    /// emit-fresh-constant strategy.
    pub fn truncate(&mut self, len: usize) {
        self.code.truncate(len);
        self.lines.truncate(len);
    }

    /// Decodes the instruction at `offset`, returning it and its size in
    /// bytes. Truncated operands decode as `OpInvalid`.
    pub fn decode(&self, offset: usize) -> (Instruction, usize) {
        use Instruction::*;

        let opcode = match self.code.get(offset) {
            Some(&b) => b,
            None => return (OpInvalid, 1),
        };

        macro_rules! with_u8 {
            ($variant:expr) => {
                match self.code.get(offset + 1) {
                    Some(&operand) => ($variant(operand), 2),
                    None => (OpInvalid, 1),
                }
            };
        }
        macro_rules! with_u8_u8 {
            ($variant:expr) => {
                match (self.code.get(offset + 1), self.code.get(offset + 2)) {
                    (Some(&a), Some(&b)) => ($variant(a, b), 3),
                    _ => (OpInvalid, 1),
                }
            };
        }
        macro_rules! with_u16 {
            ($variant:expr) => {
                match (self.code.get(offset + 1), self.code.get(offset + 2)) {
                    (Some(&hi), Some(&lo)) => ($variant(u16::from_be_bytes([hi, lo])), 3),
                    _ => (OpInvalid, 1),
                }
            };
        }

        match opcode {
            OP_CONSTANT => with_u8!(OpConstant),
            OP_NIL => (OpNil, 1),
            OP_TRUE => (OpTrue, 1),
            OP_FALSE => (OpFalse, 1),
            OP_POP => (OpPop, 1),
            OP_POPN => with_u8!(OpPopN),
            OP_GET_LOCAL => with_u8!(OpGetLocal),
            OP_SET_LOCAL => with_u8!(OpSetLocal),
            OP_GET_GLOBAL => with_u8!(OpGetGlobal),
            OP_SET_GLOBAL => with_u8!(OpSetGlobal),
            OP_DEFINE_GLOBAL => with_u8!(OpDefineGlobal),
            OP_GET_UPVALUE => with_u8!(OpGetUpvalue),
            OP_SET_UPVALUE => with_u8!(OpSetUpvalue),
            OP_CLOSE_UPVALUE => (OpCloseUpvalue, 1),
            OP_ADD => (OpAdd, 1),
            OP_SUBTRACT => (OpSubtract, 1),
            OP_MULTIPLY => (OpMultiply, 1),
            OP_DIVIDE => (OpDivide, 1),
            OP_MODULO => (OpModulo, 1),
            OP_NEGATE => (OpNegate, 1),
            OP_CONCAT => (OpConcat, 1),
            OP_LENGTH => (OpLength, 1),
            OP_NOT => (OpNot, 1),
            OP_EQUAL => (OpEqual, 1),
            OP_GREATER => (OpGreater, 1),
            OP_LESS => (OpLess, 1),
            OP_JUMP => with_u16!(OpJump),
            OP_JUMP_IF_FALSE => with_u16!(OpJumpIfFalse),
            OP_LOOP => with_u16!(OpLoop),
            OP_CALL => with_u8!(OpCall),
            OP_CLOSURE => with_u8!(OpClosure),
            OP_RETURN => (OpReturn, 1),
            OP_CLASS => with_u8!(OpClass),
            OP_INHERIT => (OpInherit, 1),
            OP_METHOD => with_u8_u8!(OpMethod),
            OP_GET_PROPERTY => with_u8!(OpGetProperty),
            OP_SET_PROPERTY => with_u8!(OpSetProperty),
            OP_GET_SUPER => with_u8!(OpGetSuper),
            OP_INVOKE => with_u8_u8!(OpInvoke),
            OP_SUPER_INVOKE => with_u8_u8!(OpSuperInvoke),
            OP_NEW => with_u8!(OpNew),
            OP_TABLE => (OpTable, 1),
            OP_TABLE_GET => (OpTableGet, 1),
            OP_TABLE_SET => (OpTableSet, 1),
            OP_TABLE_ADD => (OpTableAdd, 1),
            OP_TABLE_SET_FIELD => with_u8!(OpTableSetField),
            OP_TRAIT => with_u8!(OpTrait),
            OP_IMPLEMENT => (OpImplement, 1),
            _ => (OpInvalid, 1),
        }
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Chunk::new()
    }
}
