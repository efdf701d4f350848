use crate::chunk::{Chunk, Instruction};
use crate::value::Value;

pub struct Disassembler<'a> {
    chunk: &'a Chunk,
    offset: usize,
}

impl<'a> Disassembler<'a> {
    pub fn new(chunk: &'a Chunk) -> Self {
        Disassembler { chunk, offset: 0 }
    }

    fn line_column(&self) -> String {
        let line = self.chunk.line(self.offset);
        if self.offset > 0 && line == self.chunk.line(self.offset - 1) {
            format!("{:>4} ", "|")
        } else {
            format!("{:04} ", line)
        }
    }

}

impl<'a> Iterator for Disassembler<'a> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.chunk.code_len() {
            return None;
        }
        let (text, next_offset) = render_at(self.chunk, self.offset, &self.line_column());
        self.offset = next_offset;
        Some(text)
    }
}

/// Renders one instruction for execution tracing.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> String {
    let line = format!("{:04} ", chunk.line(offset));
    let (text, _) = render_at(chunk, offset, &line);
    text
}

fn render_at(chunk: &Chunk, offset: usize, line_column: &str) -> (String, usize) {
    use Instruction::*;

    let (instr, size) = chunk.decode(offset);
    let mut next_offset = offset + size;
    let mut result = format!("{:04} {} ", offset, line_column);

    let constant = |index: u8| match chunk.constant_checked(index) {
        Some(value) => format!("'{:?}'", value),
        None => "<out-of-bound>".to_string(),
    };

    let simple = |name: &str| name.to_string();
    let with_operand = |name: &str, operand: u8| format!("{:<18} {:04}", name, operand);
    let with_constant =
        |name: &str, index: u8| format!("{:<18} {:04} {}", name, index, constant(index));
    let with_jump = |name: &str, operand: u16| format!("{:<18} {:04}", name, operand);

    let text = match instr {
        OpConstant(k) => with_constant("OP_CONSTANT", k),
        OpNil => simple("OP_NIL"),
        OpTrue => simple("OP_TRUE"),
        OpFalse => simple("OP_FALSE"),
        OpPop => simple("OP_POP"),
        OpPopN(n) => with_operand("OP_POPN", n),
        OpGetLocal(s) => with_operand("OP_GET_LOCAL", s),
        OpSetLocal(s) => with_operand("OP_SET_LOCAL", s),
        OpGetGlobal(k) => with_constant("OP_GET_GLOBAL", k),
        OpSetGlobal(k) => with_constant("OP_SET_GLOBAL", k),
        OpDefineGlobal(k) => with_constant("OP_DEFINE_GLOBAL", k),
        OpGetUpvalue(s) => with_operand("OP_GET_UPVALUE", s),
        OpSetUpvalue(s) => with_operand("OP_SET_UPVALUE", s),
        OpCloseUpvalue => simple("OP_CLOSE_UPVALUE"),
        OpAdd => simple("OP_ADD"),
        OpSubtract => simple("OP_SUBTRACT"),
        OpMultiply => simple("OP_MULTIPLY"),
        OpDivide => simple("OP_DIVIDE"),
        OpModulo => simple("OP_MODULO"),
        OpNegate => simple("OP_NEGATE"),
        OpConcat => simple("OP_CONCAT"),
        OpLength => simple("OP_LENGTH"),
        OpNot => simple("OP_NOT"),
        OpEqual => simple("OP_EQUAL"),
        OpGreater => simple("OP_GREATER"),
        OpLess => simple("OP_LESS"),
        OpJump(o) => with_jump("OP_JUMP", o),
        OpJumpIfFalse(o) => with_jump("OP_JUMP_IF_FALSE", o),
        OpLoop(o) => with_jump("OP_LOOP", o),
        OpCall(n) => with_operand("OP_CALL", n),
        OpClosure(k) => {
            let mut text = with_constant("OP_CLOSURE", k);
            // The upvalue pairs trail the instruction; their count comes
            // from the function constant.
            if let Some(Value::Function(function)) = chunk.constant_checked(k) {
                for _ in 0..function.upvalue_count() {
                    let is_local = chunk.byte(next_offset);
                    let index = chunk.byte(next_offset + 1);
                    text.push_str(&format!(
                        "\n{:04}      |                     {} {}",
                        next_offset,
                        if is_local == 1 { "local" } else { "upvalue" },
                        index
                    ));
                    next_offset += 2;
                }
            }
            text
        }
        OpReturn => simple("OP_RETURN"),
        OpClass(k) => with_constant("OP_CLASS", k),
        OpInherit => simple("OP_INHERIT"),
        OpMethod(k, private) => format!(
            "{:<18} {:04} {}{}",
            "OP_METHOD",
            k,
            constant(k),
            if private == 1 { " private" } else { "" }
        ),
        OpGetProperty(k) => with_constant("OP_GET_PROPERTY", k),
        OpSetProperty(k) => with_constant("OP_SET_PROPERTY", k),
        OpGetSuper(k) => with_constant("OP_GET_SUPER", k),
        OpInvoke(k, n) => format!("{:<18} {:04} ({} args) {}", "OP_INVOKE", k, n, constant(k)),
        OpSuperInvoke(k, n) => format!(
            "{:<18} {:04} ({} args) {}",
            "OP_SUPER_INVOKE",
            k,
            n,
            constant(k)
        ),
        OpNew(n) => with_operand("OP_NEW", n),
        OpTable => simple("OP_TABLE"),
        OpTableGet => simple("OP_TABLE_GET"),
        OpTableSet => simple("OP_TABLE_SET"),
        OpTableAdd => simple("OP_TABLE_ADD"),
        OpTableSetField(k) => with_constant("OP_TABLE_SET_FIELD", k),
        OpTrait(k) => with_constant("OP_TRAIT", k),
        OpImplement => simple("OP_IMPLEMENT"),
        OpInvalid => simple("OP_INVALID"),
    };

    result.push_str(&text);
    (result, next_offset)
}

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {} ==", name);
    for instr_str in Disassembler::new(chunk) {
        println!("{}", instr_str);
    }
}
