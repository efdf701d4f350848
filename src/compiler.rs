use crate::chunk::{Chunk, Instruction};
use crate::debug;
use crate::diagnostic::{codes, DiagLevel, DiagReporter};
use crate::memory::{Gc, Heap, MarkRoots, Trace, Tracer};
use crate::object::{FnObj, StrObj};
use crate::scanner::{Scanner, Token, TokenKind};
use crate::value::Value;

const LOCALS_MAX: usize = 256;
const UPVALUES_MAX: usize = 256;
const BREAKS_MAX: usize = 256;

pub struct CompilerOptions {
    pub warn_unused: bool,
    pub print_code: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            warn_unused: true,
            print_code: false,
        }
    }
}

pub struct CompileResult {
    pub function: Option<Gc<FnObj>>,
    pub errors: usize,
    pub warnings: usize,
}

/// Compiles a script to a function object. Diagnostics go to stderr;
/// `function` is `None` when any error was reported. `extra_roots` lets a
/// running VM keep its state alive across collections triggered by
/// compile-time allocation.
pub fn compile(
    source: &str,
    heap: &mut Heap,
    filename: Option<&str>,
    options: &CompilerOptions,
    extra_roots: Option<&dyn MarkRoots>,
) -> CompileResult {
    let mut parser = Parser::new(source, heap, filename, options, extra_roots);

    parser.advance();
    while !parser.matches(TokenKind::Eof) {
        if parser.diag.should_stop() {
            break;
        }
        parser.declaration();
    }

    let (function, _) = parser.end_fun();
    parser.diag.summary();

    CompileResult {
        function: if parser.had_error {
            None
        } else {
            Some(function)
        },
        errors: parser.diag.error_count,
        warnings: parser.diag.warning_count,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunKind {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local<'a> {
    name: Token<'a>,
    /// -1 until the initializer completes.
    depth: i32,
    is_captured: bool,
    is_used: bool,
    /// Bytecode range of the initializer, for the dead-store analysis.
    init_start: usize,
    init_end: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct CompUpvalue {
    index: u8,
    is_local: bool,
}

struct LoopState {
    /// Backward target for `continue`; numeric `for` leaves this unset and
    /// forward-patches `continue_jumps` to the increment section instead.
    continue_target: Option<usize>,
    continue_jumps: Vec<usize>,
    scope_depth: i32,
    break_jumps: Vec<usize>,
}

impl LoopState {
    fn new(continue_target: Option<usize>, scope_depth: i32) -> Self {
        LoopState {
            continue_target,
            continue_jumps: Vec::new(),
            scope_depth,
            break_jumps: Vec::new(),
        }
    }
}

struct FunState<'a> {
    name: Option<Gc<StrObj>>,
    kind: FunKind,
    arity: u8,
    chunk: Chunk,
    locals: Vec<Local<'a>>,
    upvalues: Vec<CompUpvalue>,
    scope_depth: i32,
    loops: Vec<LoopState>,
    /// Offsets of the last two emitted instructions, so the peephole folder
    /// only ever inspects instruction-aligned bytes.
    last_op: Option<usize>,
    prev_op: Option<usize>,
}

impl<'a> FunState<'a> {
    fn new(name: Option<Gc<StrObj>>, kind: FunKind) -> Self {
        let mut state = FunState {
            name,
            kind,
            arity: 0,
            chunk: Chunk::new(),
            locals: Vec::new(),
            upvalues: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
            last_op: None,
            prev_op: None,
        };

        // Slot 0 holds the callee; methods expose it as `self`.
        let slot_zero = match kind {
            FunKind::Method | FunKind::Initializer => Token::synthetic("self"),
            _ => Token::synthetic(""),
        };
        state.locals.push(Local {
            name: slot_zero,
            depth: 0,
            is_captured: false,
            is_used: true,
            init_start: usize::MAX,
            init_end: 0,
        });
        state
    }
}

struct ClassState {
    has_superclass: bool,
}

struct CompilerRoots<'a, 'src> {
    fun_states: &'a [FunState<'src>],
    pending: Option<&'a FnObj>,
    extra: Option<&'a dyn MarkRoots>,
}

impl MarkRoots for CompilerRoots<'_, '_> {
    fn mark_roots(&self, tracer: &mut Tracer) {
        for fs in self.fun_states {
            if let Some(name) = fs.name {
                tracer.mark(name);
            }
            for constant in fs.chunk.constants() {
                constant.trace(tracer);
            }
        }
        if let Some(pending) = self.pending {
            pending.trace(tracer);
        }
        if let Some(extra) = self.extra {
            extra.mark_roots(tracer);
        }
    }
}

#[derive(Clone, Copy, PartialEq, PartialOrd)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == ~=
    Comparison, // < > <= >=
    Concat,     // ..
    Term,       // + -
    Factor,     // * / %
    Unary,      // not - #
    Call,       // . () : []
    Primary,
}

impl Precedence {
    fn stronger(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Concat,
            Concat => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call | Primary => Primary,
        }
    }
}

type ParseFn<'a> = fn(&mut Parser<'a>, bool);

struct Parser<'a> {
    scanner: Scanner<'a>,
    heap: &'a mut Heap,
    diag: DiagReporter<'a>,
    options: &'a CompilerOptions,
    extra_roots: Option<&'a dyn MarkRoots>,
    current: Token<'a>,
    previous: Token<'a>,
    had_error: bool,
    panic_mode: bool,
    fun_states: Vec<FunState<'a>>,
    class_states: Vec<ClassState>,
}

impl<'a> Parser<'a> {
    fn new(
        source: &'a str,
        heap: &'a mut Heap,
        filename: Option<&str>,
        options: &'a CompilerOptions,
        extra_roots: Option<&'a dyn MarkRoots>,
    ) -> Self {
        let placeholder = Token::new(TokenKind::Eof, "", 0, 0);
        Parser {
            scanner: Scanner::new(source),
            heap,
            diag: DiagReporter::new(source, filename),
            options,
            extra_roots,
            current: placeholder,
            previous: placeholder,
            had_error: false,
            panic_mode: false,
            fun_states: vec![FunState::new(None, FunKind::Script)],
            class_states: Vec::new(),
        }
    }

    // === function state management ===

    fn fun(&self) -> &FunState<'a> {
        self.fun_states.last().expect("empty function stack")
    }

    fn fun_mut(&mut self) -> &mut FunState<'a> {
        self.fun_states.last_mut().expect("empty function stack")
    }

    fn begin_scope(&mut self) {
        self.fun_mut().scope_depth += 1;
    }

    /// Emits pops (or upvalue closes) for every local deeper than
    /// `above_depth` without forgetting the locals. `break`/`continue` use
    /// this to unwind a loop body mid-scope.
    fn emit_locals_cleanup(&mut self, above_depth: i32) {
        let captured: Vec<bool> = self
            .fun()
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth > above_depth)
            .map(|local| local.is_captured)
            .collect();
        for is_captured in captured {
            if is_captured {
                self.emit(Instruction::OpCloseUpvalue);
            } else {
                self.emit(Instruction::OpPop);
            }
        }
    }

    fn end_scope(&mut self) {
        self.fun_mut().scope_depth -= 1;
        let depth = self.fun().scope_depth;
        self.emit_locals_cleanup(depth);
        loop {
            let done = match self.fun().locals.last() {
                Some(local) => local.depth <= depth,
                None => true,
            };
            if done {
                break;
            }
            let local = self.fun_mut().locals.pop().expect("local");
            self.maybe_warn_dead_store(&local);
        }
    }

    fn maybe_warn_dead_store(&mut self, local: &Local<'a>) {
        if !self.options.warn_unused {
            return;
        }
        if local.is_used || local.is_captured {
            return;
        }
        let lexeme = local.name.lexeme;
        if lexeme.is_empty() || lexeme.starts_with('_') {
            return;
        }
        // Only initializers made of provably effect-free opcodes are
        // dead-store candidates; a call or global read keeps the store.
        if local.init_start == usize::MAX || local.init_end <= local.init_start {
            return;
        }
        if !is_side_effect_free(&self.fun().chunk, local.init_start, local.init_end) {
            return;
        }
        let token = local.name;
        self.warning(
            &token,
            codes::W_UNUSED_VARIABLE,
            &format!("unused variable '{}'", lexeme),
        );
    }

    fn end_fun(&mut self) -> (Gc<FnObj>, Vec<CompUpvalue>) {
        self.emit_return();
        let fs = self.fun_states.pop().expect("no function to end");

        if self.options.warn_unused {
            for (i, local) in fs.locals.iter().enumerate().skip(1) {
                if local.is_used
                    || local.name.lexeme.is_empty()
                    || local.name.lexeme.starts_with('_')
                {
                    continue;
                }
                let is_param = fs.kind != FunKind::Script && i <= fs.arity as usize;
                if is_param {
                    let token = local.name;
                    self.warning(
                        &token,
                        codes::W_UNUSED_PARAMETER,
                        &format!("unused parameter '{}'", token.lexeme),
                    );
                } else if !local.is_captured
                    && local.init_start != usize::MAX
                    && local.init_end > local.init_start
                    && is_side_effect_free(&fs.chunk, local.init_start, local.init_end)
                {
                    let token = local.name;
                    self.warning(
                        &token,
                        codes::W_UNUSED_VARIABLE,
                        &format!("unused variable '{}'", token.lexeme),
                    );
                }
            }
        }

        if self.options.print_code && !self.had_error {
            let label = match fs.name {
                Some(name) => name.as_str().to_string(),
                None => "<script>".to_string(),
            };
            debug::disassemble_chunk(&fs.chunk, &label);
        }

        let function = FnObj::new(fs.chunk, fs.arity, fs.upvalues.len(), fs.name);
        (self.alloc_function(function), fs.upvalues)
    }

    // === GC integration ===

    fn intern(&mut self, text: &str) -> Gc<StrObj> {
        if self.heap.should_collect() {
            let roots = CompilerRoots {
                fun_states: &self.fun_states,
                pending: None,
                extra: self.extra_roots,
            };
            self.heap.collect(&roots);
        }
        self.heap.intern(text)
    }

    fn alloc_function(&mut self, function: FnObj) -> Gc<FnObj> {
        if self.heap.should_collect() {
            let roots = CompilerRoots {
                fun_states: &self.fun_states,
                pending: Some(&function),
                extra: self.extra_roots,
            };
            self.heap.collect(&roots);
        }
        self.heap.allocate(function)
    }

    // === error reporting ===

    fn error_at(&mut self, at_current: bool, code: u16, message: &str, help: Option<&str>) {
        if self.panic_mode {
            return;
        }
        if self.diag.should_stop() {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;

        let token = if at_current {
            &self.current
        } else {
            &self.previous
        };
        let length = if token.kind == TokenKind::Error {
            1
        } else {
            token.lexeme.len().max(1)
        };
        self.diag.report(
            DiagLevel::Error,
            code,
            token.line,
            token.column,
            length,
            message,
            help,
        );
    }

    fn error(&mut self, message: &str) {
        self.error_at(false, codes::E_EXPECT_TOKEN, message, None);
    }

    fn error_with_code(&mut self, code: u16, message: &str, help: Option<&str>) {
        self.error_at(false, code, message, help);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(true, codes::E_EXPECT_TOKEN, message, None);
    }

    fn error_at_current_with_code(&mut self, code: u16, message: &str, help: Option<&str>) {
        self.error_at(true, code, message, help);
    }

    fn warning(&mut self, token: &Token<'a>, code: u16, message: &str) {
        if self.panic_mode {
            return;
        }
        self.diag.report(
            DiagLevel::Warning,
            code,
            token.line,
            token.column,
            token.lexeme.len().max(1),
            message,
            None,
        );
    }

    // === token handling ===

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme;
            let (code, help) = match message {
                "Unterminated string." => (
                    codes::E_UNTERMINATED_STR,
                    Some("add a closing quote to terminate the string"),
                ),
                "Unterminated long string." => (
                    codes::E_UNTERMINATED_STR,
                    Some("add ']]' to close the long string"),
                ),
                _ => (
                    codes::E_UNEXPECTED_CHAR,
                    Some("remove this character or check for typos"),
                ),
            };
            self.error_at_current_with_code(code, message, help);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // === code emitters ===

    fn emit(&mut self, instr: Instruction) -> usize {
        let line = self.previous.line;
        let fs = self.fun_mut();
        let at = fs.chunk.push_instruction(instr, line);
        fs.prev_op = fs.last_op;
        fs.last_op = Some(at);
        at
    }

    fn emit_jump(&mut self, instr: Instruction) -> usize {
        self.emit(instr)
    }

    fn patch_jump(&mut self, at: usize) {
        // Offsets count from the end of the 3-byte jump instruction.
        let jump = self.fun().chunk.code_len() - at - 3;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        self.fun_mut().chunk.patch_jump_offset(at + 1, jump as u16);
    }

    fn emit_loop(&mut self, target: usize) {
        let offset = self.fun().chunk.code_len() - target + 3;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
            return;
        }
        self.emit(Instruction::OpLoop(offset as u16));
    }

    fn emit_return(&mut self) {
        if self.fun().kind == FunKind::Initializer {
            self.emit(Instruction::OpGetLocal(0));
        } else {
            self.emit(Instruction::OpNil);
        }
        self.emit(Instruction::OpReturn);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let index = self.fun_mut().chunk.push_constant(value);
        if index > u8::MAX as usize {
            self.error_with_code(
                codes::E_TOO_MANY_CONSTANTS,
                "Too many constants in one chunk.",
                Some("split this function into smaller functions"),
            );
            return 0;
        }
        index as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit(Instruction::OpConstant(index));
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let interned = self.intern(name);
        self.make_constant(Value::String(interned))
    }

    // === constant folding ===

    /// The value of the trailing `CONSTANT`, when the last emitted
    /// instruction is one.
    fn last_constant(&self) -> Option<Value> {
        let fs = self.fun();
        let last = fs.last_op?;
        if last + 2 != fs.chunk.code_len() {
            return None;
        }
        match fs.chunk.decode(last).0 {
            Instruction::OpConstant(index) => fs.chunk.constant_checked(index).copied(),
            _ => None,
        }
    }

    fn last_two_constants(&self) -> Option<(Value, Value)> {
        let fs = self.fun();
        let last = fs.last_op?;
        let prev = fs.prev_op?;
        if last + 2 != fs.chunk.code_len() || prev + 2 != last {
            return None;
        }
        let a = match fs.chunk.decode(prev).0 {
            Instruction::OpConstant(index) => fs.chunk.constant_checked(index).copied()?,
            _ => return None,
        };
        let b = match fs.chunk.decode(last).0 {
            Instruction::OpConstant(index) => fs.chunk.constant_checked(index).copied()?,
            _ => return None,
        };
        Some((a, b))
    }

    fn drop_last_constant(&mut self) {
        let fs = self.fun_mut();
        let len = fs.chunk.code_len();
        fs.chunk.truncate(len - 2);
        fs.last_op = fs.prev_op;
        fs.prev_op = None;
    }

    fn drop_last_two_constants(&mut self) {
        let fs = self.fun_mut();
        let len = fs.chunk.code_len();
        fs.chunk.truncate(len - 4);
        fs.last_op = None;
        fs.prev_op = None;
    }

    // === variable handling ===

    fn add_local(&mut self, name: Token<'a>) {
        if self.fun().locals.len() == LOCALS_MAX {
            self.error_with_code(
                codes::E_TOO_MANY_LOCALS,
                "Too many local variables in function.",
                Some("split this function into smaller functions"),
            );
            return;
        }
        self.fun_mut().locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
            is_used: false,
            init_start: usize::MAX,
            init_end: 0,
        });
    }

    fn add_hidden_local(&mut self) {
        if self.fun().locals.len() == LOCALS_MAX {
            self.error_with_code(
                codes::E_TOO_MANY_LOCALS,
                "Too many local variables in function.",
                None,
            );
            return;
        }
        let depth = self.fun().scope_depth;
        self.fun_mut().locals.push(Local {
            name: Token::synthetic(""),
            depth,
            is_captured: false,
            is_used: true,
            init_start: usize::MAX,
            init_end: 0,
        });
    }

    /// Declares `previous` as a local in the current scope, reporting
    /// redeclarations and shadowing.
    fn declare_local(&mut self) {
        let name = self.previous;
        let depth = self.fun().scope_depth;

        let mut duplicate = false;
        let mut shadowed = false;
        for local in self.fun().locals.iter().rev() {
            let in_outer_scope = local.depth != -1 && local.depth < depth;
            if in_outer_scope {
                if !name.lexeme.is_empty()
                    && !name.lexeme.starts_with('_')
                    && local.name.lexeme == name.lexeme
                {
                    shadowed = true;
                    break;
                }
                continue;
            }
            if !name.lexeme.is_empty() && local.name.lexeme == name.lexeme {
                duplicate = true;
            }
        }

        if duplicate {
            self.error_with_code(
                codes::E_REDECLARED_VAR,
                "Already a variable with this name in this scope.",
                Some("rename one of the variables"),
            );
        } else if shadowed {
            let token = name;
            self.warning(
                &token,
                codes::W_SHADOWED_VARIABLE,
                &format!(
                    "declaration of '{}' shadows a variable in an outer scope",
                    name.lexeme
                ),
            );
        }

        self.add_local(name);
    }

    fn declare_variable(&mut self) {
        if self.fun().scope_depth == 0 {
            return; // global
        }
        self.declare_local();
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.fun().scope_depth > 0 {
            return 0; // local, no constant needed
        }
        self.identifier_constant(self.previous.lexeme)
    }

    fn mark_local_initialized(&mut self) {
        let depth = self.fun().scope_depth;
        if let Some(local) = self.fun_mut().locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.fun().scope_depth > 0 {
            self.mark_local_initialized();
            return;
        }
        self.emit(Instruction::OpDefineGlobal(global));
    }

    fn resolve_local_in(&mut self, fs_index: usize, name: &str) -> Option<u8> {
        if name.is_empty() {
            return None;
        }
        let mut found = None;
        for (i, local) in self.fun_states[fs_index].locals.iter().enumerate().rev() {
            if local.name.lexeme == name {
                found = Some((i, local.depth == -1));
                break;
            }
        }
        let (slot, uninitialized) = found?;
        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        self.fun_states[fs_index].locals[slot].is_used = true;
        Some(slot as u8)
    }

    fn add_upvalue(&mut self, fs_index: usize, index: u8, is_local: bool) -> u8 {
        let upvalues = &self.fun_states[fs_index].upvalues;
        if let Some(existing) = upvalues
            .iter()
            .position(|uv| uv.index == index && uv.is_local == is_local)
        {
            return existing as u8;
        }
        if upvalues.len() == UPVALUES_MAX {
            self.error("Too many closure variables in function.");
            return 0;
        }
        self.fun_states[fs_index]
            .upvalues
            .push(CompUpvalue { index, is_local });
        (self.fun_states[fs_index].upvalues.len() - 1) as u8
    }

    /// Resolves `name` as a capture from an enclosing function, threading
    /// upvalue entries through every intermediate frame.
    fn resolve_upvalue(&mut self, fs_index: usize, name: &str) -> Option<u8> {
        if fs_index == 0 {
            return None;
        }
        if let Some(local) = self.resolve_local_in(fs_index - 1, name) {
            self.fun_states[fs_index - 1].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(fs_index, local, true));
        }
        if let Some(upvalue) = self.resolve_upvalue(fs_index - 1, name) {
            return Some(self.add_upvalue(fs_index, upvalue, false));
        }
        None
    }

    fn named_variable(&mut self, name: Token<'a>, can_assign: bool) {
        let top = self.fun_states.len() - 1;
        let (get_op, set_op) = if let Some(slot) = self.resolve_local_in(top, name.lexeme) {
            (Instruction::OpGetLocal(slot), Instruction::OpSetLocal(slot))
        } else if let Some(slot) = self.resolve_upvalue(top, name.lexeme) {
            (Instruction::OpGetUpvalue(slot), Instruction::OpSetUpvalue(slot))
        } else {
            let index = self.identifier_constant(name.lexeme);
            (Instruction::OpGetGlobal(index), Instruction::OpSetGlobal(index))
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit(set_op);
        } else {
            self.emit(get_op);
        }
    }

    // === expression parsing (Pratt) ===

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = match Self::prefix_rule(self.previous.kind) {
            Some(rule) => rule,
            None => {
                self.error_at(
                    false,
                    codes::E_EXPECT_EXPRESSION,
                    "Expect expression.",
                    None,
                );
                return;
            }
        };

        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= Self::infix_precedence(self.current.kind) {
            self.advance();
            match Self::infix_rule(self.previous.kind) {
                Some(rule) => rule(self, can_assign),
                None => break,
            }
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error_at(
                false,
                codes::E_INVALID_ASSIGN,
                "Invalid assignment target.",
                Some("only variables, properties, and table entries can be assigned"),
            );
        }
    }

    fn prefix_rule(kind: TokenKind) -> Option<ParseFn<'a>> {
        match kind {
            TokenKind::LeftParen => Some(Parser::grouping),
            TokenKind::LeftBrace => Some(Parser::table),
            TokenKind::Minus | TokenKind::Not => Some(Parser::unary),
            TokenKind::Hash => Some(Parser::length),
            TokenKind::Identifier => Some(Parser::variable),
            TokenKind::String => Some(Parser::string),
            TokenKind::Number => Some(Parser::number),
            TokenKind::True | TokenKind::False | TokenKind::Nil => Some(Parser::literal),
            TokenKind::New => Some(Parser::new_expr),
            TokenKind::Super => Some(Parser::super_expr),
            TokenKind::SelfKw => Some(Parser::self_expr),
            _ => None,
        }
    }

    fn infix_rule(kind: TokenKind) -> Option<ParseFn<'a>> {
        match kind {
            TokenKind::LeftParen => Some(Parser::call),
            TokenKind::LeftBracket => Some(Parser::subscript),
            TokenKind::Dot => Some(Parser::dot),
            TokenKind::Colon => Some(Parser::colon),
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent
            | TokenKind::DotDot
            | TokenKind::EqualEqual
            | TokenKind::TildeEqual
            | TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => Some(Parser::binary),
            TokenKind::And => Some(Parser::and_expr),
            TokenKind::Or => Some(Parser::or_expr),
            _ => None,
        }
    }

    fn infix_precedence(kind: TokenKind) -> Precedence {
        match kind {
            TokenKind::LeftParen
            | TokenKind::LeftBracket
            | TokenKind::Dot
            | TokenKind::Colon => Precedence::Call,
            TokenKind::Plus | TokenKind::Minus => Precedence::Term,
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Factor,
            TokenKind::DotDot => Precedence::Concat,
            TokenKind::EqualEqual | TokenKind::TildeEqual => Precedence::Equality,
            TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual => Precedence::Comparison,
            TokenKind::And => Precedence::And,
            TokenKind::Or => Precedence::Or,
            _ => Precedence::None,
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        let value = self.previous.lexeme.parse::<f64>().unwrap_or(0.0);
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let content = if lexeme.starts_with("[[") {
            &lexeme[2..lexeme.len() - 2]
        } else {
            &lexeme[1..lexeme.len() - 1]
        };
        let interned = self.intern(content);
        self.emit_constant(Value::String(interned));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit(Instruction::OpFalse),
            TokenKind::True => self.emit(Instruction::OpTrue),
            TokenKind::Nil => self.emit(Instruction::OpNil),
            _ => return,
        };
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous, can_assign);
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);

        // Fold constant operands at compile time.
        if let Some(value) = self.last_constant() {
            match operator {
                TokenKind::Minus => {
                    if let Value::Number(n) = value {
                        self.drop_last_constant();
                        self.emit_constant(Value::Number(-n));
                        return;
                    }
                }
                TokenKind::Not => {
                    self.drop_last_constant();
                    self.emit_constant(Value::Boolean(value.is_falsey()));
                    return;
                }
                _ => {}
            }
        }

        match operator {
            TokenKind::Minus => self.emit(Instruction::OpNegate),
            TokenKind::Not => self.emit(Instruction::OpNot),
            _ => return,
        };
    }

    fn length(&mut self, _can_assign: bool) {
        self.parse_precedence(Precedence::Unary);
        self.emit(Instruction::OpLength);
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let precedence = Self::infix_precedence(operator);
        self.parse_precedence(precedence.stronger());

        if self.try_fold_binary(operator) {
            return;
        }

        match operator {
            TokenKind::Plus => {
                self.emit(Instruction::OpAdd);
            }
            TokenKind::Minus => {
                self.emit(Instruction::OpSubtract);
            }
            TokenKind::Star => {
                self.emit(Instruction::OpMultiply);
            }
            TokenKind::Slash => {
                self.emit(Instruction::OpDivide);
            }
            TokenKind::Percent => {
                self.emit(Instruction::OpModulo);
            }
            TokenKind::DotDot => {
                self.emit(Instruction::OpConcat);
            }
            TokenKind::EqualEqual => {
                self.emit(Instruction::OpEqual);
            }
            TokenKind::TildeEqual => {
                self.emit(Instruction::OpEqual);
                self.emit(Instruction::OpNot);
            }
            TokenKind::Greater => {
                self.emit(Instruction::OpGreater);
            }
            TokenKind::GreaterEqual => {
                self.emit(Instruction::OpLess);
                self.emit(Instruction::OpNot);
            }
            TokenKind::Less => {
                self.emit(Instruction::OpLess);
            }
            TokenKind::LessEqual => {
                self.emit(Instruction::OpGreater);
                self.emit(Instruction::OpNot);
            }
            _ => {}
        }
    }

    fn try_fold_binary(&mut self, operator: TokenKind) -> bool {
        let Some((a, b)) = self.last_two_constants() else {
            return false;
        };

        if let (Value::Number(x), Value::Number(y)) = (a, b) {
            let folded = match operator {
                TokenKind::Plus => Some(Value::Number(x + y)),
                TokenKind::Minus => Some(Value::Number(x - y)),
                TokenKind::Star => Some(Value::Number(x * y)),
                // Division and modulo by zero are left for the runtime.
                TokenKind::Slash if y != 0.0 => Some(Value::Number(x / y)),
                TokenKind::Percent if y != 0.0 => {
                    Some(Value::Number((x as i64 % y as i64) as f64))
                }
                TokenKind::Greater => Some(Value::Boolean(x > y)),
                TokenKind::GreaterEqual => Some(Value::Boolean(x >= y)),
                TokenKind::Less => Some(Value::Boolean(x < y)),
                TokenKind::LessEqual => Some(Value::Boolean(x <= y)),
                TokenKind::EqualEqual => Some(Value::Boolean(x == y)),
                TokenKind::TildeEqual => Some(Value::Boolean(x != y)),
                _ => None,
            };
            if let Some(value) = folded {
                self.drop_last_two_constants();
                self.emit_constant(value);
                return true;
            }
            if matches!(operator, TokenKind::Slash | TokenKind::Percent) {
                return false;
            }
        }

        if let (Value::String(x), Value::String(y)) = (a, b) {
            if operator == TokenKind::DotDot {
                let joined = format!("{}{}", x.as_str(), y.as_str());
                self.drop_last_two_constants();
                let interned = self.intern(&joined);
                self.emit_constant(Value::String(interned));
                return true;
            }
        }

        // Equality between any two constants folds, whatever their types.
        if matches!(operator, TokenKind::EqualEqual | TokenKind::TildeEqual) {
            let equal = a == b;
            self.drop_last_two_constants();
            self.emit_constant(Value::Boolean(if operator == TokenKind::EqualEqual {
                equal
            } else {
                !equal
            }));
            return true;
        }

        false
    }

    fn and_expr(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(Instruction::OpJumpIfFalse(u16::MAX));
        self.emit(Instruction::OpPop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_expr(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(Instruction::OpJumpIfFalse(u16::MAX));
        let end_jump = self.emit_jump(Instruction::OpJump(u16::MAX));
        self.patch_jump(else_jump);
        self.emit(Instruction::OpPop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error_with_code(
                        codes::E_TOO_MANY_ARGS,
                        "Can't have more than 255 arguments.",
                        None,
                    );
                }
                count += 1;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count.min(255) as u8
    }

    fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit(Instruction::OpCall(arg_count));
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous.lexeme);

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit(Instruction::OpSetProperty(name));
        } else if self.matches(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.emit(Instruction::OpInvoke(name, arg_count));
        } else {
            self.emit(Instruction::OpGetProperty(name));
        }
    }

    fn colon(&mut self, _can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect method name after ':'.");
        let name = self.identifier_constant(self.previous.lexeme);
        self.consume(TokenKind::LeftParen, "Expect '(' after method name.");
        let arg_count = self.argument_list();
        // obj:m(args) compiles exactly like obj.m(args).
        self.emit(Instruction::OpInvoke(name, arg_count));
    }

    fn subscript(&mut self, can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightBracket, "Expect ']' after index.");

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit(Instruction::OpTableSet);
        } else {
            self.emit(Instruction::OpTableGet);
        }
    }

    /// Table literal: `{1, 2, 3}` and `{name = "foo", age = 25}`.
    fn table(&mut self, _can_assign: bool) {
        self.emit(Instruction::OpTable);

        if !self.check(TokenKind::RightBrace) {
            loop {
                if self.check(TokenKind::RightBrace) {
                    break; // trailing comma
                }

                if self.check(TokenKind::Identifier) {
                    let name = self.current;
                    self.advance();
                    if self.matches(TokenKind::Equal) {
                        let constant = self.identifier_constant(name.lexeme);
                        self.expression();
                        self.emit(Instruction::OpTableSetField(constant));
                    } else {
                        // A bare variable used as a positional entry.
                        self.named_variable(name, false);
                        self.emit(Instruction::OpTableAdd);
                    }
                } else {
                    self.expression();
                    self.emit(Instruction::OpTableAdd);
                }

                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.consume(TokenKind::RightBrace, "Expect '}' after table elements.");
    }

    fn self_expr(&mut self, _can_assign: bool) {
        if self.class_states.is_empty() {
            self.error_with_code(
                codes::E_SELF_OUTSIDE_CLASS,
                "cannot use 'self' outside of a class",
                Some("'self' refers to the current instance and is only valid inside class methods"),
            );
            return;
        }
        self.variable(false);
    }

    fn super_expr(&mut self, _can_assign: bool) {
        match self.class_states.last() {
            None => {
                self.error_with_code(
                    codes::E_SELF_OUTSIDE_CLASS,
                    "cannot use 'super' outside of a class",
                    Some("'super' is only valid inside class methods"),
                );
            }
            Some(class) if !class.has_superclass => {
                self.error_with_code(
                    codes::E_SUPER_NO_SUPERCLASS,
                    "cannot use 'super' in a class with no superclass",
                    Some("add 'extends ParentClass' to use super"),
                );
            }
            Some(_) => {}
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(self.previous.lexeme);

        self.named_variable(Token::synthetic("self"), false);
        if self.matches(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.named_variable(Token::synthetic("super"), false);
            self.emit(Instruction::OpSuperInvoke(name, arg_count));
        } else {
            self.named_variable(Token::synthetic("super"), false);
            self.emit(Instruction::OpGetSuper(name));
        }
    }

    fn new_expr(&mut self, _can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect class name after 'new'.");
        let name = self.identifier_constant(self.previous.lexeme);
        self.emit(Instruction::OpGetGlobal(name));

        self.consume(TokenKind::LeftParen, "Expect '(' after class name.");
        let arg_count = self.argument_list();
        self.emit(Instruction::OpNew(arg_count));
    }

    // === statements ===

    fn declaration(&mut self) {
        if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else if self.matches(TokenKind::Trait) {
            self.trait_declaration();
        } else if self.matches(TokenKind::Function) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Local) {
            self.local_statement();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::Repeat) {
            self.repeat_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::Break) {
            self.break_statement();
        } else if self.matches(TokenKind::Continue) {
            self.continue_statement();
        } else if self.matches(TokenKind::Do) {
            self.begin_scope();
            self.block();
            self.consume(TokenKind::End, "Expect 'end' after block.");
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::End)
            && !self.check(TokenKind::Else)
            && !self.check(TokenKind::Elseif)
            && !self.check(TokenKind::Until)
            && !self.check(TokenKind::Eof)
        {
            self.declaration();
        }
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.emit(Instruction::OpPop);
    }

    fn local_statement(&mut self) {
        if self.matches(TokenKind::Function) {
            // Bound eagerly so the body can call itself.
            self.consume(TokenKind::Identifier, "Expect function name.");
            self.declare_local();
            self.mark_local_initialized();
            self.function(FunKind::Function);
        } else {
            self.consume(TokenKind::Identifier, "Expect variable name.");
            self.declare_local();

            let init_start = self.fun().chunk.code_len();
            if self.matches(TokenKind::Equal) {
                self.expression();
            } else {
                self.emit(Instruction::OpNil);
            }
            let init_end = self.fun().chunk.code_len();

            let depth = self.fun().scope_depth;
            if let Some(local) = self.fun_mut().locals.last_mut() {
                local.init_start = init_start;
                local.init_end = init_end;
                local.depth = depth;
            }
        }
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        if self.fun().scope_depth > 0 {
            self.mark_local_initialized();
        }
        self.function(FunKind::Function);
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunKind) {
        let name = self.intern(self.previous.lexeme);
        self.fun_states.push(FunState::new(Some(name), kind));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.fun().arity == 255 {
                    self.error_at_current_with_code(
                        codes::E_TOO_MANY_PARAMS,
                        "Can't have more than 255 parameters.",
                        None,
                    );
                } else {
                    self.fun_mut().arity += 1;
                }
                self.parse_variable("Expect parameter name.");
                self.mark_local_initialized();
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");

        self.block();
        self.consume(TokenKind::End, "Expect 'end' after function body.");

        let (function, upvalues) = self.end_fun();
        let constant = self.make_constant(Value::Function(function));
        self.emit(Instruction::OpClosure(constant));

        let line = self.previous.line;
        for upvalue in upvalues {
            let fs = self.fun_mut();
            fs.chunk.push_byte(upvalue.is_local as u8, line);
            fs.chunk.push_byte(upvalue.index, line);
        }
        // The trailing pair bytes are not instructions; keep the folder off
        // this region.
        self.fun_mut().last_op = None;
        self.fun_mut().prev_op = None;
    }

    fn method(&mut self) {
        let is_private = self.matches(TokenKind::Private);

        self.consume(TokenKind::Function, "Expect 'function' in method declaration.");
        self.consume(TokenKind::Identifier, "Expect method name.");
        let constant = self.identifier_constant(self.previous.lexeme);

        let kind = if self.previous.lexeme == "init" {
            FunKind::Initializer
        } else {
            FunKind::Method
        };

        self.function(kind);
        self.emit(Instruction::OpMethod(constant, is_private as u8));
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_constant = self.identifier_constant(class_name.lexeme);
        self.declare_variable();

        self.emit(Instruction::OpClass(name_constant));
        self.define_variable(name_constant);

        self.class_states.push(ClassState {
            has_superclass: false,
        });

        let mut has_superclass = false;
        if self.matches(TokenKind::Extends) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            if class_name.lexeme == self.previous.lexeme {
                self.error_with_code(
                    codes::E_INHERIT_SELF,
                    "a class cannot inherit from itself",
                    Some("use a different class as the superclass"),
                );
            }
            self.variable(false); // push superclass

            // The superclass value doubles as a hidden `super` local so
            // method bodies can capture it.
            self.begin_scope();
            self.add_local(Token::synthetic("super"));
            self.mark_local_initialized();

            self.named_variable(class_name, false);
            self.emit(Instruction::OpInherit);
            has_superclass = true;
            if let Some(class) = self.class_states.last_mut() {
                class.has_superclass = true;
            }
        }

        if self.matches(TokenKind::Implements) {
            loop {
                self.consume(TokenKind::Identifier, "Expect trait name.");
                self.variable(false); // push trait
                self.named_variable(class_name, false); // push class
                self.emit(Instruction::OpImplement);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }

        self.named_variable(class_name, false); // push class for method binding

        while !self.check(TokenKind::End) && !self.check(TokenKind::Eof) {
            if self.panic_mode {
                break;
            }
            self.method();
        }

        self.consume(TokenKind::End, "Expect 'end' after class body.");
        self.emit(Instruction::OpPop); // pop class

        if has_superclass {
            self.end_scope();
        }

        self.class_states.pop();
    }

    fn trait_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect trait name.");
        let trait_name = self.previous;
        let name_constant = self.identifier_constant(trait_name.lexeme);
        self.declare_variable();

        self.emit(Instruction::OpTrait(name_constant));
        self.define_variable(name_constant);

        // Trait methods reference `self` like class methods do.
        self.class_states.push(ClassState {
            has_superclass: false,
        });

        self.named_variable(trait_name, false); // push trait for method binding

        while !self.check(TokenKind::End) && !self.check(TokenKind::Eof) {
            if self.panic_mode {
                break;
            }
            self.method();
        }

        self.consume(TokenKind::End, "Expect 'end' after trait body.");
        self.emit(Instruction::OpPop); // pop trait

        self.class_states.pop();
    }

    fn if_statement(&mut self) {
        let mut end_jumps = Vec::new();

        self.expression();
        self.consume(TokenKind::Then, "Expect 'then' after condition.");

        let mut next_branch = self.emit_jump(Instruction::OpJumpIfFalse(u16::MAX));
        self.emit(Instruction::OpPop);
        self.begin_scope();
        self.block();
        self.end_scope();
        end_jumps.push(self.emit_jump(Instruction::OpJump(u16::MAX)));
        self.patch_jump(next_branch);
        self.emit(Instruction::OpPop);

        while self.matches(TokenKind::Elseif) {
            self.expression();
            self.consume(TokenKind::Then, "Expect 'then' after elseif condition.");

            next_branch = self.emit_jump(Instruction::OpJumpIfFalse(u16::MAX));
            self.emit(Instruction::OpPop);
            self.begin_scope();
            self.block();
            self.end_scope();
            end_jumps.push(self.emit_jump(Instruction::OpJump(u16::MAX)));
            self.patch_jump(next_branch);
            self.emit(Instruction::OpPop);
        }

        if self.matches(TokenKind::Else) {
            self.begin_scope();
            self.block();
            self.end_scope();
        }

        // Every completed branch merges at the single end label.
        for jump in end_jumps {
            self.patch_jump(jump);
        }
        self.consume(TokenKind::End, "Expect 'end' after if statement.");
    }

    fn while_statement(&mut self) {
        let start = self.fun().chunk.code_len();
        let depth = self.fun().scope_depth;
        self.fun_mut()
            .loops
            .push(LoopState::new(Some(start), depth));

        self.expression();
        self.consume(TokenKind::Do, "Expect 'do' after condition.");

        let exit_jump = self.emit_jump(Instruction::OpJumpIfFalse(u16::MAX));
        self.emit(Instruction::OpPop);

        self.begin_scope();
        self.block();
        self.end_scope();

        self.emit_loop(start);

        self.patch_jump(exit_jump);
        self.emit(Instruction::OpPop);

        let finished = self.fun_mut().loops.pop().expect("loop state");
        for jump in finished.break_jumps {
            self.patch_jump(jump);
        }

        self.consume(TokenKind::End, "Expect 'end' after while body.");
    }

    fn repeat_statement(&mut self) {
        let start = self.fun().chunk.code_len();
        let depth = self.fun().scope_depth;
        self.fun_mut()
            .loops
            .push(LoopState::new(Some(start), depth));

        self.begin_scope();
        self.block();

        self.consume(TokenKind::Until, "Expect 'until' after repeat body.");
        // Body locals stay in scope for the condition. The loop repeats
        // while the condition is false, so it is inverted before the test,
        // like the numeric for's comparison.
        self.expression();
        self.emit(Instruction::OpNot);

        let exit_jump = self.emit_jump(Instruction::OpJumpIfFalse(u16::MAX));
        self.emit(Instruction::OpPop);
        self.emit_locals_cleanup(depth);
        self.emit_loop(start);

        self.patch_jump(exit_jump);
        self.emit(Instruction::OpPop);
        self.end_scope();

        let finished = self.fun_mut().loops.pop().expect("loop state");
        for jump in finished.break_jumps {
            self.patch_jump(jump);
        }
    }

    fn for_statement(&mut self) {
        self.begin_scope();

        let var = self.parse_variable("Expect variable name.");
        self.consume(TokenKind::Equal, "Expect '=' after for variable.");
        self.expression(); // start value
        self.define_variable(var);

        // Hidden slots for the limit and step, registered before their
        // values are computed so stack layout matches the locals table.
        self.add_hidden_local();
        self.consume(TokenKind::Comma, "Expect ',' after start value.");
        self.expression(); // limit

        self.add_hidden_local();
        if self.matches(TokenKind::Comma) {
            self.expression(); // step
        } else {
            self.emit_constant(Value::Number(1.0));
        }

        self.consume(TokenKind::Do, "Expect 'do' after for clause.");

        let base = self.fun().locals.len();
        let var_slot = (base - 3) as u8;
        let limit_slot = (base - 2) as u8;
        let step_slot = (base - 1) as u8;

        let start = self.fun().chunk.code_len();

        // var <= limit (no negative-step branch)
        self.emit(Instruction::OpGetLocal(var_slot));
        self.emit(Instruction::OpGetLocal(limit_slot));
        self.emit(Instruction::OpGreater);
        self.emit(Instruction::OpNot);

        let exit_jump = self.emit_jump(Instruction::OpJumpIfFalse(u16::MAX));
        self.emit(Instruction::OpPop);

        let depth = self.fun().scope_depth;
        self.fun_mut().loops.push(LoopState::new(None, depth));

        self.begin_scope();
        self.block();
        self.end_scope();

        // Increment section; `continue` lands here.
        let pending = {
            let state = self.fun_mut().loops.last_mut().expect("loop state");
            std::mem::take(&mut state.continue_jumps)
        };
        for jump in pending {
            self.patch_jump(jump);
        }

        self.emit(Instruction::OpGetLocal(var_slot));
        self.emit(Instruction::OpGetLocal(step_slot));
        self.emit(Instruction::OpAdd);
        self.emit(Instruction::OpSetLocal(var_slot));
        self.emit(Instruction::OpPop);

        self.emit_loop(start);

        self.patch_jump(exit_jump);
        self.emit(Instruction::OpPop);

        let finished = self.fun_mut().loops.pop().expect("loop state");
        for jump in finished.break_jumps {
            self.patch_jump(jump);
        }

        self.consume(TokenKind::End, "Expect 'end' after for body.");
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.fun().kind == FunKind::Script {
            self.error_with_code(
                codes::E_RETURN_TOP_LEVEL,
                "cannot return from top-level code",
                Some("return statements must be inside a function"),
            );
        }

        if self.check(TokenKind::End)
            || self.check(TokenKind::Else)
            || self.check(TokenKind::Elseif)
            || self.check(TokenKind::Until)
            || self.check(TokenKind::Eof)
        {
            self.emit_return();
        } else {
            if self.fun().kind == FunKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.emit(Instruction::OpReturn);
        }
    }

    fn break_statement(&mut self) {
        if self.fun().loops.is_empty() {
            self.error_with_code(
                codes::E_BREAK_OUTSIDE_LOOP,
                "cannot use 'break' outside of a loop",
                Some("'break' can only be used inside while, for, or repeat loops"),
            );
            return;
        }

        let loop_depth = self.fun().loops.last().expect("loop state").scope_depth;
        self.emit_locals_cleanup(loop_depth);

        if self.fun().loops.last().expect("loop state").break_jumps.len() >= BREAKS_MAX {
            self.error("Too many break statements in loop.");
            return;
        }
        let jump = self.emit_jump(Instruction::OpJump(u16::MAX));
        self.fun_mut()
            .loops
            .last_mut()
            .expect("loop state")
            .break_jumps
            .push(jump);
    }

    fn continue_statement(&mut self) {
        if self.fun().loops.is_empty() {
            self.error_with_code(
                codes::E_BREAK_OUTSIDE_LOOP,
                "cannot use 'continue' outside of a loop",
                Some("'continue' can only be used inside while, for, or repeat loops"),
            );
            return;
        }

        let loop_depth = self.fun().loops.last().expect("loop state").scope_depth;
        self.emit_locals_cleanup(loop_depth);

        match self.fun().loops.last().expect("loop state").continue_target {
            Some(target) => self.emit_loop(target),
            None => {
                // Numeric for: the increment section is not emitted yet, so
                // jump forward and patch there.
                let jump = self.emit_jump(Instruction::OpJump(u16::MAX));
                self.fun_mut()
                    .loops
                    .last_mut()
                    .expect("loop state")
                    .continue_jumps
                    .push(jump);
            }
        }
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;

        while self.current.kind != TokenKind::Eof {
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Function
                | TokenKind::Local
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }
}

/// True when the bytecode range contains only opcodes with no observable
/// effect: constants, local reads, arithmetic/logic, and bare table
/// creation. Anything else (calls, global or property access, closures,
/// `new`) keeps the initializer alive.
fn is_side_effect_free(chunk: &Chunk, start: usize, end: usize) -> bool {
    use Instruction::*;

    let mut offset = start;
    while offset < end {
        let (instr, size) = chunk.decode(offset);
        match instr {
            OpConstant(_) | OpNil | OpTrue | OpFalse | OpGetLocal(_) | OpAdd | OpSubtract
            | OpMultiply | OpDivide | OpModulo | OpNegate | OpNot | OpEqual | OpGreater
            | OpLess | OpConcat | OpLength | OpTable => {}
            _ => return false,
        }
        offset += size;
    }
    true
}
