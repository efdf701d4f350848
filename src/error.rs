use std::error;
use std::fmt;

/// Runtime failure, carrying the faulting line and a reverse stack trace.
/// The VM resets its stack before handing one of these to the host.
#[derive(Debug)]
pub struct RuntimeError {
    line: u32,
    kind: ErrorKind,
    trace: Vec<StackFrame>,
}

#[derive(Debug)]
pub struct StackFrame {
    line: u32,
    function: Option<String>,
}

impl StackFrame {
    pub fn new(line: u32, function: Option<String>) -> Self {
        StackFrame { line, function }
    }
}

#[derive(Debug)]
pub enum ErrorKind {
    UndefinedVariable(String),
    UndefinedProperty(String),
    UndefinedMethod(String),
    OperandsMustBeNumbers,
    OperandMustBeNumber,
    OperandsMustBeStrings,
    InvalidLengthOperand,
    NotCallable,
    OnlyInstancesHaveMethods,
    OnlyInstancesHaveProperties,
    OnlyInstancesHaveFields,
    NotATable,
    InvalidTableKey,
    ExpectedTable,
    NotAClass,
    SuperclassMustBeClass,
    TraitExpected,
    ClassExpected,
    ArityMismatch { expected: u8, got: u8 },
    StackOverflow,
    ModuloByZero,
    InternalError(VmError),
}

/// Faults that indicate a compiler or VM bug rather than a user error.
#[derive(Debug)]
pub enum VmError {
    EmptyStackPop,
    InvalidOpCode,
    UnexpectedConstant(String),
    NoActiveFrame,
}

impl RuntimeError {
    pub fn new(line: u32, kind: ErrorKind, trace: Vec<StackFrame>) -> Self {
        RuntimeError { line, kind, trace }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::UndefinedVariable(name) => {
                write!(f, "Undefined variable '{}'.", name)
            }
            ErrorKind::UndefinedProperty(name) => {
                write!(f, "Undefined property '{}'.", name)
            }
            ErrorKind::UndefinedMethod(name) => {
                write!(f, "Undefined method '{}'.", name)
            }
            ErrorKind::OperandsMustBeNumbers => f.write_str("Operands must be numbers."),
            ErrorKind::OperandMustBeNumber => f.write_str("Operand must be a number."),
            ErrorKind::OperandsMustBeStrings => f.write_str("Operands must be strings."),
            ErrorKind::InvalidLengthOperand => {
                f.write_str("Can only get length of string or table.")
            }
            ErrorKind::NotCallable => f.write_str("Can only call functions and classes."),
            ErrorKind::OnlyInstancesHaveMethods => f.write_str("Only instances have methods."),
            ErrorKind::OnlyInstancesHaveProperties => {
                f.write_str("Only instances have properties.")
            }
            ErrorKind::OnlyInstancesHaveFields => f.write_str("Only instances have fields."),
            ErrorKind::NotATable => f.write_str("Can only index tables."),
            ErrorKind::InvalidTableKey => {
                f.write_str("Table key must be a string or positive integer.")
            }
            ErrorKind::ExpectedTable => f.write_str("Expected table."),
            ErrorKind::NotAClass => f.write_str("Can only instantiate classes."),
            ErrorKind::SuperclassMustBeClass => f.write_str("Superclass must be a class."),
            ErrorKind::TraitExpected => f.write_str("Can only implement traits."),
            ErrorKind::ClassExpected => f.write_str("Only classes can implement traits."),
            ErrorKind::ArityMismatch { expected, got } => {
                write!(f, "Expected {} arguments but got {}.", expected, got)
            }
            ErrorKind::StackOverflow => f.write_str("Stack overflow."),
            ErrorKind::ModuloByZero => f.write_str("Modulo by zero."),
            ErrorKind::InternalError(vm_err) => match vm_err {
                VmError::EmptyStackPop => f.write_str("illegal pop on empty stack"),
                VmError::InvalidOpCode => f.write_str("invalid op code"),
                VmError::UnexpectedConstant(what) => {
                    write!(f, "unexpected constant {}", what)
                }
                VmError::NoActiveFrame => f.write_str("no active call frame"),
            },
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for frame in &self.trace {
            match &frame.function {
                Some(name) => write!(f, "\n[line {}] in {}()", frame.line, name)?,
                None => write!(f, "\n[line {}] in script", frame.line)?,
            }
        }
        Ok(())
    }
}

impl error::Error for RuntimeError {}
