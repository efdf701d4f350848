use std::io::IsTerminal;

/// Compilation halts after this many errors; a summary line follows.
pub const MAX_ERRORS: usize = 8;

const ANSI_RESET: &str = "\x1b[0m";
const ANSI_BOLD: &str = "\x1b[1m";
const ANSI_RED: &str = "\x1b[31m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_BLUE: &str = "\x1b[34m";
const ANSI_CYAN: &str = "\x1b[36m";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
    Note,
}

/// Stable diagnostic codes. Errors print as `E001..`, warnings as `W001..`.
pub mod codes {
    pub const E_UNEXPECTED_CHAR: u16 = 1;
    pub const E_UNTERMINATED_STR: u16 = 2;
    pub const E_EXPECT_EXPRESSION: u16 = 3;
    pub const E_EXPECT_TOKEN: u16 = 4;
    pub const E_UNDEFINED_VAR: u16 = 5;
    pub const E_REDECLARED_VAR: u16 = 6;
    pub const E_INVALID_ASSIGN: u16 = 7;
    pub const E_BREAK_OUTSIDE_LOOP: u16 = 8;
    pub const E_SELF_OUTSIDE_CLASS: u16 = 9;
    pub const E_SUPER_NO_SUPERCLASS: u16 = 10;
    pub const E_RETURN_TOP_LEVEL: u16 = 11;
    pub const E_TOO_MANY_CONSTANTS: u16 = 12;
    pub const E_TOO_MANY_LOCALS: u16 = 13;
    pub const E_TOO_MANY_PARAMS: u16 = 14;
    pub const E_TOO_MANY_ARGS: u16 = 15;
    pub const E_INHERIT_SELF: u16 = 16;

    pub const W_UNUSED_VARIABLE: u16 = 1;
    pub const W_UNUSED_PARAMETER: u16 = 2;
    pub const W_SHADOWED_VARIABLE: u16 = 3;
}

/// Prints diagnostics to stderr with source context:
///
/// ```text
/// error[E004]: Expect 'end' after function body.
///   --> demo.luapp:3:1
///      |
///    3 | print(x)
///      | ^
///      |
/// help: ...
/// ```
pub struct DiagReporter<'src> {
    source: &'src str,
    filename: String,
    pub error_count: usize,
    pub warning_count: usize,
    use_colors: bool,
}

impl<'src> DiagReporter<'src> {
    pub fn new(source: &'src str, filename: Option<&str>) -> Self {
        DiagReporter {
            source,
            filename: filename.unwrap_or("<stdin>").to_string(),
            error_count: 0,
            warning_count: 0,
            use_colors: std::io::stderr().is_terminal(),
        }
    }

    pub fn should_stop(&self) -> bool {
        self.error_count >= MAX_ERRORS
    }

    pub fn report(
        &mut self,
        level: DiagLevel,
        code: u16,
        line: u32,
        column: u32,
        length: usize,
        message: &str,
        help: Option<&str>,
    ) {
        match level {
            DiagLevel::Error => self.error_count += 1,
            DiagLevel::Warning => self.warning_count += 1,
            DiagLevel::Note => {}
        }

        self.print_level(level, code);
        eprintln!(": {}", message);
        self.print_location(line, column);
        self.print_gutter_line();
        self.print_source_context(level, line, column, length);
        self.print_gutter_line();
        if let Some(help) = help {
            if self.use_colors {
                eprintln!("{}{}help{}: {}", ANSI_BOLD, ANSI_CYAN, ANSI_RESET, help);
            } else {
                eprintln!("help: {}", help);
            }
        }
        eprintln!();
    }

    /// Trailing summary, printed once compilation finishes with any
    /// diagnostics.
    pub fn summary(&self) {
        if self.error_count == 0 && self.warning_count == 0 {
            return;
        }
        if self.use_colors {
            eprint!("{}", ANSI_BOLD);
        }
        if self.error_count > 0 {
            eprint!("compilation failed: {} error(s)", self.error_count);
        }
        if self.warning_count > 0 {
            if self.error_count > 0 {
                eprint!(", ");
            }
            eprint!("{} warning(s)", self.warning_count);
        }
        if self.use_colors {
            eprint!("{}", ANSI_RESET);
        }
        eprintln!();
    }

    fn print_level(&self, level: DiagLevel, code: u16) {
        if self.use_colors {
            match level {
                DiagLevel::Error => eprint!(
                    "{}{}error{}{}[E{:03}]{}",
                    ANSI_BOLD, ANSI_RED, ANSI_RESET, ANSI_BOLD, code, ANSI_RESET
                ),
                DiagLevel::Warning => eprint!(
                    "{}{}warning{}{}[W{:03}]{}",
                    ANSI_BOLD, ANSI_YELLOW, ANSI_RESET, ANSI_BOLD, code, ANSI_RESET
                ),
                DiagLevel::Note => eprint!("{}{}note{}", ANSI_BOLD, ANSI_CYAN, ANSI_RESET),
            }
        } else {
            match level {
                DiagLevel::Error => eprint!("error[E{:03}]", code),
                DiagLevel::Warning => eprint!("warning[W{:03}]", code),
                DiagLevel::Note => eprint!("note"),
            }
        }
    }

    fn print_location(&self, line: u32, column: u32) {
        if self.use_colors {
            eprint!("{}{}  --> {}", ANSI_BOLD, ANSI_BLUE, ANSI_RESET);
        } else {
            eprint!("  --> ");
        }
        eprintln!("{}:{}:{}", self.filename, line, column);
    }

    fn print_gutter_line(&self) {
        if self.use_colors {
            eprintln!("{}{}     |{}", ANSI_BOLD, ANSI_BLUE, ANSI_RESET);
        } else {
            eprintln!("     |");
        }
    }

    fn source_line(&self, line: u32) -> Option<&'src str> {
        if line == 0 {
            return None;
        }
        self.source.lines().nth(line as usize - 1)
    }

    fn print_source_context(&self, level: DiagLevel, line: u32, column: u32, length: usize) {
        let Some(text) = self.source_line(line) else {
            return;
        };

        if self.use_colors {
            eprint!("{}{}{:4} | {}", ANSI_BOLD, ANSI_BLUE, line, ANSI_RESET);
        } else {
            eprint!("{:4} | ", line);
        }
        eprintln!("{}", text);

        if self.use_colors {
            eprint!("{}{}     | {}", ANSI_BOLD, ANSI_BLUE, ANSI_RESET);
        } else {
            eprint!("     | ");
        }

        let bytes = text.as_bytes();
        for i in 1..column as usize {
            if i <= bytes.len() && bytes[i - 1] == b'\t' {
                eprint!("\t");
            } else {
                eprint!(" ");
            }
        }

        let caret_color = if self.use_colors {
            match level {
                DiagLevel::Error => format!("{}{}", ANSI_BOLD, ANSI_RED),
                DiagLevel::Warning => format!("{}{}", ANSI_BOLD, ANSI_YELLOW),
                DiagLevel::Note => format!("{}{}", ANSI_BOLD, ANSI_CYAN),
            }
        } else {
            String::new()
        };
        eprint!("{}", caret_color);
        for _ in 0..length.max(1) {
            eprint!("^");
        }
        if self.use_colors {
            eprint!("{}", ANSI_RESET);
        }
        eprintln!();
    }
}
