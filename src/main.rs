use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::Parser as ClapParser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use luap::memory::Heap;
use luap::{InterpretResult, Vm, VmOptions};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(ClapParser)]
#[clap(name = "luap", version, about = "Lua-flavoured scripting language with classes and traits")]
struct Opt {
    /// Script to run; starts an interactive REPL when omitted
    script: Option<PathBuf>,

    /// Enable debug output (bytecode dump + execution trace + GC log)
    #[clap(short, long)]
    verbose: bool,

    /// Only dump bytecode, don't trace execution
    #[clap(long)]
    dump_bytecode: bool,

    /// Only trace execution, don't dump bytecode
    #[clap(long)]
    trace: bool,

    /// Log garbage collection events
    #[clap(long)]
    log_gc: bool,
}

fn main() {
    let opt = match Opt::try_parse() {
        Ok(opt) => opt,
        Err(err) => {
            use clap::error::ErrorKind;
            if matches!(
                err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) {
                let _ = err.print();
                process::exit(0);
            }
            let _ = err.print();
            process::exit(64);
        }
    };

    let mut logger = env_logger::Builder::from_default_env();
    if opt.log_gc || opt.verbose {
        logger.filter_module("luap::gc", log::LevelFilter::Debug);
    }
    logger.init();

    let options = VmOptions {
        trace_execution: opt.verbose || opt.trace,
        print_code: opt.verbose || opt.dump_bytecode,
        warn_unused: true,
        stress_gc: false,
    };

    match opt.script {
        Some(path) => run_file(&path, options),
        None => repl(options),
    }
}

fn run_file(path: &PathBuf, options: VmOptions) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not read file \"{}\": {}", path.display(), err);
            process::exit(74);
        }
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();

    let mut heap = Heap::new();
    let mut vm = Vm::new(&mut heap, &mut out, options);
    let result = vm.interpret(&source, path.to_str());

    match result {
        InterpretResult::Ok => {}
        InterpretResult::CompileError => process::exit(65),
        InterpretResult::RuntimeError => process::exit(70),
    }
}

fn repl(options: VmOptions) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("Could not initialize line editor: {}", err);
            process::exit(74);
        }
    };

    println!("luap {} - type 'exit' to quit", VERSION);
    if options.print_code {
        println!("[verbose mode: bytecode + execution trace enabled]");
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();

    // One VM for the whole session so globals and modules persist across
    // lines.
    let mut heap = Heap::new();
    let mut vm = Vm::new(&mut heap, &mut out, options);

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim() == "exit" {
                    break;
                }
                let _ = editor.add_history_entry(&line);
                vm.interpret(&line, None);
                let _ = io::stdout().flush();
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("{}", err);
                break;
            }
        }
    }
}
