use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use rustyline::error::ReadlineError;
use rustyline::history::{DefaultHistory, History};
use rustyline::{config::Config as EditorConfig, Editor, Helper};
use simplelog::{Config as LogConfig, LevelFilter, SimpleLogger};

use kestrel::{Constant, Context, Interpreter, InterpreterConfig, Program, Source};

mod host;
mod input;
mod repl;

use input::fixup_input;
use repl::ReplHelper;

const HISTORY_FILE: &str = ".kestrel_history";
const PROMPT: &str = "(kestrel) ";

#[derive(Parser)]
#[command(name = "kestrel", version, about = "The kestrel scripting language")]
struct Opt {
    /// Show debug output
    #[arg(short, long, global = true)]
    debug: bool,

    /// How long one interpreter batch may run, in milliseconds
    #[arg(long, default_value_t = 10, global = true)]
    budget_ms: u64,

    /// Pause between interpreter batches, in milliseconds
    #[arg(long, default_value_t = 1, global = true)]
    pause_ms: u64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run script files as one program
    Run {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Parse and register script files without running them
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Start an interactive session (the default)
    Repl,
}

fn init_logging(debug: bool) -> Result<()> {
    let filter = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Error
    };

    match SimpleLogger::init(filter, LogConfig::default()) {
        Ok(_) => Ok(()),
        Err(e) => bail!("Failed to init logger: {}", e),
    }
}

fn read_sources(files: &[PathBuf]) -> Result<Vec<Source>> {
    files
        .iter()
        .map(|path| {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(Source::new(path.display().to_string(), text))
        })
        .collect()
}

fn run(files: &[PathBuf], config: InterpreterConfig) -> Result<()> {
    let sources = read_sources(files)?;
    let mut stdout = io::stdout();
    let mut ctx = Context::new(host::natives(), &mut stdout);

    let result = kestrel::run(&[host::prelude()], &sources, &mut ctx, config)?;
    info!("Program returned {}", result.repr());

    Ok(())
}

fn check(files: &[PathBuf]) -> Result<()> {
    let sources = read_sources(files)?;
    kestrel::compile(&[host::prelude()], &sources)?;
    println!("ok: {} files", sources.len());

    Ok(())
}

/// Program state kept across REPL inputs
struct Session<'a> {
    program: Program,
    ctx: Context<'a>,
    config: InterpreterConfig,
}

impl<'a> Session<'a> {
    fn new(sink: &'a mut dyn Write, config: InterpreterConfig) -> Result<Self> {
        Ok(Self {
            program: Program::build(&[host::prelude()], &[])?,
            ctx: Context::new(host::natives(), sink),
            config,
        })
    }

    fn eval(&mut self, input: &str) -> Result<Constant> {
        let machine = self.program.load(&Source::new("<repl>", fixup_input(input)))?;

        let mut interp = Interpreter::new(self.config);
        let id = interp.spawn("<repl>", machine);
        let program = &self.program;
        interp.run(&mut self.ctx, |ctx, interp| {
            if let Err(e) = program.frame(ctx) {
                error!("Frame failed: {}", e);
                interp.stop();
            }
        });

        if let Some(failure) = interp.take_failures().into_iter().next() {
            return Err(failure.error.into());
        }
        Ok(interp.result(id).cloned().unwrap_or(Constant::None))
    }
}

fn init_editor() -> Result<Editor<ReplHelper, DefaultHistory>> {
    let config = EditorConfig::builder().auto_add_history(true).build();
    let mut editor = Editor::with_config(config)?;
    editor.set_helper(Some(ReplHelper::new()));

    Ok(editor)
}

fn init_history<H: Helper, I: History>(editor: &mut Editor<H, I>) {
    let _ = editor.load_history(HISTORY_FILE);
}

fn save_history<H: Helper, I: History>(editor: &mut Editor<H, I>) -> Result<()> {
    match editor.save_history(HISTORY_FILE) {
        Ok(_) => Ok(()),
        Err(e) => bail!("Failed to save history: {}", e),
    }
}

fn welcome() {
    println!(r#"kestrel v{}"#, env!("CARGO_PKG_VERSION"));
    println!("Type 'quit' or press Ctrl-D to leave, end a line with '\\' to continue it");
    println!();
}

fn repl(config: InterpreterConfig) -> Result<()> {
    let mut editor = init_editor()?;
    init_history(&mut editor);
    welcome();

    let mut stdout = io::stdout();
    let mut session = Session::new(&mut stdout, config)?;

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                info!("read: {}", &line);
                if line.trim() == "quit" {
                    break;
                }

                match session.eval(&line) {
                    Ok(Constant::None) => (),
                    Ok(value) => println!("{}", value.repr()),
                    Err(e) => eprintln!("{}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("Press Ctrl-D or type 'quit' to quit");
            }
            Err(ReadlineError::Eof) => {
                println!("quit");
                break;
            }
            Err(e) => {
                error!("Unexpected error: {}", e);
                println!("quit");
                break;
            }
        }
    }

    save_history(&mut editor)?;

    Ok(())
}

fn main() -> Result<()> {
    let opts = Opt::parse();
    init_logging(opts.debug)?;

    let config = InterpreterConfig {
        time_budget: Duration::from_millis(opts.budget_ms),
        pause: Duration::from_millis(opts.pause_ms),
    };

    match opts.command.unwrap_or(Command::Repl) {
        Command::Run { files } => run(&files, config),
        Command::Check { files } => check(&files),
        Command::Repl => repl(config),
    }
}
