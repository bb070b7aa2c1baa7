use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use clap::Subcommand;
use miette::{IntoDiagnostic, Report, WrapErr, miette};
use sandbox_expr::lex::TokenKind;
use sandbox_expr::{CompilerOptions, Error, Lexer, Object, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sandbox-expr", about = "Tokenize, parse and evaluate sandboxed expressions")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print one token per line.
    Tokenize { filename: PathBuf },
    /// Print the expression tree as an S-expression.
    Parse { filename: PathBuf },
    /// Evaluate an expression and print its value.
    Eval {
        expression: Option<String>,
        /// Read the expression from a file instead.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Context object as JSON.
        #[arg(long)]
        context: Option<String>,
        #[arg(long)]
        no_undefined_vars: bool,
        #[arg(long)]
        no_new_vars: bool,
        #[arg(long)]
        immutable_context: bool,
        /// Let lookups see prototypes.
        #[arg(long)]
        proto_access: bool,
        #[arg(long)]
        enforce_marshalling: bool,
    },
}

fn read(filename: &Path) -> miette::Result<String> {
    fs::read_to_string(filename)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading `{}` failed", filename.display()))
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Tokenize { filename } => {
            let file_contents = read(&filename)?;
            for token in Lexer::new(&file_contents) {
                if let Some(error) = token.error() {
                    eprintln!("[line {}] Error: {error}", token.pos.line);
                    std::process::exit(65);
                }
                if token.kind == TokenKind::Unknown {
                    eprintln!(
                        "[line {}] Error: Unexpected character: {}",
                        token.pos.line, token.lexeme
                    );
                    std::process::exit(65);
                }
                println!("{token}");
            }
            println!("EOF  null");
        }
        Commands::Parse { filename } => {
            let file_contents = read(&filename)?;
            match sandbox_expr::parse(&file_contents) {
                Ok(expr) => println!("{expr}"),
                Err(e) => {
                    eprintln!("{:?}", Report::new(e).with_source_code(file_contents));
                    std::process::exit(65);
                }
            }
        }
        Commands::Eval {
            expression,
            file,
            context,
            no_undefined_vars,
            no_new_vars,
            immutable_context,
            proto_access,
            enforce_marshalling,
        } => {
            let source = match (expression, file) {
                (Some(expression), _) => expression,
                (None, Some(file)) => read(&file)?,
                (None, None) => return Err(miette!("either an expression or --file is required")),
            };
            let context = match context {
                Some(json) => {
                    let json: serde_json::Value = serde_json::from_str(&json)
                        .into_diagnostic()
                        .wrap_err("parsing --context failed")?;
                    match Value::from(json) {
                        Value::Object(object) => object,
                        _ => return Err(miette!("--context must be a JSON object")),
                    }
                }
                None => Object::new(),
            };
            let options = CompilerOptions {
                no_undefined_vars,
                no_new_vars,
                immutable_context,
                no_proto_access: !proto_access,
                enforce_marshalling,
                ..CompilerOptions::default()
            };

            let result = sandbox_expr::compile(&source, options).and_then(|program| {
                debug!(is_const = program.is_const(), is_async = program.is_async(), "running");
                futures::executor::block_on(program.call_async(&context)).map_err(Error::from)
            });
            match result {
                Ok(value) => println!("{value:?}"),
                Err(e) => {
                    let code = match e {
                        Error::Syntax(_) => 65,
                        Error::Eval(_) => 70,
                    };
                    eprintln!("{:?}", Report::new(e).with_source_code(source));
                    std::process::exit(code);
                }
            }
        }
    }
    Ok(())
}
