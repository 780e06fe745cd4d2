use std::env;
use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use rejit::{
    ArgValue, CompiledFunction, Context, FunctionId, JitRet, OptLevel, Options, Registry,
    RegistryError, Specialized, Specializer,
};
use rejit_ir::{IrError, Module, Type, from_bytes, is_encoded, parse_module, to_bytes, verify_module};
use tracing_subscriber::EnvFilter;

/// Identity under which command-line modules are registered. There is no
/// native counterpart, so any address works.
const CLI_FUNCTION: FunctionId = FunctionId::from_addr(1);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Ir(#[from] IrError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Rejit(#[from] rejit::Error),
}

fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage(message)) => {
            eprintln!("{message}\n");
            print_help();
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), CliError> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_help();
        return Ok(());
    };
    let rest: Vec<String> = args.collect();
    tracing::debug!(command = %command, args = rest.len(), "dispatching");

    match command.as_str() {
        "-h" | "--help" | "help" => {
            print_help();
            Ok(())
        }
        "-V" | "--version" | "version" => {
            println!("rejit {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "print" => {
            let [path] = rest.as_slice() else {
                return Err(usage("print expects exactly one module"));
            };
            print!("{}", load_module(path)?);
            Ok(())
        }
        "verify" => {
            let [path] = rest.as_slice() else {
                return Err(usage("verify expects exactly one module"));
            };
            let module = load_module(path)?;
            verify_module(&module)?;
            println!(
                "{path}: ok ({} functions, {} externs)",
                module.functions.len(),
                module.externs.len()
            );
            Ok(())
        }
        "convert" => {
            let [input, output] = rest.as_slice() else {
                return Err(usage("convert expects an input and an output path"));
            };
            cmd_convert(input, output)
        }
        "specialize" => cmd_specialize(&rest),
        "run" => cmd_run(&rest),
        other => Err(usage(&format!("unknown command `{other}`"))),
    }
}

fn print_help() {
    println!(
        "rejit {}\n\nUSAGE:\n  rejit <COMMAND>\n\nCOMMANDS:\n  print <module>\n  verify <module>\n  convert <in> <out.rjir|out.rjb>\n  specialize <module> <function> <arg|_>... [-O0..-O3] [--config <file>]\n  run <module> <function> <arg>... [-O0..-O3] [--config <file>]\n\n  -h, --help\n  -V, --version\n\nModules are read as binary when they start with the RJIT magic and as\ntext otherwise. RUST_LOG controls diagnostics; REJIT_* variables set\ndefault options.",
        env!("CARGO_PKG_VERSION")
    );
}

fn usage(message: &str) -> CliError {
    CliError::Usage(message.to_owned())
}

fn read_file(path: &str) -> Result<Vec<u8>, CliError> {
    fs::read(path).map_err(|source| CliError::Io {
        path: path.to_owned(),
        source,
    })
}

fn load_module(path: &str) -> Result<Module, CliError> {
    let bytes = read_file(path)?;
    if is_encoded(&bytes) {
        return Ok(from_bytes(&bytes)?);
    }
    let text = String::from_utf8(bytes)
        .map_err(|_| usage(&format!("{path} is neither an encoded module nor UTF-8 text")))?;
    Ok(parse_module(&text)?)
}

fn cmd_convert(input: &str, output: &str) -> Result<(), CliError> {
    let module = load_module(input)?;
    let bytes = match Path::new(output).extension().and_then(|e| e.to_str()) {
        Some("rjb") => to_bytes(&module)?,
        Some("rjir") => module.to_string().into_bytes(),
        _ => {
            return Err(usage(&format!(
                "cannot tell the output format of {output} (use .rjir or .rjb)"
            )));
        }
    };
    fs::write(output, bytes).map_err(|source| CliError::Io {
        path: output.to_owned(),
        source,
    })
}

/// Splits `-O<level>` and `--config <file>` off the positional arguments.
fn parse_options(args: &[String]) -> Result<(Options, Vec<String>), CliError> {
    let mut config = None;
    let mut level = None;
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < args.len() {
        let arg = &args[i];
        if arg == "--config" {
            let Some(path) = args.get(i + 1) else {
                return Err(usage("--config expects a value"));
            };
            config = Some(path.clone());
            i += 2;
            continue;
        }
        if arg.starts_with("-O") {
            let parsed: OptLevel = arg.parse().map_err(|e| usage(&format!("{e}")))?;
            level = Some(parsed);
        } else {
            out.push(arg.clone());
        }
        i += 1;
    }

    let options = match config {
        Some(path) => Options::load(Path::new(&path))?,
        None => Options::default(),
    }
    .with_env()?;
    let options = match level {
        Some(level) => options.with_opt_level(level),
        None => options,
    };
    Ok((options, out))
}

/// Loads the module, registers `function` and binds `args` to its parameters.
/// `_` leaves a parameter free unless `all_fixed` is set.
fn prepare(
    positional: &[String],
    options: Options,
    all_fixed: bool,
) -> Result<(Specializer, Context), CliError> {
    let [path, function, args @ ..] = positional else {
        return Err(usage("expected <module> <function> <arg>..."));
    };
    let module = load_module(path)?;
    let params = module
        .function(function)
        .map(|f| f.signature.params.clone())
        .ok_or_else(|| usage(&format!("{path} does not define `{function}`")))?;
    if args.len() != params.len() {
        return Err(usage(&format!(
            "`{function}` takes {} arguments, {} given",
            params.len(),
            args.len()
        )));
    }

    let mut builder = Context::builder(&params).options(options.clone());
    for (index, (text, &ty)) in args.iter().zip(&params).enumerate() {
        if text == "_" {
            if all_fixed {
                return Err(usage("run needs a value for every argument"));
            }
            continue;
        }
        if all_fixed && ty == Type::Ptr {
            return Err(usage("pointer arguments cannot be supplied to run"));
        }
        builder = builder.fix(index, parse_arg(index, ty, text)?);
    }
    let ctx = builder.build()?;

    let registry = Registry::new();
    // SAFETY: the module is the program the user asked to run; nothing
    // native stands behind `CLI_FUNCTION` for it to disagree with.
    #[allow(unsafe_code)]
    let registered = unsafe { registry.register(CLI_FUNCTION, function.clone(), module) };
    registered?;
    Ok((Specializer::with_options(Arc::new(registry), options), ctx))
}

fn cmd_specialize(args: &[String]) -> Result<(), CliError> {
    let (options, positional) = parse_options(args)?;
    let (specializer, ctx) = prepare(&positional, options, false)?;
    let optimized = specializer.optimize(CLI_FUNCTION, &ctx)?;
    print!("{}", optimized.module);
    Ok(())
}

fn cmd_run(args: &[String]) -> Result<(), CliError> {
    let (options, positional) = parse_options(args)?;
    let (specializer, ctx) = prepare(&positional, options, true)?;
    let compiled = specializer.compile(CLI_FUNCTION, &ctx)?;
    println!("{}", call_fully_fixed(compiled)?);
    Ok(())
}

fn call_fully_fixed(compiled: CompiledFunction) -> Result<String, CliError> {
    fn call<R: JitRet + Display>(compiled: CompiledFunction) -> Result<String, CliError> {
        let f = Specialized::<extern "C" fn() -> R>::new(compiled)?;
        Ok(f.call().to_string())
    }

    match compiled.signature().ret {
        Some(Type::I8) => call::<i8>(compiled),
        Some(Type::I16) => call::<i16>(compiled),
        Some(Type::I32) => call::<i32>(compiled),
        Some(Type::I64) => call::<i64>(compiled),
        Some(Type::F32) => call::<f32>(compiled),
        Some(Type::F64) => call::<f64>(compiled),
        Some(Type::Bool) => call::<bool>(compiled),
        Some(Type::Ptr) => {
            let f = Specialized::<extern "C" fn() -> *const u8>::new(compiled)?;
            Ok(format!("{:p}", f.call()))
        }
        None => {
            Specialized::<extern "C" fn()>::new(compiled)?.call();
            Ok("()".to_owned())
        }
    }
}

fn parse_int(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = match digits.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<u64>().ok()?,
    };
    let value = magnitude as i64;
    Some(if negative { value.wrapping_neg() } else { value })
}

fn parse_arg(index: usize, ty: Type, text: &str) -> Result<ArgValue, CliError> {
    let invalid = || usage(&format!("argument {index}: `{text}` is not a valid {ty}"));
    match ty {
        Type::I8 | Type::I16 | Type::I32 | Type::I64 => {
            parse_int(text).map(ArgValue::Int).ok_or_else(invalid)
        }
        Type::F32 | Type::F64 => text.parse().map(ArgValue::Float).map_err(|_| invalid()),
        Type::Bool => match text {
            "true" | "1" => Ok(ArgValue::Bool(true)),
            "false" | "0" => Ok(ArgValue::Bool(false)),
            _ => Err(invalid()),
        },
        Type::Ptr => parse_int(text)
            .map(|addr| ArgValue::Ptr {
                addr: addr as usize,
                align: 1,
            })
            .ok_or_else(invalid),
    }
}
