use anyhow::Result;
use clap::Parser;
use lava::{run_file, Halt, RuntimeConfig, UnhandledOpcodePolicy, Value};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

#[derive(Parser)]
#[command(
    name = "lava",
    version,
    about = "Run the main method of a Java class file"
)]
struct Cli {
    /// Path to the `.class` file to run.
    class_file: PathBuf,
    /// Fault on opcodes the interpreter has no handler for instead of
    /// skipping them.
    #[arg(long)]
    strict: bool,
    /// Stop after executing this many instructions.
    #[arg(long)]
    max_instructions: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = RuntimeConfig {
        unhandled_opcodes: if cli.strict {
            UnhandledOpcodePolicy::Fail
        } else {
            UnhandledOpcodePolicy::Skip
        },
        max_instructions: cli.max_instructions,
    };

    let execution = run_file(&cli.class_file, &config)?;
    let outcome = execution.outcome;
    let stack: Vec<String> =
        outcome.stack.iter().map(Value::to_string).collect();
    println!("stack: [{}]", stack.join(", "));
    println!("heap objects: {}", outcome.objects.len());
    if let Some(value) = outcome.return_value {
        println!("returned: {value}");
    }
    println!("instructions executed: {}", outcome.instructions_executed);

    match outcome.halt {
        Halt::Normal => Ok(()),
        Halt::Faulted(err) => Err(err.into()),
    }
}
