use std::{env::args, path::PathBuf, process::ExitCode, str::FromStr};

use anyhow::{bail, Context};
use metagram_runtime::RunOptions;

const USAGE: &str = "usage: metagram <grammar> <input> [--rule NAME] [--max-depth N] [--grammar]";

fn main() -> ExitCode {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "WARN".to_owned());
    let level = log::LevelFilter::from_str(&level).unwrap_or(log::LevelFilter::Warn);

    // a logger may already be installed when embedded, that's fine
    _ = simplelog::TermLogger::init(
        level,
        simplelog::ConfigBuilder::new()
            .set_time_format_custom(&[])
            .build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Never,
    );

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let args = args().skip(1).collect::<Vec<_>>();

    let mut options = RunOptions::default();
    let mut print_grammar = false;
    let mut files = Vec::new();

    let mut iter = args.iter().map(String::as_str);
    while let Some(arg) = iter.next() {
        match arg {
            "--grammar" => print_grammar = true,
            "--rule" => {
                let name = iter.next().context("Expected a rule name after --rule")?;
                options.start = Some(name.to_owned());
            }
            "--max-depth" => {
                options.max_depth = iter
                    .next()
                    .context("Expected a number after --max-depth")?
                    .parse()
                    .context("Invalid --max-depth")?;
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                return Ok(());
            }
            _ if arg.starts_with("--") => bail!("Unknown option `{arg}`\n{USAGE}"),
            _ => files.push(PathBuf::from(arg)),
        }
    }

    let [grammar_path, input_path] = files.as_slice() else {
        bail!("Expected a grammar and an input file\n{USAGE}");
    };

    let src = std::fs::read_to_string(grammar_path)
        .with_context(|| format!("Failed to read `{}`", grammar_path.display()))?;
    let grammar = metagram_backend::compile(&src)
        .with_context(|| format!("Failed to compile `{}`", grammar_path.display()))?;
    log::info!("Compiled {} rules", grammar.len());

    if print_grammar {
        println!("{grammar}");
    }

    let input = std::fs::read_to_string(input_path)
        .with_context(|| format!("Failed to read `{}`", input_path.display()))?;
    let value = grammar
        .run_with(&input, &options)
        .with_context(|| format!("Failed to parse `{}`", input_path.display()))?;

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
