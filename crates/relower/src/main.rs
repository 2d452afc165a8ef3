use relower::diagnostics::{render_diagnostic, Diagnostic};
use relower::{normalize_json, RelowerError};
use std::env;
use std::fs;
use std::io::Read;
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut args = env::args().skip(1);
    let Some(arg) = args.next() else {
        return run("-");
    };
    match arg.as_str() {
        "-h" | "--help" => {
            print_help();
            ExitCode::SUCCESS
        }
        path => run(path),
    }
}

fn run(path: &str) -> ExitCode {
    let input = match read_input(path) {
        Ok(input) => input,
        Err(err) => {
            let diag = Diagnostic::new("E002", err.to_string());
            eprintln!("{}", render_diagnostic(path, &diag));
            return ExitCode::FAILURE;
        }
    };
    match normalize_json(&input) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(RelowerError::Json(err)) => {
            let line = u32::try_from(err.line()).ok().filter(|line| *line > 0);
            let mut diag = Diagnostic::new("E001", format!("invalid program JSON: {err}"));
            if let Some(line) = line {
                diag = diag.at_line(line);
            }
            eprintln!("{}", render_diagnostic(path, &diag));
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn read_input(path: &str) -> Result<String, std::io::Error> {
    if path == "-" {
        let mut input = String::new();
        std::io::stdin().read_to_string(&mut input)?;
        return Ok(input);
    }
    fs::read_to_string(path)
}

fn print_help() {
    println!("relower: repair lowered target-language programs");
    println!();
    println!("Usage: relower [PROGRAM.json]");
    println!();
    println!("Reads a lowered program as JSON (from the file argument, or stdin");
    println!("when the argument is `-` or absent), runs the repair passes, and");
    println!("prints the normalized program as JSON on stdout.");
}
