use std::collections::HashSet;
use std::{env, fs, process::ExitCode};

use pasvm::frontend::{CompilerFrontend, FrontendOptions};
use pasvm::{emit_cpp, parser};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let (Some(input_path), Some(output_path)) = (args.get(1), args.get(2)) else {
        eprintln!("usage: pasvm <input.pas> <output.cpp>");
        return ExitCode::FAILURE;
    };

    let source = match fs::read_to_string(input_path) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("error reading {input_path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let preprocessed = pasvm::preprocessor::preprocess(&source, &HashSet::new());
    let program = match parser::parse_program(&preprocessed, parser::ParserOptions::NONE) {
        Ok(p) => p,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    // A full semantic check runs via the same path `CompilerFrontend::compile`
    // uses, so a program that parses but fails codegen still surfaces its
    // diagnostics here rather than emitting bogus C++.
    let mut frontend = CompilerFrontend::new(FrontendOptions::default());
    if let Err(err) = frontend.compile(&preprocessed, &HashSet::new()) {
        eprintln!("{err}");
        for msg in frontend.messages().messages() {
            eprintln!("{msg}");
        }
        return ExitCode::FAILURE;
    }

    let cpp = emit_cpp::emit_program(&program);
    if let Err(err) = fs::write(output_path, cpp) {
        eprintln!("error writing {output_path}: {err}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
