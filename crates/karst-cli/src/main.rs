use std::{env, fs, path::Path, process::ExitCode};

use karst::Session;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let Some(file_path) = args.get(1) else {
        eprintln!("usage: karst FILE [-o MODULE-DIR]");
        return ExitCode::FAILURE;
    };
    let code = match read_file(file_path) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut session = Session::new();
    session.compile_str(&code, file_path);
    for diagnostic in session.diagnostics() {
        eprintln!("{file_path}:{diagnostic}");
    }

    if let Some(pos) = args.iter().position(|a| a == "-o") {
        let Some(dir) = args.get(pos + 1) else {
            eprintln!("error: -o requires a directory");
            return ExitCode::FAILURE;
        };
        session.remove_macros_for_runtime();
        if let Err(err) = session.write_module(Path::new(dir)) {
            eprintln!("error: unable to write module: {err}");
            return ExitCode::FAILURE;
        }
    }

    // Diagnostics go to the error stream; the exit code reports only
    // whether compilation ran to completion.
    ExitCode::SUCCESS
}

fn read_file(file_path: &str) -> Result<String, String> {
    match fs::metadata(file_path) {
        Ok(metadata) => {
            if !metadata.is_file() {
                return Err(format!("{file_path} is not a file"));
            }
        }
        Err(err) => {
            return Err(format!("unable to read {file_path}: {err}"));
        }
    }
    fs::read_to_string(file_path).map_err(|err| format!("unable to read {file_path}: {err}"))
}
