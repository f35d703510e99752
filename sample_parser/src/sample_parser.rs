use std::{env, fs::File, io::Read};

use entire::Logger;
use sample_parser::{exit_code, run_cli};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <grammar.json> <input.txt>", args[0]);
        std::process::exit(1);
    }

    let tables = read_file_to_string(&args[1]);
    let input = read_file_to_string(&args[2]);

    // set to 2 for per-parse statistics
    let stderr_log_level = 1;

    match run_cli(&tables, &input, Logger::new(0, stderr_log_level)) {
        Ok(out) => print!("{}", out),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(exit_code(&e));
        }
    }
}

fn read_file_to_string(filename: &str) -> String {
    let mut file = File::open(filename).expect("Unable to open file");
    let mut content = String::new();
    file.read_to_string(&mut content)
        .expect("Unable to read file");
    content
}
