use colored::Colorize;

fn main() {
    if let Err(err) = pass_cli::run() {
        eprintln!("{} {}", "error:".red().bold(), err.message);
        if let Some(hint) = &err.hint {
            eprintln!("{} {hint}", "hint:".yellow());
        }
        std::process::exit(err.code);
    }
}
