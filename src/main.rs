fn main() {
    if let Err(err) = bootdiag::cli::run() {
        bootdiag::ui::eprintln_error(&err);
        std::process::exit(bootdiag::exit::exit_code(&err));
    }
}
