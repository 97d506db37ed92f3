use std::process::ExitCode;

fn main() -> ExitCode {
    match eyepdf_lib::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("eyepdf: {e}");
            ExitCode::FAILURE
        }
    }
}
