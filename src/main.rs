use std::process::ExitCode;

use consulkv::{cli, ui};

fn main() -> ExitCode {
    match cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ui::output::error(format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}
