// SPDX-License-Identifier: Apache-2.0

use std::io::{self, BufReader};
use std::process::ExitCode;

use ramdata_core::logging::init_tracing;
use ramdata_core::ResultExt;

fn main() -> ExitCode {
    init_tracing();
    let stdin = io::stdin();
    let stdout = io::stdout();
    let served = ramdata_store::isolation::serve(BufReader::new(stdin.lock()), stdout.lock())
        .with_context("store worker");
    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "store worker failed");
            ExitCode::FAILURE
        }
    }
}
