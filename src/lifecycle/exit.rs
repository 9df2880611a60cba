//! Process exit.
//!
//! Turns the group [`Outcome`] into the exit status and writes the last log
//! lines. Runs after the runtime, and with it the trace exporter, is gone.

use std::process::ExitCode;

use crate::config::ValidationError;
use crate::lifecycle::group::Outcome;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;

/// 0 when the outcome carries no error, 1 otherwise.
pub fn exit_status(outcome: &Outcome) -> u8 {
    if outcome.is_success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    }
}

/// Log how the run ended and return the exit code.
pub fn finish(outcome: Outcome, name: &str) -> ExitCode {
    let status = exit_status(&outcome);
    if let Some(err) = outcome.error() {
        match &outcome.actor {
            Some(actor) => tracing::error!(actor = %actor, error = %err, "{name} failed"),
            None => tracing::error!(error = %err, "{name} failed"),
        }
    }
    tracing::info!(status, "exiting");
    ExitCode::from(status)
}

/// Log every rejected flag and exit before any actor is built.
pub fn invalid_config(errors: &[ValidationError]) -> ExitCode {
    for error in errors {
        tracing::error!(flag = error.flag, reason = %error.message, "--{} is invalid", error.flag);
    }
    tracing::info!(status = EXIT_FAILURE, "exiting");
    ExitCode::from(EXIT_FAILURE)
}
