//! Exit code constants and error mapping for hypoval
//!
//! A run that completes with failed hypotheses is still a successful process
//! invocation; non-zero codes are reserved for configuration and I/O faults.

/// Exit code constants for hypoval
pub mod codes {
    /// Success - the run completed and the summary was persisted
    pub const SUCCESS: i32 = 0;

    /// CLI arguments or configuration error
    pub const CLI_ARGS: i32 = 2;

    /// I/O failure - inputs could not be read or outputs could not be written
    pub const IO: i32 = 3;
}

/// Process-level failure classes surfaced by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Invalid CLI arguments or configuration
    ConfigError,
    /// Input/output failure outside the pipeline's recovery scope
    Io,
}

impl ExitCode {
    /// Map to the process exit code.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::ConfigError => codes::CLI_ARGS,
            Self::Io => codes::IO,
        }
    }
}
