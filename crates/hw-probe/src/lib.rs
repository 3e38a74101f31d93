//! hw-probe: checks whether this host can decode streams in hardware

mod error;
pub use error::{ProbeError, Result};

mod command;
pub use command::{run_command, CommandOutput, COMMAND_TIMEOUT};

mod checks;
pub use checks::*;

mod report;
pub use report::{ProbeReport, Summary};
