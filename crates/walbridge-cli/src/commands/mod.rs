mod lsn;
mod offsets;
mod run;

pub use lsn::cmd_lsn;
pub use offsets::cmd_offsets;
pub use run::{cmd_run, RunArgs};
