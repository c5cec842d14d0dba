//! Workflow steps behind each CLI command.
//!
//! Each step is small: it opens the workspace, wires the pipeline pieces the
//! command needs, and reports what it wrote.
mod context;
mod export;
mod index;
mod init;
mod packet;
mod run;
mod status;

pub(crate) use context::{resolve_root, Workspace};
pub(crate) use export::run_export;
pub(crate) use index::run_index;
pub(crate) use init::run_init;
pub(crate) use packet::run_packet;
pub(crate) use run::{run_batch, run_run};
pub(crate) use status::run_status;
