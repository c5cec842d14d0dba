//! Stage sequencing for one reading.
//!
//! A run walks the stages in linear order, taking back-edges when a gate
//! rejects the output of verification, continuity review, or the structure
//! check. Run state is checkpointed into the artifact store after every
//! transition so a run can be resumed from whatever it already produced.
mod context;
mod mode;
mod orchestrator;
mod resume;
mod stage;
mod state;

pub use context::{
    BookOutline, DocumentIndex, IndexManifest, OutlineEntry, SharedContext,
    INDEX_MANIFEST_SCHEMA_VERSION,
};
pub use mode::{select_mode, Mode};
pub use orchestrator::{
    AbortSignal, IndexRef, Orchestrator, RunOutcome, RunRequest, PREVIOUS_SUMMARY_ARTIFACT,
};
pub use resume::{recover, Recovered};
pub use stage::Stage;
pub use state::{FailureRecord, RunState, Transition, RUN_STATE_ARTIFACT, RUN_STATE_SCHEMA_VERSION};
