pub mod correction;
pub mod indexing;
pub mod reattach;
pub mod runner;
pub mod stuck;

pub use correction::{CorrectionService, QuestionAnswer};
pub use indexing::{ChannelIndexingQueue, IndexingQueue, IndexingTask};
pub use reattach::ReattachController;
pub use runner::PipelineRunner;
pub use stuck::StuckDetector;
