mod chat;
pub mod correction_llm;
pub mod db;
pub mod ocr_llm;
pub mod solver_llm;
pub mod storage;

pub use correction_llm::OpenAiCorrectionAdapter;
pub use db::DbAdapter;
pub use ocr_llm::OpenAiOcrAdapter;
pub use solver_llm::OpenAiSolverAdapter;
pub use storage::LocalObjectStorage;
