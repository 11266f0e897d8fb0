pub mod domain;
pub mod history;
pub mod input;
pub mod pipeline;
pub mod plot;
pub mod ports;
pub mod presentation;

pub use domain::{
    CorrectedProblem, ExtractionResult, GraphSpec, HistoryRecord, ImageBlob, ImageFormat,
    NewHistoryRecord, PipelineShape, ProblemInput, Solution, SolveOutcome, SolverReply, User,
    UserCredentials,
};
pub use history::{HistoryRecorder, HistoryWatch, PersistenceError};
pub use input::{CanvasDrawing, CropRect, InputCapture, InputMode, InvalidInputError, Stroke};
pub use pipeline::{Confirmation, PendingSolve, PipelineError, SolvePipeline};
pub use ports::{
    DatabaseService, HistoryRepository, ObjectStorageService, PortError, PortResult,
    ProblemSolvingService, TextCorrectionService, TextExtractionService,
};
pub use presentation::{GraphView, ResultView};
