//! services/api/src/web/protocol.rs
//!
//! Defines the message protocol between the browser client and the API server:
//! the WebSocket messages of the interactive solve and history sessions, and
//! the JSON bodies shared with the REST endpoints.

use chrono::{DateTime, Utc};
use equation_ace_core::{
    domain::{GraphSpec, HistoryRecord, SolveOutcome},
    input::{parse_hex_color, CanvasDrawing, CropRect, InvalidInputError, Point, Stroke, StrokeMode},
    presentation::{GraphView, ResultView},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

//=========================================================================================
// Input Bodies
//=========================================================================================

/// A crop rectangle in the image's natural pixel coordinates.
#[derive(Deserialize, Serialize, ToSchema, Debug, Clone, Copy)]
pub struct CropBody {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl From<CropBody> for CropRect {
    fn from(body: CropBody) -> Self {
        CropRect {
            x: body.x,
            y: body.y,
            width: body.width,
            height: body.height,
        }
    }
}

#[derive(Deserialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrokeModeBody {
    Draw,
    Erase,
}

#[derive(Deserialize, ToSchema, Debug, Clone, Copy)]
pub struct PointBody {
    pub x: f32,
    pub y: f32,
}

/// One pointer-down to pointer-up gesture on the canvas.
#[derive(Deserialize, ToSchema, Debug, Clone)]
pub struct StrokeBody {
    pub mode: StrokeModeBody,
    /// `#rrggbb`; black when absent. Ignored when erasing.
    pub color: Option<String>,
    pub width: Option<f32>,
    pub points: Vec<PointBody>,
}

impl StrokeBody {
    pub fn into_stroke(self) -> Result<Stroke, InvalidInputError> {
        let points = self
            .points
            .into_iter()
            .map(|p| Point { x: p.x, y: p.y })
            .collect();
        let mut stroke = match self.mode {
            StrokeModeBody::Draw => Stroke::draw(points),
            StrokeModeBody::Erase => Stroke::erase(points),
        };
        if stroke.mode == StrokeMode::Draw {
            if let Some(color) = self.color.as_deref() {
                stroke.color = parse_hex_color(color)?;
            }
        }
        stroke.width = self.width;
        Ok(stroke)
    }
}

/// A complete canvas drawing, submitted in one request.
#[derive(Deserialize, ToSchema, Debug, Clone)]
pub struct DrawingBody {
    pub width: u32,
    pub height: u32,
    pub strokes: Vec<StrokeBody>,
}

impl DrawingBody {
    pub fn into_canvas(self) -> Result<CanvasDrawing, InvalidInputError> {
        let mut canvas = CanvasDrawing::new(self.width, self.height)?;
        for stroke in self.strokes {
            canvas.push_stroke(stroke.into_stroke()?)?;
        }
        Ok(canvas)
    }
}

//=========================================================================================
// Result Bodies
//=========================================================================================

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GraphDataBody {
    pub is_plottable: bool,
    pub function_str: Option<String>,
}

impl From<&GraphSpec> for GraphDataBody {
    fn from(graph: &GraphSpec) -> Self {
        Self {
            is_plottable: graph.is_plottable(),
            function_str: graph.function_expression().map(str::to_string),
        }
    }
}

/// A displayable solve result.
#[derive(Serialize, ToSchema, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SolveResultBody {
    /// Only present for image input.
    pub raw_text: Option<String>,
    pub corrected_text: String,
    /// The result lines, or the "No solution found." placeholder.
    pub solved_result: Vec<String>,
    pub no_solution_found: bool,
    pub explanation: Vec<String>,
    pub graph_data: Option<GraphDataBody>,
    pub schema_version: i16,
}

impl SolveResultBody {
    pub fn from_outcome(outcome: &SolveOutcome) -> Self {
        let view = ResultView::from_outcome(outcome);
        Self {
            raw_text: view.raw_text.clone(),
            corrected_text: view.corrected_text.clone(),
            solved_result: view.display_lines(),
            no_solution_found: view.no_solution_found(),
            explanation: view.explanation_steps.clone(),
            graph_data: view.graph.as_ref().map(GraphDataBody::from),
            schema_version: outcome.shape.schema_version(),
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct PlotPointBody {
    pub x: f64,
    /// `null` where the function is undefined.
    pub y: Option<f64>,
}

#[derive(Serialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum GraphStatus {
    NotPlottable,
    Plot,
    Error,
}

/// A rendered graph panel.
#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct GraphBody {
    pub status: GraphStatus,
    pub expression: Option<String>,
    pub points: Vec<PlotPointBody>,
    pub message: Option<String>,
}

impl From<GraphView> for GraphBody {
    fn from(view: GraphView) -> Self {
        match view {
            GraphView::NotPlottable => Self {
                status: GraphStatus::NotPlottable,
                expression: None,
                points: Vec::new(),
                message: None,
            },
            GraphView::Plot { expression, points } => Self {
                status: GraphStatus::Plot,
                expression: Some(expression),
                points: points
                    .into_iter()
                    .map(|p| PlotPointBody { x: p.x, y: p.y })
                    .collect(),
                message: None,
            },
            GraphView::Error {
                expression,
                message,
            } => Self {
                status: GraphStatus::Error,
                expression: Some(expression),
                points: Vec::new(),
                message: Some(message),
            },
        }
    }
}

/// One saved solve, as listed in the history panel.
#[derive(Serialize, ToSchema, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecordBody {
    pub id: Uuid,
    pub raw_text: Option<String>,
    pub corrected_text: String,
    pub solved_result: Vec<String>,
    pub explanation: Vec<String>,
    pub graph_data: Option<GraphDataBody>,
    pub image_url: Option<String>,
    pub schema_version: i16,
    pub created_at: DateTime<Utc>,
}

impl From<&HistoryRecord> for HistoryRecordBody {
    fn from(record: &HistoryRecord) -> Self {
        let view = ResultView::from_record(record);
        Self {
            id: record.id,
            raw_text: view.raw_text.clone(),
            corrected_text: view.corrected_text.clone(),
            solved_result: view.display_lines(),
            explanation: view.explanation_steps.clone(),
            graph_data: view.graph.as_ref().map(GraphDataBody::from),
            image_url: record.image_url.clone(),
            schema_version: record.schema.schema_version(),
            created_at: record.created_at,
        }
    }
}

/// What happened to the result after it was returned.
#[derive(Serialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SaveStatus {
    /// Saving runs in the background.
    Queued,
    /// The user is anonymous; log in to save results to history.
    SignInRequired,
    NotConfigured,
}

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send on `/ws/solve`.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Switches to upload mode with the given image.
    UploadImage { data_uri: String },
    SetCrop { crop: CropBody },
    /// Switches to drawing mode with an empty canvas of this size.
    BeginDrawing { width: u32, height: u32 },
    DrawStroke { stroke: StrokeBody },
    ClearCanvas,
    /// Replaces the typed problem text. Empty text leaves typing mode.
    TypeText { text: String },
    ClearInput,
    /// Starts extraction and correction for the current input.
    Submit,
    /// Continues to the solve step, optionally with edited text.
    Confirm { edited_text: Option<String> },
    Cancel,
    /// Asks for the graph of the last result.
    ExpandGraph,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The active input mode after an input message.
    InputChanged { mode: String },

    /// A model call started. `stage` is `extracting`, `correcting` or `solving`.
    Processing { stage: String },

    /// Extraction and correction finished; the client should confirm or cancel.
    AwaitingConfirmation {
        raw_text: Option<String>,
        corrected_text: String,
    },

    Solved {
        result: SolveResultBody,
        save_status: SaveStatus,
    },

    Graph { graph: GraphBody },

    /// The run was cancelled before the solve call.
    Cancelled,

    /// Reports an error to the client, which should display a notification.
    Error { title: String, message: String },

    /// The full, sorted history of the signed-in user (`/ws/history`).
    HistorySnapshot { records: Vec<HistoryRecordBody> },
}
