//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for an interactive solve
//! WebSocket connection. The session captures input message by message, then
//! runs the three-step pipeline with a confirmation pause between correction
//! and solving. Model calls run in spawned tasks so the loop keeps reading;
//! a second submission while one is in flight is refused.

use crate::web::{
    middleware::CurrentUser,
    protocol::{ClientMessage, GraphBody, ServerMessage, SolveResultBody},
    rest::queue_save,
    state::{AppState, PendingRun, SessionMode, SolveSession},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use equation_ace_core::{
    domain::{ImageBlob, ProblemInput},
    history::HistoryRecorder,
    input::{CropRect, InputCapture, InvalidInputError, Stroke},
    pipeline::{Confirmation, PipelineError, SolvePipeline},
    presentation::ResultView,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{error, info, warn};
use uuid::Uuid;

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_solve_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user))
}

async fn send_message(ws_sender: &WsSender, msg: &ServerMessage) {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            return;
        }
    };
    if ws_sender.lock().await.send(Message::Text(json.into())).await.is_err() {
        warn!("Failed to send message; the client is gone.");
    }
}

fn error_message(err: &PipelineError) -> ServerMessage {
    ServerMessage::Error {
        title: err.title().to_string(),
        message: err.user_message(),
    }
}

fn notice(title: &str, message: &str) -> ServerMessage {
    ServerMessage::Error {
        title: title.to_string(),
        message: message.to_string(),
    }
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user: CurrentUser) {
    match user.0 {
        Some(user_id) => info!("New solve session for user: {}", user_id),
        None => info!("New anonymous solve session."),
    }

    // The sender is wrapped in an Arc<Mutex<>> to allow for shared mutable access across tasks.
    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));
    let session = Arc::new(Mutex::new(SolveSession::new(user.0)));
    let mut run_handle: Option<JoinHandle<()>> = None;

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                handle_text_message(text.as_str(), &app_state, &session, &ws_sender, &mut run_handle).await;
            }
            Message::Close(_) => {
                info!("Client sent close message.");
                break;
            }
            _ => {}
        }
    }

    if let Some(handle) = run_handle {
        handle.abort();
    }
    info!("Solve WebSocket connection closed.");
}

/// Helper function to handle the logic for different `ClientMessage` variants.
async fn handle_text_message(
    text: &str,
    app_state: &Arc<AppState>,
    session: &Arc<Mutex<SolveSession>>,
    ws_sender: &WsSender,
    run_handle: &mut Option<JoinHandle<()>>,
) {
    let client_msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            send_message(ws_sender, &notice("Invalid Message", &e.to_string())).await;
            return;
        }
    };

    match client_msg {
        ClientMessage::Submit => {
            if let Some(handle) = submit(app_state, session, ws_sender).await {
                *run_handle = Some(handle);
            }
        }
        ClientMessage::Confirm { edited_text } => {
            if let Some(handle) = confirm(app_state, session, ws_sender, edited_text).await {
                *run_handle = Some(handle);
            }
        }
        ClientMessage::Cancel => cancel(app_state, session, ws_sender).await,
        ClientMessage::ExpandGraph => {
            let graph = session
                .lock()
                .await
                .last_result
                .as_ref()
                .map(ResultView::render_graph);
            let msg = match graph {
                Some(graph) => ServerMessage::Graph {
                    graph: GraphBody::from(graph),
                },
                None => notice("No Result", "Solve a problem before expanding its graph."),
            };
            send_message(ws_sender, &msg).await;
        }
        input_msg => {
            // Image payloads are decoded off the async runtime.
            let decoded = tokio::task::spawn_blocking(move || InputEdit::from_message(input_msg)).await;
            let reply = match decoded {
                Ok(Ok(Some(edit))) => {
                    let mut s = session.lock().await;
                    match apply_edit(&mut s, edit) {
                        Ok(()) => ServerMessage::InputChanged {
                            mode: s.capture.mode().name().to_string(),
                        },
                        Err(e) => error_message(&PipelineError::from(e)),
                    }
                }
                Ok(Ok(None)) => return,
                Ok(Err(e)) => error_message(&PipelineError::from(e)),
                Err(e) => {
                    error!("Decoding an input message panicked: {}", e);
                    notice("Processing Failed", "Failed to process input.")
                }
            };
            send_message(ws_sender, &reply).await;
        }
    }
}

/// An input-editing message with its payload decoded.
#[derive(Debug)]
enum InputEdit {
    Upload(ImageBlob),
    Crop(CropRect),
    BeginDrawing { width: u32, height: u32 },
    Stroke(Stroke),
    ClearCanvas,
    TypeText(String),
    Clear,
}

impl InputEdit {
    /// `None` for messages that do not edit the input.
    fn from_message(msg: ClientMessage) -> Result<Option<Self>, InvalidInputError> {
        let edit = match msg {
            ClientMessage::UploadImage { data_uri } => Self::Upload(ImageBlob::from_data_uri(&data_uri)?),
            ClientMessage::SetCrop { crop } => Self::Crop(crop.into()),
            ClientMessage::BeginDrawing { width, height } => Self::BeginDrawing { width, height },
            ClientMessage::DrawStroke { stroke } => Self::Stroke(stroke.into_stroke()?),
            ClientMessage::ClearCanvas => Self::ClearCanvas,
            ClientMessage::TypeText { text } => Self::TypeText(text),
            ClientMessage::ClearInput => Self::Clear,
            ClientMessage::Submit
            | ClientMessage::Confirm { .. }
            | ClientMessage::Cancel
            | ClientMessage::ExpandGraph => return Ok(None),
        };
        Ok(Some(edit))
    }
}

/// Applies an edit to the session's capture. A successful edit makes the
/// previous result stale, so it is dropped.
fn apply_edit(session: &mut SolveSession, edit: InputEdit) -> Result<(), InvalidInputError> {
    let capture = &mut session.capture;
    match edit {
        InputEdit::Upload(image) => capture.upload(image),
        InputEdit::Crop(crop) => capture.set_crop(crop)?,
        InputEdit::BeginDrawing { width, height } => capture.begin_drawing(width, height)?,
        InputEdit::Stroke(stroke) => capture.add_stroke(stroke)?,
        InputEdit::ClearCanvas => capture.clear_canvas(),
        InputEdit::TypeText(text) => capture.type_text(&text),
        InputEdit::Clear => capture.clear(),
    }
    session.last_result = None;
    Ok(())
}

//=========================================================================================
// Pipeline Runs
//=========================================================================================

async fn submit(
    app_state: &Arc<AppState>,
    session: &Arc<Mutex<SolveSession>>,
    ws_sender: &WsSender,
) -> Option<JoinHandle<()>> {
    let claimed = claim_for_submit(&mut *session.lock().await);
    let Some(capture) = claimed else {
        send_message(ws_sender, &notice("Busy", "A problem is already being solved.")).await;
        return None;
    };

    // Rasterizing and cropping run without holding the session lock.
    let input = match tokio::task::spawn_blocking(move || capture.normalize()).await {
        Ok(Ok(input)) => input,
        Ok(Err(e)) => {
            session.lock().await.mode = SessionMode::Idle;
            send_message(ws_sender, &error_message(&PipelineError::from(e))).await;
            return None;
        }
        Err(e) => {
            error!("Normalizing the input panicked: {}", e);
            session.lock().await.mode = SessionMode::Idle;
            send_message(ws_sender, &notice("Processing Failed", "Failed to process input.")).await;
            return None;
        }
    };
    let Some(pipeline) = app_state.pipeline.clone() else {
        session.lock().await.mode = SessionMode::Idle;
        send_message(ws_sender, &notice("Not Configured", "Solving is not configured on this server.")).await;
        return None;
    };

    let session = session.clone();
    let ws_sender = ws_sender.clone();
    Some(tokio::spawn(async move {
        run_prepare(pipeline, input, session, ws_sender).await;
    }))
}

/// Marks an idle session as solving and snapshots its input. `None` while a
/// run is already in flight.
fn claim_for_submit(session: &mut SolveSession) -> Option<InputCapture> {
    if session.mode != SessionMode::Idle {
        return None;
    }
    session.mode = SessionMode::Solving;
    Some(session.capture.clone())
}

async fn run_prepare(
    pipeline: Arc<SolvePipeline>,
    input: ProblemInput,
    session: Arc<Mutex<SolveSession>>,
    ws_sender: WsSender,
) {
    let stage = if input.is_image() { "extracting" } else { "correcting" };
    send_message(&ws_sender, &ServerMessage::Processing { stage: stage.to_string() }).await;

    let result = pipeline.prepare(&input).await;

    let reply = {
        let mut s = session.lock().await;
        match result {
            Ok(pending) => {
                let msg = ServerMessage::AwaitingConfirmation {
                    raw_text: pending.extraction.as_ref().map(|e| e.raw_text.clone()),
                    corrected_text: pending.corrected.corrected_text.clone(),
                };
                s.pending = Some(PendingRun { pending, input });
                s.mode = SessionMode::AwaitingConfirmation;
                msg
            }
            Err(e) => {
                error!("Preparing the solve failed: {}", e);
                s.mode = SessionMode::Idle;
                error_message(&e)
            }
        }
    };
    send_message(&ws_sender, &reply).await;
}

async fn confirm(
    app_state: &Arc<AppState>,
    session: &Arc<Mutex<SolveSession>>,
    ws_sender: &WsSender,
    edited_text: Option<String>,
) -> Option<JoinHandle<()>> {
    let (run, user_id) = {
        let mut s = session.lock().await;
        match (s.mode, s.pending.take()) {
            (SessionMode::AwaitingConfirmation, Some(run)) => {
                s.mode = SessionMode::Solving;
                (run, s.user_id)
            }
            (_, pending) => {
                s.pending = pending;
                drop(s);
                send_message(ws_sender, &notice("Nothing to Confirm", "Submit a problem first.")).await;
                return None;
            }
        }
    };
    let Some(pipeline) = app_state.pipeline.clone() else {
        session.lock().await.mode = SessionMode::Idle;
        send_message(ws_sender, &notice("Not Configured", "Solving is not configured on this server.")).await;
        return None;
    };

    let history = app_state.history.clone();
    let session = session.clone();
    let ws_sender = ws_sender.clone();
    Some(tokio::spawn(async move {
        run_finish(pipeline, history, user_id, run, edited_text, session, ws_sender).await;
    }))
}

async fn run_finish(
    pipeline: Arc<SolvePipeline>,
    history: Option<Arc<HistoryRecorder>>,
    user_id: Option<Uuid>,
    run: PendingRun,
    edited_text: Option<String>,
    session: Arc<Mutex<SolveSession>>,
    ws_sender: WsSender,
) {
    send_message(&ws_sender, &ServerMessage::Processing { stage: "solving".to_string() }).await;

    let result = pipeline
        .finish(run.pending, Confirmation::Confirm { edited_text })
        .await;

    let reply = {
        let mut s = session.lock().await;
        s.mode = SessionMode::Idle;
        match result {
            Ok(Some(outcome)) => {
                let save_status = queue_save(history.as_ref(), user_id, &outcome, run.input.image());
                s.last_result = Some(ResultView::from_outcome(&outcome));
                ServerMessage::Solved {
                    result: SolveResultBody::from_outcome(&outcome),
                    save_status,
                }
            }
            Ok(None) => ServerMessage::Cancelled,
            Err(e) => {
                error!("Solving failed: {}", e);
                error_message(&e)
            }
        }
    };
    send_message(&ws_sender, &reply).await;
}

async fn cancel(app_state: &Arc<AppState>, session: &Arc<Mutex<SolveSession>>, ws_sender: &WsSender) {
    let run = {
        let mut s = session.lock().await;
        if s.mode != SessionMode::AwaitingConfirmation {
            None
        } else {
            s.mode = SessionMode::Idle;
            s.pending.take()
        }
    };

    let msg = match (run, app_state.pipeline.as_ref()) {
        (Some(run), Some(pipeline)) => match pipeline.finish(run.pending, Confirmation::Cancel).await {
            Ok(_) => ServerMessage::Cancelled,
            Err(e) => error_message(&e),
        },
        _ => notice("Nothing to Cancel", "No solve is waiting for confirmation."),
    };
    send_message(ws_sender, &msg).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply(session: &mut SolveSession, msg: serde_json::Value) -> Result<(), InvalidInputError> {
        match InputEdit::from_message(serde_json::from_value(msg).unwrap())? {
            Some(edit) => apply_edit(session, edit),
            None => Ok(()),
        }
    }

    fn solved_view() -> ResultView {
        ResultView {
            raw_text: None,
            corrected_text: "x = 1".to_string(),
            result_lines: vec!["x = 1".to_string()],
            explanation_steps: vec![],
            graph: None,
        }
    }

    #[test]
    fn input_messages_switch_modes() {
        let mut session = SolveSession::new(None);
        apply(&mut session, json!({"type": "type_text", "text": "2x + 3 = 7"})).unwrap();
        assert_eq!(session.capture.mode().name(), "typing");

        apply(&mut session, json!({"type": "begin_drawing", "width": 40, "height": 30})).unwrap();
        apply(
            &mut session,
            json!({
                "type": "draw_stroke",
                "stroke": {"mode": "draw", "points": [{"x": 2.0, "y": 2.0}, {"x": 30.0, "y": 20.0}]}
            }),
        )
        .unwrap();
        assert_eq!(session.capture.mode().name(), "drawing");

        apply(&mut session, json!({"type": "clear_input"})).unwrap();
        assert_eq!(session.capture.mode().name(), "empty");
    }

    #[test]
    fn stroke_without_canvas_is_rejected() {
        let mut session = SolveSession::new(None);
        let err = apply(
            &mut session,
            json!({"type": "draw_stroke", "stroke": {"mode": "draw", "points": []}}),
        )
        .unwrap_err();
        assert!(matches!(err, InvalidInputError::InvalidCanvas(_)));
    }

    #[test]
    fn malformed_upload_keeps_previous_input() {
        let mut session = SolveSession::new(None);
        apply(&mut session, json!({"type": "type_text", "text": "x = 1"})).unwrap();
        assert!(apply(
            &mut session,
            json!({"type": "upload_image", "data_uri": "data:image/png;base64,AAAA"})
        )
        .is_err());
        assert_eq!(session.capture.mode().name(), "typing");
    }

    #[test]
    fn editing_input_drops_the_previous_result() {
        let mut session = SolveSession::new(None);
        session.last_result = Some(solved_view());
        apply(&mut session, json!({"type": "type_text", "text": "2x = 8"})).unwrap();
        assert!(session.last_result.is_none());

        session.last_result = Some(solved_view());
        apply(&mut session, json!({"type": "clear_input"})).unwrap();
        assert!(session.last_result.is_none());
    }

    #[test]
    fn control_messages_keep_the_previous_result() {
        let mut session = SolveSession::new(None);
        session.last_result = Some(solved_view());
        apply(&mut session, json!({"type": "expand_graph"})).unwrap();
        assert_eq!(session.last_result, Some(solved_view()));
    }

    #[test]
    fn submit_claims_a_snapshot_of_the_input() {
        let mut session = SolveSession::new(None);
        apply(&mut session, json!({"type": "type_text", "text": "x + 1 = 2"})).unwrap();

        let snapshot = claim_for_submit(&mut session).unwrap();
        assert_eq!(session.mode, SessionMode::Solving);
        assert!(claim_for_submit(&mut session).is_none());

        apply(&mut session, json!({"type": "type_text", "text": "y = 5"})).unwrap();
        assert_eq!(
            snapshot.normalize().unwrap(),
            ProblemInput::Text("x + 1 = 2".to_string())
        );
    }
}
