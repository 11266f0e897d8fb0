//! crates/equation_ace_core/src/input.rs
//!
//! Problem input capture: image uploads with cropping, freehand canvas drawings,
//! and typed text, normalized into a single `ProblemInput`.
//!
//! The three input forms are mutually exclusive. `InputCapture` is the state
//! machine enforcing that: entering one mode always discards the other two.

use crate::domain::{ImageBlob, ImageFormat, ProblemInput};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, Rgb, RgbImage};
use std::io::Cursor;

/// White padding added around a drawing before OCR.
pub const CANVAS_MARGIN: u32 = 20;
pub const DRAW_STROKE_WIDTH: f32 = 5.0;
pub const ERASE_STROKE_WIDTH: f32 = 25.0;
pub const MAX_CANVAS_SIDE: u32 = 4096;
pub const MAX_STROKE_WIDTH: f32 = 200.0;
pub const MAX_STROKES: usize = 2_000;
pub const MAX_STROKE_POINTS: usize = 10_000;
/// Upper bound on interpolation steps plus pixel visits for one rasterization.
const MAX_PAINT_WORK: u64 = 50_000_000;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
/// Per-channel difference under which two pixels count as the same colour.
const BLANK_TOLERANCE: u8 = 8;

const EMPTY_CANVAS_MESSAGE: &str = "The canvas is empty. Please draw an equation.";
const EMPTY_UPLOAD_MESSAGE: &str = "Could not find any text in the selected area.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidInputError {
    #[error("No input provided. Please upload an image, draw, or type in a problem.")]
    NoInput,
    #[error("Provide only one of an image, a drawing, or a typed problem.")]
    AmbiguousInput,
    #[error("Unsupported image type '{0}'. Please upload a PNG or JPG file.")]
    UnsupportedImageType(String),
    #[error("The image could not be read: {0}")]
    MalformedImage(String),
    #[error("The selected crop area is empty.")]
    EmptyCrop,
    #[error("A crop area needs an uploaded image.")]
    CropWithoutImage,
    #[error("Invalid canvas: {0}")]
    InvalidCanvas(String),
    #[error("Nothing to solve: {0}")]
    NothingToSolve(String),
}

//=========================================================================================
// Image Blobs
//=========================================================================================

impl ImageBlob {
    /// Validates an uploaded file by its declared MIME type and by decoding it.
    pub fn from_upload(mime: &str, bytes: Vec<u8>) -> Result<Self, InvalidInputError> {
        let format = ImageFormat::from_mime(mime)
            .ok_or_else(|| InvalidInputError::UnsupportedImageType(mime.to_string()))?;
        let blob = Self { format, bytes };
        blob.decode()?;
        Ok(blob)
    }

    /// Parses a `data:<mime>;base64,<payload>` URI.
    pub fn from_data_uri(uri: &str) -> Result<Self, InvalidInputError> {
        let rest = uri
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| InvalidInputError::MalformedImage("not a data URI".to_string()))?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| InvalidInputError::MalformedImage("data URI has no payload".to_string()))?;
        let mime = meta.strip_suffix(";base64").ok_or_else(|| {
            InvalidInputError::MalformedImage("data URI must be base64 encoded".to_string())
        })?;
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| InvalidInputError::MalformedImage(e.to_string()))?;
        Self::from_upload(mime, bytes)
    }

    pub fn to_data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.format.mime_type(),
            STANDARD.encode(&self.bytes)
        )
    }

    fn decode(&self) -> Result<DynamicImage, InvalidInputError> {
        let format = match self.format {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        };
        image::load_from_memory_with_format(&self.bytes, format)
            .map_err(|e| InvalidInputError::MalformedImage(e.to_string()))
    }
}

fn encode_png(image: &DynamicImage) -> Result<ImageBlob, InvalidInputError> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, image::ImageFormat::Png)
        .map_err(|e| InvalidInputError::MalformedImage(e.to_string()))?;
    Ok(ImageBlob {
        format: ImageFormat::Png,
        bytes: cursor.into_inner(),
    })
}

/// True when every pixel is within `BLANK_TOLERANCE` of the first one.
fn is_blank(image: &DynamicImage) -> bool {
    let rgb = image.to_rgb8();
    let Some(first) = rgb.pixels().next().copied() else {
        return true;
    };
    rgb.pixels().all(|p| {
        p.0.iter()
            .zip(first.0.iter())
            .all(|(a, b)| a.abs_diff(*b) <= BLANK_TOLERANCE)
    })
}

//=========================================================================================
// Cropping
//=========================================================================================

/// A crop rectangle in the image's natural pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Crops an image (clamped to its bounds) and re-encodes it as PNG.
pub fn crop_image(image: &ImageBlob, crop: CropRect) -> Result<ImageBlob, InvalidInputError> {
    let decoded = image.decode()?;
    let x = crop.x.min(decoded.width());
    let y = crop.y.min(decoded.height());
    let width = crop.width.min(decoded.width() - x);
    let height = crop.height.min(decoded.height() - y);
    if width == 0 || height == 0 {
        return Err(InvalidInputError::EmptyCrop);
    }
    encode_png(&decoded.crop_imm(x, y, width, height))
}

//=========================================================================================
// Canvas Drawing
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokeMode {
    Draw,
    Erase,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// One pointer-down to pointer-up gesture.
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub mode: StrokeMode,
    /// Pen colour; ignored when erasing.
    pub color: [u8; 3],
    /// Line width in pixels; mode default when `None`.
    pub width: Option<f32>,
    pub points: Vec<Point>,
}

impl Stroke {
    pub fn draw(points: Vec<Point>) -> Self {
        Self {
            mode: StrokeMode::Draw,
            color: BLACK.0,
            width: None,
            points,
        }
    }

    pub fn erase(points: Vec<Point>) -> Self {
        Self {
            mode: StrokeMode::Erase,
            color: WHITE.0,
            width: None,
            points,
        }
    }

    fn effective_width(&self) -> f32 {
        let default = match self.mode {
            StrokeMode::Draw => DRAW_STROKE_WIDTH,
            StrokeMode::Erase => ERASE_STROKE_WIDTH,
        };
        self.width
            .filter(|w| w.is_finite() && *w > 0.0)
            .map_or(default, |w| w.min(MAX_STROKE_WIDTH))
    }

    fn effective_color(&self) -> Rgb<u8> {
        match self.mode {
            StrokeMode::Draw => Rgb(self.color),
            StrokeMode::Erase => WHITE,
        }
    }
}

/// Parses `#rrggbb` (the `#` is optional).
pub fn parse_hex_color(value: &str) -> Result<[u8; 3], InvalidInputError> {
    let hex = value.trim().trim_start_matches('#');
    let invalid = || InvalidInputError::InvalidCanvas(format!("invalid colour '{}'", value));
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(invalid());
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

/// A freehand drawing surface, kept as strokes and rasterized on submit.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasDrawing {
    width: u32,
    height: u32,
    strokes: Vec<Stroke>,
}

impl CanvasDrawing {
    pub fn new(width: u32, height: u32) -> Result<Self, InvalidInputError> {
        if width == 0 || height == 0 || width > MAX_CANVAS_SIDE || height > MAX_CANVAS_SIDE {
            return Err(InvalidInputError::InvalidCanvas(format!(
                "canvas size {}x{} must be between 1 and {} pixels per side",
                width, height, MAX_CANVAS_SIDE
            )));
        }
        Ok(Self {
            width,
            height,
            strokes: Vec::new(),
        })
    }

    pub fn push_stroke(&mut self, stroke: Stroke) -> Result<(), InvalidInputError> {
        if stroke.points.is_empty() {
            return Ok(());
        }
        if stroke.points.len() > MAX_STROKE_POINTS {
            return Err(InvalidInputError::InvalidCanvas(format!(
                "a stroke may have at most {} points",
                MAX_STROKE_POINTS
            )));
        }
        if stroke.points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(InvalidInputError::InvalidCanvas(
                "stroke coordinates must be finite".to_string(),
            ));
        }
        if self.strokes.len() >= MAX_STROKES {
            return Err(InvalidInputError::InvalidCanvas(format!(
                "a drawing may have at most {} strokes",
                MAX_STROKES
            )));
        }
        self.strokes.push(stroke);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.strokes.clear();
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    /// Renders the strokes onto white, adds the margin, and encodes as PNG.
    pub fn rasterize(&self) -> Result<ImageBlob, InvalidInputError> {
        let mut surface = RgbImage::from_pixel(self.width, self.height, WHITE);
        let mut budget = MAX_PAINT_WORK;
        for stroke in &self.strokes {
            paint_stroke(&mut surface, stroke, &mut budget)?;
        }
        let surface = DynamicImage::ImageRgb8(surface);
        if is_blank(&surface) {
            return Err(InvalidInputError::NothingToSolve(EMPTY_CANVAS_MESSAGE.to_string()));
        }

        let mut padded = RgbImage::from_pixel(
            self.width + CANVAS_MARGIN * 2,
            self.height + CANVAS_MARGIN * 2,
            WHITE,
        );
        image::imageops::overlay(
            &mut padded,
            &surface.to_rgb8(),
            i64::from(CANVAS_MARGIN),
            i64::from(CANVAS_MARGIN),
        );
        encode_png(&DynamicImage::ImageRgb8(padded))
    }
}

fn too_complex() -> InvalidInputError {
    InvalidInputError::InvalidCanvas("the drawing is too complex to render".to_string())
}

fn charge(budget: &mut u64, cost: u64) -> Result<(), InvalidInputError> {
    *budget = budget.checked_sub(cost).ok_or_else(too_complex)?;
    Ok(())
}

fn paint_stroke(
    surface: &mut RgbImage,
    stroke: &Stroke,
    budget: &mut u64,
) -> Result<(), InvalidInputError> {
    let radius = stroke.effective_width() / 2.0;
    let color = stroke.effective_color();
    let spacing = (radius / 2.0).max(0.5);
    // Anything further out than this cannot touch a pixel.
    let bounds = (
        -radius,
        -radius,
        surface.width() as f32 + radius,
        surface.height() as f32 + radius,
    );

    let mut previous: Option<Point> = None;
    for point in &stroke.points {
        match previous {
            None => stamp_disc(surface, *point, radius, color, budget)?,
            Some(prev) => {
                if let Some((from, to)) = clip_segment(prev, *point, bounds) {
                    let (dx, dy) = (to.x - from.x, to.y - from.y);
                    let steps = ((dx * dx + dy * dy).sqrt() / spacing).ceil().max(1.0) as u64;
                    charge(budget, steps)?;
                    for i in 1..=steps {
                        let t = i as f32 / steps as f32;
                        let p = Point {
                            x: from.x + dx * t,
                            y: from.y + dy * t,
                        };
                        stamp_disc(surface, p, radius, color, budget)?;
                    }
                }
            }
        }
        previous = Some(*point);
    }
    Ok(())
}

/// Liang-Barsky clipping of the segment `a -> b` to `(min_x, min_y, max_x, max_y)`.
fn clip_segment(a: Point, b: Point, bounds: (f32, f32, f32, f32)) -> Option<(Point, Point)> {
    let (min_x, min_y, max_x, max_y) = (
        f64::from(bounds.0),
        f64::from(bounds.1),
        f64::from(bounds.2),
        f64::from(bounds.3),
    );
    let (ax, ay) = (f64::from(a.x), f64::from(a.y));
    let (dx, dy) = (f64::from(b.x) - ax, f64::from(b.y) - ay);
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    for (p, q) in [
        (-dx, ax - min_x),
        (dx, max_x - ax),
        (-dy, ay - min_y),
        (dy, max_y - ay),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return None;
        }
    }
    // Huge coordinates lose precision here; the true clipped point is inside the bounds.
    let at = |t: f64| Point {
        x: (ax + dx * t).clamp(min_x, max_x) as f32,
        y: (ay + dy * t).clamp(min_y, max_y) as f32,
    };
    Some((at(t0), at(t1)))
}

fn stamp_disc(
    surface: &mut RgbImage,
    center: Point,
    radius: f32,
    color: Rgb<u8>,
    budget: &mut u64,
) -> Result<(), InvalidInputError> {
    let (width, height) = (surface.width() as f32, surface.height() as f32);
    let x0 = (center.x - radius).floor().max(0.0);
    let x1 = (center.x + radius).ceil().min(width - 1.0);
    let y0 = (center.y - radius).floor().max(0.0);
    let y1 = (center.y + radius).ceil().min(height - 1.0);
    if x0 > x1 || y0 > y1 {
        return Ok(());
    }
    charge(budget, ((x1 - x0 + 1.0) * (y1 - y0 + 1.0)) as u64)?;
    let r2 = radius * radius;
    for y in (y0 as u32)..=(y1 as u32) {
        for x in (x0 as u32)..=(x1 as u32) {
            let (px, py) = (x as f32 - center.x, y as f32 - center.y);
            if px * px + py * py <= r2 {
                surface.put_pixel(x, y, color);
            }
        }
    }
    Ok(())
}

//=========================================================================================
// Input Capture State Machine
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub enum InputMode {
    #[default]
    Empty,
    Uploading {
        image: ImageBlob,
        crop: Option<CropRect>,
    },
    Drawing(CanvasDrawing),
    Typing(String),
}

impl InputMode {
    pub fn name(&self) -> &'static str {
        match self {
            InputMode::Empty => "empty",
            InputMode::Uploading { .. } => "uploading",
            InputMode::Drawing(_) => "drawing",
            InputMode::Typing(_) => "typing",
        }
    }
}

/// Holds the one active input form of a session.
#[derive(Debug, Clone, Default)]
pub struct InputCapture {
    mode: InputMode,
}

impl InputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a capture from a request carrying at most one input form.
    ///
    /// A blank statement counts as absent.
    pub fn from_parts(
        statement: Option<String>,
        image: Option<ImageBlob>,
        crop: Option<CropRect>,
        drawing: Option<CanvasDrawing>,
    ) -> Result<Self, InvalidInputError> {
        let statement = statement.filter(|s| !s.trim().is_empty());
        let present = [statement.is_some(), image.is_some(), drawing.is_some()]
            .iter()
            .filter(|p| **p)
            .count();
        if present > 1 {
            return Err(InvalidInputError::AmbiguousInput);
        }
        if crop.is_some() && image.is_none() {
            return Err(InvalidInputError::CropWithoutImage);
        }

        let mut capture = Self::new();
        if let Some(text) = statement {
            capture.type_text(&text);
        } else if let Some(image) = image {
            capture.upload(image);
            if let Some(crop) = crop {
                capture.set_crop(crop)?;
            }
        } else if let Some(drawing) = drawing {
            capture.mode = InputMode::Drawing(drawing);
        }
        Ok(capture)
    }

    pub fn mode(&self) -> &InputMode {
        &self.mode
    }

    pub fn upload(&mut self, image: ImageBlob) {
        self.mode = InputMode::Uploading { image, crop: None };
    }

    pub fn set_crop(&mut self, new_crop: CropRect) -> Result<(), InvalidInputError> {
        match &mut self.mode {
            InputMode::Uploading { crop, .. } => {
                if new_crop.width == 0 || new_crop.height == 0 {
                    return Err(InvalidInputError::EmptyCrop);
                }
                *crop = Some(new_crop);
                Ok(())
            }
            _ => Err(InvalidInputError::CropWithoutImage),
        }
    }

    pub fn begin_drawing(&mut self, width: u32, height: u32) -> Result<(), InvalidInputError> {
        self.mode = InputMode::Drawing(CanvasDrawing::new(width, height)?);
        Ok(())
    }

    pub fn add_stroke(&mut self, stroke: Stroke) -> Result<(), InvalidInputError> {
        match &mut self.mode {
            InputMode::Drawing(canvas) => canvas.push_stroke(stroke),
            _ => Err(InvalidInputError::InvalidCanvas(
                "start a drawing before adding strokes".to_string(),
            )),
        }
    }

    /// Wipes the strokes but stays in drawing mode.
    pub fn clear_canvas(&mut self) {
        if let InputMode::Drawing(canvas) = &mut self.mode {
            canvas.clear();
        }
    }

    /// Typing anything switches to typing mode; erasing all text leaves it.
    pub fn type_text(&mut self, text: &str) {
        if !text.is_empty() {
            self.mode = InputMode::Typing(text.to_string());
        } else if matches!(self.mode, InputMode::Typing(_)) {
            self.mode = InputMode::Empty;
        }
    }

    pub fn clear(&mut self) {
        self.mode = InputMode::Empty;
    }

    /// Produces the pipeline input for the active form.
    pub fn normalize(&self) -> Result<ProblemInput, InvalidInputError> {
        match &self.mode {
            InputMode::Empty => Err(InvalidInputError::NoInput),
            InputMode::Typing(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    Err(InvalidInputError::NoInput)
                } else {
                    Ok(ProblemInput::Text(trimmed.to_string()))
                }
            }
            InputMode::Uploading { image, crop } => {
                let image = match crop {
                    Some(crop) => crop_image(image, *crop)?,
                    None => image.clone(),
                };
                if is_blank(&image.decode()?) {
                    return Err(InvalidInputError::NothingToSolve(
                        EMPTY_UPLOAD_MESSAGE.to_string(),
                    ));
                }
                Ok(ProblemInput::Image(image))
            }
            InputMode::Drawing(canvas) => Ok(ProblemInput::Image(canvas.rasterize()?)),
        }
    }
}
