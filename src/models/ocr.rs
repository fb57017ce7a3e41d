use serde::{Deserialize, Serialize};
use strum::Display;

use crate::models::geometry::Rect;

/// Pixel dimensions of the page used as the normalization denominator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageSize {
    pub width: u32,
    pub height: u32,
}

impl PageSize {
    pub fn new(width: u32, height: u32) -> Option<Self> {
        (width > 0 && height > 0).then_some(Self { width, height })
    }
}

/// A recognized word in normalized page coordinates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Word {
    pub id: String,
    #[serde(flatten)]
    pub bounds: Rect,
    /// Always within `[top, top + height]`.
    pub baseline: f64,
    pub text: String,
    pub confidence: f64,
}

/// Symbology family of a decoded code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CodeType {
    QrCode,
    BarCode,
    Other,
}

/// A decoded barcode or QR code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Code {
    pub id: String,
    #[serde(flatten)]
    pub bounds: Rect,
    pub content: String,
    #[serde(rename = "type")]
    pub code_type: CodeType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OcrResult {
    pub words: Vec<Word>,
    pub codes: Vec<Code>,
}
