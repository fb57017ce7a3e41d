use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use crate::models::geometry::Rect;
use crate::models::ocr::CodeType;

/// zbarimg exit status when the image was scanned but held no symbols.
const ZBAR_EXIT_NO_SYMBOLS: i32 = 4;

/// A decoded symbol in pixel coordinates, before page normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedSymbol {
    pub symbology: String,
    pub content: String,
    pub bounds: Rect,
}

impl DetectedSymbol {
    pub fn code_type(&self) -> CodeType {
        code_type_for(&self.symbology)
    }
}

/// Locates and decodes barcodes and QR codes in an image on disk.
#[async_trait]
pub trait CodeDetector: Send + Sync {
    async fn detect(&self, image_path: &Path) -> Result<Vec<DetectedSymbol>, CodeDetectionError>;
}

/// Runs the zbar command line scanner with XML output.
pub struct ZbarDetector {
    binary: PathBuf,
}

impl ZbarDetector {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl CodeDetector for ZbarDetector {
    async fn detect(&self, image_path: &Path) -> Result<Vec<DetectedSymbol>, CodeDetectionError> {
        let output = Command::new(&self.binary)
            .arg("--quiet")
            .arg("--xml")
            .arg(image_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(CodeDetectionError::Spawn)?;

        match output.status.code() {
            Some(0) => {}
            Some(ZBAR_EXIT_NO_SYMBOLS) => return Ok(Vec::new()),
            status => {
                return Err(CodeDetectionError::Exited {
                    status,
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                })
            }
        }

        Ok(parse_zbar_xml(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse zbarimg `--xml` output. Symbols without a polygon are dropped.
pub fn parse_zbar_xml(xml: &str) -> Vec<DetectedSymbol> {
    static SYMBOL: OnceLock<Regex> = OnceLock::new();
    static TYPE_ATTR: OnceLock<Regex> = OnceLock::new();
    static POLYGON: OnceLock<Regex> = OnceLock::new();
    static DATA: OnceLock<Regex> = OnceLock::new();

    let symbol_re =
        SYMBOL.get_or_init(|| Regex::new(r"(?s)<symbol\b([^>]*)>(.*?)</symbol>").expect("valid regex"));
    let type_re =
        TYPE_ATTR.get_or_init(|| Regex::new(r#"type=['"]([^'"]+)['"]"#).expect("valid regex"));
    let polygon_re = POLYGON
        .get_or_init(|| Regex::new(r#"<polygon\s+points=['"]([^'"]*)['"]"#).expect("valid regex"));
    let data_re = DATA.get_or_init(|| {
        Regex::new(r"(?s)<data[^>]*>(?:<!\[CDATA\[(.*?)\]\]>|([^<]*))</data>").expect("valid regex")
    });

    let mut symbols = Vec::new();
    for caps in symbol_re.captures_iter(xml) {
        let attrs = &caps[1];
        let body = &caps[2];

        let symbology = type_re
            .captures(attrs)
            .map(|c| c[1].to_string())
            .unwrap_or_default();

        let Some(bounds) = polygon_re
            .captures(body)
            .and_then(|c| Rect::bounding(&parse_points(&c[1])))
        else {
            tracing::debug!(symbology = %symbology, "Skipping code symbol without geometry");
            continue;
        };

        let content = data_re
            .captures(body)
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        symbols.push(DetectedSymbol {
            symbology,
            content,
            bounds,
        });
    }
    symbols
}

fn parse_points(raw: &str) -> Vec<(f64, f64)> {
    raw.split_whitespace()
        .filter_map(|pair| {
            let (x, y) = pair.split_once(',')?;
            let x = x.trim_start_matches('+').parse().ok()?;
            let y = y.trim_start_matches('+').parse().ok()?;
            Some((x, y))
        })
        .collect()
}

/// Map a zbar symbology name onto the result's code family.
pub fn code_type_for(symbology: &str) -> CodeType {
    match symbology.to_ascii_uppercase().as_str() {
        "QR-CODE" | "QRCODE" | "QR_CODE" => CodeType::QrCode,
        "EAN-2" | "EAN-5" | "EAN-8" | "EAN-13" | "UPC-A" | "UPC-E" | "ISBN-10" | "ISBN-13"
        | "I2/5" | "DATABAR" | "DATABAR-EXP" | "CODABAR" | "CODE-39" | "CODE-93"
        | "CODE-128" => CodeType::BarCode,
        _ => CodeType::Other,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodeDetectionError {
    #[error("Failed to start code detector: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Code detector exited with status {status:?}: {stderr}")]
    Exited { status: Option<i32>, stderr: String },
}
