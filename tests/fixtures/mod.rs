//! Engine output fixtures for API tests

use docscan_ocr::models::geometry::Rect;
use docscan_ocr::services::codes::DetectedSymbol;

/// A 1000x1000 page: one line of two words reported right-to-left, a second
/// line below it, and a garbage word inside the QR code area.
pub const PAGE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t1000\t1000\t-1\t
2\t1\t1\t0\t0\t0\t100\t50\t500\t120\t-1\t
5\t1\t1\t1\t1\t1\t400\t52\t120\t20\t91.2\tInvoice
5\t1\t1\t1\t1\t2\t100\t50\t250\t20\t95.0\tWarehouse
5\t1\t1\t1\t2\t1\t100\t150\t80\t20\t88.0\tTotal
5\t1\t1\t1\t2\t2\t700\t720\t60\t20\t12.0\t#@%
";

pub fn qr_symbol() -> DetectedSymbol {
    DetectedSymbol {
        symbology: "QR-Code".to_string(),
        content: "https://example.com/invoice/42".to_string(),
        bounds: Rect::new(650.0, 650.0, 200.0, 200.0),
    }
}
