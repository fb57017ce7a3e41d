pub mod geometry;
pub mod job;
pub mod ocr;
pub mod submission;
