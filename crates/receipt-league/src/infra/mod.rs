pub mod db;
pub mod images;
pub mod ocr;

// Mock implementations only available with e2e-testing feature or debug builds
#[cfg(any(feature = "e2e-testing", debug_assertions))]
pub mod ocr_mock;

pub use images::{create_folder, FileImageStore, ImageStore};
pub use ocr::{ReceiptReader, ReceiptReading, VisionClient};
