//! 資料進入產物儲存的兩條路徑：排程擷取與外部上傳
pub mod ingest;
pub mod loader;
pub mod upload;
pub mod validator;

pub use ingest::{IngestionItem, IngestionReport, IngestionRunner, ItemStatus};
pub use loader::{has_data, load_candles, years_between};
pub use upload::{UploadResponse, UploadService};
pub use validator::{UploadFormat, UploadRequest, UploadValidator, ValidatedUpload};
