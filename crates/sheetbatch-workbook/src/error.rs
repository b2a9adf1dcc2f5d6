use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported workbook version {0}")]
    UnsupportedVersion(u32),
    #[error("duplicate sheet name '{0}'")]
    DuplicateSheet(String),
    #[error("invalid cell address '{address}' on sheet '{sheet}'")]
    InvalidAddress { sheet: String, address: String },
    #[error("invalid array area '{area}' for {sheet}!{address}")]
    InvalidArea {
        sheet: String,
        address: String,
        area: String,
    },
}
