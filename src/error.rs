use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Sheet '{sheet}' was not found in the workbook")]
    SheetNotFound { sheet: String },

    #[error("Workbook could not be read: {0}")]
    Workbook(#[from] calamine::XlsxError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MetricsError {
    /// Load failures abort the whole upload; the previous dataset stays active.
    pub fn is_load_failure(&self) -> bool {
        matches!(self, Self::SheetNotFound { .. } | Self::Workbook(_))
    }
}

pub type Result<T> = std::result::Result<T, MetricsError>;
