use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Raised when the user interrupts the run. Never recovered per asset.
    #[error("run cancelled")]
    Cancelled,
    #[error("price series has no usable bars")]
    EmptySeries,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("weights for {asset} reach row {row}, outside the cycle range {start}..{end}")]
    BufferOutOfRange {
        asset: String,
        row: usize,
        start: usize,
        end: usize,
    },
    #[error("unknown asset {0} in weights buffer")]
    UnknownAsset(String),
}
