use thiserror::Error;

#[derive(Error, Debug)]
pub enum GranuleError {
    #[error("filename does not match the processed granule pattern: {0}")]
    Pattern(String),
    #[error("order {0} failed: {1}")]
    OrderFailed(String, String),
}
