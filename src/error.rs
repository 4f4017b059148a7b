#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("Invalid style document: {0}")]
    InvalidStyle(String),
    #[error("Layer not found: {0}")]
    LayerNotFound(String),
    #[error("Image encoding failed: {0}")]
    ImageEncoding(#[from] image::ImageError),
}
