use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Interpolation failure: {0}")]
    Interpolation(String),

    #[error("Dependency cycle among operables: {0:?}")]
    DependencyCycle(Vec<String>),

    #[error("Evaluation failure: {0}")]
    Evaluation(String),

    #[error("Missing input '{0}' in operable graph")]
    MissingInput(String),

    #[error("Cannot convert between units '{from}' and '{to}'")]
    UnitMismatch { from: String, to: String },
}

pub type CoreResult<T> = Result<T, CoreError>;
