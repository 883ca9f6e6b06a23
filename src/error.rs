use thiserror::Error;

#[derive(Error, Debug)]
pub enum SynthError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("column metadata error: {0}")]
    Catalog(String),

    #[error("database error: {0}")]
    Db(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("template store error: {0}")]
    TemplateStore(String),

    #[error("template generation error: {0}")]
    TemplateGeneration(String),

    #[error("invalid distribution spec: {0}")]
    InvalidDistribution(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, SynthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: SynthError = io_err.into();
        assert!(matches!(err, SynthError::Io(_)));
    }

    #[test]
    fn json_error_converts() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: SynthError = parse_err.into();
        assert!(matches!(err, SynthError::Json(_)));
    }
}
