#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid JSON in {context}: {source}")]
    Json { context: &'static str, source: serde_json::Error },

    #[error("Unexpected start of stream line: {0:?}")]
    UnexpectedLine(String),

    #[error("Control message exceeds {max} bytes ({got})")]
    ControlMessageTooLarge { max: usize, got: usize },

    #[error("Control message is missing the `button` field required for click commands")]
    MissingButton,

    #[error("Empty module selector")]
    EmptyModuleSelector,
}

impl ProtocolError {
    pub fn json(context: &'static str, source: serde_json::Error) -> Self {
        ProtocolError::Json { context, source }
    }
}
