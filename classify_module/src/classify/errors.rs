#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("http error: {0}")]
    Http(String),
    #[error("classifier returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("classifier returned no candidate text")]
    EmptyResponse,
    #[error("response violates contract: {0}")]
    Contract(String),
}
