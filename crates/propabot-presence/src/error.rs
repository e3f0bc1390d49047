#[derive(Debug, thiserror::Error)]
pub enum PresenceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("presence API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("unexpected presence response: {0}")]
    Parse(String),
}
