//! User-facing failure categories.
//!
//! Providers rarely return structured error codes, so classification is a
//! heuristic: [`classify_status`] when an HTTP status is at hand, otherwise
//! [`classify`] over the lowercased error text.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    RateLimited,
    Authentication,
    Timeout,
    ContentPolicy,
    Unknown,
}

impl ErrorCategory {
    /// Message shown to the Discord user.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCategory::RateLimited => {
                "\u{231b} Rate limit reached. The bot will try again in a few minutes."
            }
            ErrorCategory::Authentication => {
                "\u{1f511} API Key Error: Please check the image provider credentials."
            }
            ErrorCategory::Timeout => "\u{23f1}\u{fe0f} Request timed out. The bot will try again shortly.",
            ErrorCategory::ContentPolicy => {
                "\u{26a0}\u{fe0f} Content Policy Alert: The content couldn't be generated. Try rewording the prompt or avoiding sensitive topics."
            }
            ErrorCategory::Unknown => {
                "\u{274c} Unexpected error while generating the poster. Details were logged; please report this if it persists."
            }
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::ContentPolicy => "content_policy",
            ErrorCategory::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Classify from an HTTP status. `None` means the status carries no signal.
pub fn classify_status(status: u16) -> Option<ErrorCategory> {
    match status {
        429 => Some(ErrorCategory::RateLimited),
        401 | 403 => Some(ErrorCategory::Authentication),
        408 | 504 => Some(ErrorCategory::Timeout),
        _ => None,
    }
}

/// Classify from free-form error text.
pub fn classify(error_text: &str) -> ErrorCategory {
    let text = error_text.to_lowercase();
    if text.contains("rate limit") || text.contains("429") {
        ErrorCategory::RateLimited
    } else if text.contains("api key") || text.contains("authentication") {
        ErrorCategory::Authentication
    } else if text.contains("timeout") || text.contains("timed out") {
        ErrorCategory::Timeout
    } else if text.contains("invalid_request_error")
        || text.contains("content policy")
        || text.contains("safety")
        || text.contains("nsfw")
    {
        ErrorCategory::ContentPolicy
    } else {
        ErrorCategory::Unknown
    }
}
