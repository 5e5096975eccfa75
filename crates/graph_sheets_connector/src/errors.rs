use reqwest::StatusCode;

/// HTTP statuses that are worth another attempt.
pub const RETRY_HTTP_CODES: [u16; 6] = [409, 429, 500, 502, 503, 504];

#[derive(Debug, thiserror::Error)]
pub enum SheetsError {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    UrlParse(String),

    /// A failed call that has not been through [`classify`] yet. The code and
    /// message come from the Graph error body when one was present.
    #[error("Request failed with status {status}: {code}: {message}")]
    Request {
        status: StatusCode,
        code: String,
        message: String,
    },

    #[error("Unexpected range address: \"{0}\"")]
    MalformedAddress(String),

    #[error("{0}")]
    EmptySheet(String),

    #[error("{0}")]
    ResourceNotFound(String),

    #[error("{0}")]
    AccessDenied(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotSupported(String),

    #[error("{0}")]
    GatewayTimeout(String),

    #[error("{0}")]
    InvalidFileType(String),

    #[error("Unexpected status \"{status}\" for request \"{id}\": {code}, {message}")]
    BatchItem {
        id: String,
        status: u16,
        code: String,
        message: String,
    },

    #[error("API response contains link to next page. It is not expected.")]
    UnexpectedPagination,

    #[error("{0}")]
    UnexpectedCount(String),

    #[error("{0}")]
    UnexpectedValue(String),

    #[error("{0}")]
    ShareLink(String),
}

impl SheetsError {
    /// Whether a failed call may succeed on a later attempt.
    ///
    /// Covers the retryable status set, the transient "communication or
    /// server problems" message, explicit gateway timeouts, and plain
    /// connect/timeout transport failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::GatewayTimeout(_) => true,
            Self::Request {
                status, message, ..
            } => {
                RETRY_HTTP_CODES.contains(&status.as_u16())
                    || message.contains("There were communication or server problems")
            }
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}

const WAC_TOKEN_ERROR: &str = "AccessDenied: Could not obtain a WAC access token.";

/// Map a raw failure to its semantic kind.
///
/// Runs after the retry policy has given up, so a transient status that
/// exhausted its attempts still surfaces with the right meaning (a persistent
/// 504 becomes [`SheetsError::GatewayTimeout`], not a raw status error).
pub fn classify(err: SheetsError) -> SheetsError {
    let SheetsError::Request {
        status,
        code,
        message,
    } = err
    else {
        return err;
    };

    let error = format!("{code}: {message}");
    if error == WAC_TOKEN_ERROR {
        return SheetsError::InvalidFileType(format!(
            "It looks like the specified file is not in the \"XLSX\" Excel format. \
             Error: \"{error}\""
        ));
    }
    if code.starts_with("AccessDenied")
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
    {
        return SheetsError::AccessDenied(error);
    }
    if code.starts_with("ItemNotFound") || status == StatusCode::NOT_FOUND {
        return SheetsError::ResourceNotFound("The resource could not be found.".to_string());
    }
    if code.starts_with("BadRequest") || status == StatusCode::BAD_REQUEST {
        return SheetsError::BadRequest(error);
    }
    if status == StatusCode::NOT_IMPLEMENTED {
        return SheetsError::NotSupported(error);
    }
    if status == StatusCode::GATEWAY_TIMEOUT {
        return SheetsError::GatewayTimeout(error);
    }

    SheetsError::Request {
        status,
        code,
        message,
    }
}

pub type Result<T, E = SheetsError> = std::result::Result<T, E>;
