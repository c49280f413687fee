use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

#[derive(Error, Debug)]
pub enum StdError {
    #[error("JsonSerializationError: {0}")]
    JsonSerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("MetadataMissing: {0}")]
    MetadataMissing(String),

    /// A reconciler was wired up incorrectly. Never retried.
    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Canceled: {0}")]
    Canceled(String),

    #[error("TaskFailed: {0}")]
    TaskFailed(String),

    #[error("MetricsError: {0}")]
    MetricsError(#[source] prometheus::Error),

    #[error("{0}")]
    Aggregate(String),
}

impl StdError {
    pub fn metric_label(&self) -> String {
        let label = match self {
            StdError::JsonSerializationError(_) => "jsonserializationerror",
            StdError::KubeError(_) => "kubeerror",
            StdError::MetadataMissing(_) => "metadatamissing",
            StdError::InvalidArgument(_) => "invalidargument",
            StdError::Unsupported(_) => "unsupported",
            StdError::Canceled(_) => "canceled",
            StdError::TaskFailed(_) => "taskfailed",
            StdError::MetricsError(_) => "metricserror",
            StdError::Aggregate(_) => "aggregate",
        };
        label.to_string()
    }
}

#[derive(Error, Debug)]
pub struct ErrorWithRequeue {
    pub duration: Duration,
    pub error: StdError,
}

impl ErrorWithRequeue {
    pub fn new(error: StdError, duration: Duration) -> ErrorWithRequeue {
        ErrorWithRequeue { error, duration }
    }

    pub fn metric_label(&self) -> String {
        self.error.metric_label()
    }
}

impl fmt::Display for ErrorWithRequeue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Standard Error: {0}")]
    StdError(#[source] StdError),

    #[error("Error With Requeue: {0}")]
    ErrorWithRequeue(#[source] ErrorWithRequeue),
}

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::StdError(e) => e.metric_label(),
            Error::ErrorWithRequeue(e) => e.metric_label(),
        }
    }

    fn std_error(&self) -> &StdError {
        match self {
            Error::StdError(e) => e,
            Error::ErrorWithRequeue(e) => &e.error,
        }
    }

    fn api_code(&self) -> Option<u16> {
        match self.std_error() {
            StdError::KubeError(kube::Error::Api(response)) => Some(response.code),
            _ => None,
        }
    }

    /// The write lost an optimistic-concurrency race.
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// The API server asked the client to slow down.
    pub fn is_throttled(&self) -> bool {
        self.api_code() == Some(429)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self.std_error(), StdError::Canceled(_))
    }

    /// Errors caused by a programming mistake rather than the environment.
    pub fn is_permanent(&self) -> bool {
        matches!(self.std_error(), StdError::InvalidArgument(_))
    }

    /// Human readable cause, without the wrapping prefixes.
    pub fn message(&self) -> String {
        self.std_error().to_string()
    }

    /// Joins errors into one, messages separated by `:`.
    pub fn aggregate(errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.into_iter().next(),
            _ => {
                let message = errors.iter().map(Error::message).collect::<Vec<_>>().join(":");
                Some(Error::StdError(StdError::Aggregate(message)))
            }
        }
    }
}

impl From<StdError> for Error {
    fn from(error: StdError) -> Self {
        Error::StdError(error)
    }
}

pub fn kube_error(error: kube::Error) -> Error {
    Error::StdError(StdError::KubeError(error))
}

pub fn json_error(error: serde_json::Error) -> Error {
    Error::StdError(StdError::JsonSerializationError(error))
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> Error {
    kube_error(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} from test"),
        reason: reason.to_string(),
        code,
    }))
}
