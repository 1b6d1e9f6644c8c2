//! Error types for the CPU advisor

use thiserror::Error;

/// Errors surfaced by the advisory loop and its helpers
#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("plugin socket {path} does not exist")]
    SocketMissing { path: String },

    #[error("failed to dial plugin at {path}: {source}")]
    Dial {
        path: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("get checkpoint failed: {0}")]
    GetCheckpoint(#[source] tonic::Status),

    #[error("got nil or empty checkpoint")]
    NilCheckpoint,

    #[error("advisor update failed: {0}")]
    Advice(#[source] anyhow::Error),

    #[error("unexpected advice type: {0}")]
    UnexpectedAdvice(String),

    #[error("failed to send response: stream closed")]
    Send,

    #[error("ListAndWatch is already running")]
    AlreadyRunning,

    #[error("invalid cpuset {input:?}: {reason}")]
    InvalidCpuSet { input: String, reason: String },

    #[error("pod {0} not found")]
    PodNotFound(String),
}

impl From<AdvisorError> for tonic::Status {
    fn from(err: AdvisorError) -> Self {
        match err {
            AdvisorError::AlreadyRunning => tonic::Status::already_exists(err.to_string()),
            AdvisorError::SocketMissing { .. } | AdvisorError::Dial { .. } => {
                tonic::Status::unavailable(err.to_string())
            }
            AdvisorError::PodNotFound(_) => tonic::Status::not_found(err.to_string()),
            AdvisorError::InvalidCpuSet { .. } => tonic::Status::invalid_argument(err.to_string()),
            _ => tonic::Status::internal(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AdvisorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_running_maps_to_already_exists() {
        let status: tonic::Status = AdvisorError::AlreadyRunning.into();
        assert_eq!(status.code(), tonic::Code::AlreadyExists);
    }

    #[test]
    fn test_socket_missing_maps_to_unavailable() {
        let status: tonic::Status = AdvisorError::SocketMissing {
            path: "/run/qrm.sock".to_string(),
        }
        .into();
        assert_eq!(status.code(), tonic::Code::Unavailable);
        assert!(status.message().contains("/run/qrm.sock"));
    }

    #[test]
    fn test_bad_cpuset_maps_to_invalid_argument() {
        let status: tonic::Status = "0-99999".parse::<crate::cpuset::CpuSet>().unwrap_err().into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().contains("0-99999"));
    }
}
