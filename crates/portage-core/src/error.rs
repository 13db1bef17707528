// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Message the API server attaches to optimistic-concurrency conflicts
pub const REAPPLY_LATEST_VERSION_MSG: &str =
    "please apply your changes to the latest version and try again";

/// Message the API server returns when a Service node/cluster port is taken
pub const PORT_ALLOCATED_MSG: &str = "provided port is already allocated";

/// Core error type for cluster API operations
#[derive(Error, Debug, Diagnostic)]
pub enum PortageError {
    /// Resource not found
    #[error("Resource not found: {resource_key}")]
    #[diagnostic(
        code(portage::resource_not_found),
        help("Verify the resource name, namespace, and API version are correct")
    )]
    ResourceNotFound {
        #[allow(unused)]
        resource_key: String,
    },

    /// Resource already exists
    #[error("Resource already exists: {resource_key}")]
    #[diagnostic(
        code(portage::resource_already_exists),
        help("Update the existing resource instead, or delete it first")
    )]
    ResourceAlreadyExists {
        #[allow(unused)]
        resource_key: String,
    },

    /// Conflict detected (concurrent modification)
    #[error("Operation cannot be fulfilled on {resource_key}: {message}")]
    #[diagnostic(
        code(portage::conflict),
        help("The object was modified concurrently. Re-read it and retry with the latest resourceVersion")
    )]
    Conflict {
        #[allow(unused)]
        resource_key: String,
        #[allow(unused)]
        message: String,
    },

    /// Request was rejected by authentication or authorization
    #[error("Unauthorized: {message}")]
    #[diagnostic(
        code(portage::unauthorized),
        help("Check the cluster-pair credentials. Tokens may have been rotated")
    )]
    Unauthorized {
        #[allow(unused)]
        message: String,
    },

    /// Service port already allocated on the cluster
    #[error("Port allocation conflict: {message}")]
    #[diagnostic(
        code(portage::port_allocated),
        help("Another Service on the cluster already holds the requested port")
    )]
    PortAllocated {
        #[allow(unused)]
        message: String,
    },

    /// Any other non-success API response
    #[error("API request failed with status {status}: {message}")]
    #[diagnostic(code(portage::api_error), help("Check the API server logs for details"))]
    ApiError {
        #[allow(unused)]
        status: u16,
        #[allow(unused)]
        message: String,
    },

    /// Invalid resource
    #[error("Invalid resource: {reason}")]
    #[diagnostic(code(portage::invalid_resource), help("{suggestion}"))]
    InvalidResource {
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(portage::serialization_error),
        help("Ensure the resource format is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(portage::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, PortageError>;

impl PortageError {
    /// Create a ResourceNotFound error
    pub fn resource_not_found(resource_key: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource_key: resource_key.into(),
        }
    }

    /// Create a ResourceAlreadyExists error
    pub fn resource_already_exists(resource_key: impl Into<String>) -> Self {
        Self::ResourceAlreadyExists {
            resource_key: resource_key.into(),
        }
    }

    /// Create a Conflict error carrying the standard reapply hint
    pub fn conflict(resource_key: impl Into<String>) -> Self {
        Self::Conflict {
            resource_key: resource_key.into(),
            message: format!("the object has been modified; {}", REAPPLY_LATEST_VERSION_MSG),
        }
    }

    /// Create an Unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create a PortAllocated error
    pub fn port_allocated(message: impl Into<String>) -> Self {
        Self::PortAllocated {
            message: message.into(),
        }
    }

    /// Create an ApiError
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Create an InvalidResource error
    pub fn invalid_resource(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidResource {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::ResourceAlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// True for explicit port conflicts and for API errors that carry the port message
    pub fn is_port_allocated(&self) -> bool {
        match self {
            Self::PortAllocated { .. } => true,
            Self::ApiError { message, .. } => message.contains(PORT_ALLOCATED_MSG),
            _ => false,
        }
    }
}
