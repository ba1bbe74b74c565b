use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataflowError {
    #[error("recursive instantiation of composite factory '{0}'")]
    Recursion(String),
    #[error("factory '{namespace}.{name}' not found in catalog")]
    Lookup { namespace: String, name: String },
    #[error("instantiation error: {0}")]
    Instantiation(String),
    #[error("port address error: {0}")]
    PortAddress(String),
    #[error("duplicate port name '{0}'")]
    DuplicatePort(String),
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),
    #[error("unknown node id '{0}'")]
    NodeNotFound(String),
    #[error("cycle detected: {0}")]
    Cycle(String),
    #[error("compute error: {0}")]
    Compute(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DataflowError {
    pub fn instantiation(msg: impl Into<String>) -> Self {
        DataflowError::Instantiation(msg.into())
    }

    pub fn port_address(msg: impl Into<String>) -> Self {
        DataflowError::PortAddress(msg.into())
    }

    pub fn compute(msg: impl Into<String>) -> Self {
        DataflowError::Compute(msg.into())
    }
}
