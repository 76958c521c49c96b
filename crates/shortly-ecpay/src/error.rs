use thiserror::Error;

/// Errors returned by ECPay protocol operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcpayError {
    /// The supplied CheckMacValue does not match the recomputed one.
    /// Nothing else in the payload can be trusted.
    #[error("CheckMacValue mismatch")]
    MacMismatch,

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {value:?}")]
    InvalidField {
        field: &'static str,
        value: String,
    },
}
