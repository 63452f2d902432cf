use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("'{0}' is not a correct N-V-R")]
    MalformedNvr(String),

    #[error("unrecognized {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, ModelError>;
