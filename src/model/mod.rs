use thiserror::Error;

pub mod recipes;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error reading descriptor toml: {0}")]
    IO(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Missing TOML key `{0}` while parsing")]
    MissingKey(String),
    #[error("Invalid value for TOML key `{key}`: {reason}")]
    InvalidKey { key: String, reason: String },
    #[error("Invalid protocol: {0}")]
    InvalidProtocol(String),
    #[error("Missing url component `{0}` in string `{1}`")]
    MissingUrlComponent(String, String),
    #[error("Path override `{0}` must be a relative path")]
    AbsolutePathOverride(String),
    #[error("Unsupported closure file version: {0}")]
    UnsupportedClosureFileVersion(toml::Value),
    #[error("Closure file does not declare a version")]
    MissingClosureFileVersion,
}
