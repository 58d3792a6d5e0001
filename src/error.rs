use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
    #[display("missing credential: environment variable {variable} is not set")]
    MissingCredential { variable: String },
}

#[derive(Debug, Display, Error)]
pub enum DataFetchError {
    #[display("request to {provider} failed")]
    Request { provider: String },
    #[display("failed to parse response from {provider}")]
    ResponseParse { provider: String },
}

#[derive(Debug, Display, Error)]
pub enum AnalyticsError {
    #[display("invalid input: {reason}")]
    InvalidInput { reason: String },
    #[display("invalid parameter: {name}")]
    InvalidParameter { name: String },
}
