use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("embed: empty input")]
    EmptyInput,

    #[error("embed: model error: {0}")]
    Model(String),
}
