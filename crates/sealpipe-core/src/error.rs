use thiserror::Error;

pub type SealpipeResult<T> = Result<T, SealpipeError>;

#[derive(Debug, Error)]
pub enum SealpipeError {
    #[error("config error: {0}")]
    Config(String),
}
