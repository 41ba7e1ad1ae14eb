use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("i/o error reading bytecode image: {0}")]
    Io(#[from] std::io::Error),

    #[error("bytecode image is truncated")]
    Truncated,

    #[error("bytecode image header is invalid: {0}")]
    HeaderInvalid(&'static str),
}
