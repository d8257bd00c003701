#![forbid(unsafe_code)]

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config file: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("no unprivileged user configured")]
    MissingUser,

    #[error("duplicate host name: {0}")]
    DuplicateHost(String),

    #[error("host {0} has an empty address")]
    EmptyAddress(String),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}
