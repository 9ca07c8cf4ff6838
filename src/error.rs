#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0:#}")]
    Backend(anyhow::Error),
}

impl HandlerError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Backend(_) => 500,
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Backend(err)
    }
}

impl From<crate::data::AttributeError> for HandlerError {
    fn from(err: crate::data::AttributeError) -> Self {
        Self::Backend(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_message_keeps_the_cause() {
        let err = anyhow::anyhow!("connection reset").context("fail to scan restaurants");
        let err = HandlerError::from(err);
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.to_string(), "fail to scan restaurants: connection reset");
    }
}
