use crate::exit_codes::ExitCode;

#[derive(Debug)]
pub enum RunError {
    InvalidInput(anyhow::Error),
    ScenarioError(anyhow::Error),
    RuntimeError(anyhow::Error),
}

impl RunError {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidInput(_) => ExitCode::InvalidInput,
            Self::ScenarioError(_) => ExitCode::ScenarioError,
            Self::RuntimeError(_) => ExitCode::RuntimeError,
        }
    }

    #[must_use]
    pub fn anyhow(&self) -> &anyhow::Error {
        match self {
            Self::InvalidInput(e) | Self::ScenarioError(e) | Self::RuntimeError(e) => e,
        }
    }
}

impl From<stampede_core::Error> for RunError {
    fn from(err: stampede_core::Error) -> Self {
        if err.is_config() {
            return Self::InvalidInput(err.into());
        }
        match err {
            stampede_core::Error::Setup(_) | stampede_core::Error::Teardown(_) => {
                Self::ScenarioError(err.into())
            }
            other => Self::RuntimeError(other.into()),
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(e) | Self::ScenarioError(e) | Self::RuntimeError(e) => {
                write!(f, "{e:#}")
            }
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.anyhow().as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_are_classified() {
        let err = RunError::from(stampede_core::Error::InvalidStages);
        assert_eq!(err.exit_code(), ExitCode::InvalidInput);

        let err = RunError::from(stampede_core::Error::Setup("no db".to_string()));
        assert_eq!(err.exit_code(), ExitCode::ScenarioError);
        assert_eq!(err.to_string(), "scenario setup failed: no db");
    }
}
