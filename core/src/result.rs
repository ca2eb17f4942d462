//! The value delivered to a task's callback.

/// Prefix shared by every client-originated error code.
pub const SYS_ERROR_PREFIX: &str = "SYS_ERR:";
pub const ERROR_NETWORK: &str = "SYS_ERR:NETWORK";
pub const ERROR_INVALID_PARAM: &str = "SYS_ERR:INVALID_PARAM";
pub const ERROR_RESPONSE_FORMAT: &str = "SYS_ERR:RESPONSE_FORMAT";

/// True if `code` belongs to the reserved client-side namespace. Any other
/// non-empty code came from the remote server.
pub fn is_system_level_error(code: Option<&str>) -> bool {
    code.is_some_and(|c| c.starts_with(SYS_ERROR_PREFIX))
}

/// Outcome of one task execution.
///
/// Only the engine constructs results, so a successful result always carries
/// data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResult<T> {
    success: bool,
    data: Option<T>,
    error_code: Option<String>,
    error_message: Option<String>,
}

impl<T> ApiResult<T> {
    pub(crate) fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_code: None,
            error_message: None,
        }
    }

    pub(crate) fn failure(code: impl Into<String>, message: Option<String>) -> Self {
        Self {
            success: false,
            data: None,
            error_code: Some(code.into()),
            error_message: message,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn is_system_level_error(&self) -> bool {
        is_system_level_error(self.error_code.as_deref())
    }

    /// Always `Some` when [`is_success`](Self::is_success) is true.
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_carries_data() {
        let result = ApiResult::success(42);
        assert!(result.is_success());
        assert_eq!(result.data(), Some(&42));
        assert!(result.error_code().is_none());
        assert!(!result.is_system_level_error());
    }

    #[test]
    fn system_codes_are_classified_by_prefix() {
        for code in [ERROR_NETWORK, ERROR_INVALID_PARAM, ERROR_RESPONSE_FORMAT] {
            let result = ApiResult::<()>::failure(code, None);
            assert!(!result.is_success());
            assert!(result.is_system_level_error());
            assert!(result.is_system_level_error(), "classification must be repeatable");
        }
    }

    #[test]
    fn server_codes_are_not_system_level() {
        let result = ApiResult::<()>::failure("E1001", Some("quota exceeded".to_string()));
        assert!(!result.is_system_level_error());
        assert_eq!(result.error_message(), Some("quota exceeded"));
        assert!(!is_system_level_error(None));
        assert!(!is_system_level_error(Some("")));
        assert!(!is_system_level_error(Some("sys_err:lowercase")));
    }
}
