pub mod cache;
pub mod db;
pub mod demo;
pub mod domain;
pub mod error;
pub mod overview;
pub mod repo;
pub mod secret;
pub mod status;
pub mod timestamps;
pub mod validate;

#[cfg(test)]
mod tests {
    use super::error::AppError;

    #[test]
    fn app_error_is_structured() {
        let err = AppError::new("DB_TEST", "db failed").with_retryable(true);
        assert_eq!(err.code, "DB_TEST");
        assert_eq!(err.message, "db failed");
        assert!(err.retryable);
        assert_eq!(err.to_string(), "[DB_TEST] db failed");
    }
}
