//! Core data models, credentials and signing for trailgraph

pub mod auth;
pub mod error;
pub mod types;

pub use error::*;
pub use types::*;

/// Result type alias for trailgraph operations
pub type Result<T> = std::result::Result<T, TrailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_parsing() {
        assert_eq!("42".parse::<UserId>().unwrap(), UserId::new(42));
        assert_eq!(" 7 ".parse::<UserId>().unwrap().as_u64(), 7);

        assert!("".parse::<UserId>().is_err());
        assert!("abc".parse::<UserId>().is_err());
        assert!("-1".parse::<UserId>().is_err());
    }

    #[test]
    fn test_auth_failures_are_one_class() {
        assert!(TrailError::Unauthenticated.is_auth_failure());
        assert!(TrailError::SignatureMismatch.is_auth_failure());
        assert!(TrailError::InvalidCredentials.is_auth_failure());
        assert!(!TrailError::StoreUnavailable("down".into()).is_auth_failure());
    }
}
