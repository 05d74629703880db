//! Core data models, error taxonomy and checksums for parcel

pub mod checksum;
pub mod error;
pub mod types;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use checksum::{crc64, Crc64, CRC64_SEED};
pub use error::*;
pub use types::*;

/// Result type alias for parcel operations
pub type Result<T> = std::result::Result<T, ParcelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_accessors() {
        let session = UploadSession::new("photos", "2024/cat.jpg", "upload-1");
        assert_eq!(session.bucket(), "photos");
        assert_eq!(session.key(), "2024/cat.jpg");
        assert_eq!(session.upload_id(), "upload-1");
        assert_eq!(session.state(), SessionState::Active);
        assert!(session.ensure_active().is_ok());
    }

    #[test]
    fn test_session_terminates_once() {
        let session = UploadSession::new("photos", "cat.jpg", "upload-1");
        let clone = session.clone();

        assert_eq!(session.terminate(SessionState::Completed), SessionState::Active);
        assert_eq!(clone.state(), SessionState::Completed);

        // A later abort does not overwrite the completion
        assert_eq!(clone.terminate(SessionState::Aborted), SessionState::Completed);
        assert_eq!(session.state(), SessionState::Completed);

        let err = session.ensure_active().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClientInput);
    }

    #[test]
    fn test_empty_upload_id_is_invalid() {
        let session = UploadSession::new("photos", "cat.jpg", "");
        assert!(matches!(
            session.ensure_active(),
            Err(ParcelError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_uploaded_part() {
        let part = UploadedPart::new(2, "\"t2\"");
        assert_eq!(part.part_number, 2);
        assert_eq!(part.etag, "\"t2\"");
    }
}
