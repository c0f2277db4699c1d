use crate::models::{AcademicStatus, StatusFlags};

pub fn classify(status: Option<&AcademicStatus>) -> StatusFlags {
    let is_dropout = matches!(status, Some(AcademicStatus::Cancelled));
    let is_failure = matches!(status, Some(AcademicStatus::Failed));

    StatusFlags {
        is_dropout,
        is_failure,
        is_dropout_or_failure: is_dropout || is_failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_dropout_only() {
        let flags = classify(Some(&AcademicStatus::Cancelled));
        assert!(flags.is_dropout);
        assert!(!flags.is_failure);
        assert!(flags.is_dropout_or_failure);
    }

    #[test]
    fn failed_is_failure_only() {
        let flags = classify(Some(&AcademicStatus::Failed));
        assert!(!flags.is_dropout);
        assert!(flags.is_failure);
        assert!(flags.is_dropout_or_failure);
    }

    #[test]
    fn other_and_missing_statuses_raise_nothing() {
        for status in [
            None,
            Some(AcademicStatus::Passed),
            Some(AcademicStatus::Enrolled),
            Some(AcademicStatus::Other("Retirado".to_string())),
        ] {
            assert_eq!(classify(status.as_ref()), StatusFlags::default());
        }
    }
}
