//! Error handling foundation for the nodeweave platform.
//!
//! Only the `Result` alias lives here. Each crate owns its domain error
//! enums; bootstrap code wraps them in a rootcause `Report` so failures
//! carry the layer that produced them.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Boom;

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "boom")
        }
    }

    impl std::error::Error for Boom {}

    fn fails() -> Result<(), Boom> {
        Err(Boom.into())
    }

    #[test]
    fn result_type_works() {
        let ok: Result<i32> = Ok(42);
        assert_eq!(ok.expect("should be ok"), 42);
    }

    #[test]
    fn report_carries_context_message() {
        let err = fails().unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
