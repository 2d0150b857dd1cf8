use dengue_forecast::ForecastError;
use pretty_assertions::assert_eq;
use rstest::rstest;
use series_math::MathError;
use std::io;

#[rstest]
#[case(ForecastError::Validation("x".into()), "validation_error")]
#[case(ForecastError::DataUnavailable("x".into()), "data_unavailable")]
#[case(ForecastError::InsufficientData("x".into()), "insufficient_data")]
#[case(ForecastError::Math(MathError::InsufficientData("x".into())), "insufficient_data")]
#[case(ForecastError::Math(MathError::InvalidInput("x".into())), "math_error")]
#[case(ForecastError::ModelNotFound("x".into()), "model_not_found")]
#[case(ForecastError::MetadataNotFound("x".into()), "metadata_not_found")]
#[case(ForecastError::Unsupported("x".into()), "unsupported")]
fn test_error_kinds(#[case] error: ForecastError, #[case] kind: &str) {
    assert_eq!(error.kind(), kind);
}

#[test]
fn test_missing_model_asks_for_training() {
    let error = ForecastError::ModelNotFound("region_x".to_string());

    assert!(error.requires_training());
    assert!(error.to_string().contains("region_x"));
    assert!(error.user_message().contains("train the model first"));
}

#[test]
fn test_error_response_body() {
    let error = ForecastError::Validation("window_size must be between 5 and 20, got 3".to_string());

    assert_eq!(
        error.to_response(),
        serde_json::json!({
            "success": false,
            "error": "validation_error",
            "message": "Validation error: window_size must be between 5 and 20, got 3",
        })
    );
}

#[test]
fn test_artifact_io_keeps_stage_and_source() {
    let error = ForecastError::artifact_io(
        "commit",
        "/models/dengue_model_x.json",
        io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
    );

    assert_eq!(error.kind(), "artifact_io_error");
    assert!(!error.requires_training());
    let message = error.to_string();
    assert!(message.contains("commit"));
    assert!(message.contains("dengue_model_x.json"));
    assert!(std::error::Error::source(&error).is_some());
}

#[test]
fn test_math_errors_convert() {
    fn fails() -> dengue_forecast::Result<()> {
        Err(MathError::CalculationError("boom".to_string()))?;
        Ok(())
    }

    assert!(matches!(fails(), Err(ForecastError::Math(_))));
}
