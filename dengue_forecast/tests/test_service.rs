mod common;

use dengue_forecast::artifacts::new_artifact_id;
use dengue_forecast::models::FittedNetwork;
use dengue_forecast::{
    CommitDecision, ForecastError, ForecastService, FutureWeather, InMemoryCases, InMemoryWeather,
    LocationKey, PredictionRequest, Settings, TrainingRequest, UnitType,
};
use pretty_assertions::assert_eq;
use series_math::RegressionMetrics;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn settings(dir: &Path) -> Settings {
    Settings {
        model_dir: dir.to_path_buf(),
        hidden_units: 8,
        ..Settings::default()
    }
}

fn service(dir: &Path, weeks: usize) -> ForecastService<InMemoryWeather, InMemoryCases> {
    let (weather, cases) = common::region_stores(weeks);
    ForecastService::new(&settings(dir), weather, cases).unwrap()
}

fn quick_request() -> TrainingRequest {
    TrainingRequest {
        window_size: Some(5),
        epochs: Some(15),
        batch_size: Some(4),
        learning_rate: Some(0.01),
        ..TrainingRequest::default()
    }
}

fn prediction_request(n: usize) -> PredictionRequest {
    PredictionRequest {
        future_weather: (0..n)
            .map(|i| FutureWeather {
                rainfall: 40.0 + i as f64,
                max_temperature: 31.0,
                humidity: 72.0,
            })
            .collect(),
    }
}

fn file_count(dir: &Path) -> usize {
    fs::read_dir(dir).unwrap().count()
}

#[test]
fn test_predict_before_training() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), 30);

    let result = service.predict(&common::regional_unit(), &prediction_request(2));

    match result {
        Err(err) => {
            assert!(matches!(err, ForecastError::ModelNotFound(_)));
            assert_eq!(err.to_response()["error"], "model_not_found");
        }
        Ok(_) => panic!("prediction without a model must fail"),
    }
    assert_eq!(file_count(dir.path()), 0);
}

#[test]
fn test_train_then_predict() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), 30);
    let unit = common::regional_unit();

    let trained = service.train(&unit, &quick_request()).unwrap();

    assert!(trained.success);
    assert!(trained.training_completed);
    assert!(trained.model_committed);
    assert_eq!(trained.commit_reason, "New model trained successfully");
    assert_eq!(trained.location_key, "region_x");
    assert_eq!(trained.dataset_size, 30);
    assert_eq!(trained.window_size, 5);
    assert!(trained.epochs_completed <= 15);
    assert_eq!(trained.backup_info, None);
    assert_eq!(trained.previous_model_metrics, None);
    assert_eq!(file_count(dir.path()), 2);

    let forecast = service.predict(&unit, &prediction_request(3)).unwrap();

    assert_eq!(forecast.predictions.len(), 3);
    assert_eq!(forecast.metadata.window_size, 5);
    assert_eq!(forecast.metadata.prediction_generated_at.len(), 19);
    let last_week = common::weekly_series(30).last().unwrap().week_start;
    for (k, prediction) in forecast.predictions.iter().enumerate() {
        assert_eq!(prediction.date, last_week + chrono::Duration::weeks(k as i64 + 1));
        assert!(prediction.confidence_interval.lower <= prediction.predicted_cases);
        assert!(prediction.predicted_cases <= prediction.confidence_interval.upper);
    }
}

#[test]
fn test_retraining_backs_up_previous_model() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), 30);
    let unit = common::regional_unit();

    let first = service.train(&unit, &quick_request()).unwrap();
    let second = service.train(&unit, &quick_request()).unwrap();

    let backup = second.backup_info.unwrap();
    assert!(backup.model_backed_up);
    assert!(backup.backup_model_path.unwrap().exists());
    let previous = second.previous_model_metrics.unwrap();
    approx::assert_relative_eq!(previous.rmse, first.metrics.rmse, max_relative = 1e-12);
    approx::assert_relative_eq!(previous.r2, first.metrics.r2, epsilon = 1e-12);
    assert_eq!(service.list_backups(&unit).unwrap().len(), 1);
}

#[test]
fn test_rejecting_policy_keeps_committed_model() {
    let dir = TempDir::new().unwrap();
    let unit = common::regional_unit();
    let service = service(dir.path(), 30);
    service.train(&unit, &quick_request()).unwrap();
    let before = service.predict(&unit, &prediction_request(2)).unwrap();

    let picky = service.with_policy(|_: &RegressionMetrics, _: Option<&RegressionMetrics>| {
        CommitDecision::reject("never replace")
    });
    let request = TrainingRequest {
        window_size: Some(6),
        ..quick_request()
    };
    let response = picky.train(&unit, &request).unwrap();

    assert!(!response.model_committed);
    assert_eq!(response.commit_reason, "never replace");
    let after = picky.predict(&unit, &prediction_request(2)).unwrap();
    assert_eq!(after.metadata.window_size, 5);
    assert_eq!(after.predictions, before.predictions);
    assert!(fs::read_dir(dir.path())
        .unwrap()
        .all(|e| !e.unwrap().file_name().to_string_lossy().starts_with("temp_")));
}

#[test]
fn test_rollback_restores_backup() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), 30);
    let unit = common::regional_unit();
    service.train(&unit, &quick_request()).unwrap();
    service
        .train(
            &unit,
            &TrainingRequest {
                window_size: Some(7),
                ..quick_request()
            },
        )
        .unwrap();

    let restored = service.rollback(&unit, None).unwrap();

    assert!(restored.model_path.exists());
    let forecast = service.predict(&unit, &prediction_request(1)).unwrap();
    assert_eq!(forecast.metadata.window_size, 5);
}

#[test]
fn test_rollback_can_be_rolled_back() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), 30);
    let unit = common::regional_unit();
    service.train(&unit, &quick_request()).unwrap();
    let wider = TrainingRequest {
        window_size: Some(6),
        ..quick_request()
    };
    service.train(&unit, &wider).unwrap();

    service.rollback(&unit, None).unwrap();
    let after_first = service.predict(&unit, &prediction_request(1)).unwrap();
    service.rollback(&unit, None).unwrap();
    let after_second = service.predict(&unit, &prediction_request(1)).unwrap();

    assert_eq!(after_first.metadata.window_size, 5);
    assert_eq!(after_second.metadata.window_size, 6);
    assert_eq!(service.list_backups(&unit).unwrap().len(), 3);
}

#[test]
fn test_insufficient_request_leaves_existing_model_alone() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), 12);
    let unit = common::regional_unit();
    service.train(&unit, &quick_request()).unwrap();
    assert_eq!(file_count(dir.path()), 2);

    let too_wide = TrainingRequest {
        window_size: Some(12),
        ..quick_request()
    };
    let result = service.train(&unit, &too_wide);

    assert!(matches!(result, Err(ForecastError::InsufficientData(_))));
    assert_eq!(file_count(dir.path()), 2);
    assert!(service.list_backups(&unit).unwrap().is_empty());
}

#[test]
fn test_predict_recovers_from_interrupted_commit() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), 30);
    let unit = common::regional_unit();
    service.train(&unit, &quick_request()).unwrap();
    let before = service.predict(&unit, &prediction_request(2)).unwrap();

    let store = service.store();
    let key = LocationKey::from_name(common::REGION).unwrap();
    let paths = store.committed_paths(&key);
    let committed = store.load::<FittedNetwork>(&key).unwrap();
    let mut newer = committed.metadata.clone();
    newer.artifact_id = new_artifact_id(&key);
    // Leave the new model next to the old metadata, as a crash between
    // the two commit renames would
    fs::copy(&paths.model, &paths.rollback).unwrap();
    let temp = store.stage(&key, &committed.model, &newer).unwrap();
    fs::rename(temp.model_path(), &paths.model).unwrap();
    drop(temp);

    let after = service.predict(&unit, &prediction_request(2)).unwrap();

    assert_eq!(after.predictions, before.predictions);
    assert!(!paths.rollback.exists());
    assert_eq!(
        store.load::<FittedNetwork>(&key).unwrap().metadata.artifact_id,
        committed.metadata.artifact_id
    );
}

#[test]
fn test_insufficient_history_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), 5);

    let result = service.train(&common::regional_unit(), &quick_request());

    assert!(matches!(result, Err(ForecastError::InsufficientData(_))));
    assert_eq!(file_count(dir.path()), 0);
}

#[test]
fn test_invalid_request_is_rejected_before_work() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), 30);
    let request = TrainingRequest {
        window_size: Some(2),
        ..TrainingRequest::default()
    };

    assert!(matches!(
        service.train(&common::regional_unit(), &request),
        Err(ForecastError::Validation(_))
    ));
    assert!(matches!(
        service.predict(&common::regional_unit(), &PredictionRequest::default()),
        Err(ForecastError::Validation(_))
    ));
}

#[test]
fn test_non_finite_weather_is_rejected() {
    let mut request = prediction_request(2);
    request.future_weather[1].humidity = f64::NAN;

    assert!(matches!(request.validate(), Err(ForecastError::Validation(_))));
}

#[test]
fn test_national_scope_is_unsupported() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), 30);
    let mut unit = common::regional_unit();
    unit.unit_type = UnitType::National;

    assert!(matches!(
        service.train(&unit, &quick_request()),
        Err(ForecastError::Unsupported(_))
    ));
}

#[test]
fn test_unknown_region_has_no_data() {
    let dir = TempDir::new().unwrap();
    let service = service(dir.path(), 30);
    let mut unit = common::regional_unit();
    unit.region = "Region Z".to_string();

    assert!(matches!(
        service.train(&unit, &quick_request()),
        Err(ForecastError::DataUnavailable(_))
    ));
}

#[test]
fn test_service_is_shareable_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ForecastService<InMemoryWeather, InMemoryCases>>();
}
