//! Tests for error types

use trueno_trials::worker::{WorkerError, EXIT_APPLICATION_ESCAPE, EXIT_SIGNAL_ESCAPE};
use trueno_trials::trial::TrialId;
use trueno_trials::Error;

#[test]
fn test_configuration_error() {
    let error = Error::Configuration("serialized code not valid: source is empty".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Configuration error"));
    assert!(error_str.contains("source is empty"));
}

#[test]
fn test_store_error() {
    let error = Error::Store("connection reset".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Store error"));
    assert!(error_str.contains("connection reset"));
}

#[test]
fn test_unknown_experiment_error() {
    let error = Error::UnknownExperiment("exp-7".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Unknown experiment: exp-7"));
    assert!(error_str.contains("Register a routine"));
}

#[test]
fn test_unknown_trial_error() {
    let error = Error::UnknownTrial(42);
    assert_eq!(format!("{error}"), "Unknown trial: 42");
}

#[test]
fn test_not_running_error() {
    let error = Error::NotRunning(9);
    let error_str = format!("{error}");
    assert!(error_str.contains("Trial 9 is not running"));
    assert!(error_str.contains("exactly once"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
    assert!(error_str.contains("file not found"));
}

#[test]
fn test_json_error_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = json_error.into();
    assert!(format!("{error}").contains("JSON error"));
}

#[test]
fn test_transient_classification() {
    assert!(Error::Store("x".to_string()).is_transient());
    assert!(Error::Io(std::io::Error::other("x")).is_transient());
    assert!(!Error::Configuration("x".to_string()).is_transient());
    assert!(!Error::UnknownExperiment("x".to_string()).is_transient());
    assert!(!Error::NotRunning(1).is_transient());
}

#[test]
fn test_error_debug_format() {
    let error = Error::UnknownTrial(3);
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("UnknownTrial"));
}

#[test]
fn test_worker_error_exit_codes() {
    let cases = [
        (
            WorkerError::Configuration(Error::Configuration("bad".to_string())),
            EXIT_APPLICATION_ESCAPE,
        ),
        (
            WorkerError::Store(Error::Store("down".to_string())),
            EXIT_APPLICATION_ESCAPE,
        ),
        (
            WorkerError::Application {
                trial_id: TrialId(1),
                diagnostic: "EXCEPTION: ...".to_string(),
            },
            EXIT_APPLICATION_ESCAPE,
        ),
        (
            WorkerError::Signal {
                trial_id: Some(TrialId(2)),
                diagnostic: "EXCEPTION: ...".to_string(),
            },
            EXIT_SIGNAL_ESCAPE,
        ),
    ];
    for (error, code) in cases {
        assert_eq!(error.exit_code(), code, "{error}");
    }
    assert_ne!(EXIT_APPLICATION_ESCAPE, EXIT_SIGNAL_ESCAPE);
}

#[test]
fn test_worker_error_wraps_transparently() {
    let error = WorkerError::Store(Error::UnknownExperiment("exp".to_string()));
    assert!(format!("{error}").starts_with("Unknown experiment: exp"));

    let error = WorkerError::Application {
        trial_id: TrialId(5),
        diagnostic: String::new(),
    };
    assert!(format!("{error}").contains("trial 5"));
}
