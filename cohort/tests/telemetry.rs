use std::fs;

use anyhow::Result;
use cohort::config::TelemetrySettings;
use cohort::telemetry::init_tracing;

#[test]
fn file_sink_receives_events() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let settings = TelemetrySettings {
        filter: "info".to_string(),
        json: true,
        log_dir: Some(dir.path().join("logs")),
    };
    let guard = init_tracing(&settings)?;
    assert!(guard.is_some());
    tracing::error!(form = "F1", "telemetry check");
    drop(guard);

    let entries: Vec<_> = fs::read_dir(dir.path().join("logs"))?.collect::<Result<_, _>>()?;
    assert_eq!(entries.len(), 1);
    let contents = fs::read_to_string(entries[0].path())?;
    assert!(contents.contains("telemetry check"));

    assert!(init_tracing(&TelemetrySettings::default()).is_err());
    Ok(())
}
