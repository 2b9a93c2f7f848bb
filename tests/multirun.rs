//! Multirun sweeps through the job runner

mod fixtures;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use fixtures::{at, Workspace};
use plab_runner::config::CancelPolicy;
use plab_runner::summary::{FailureKind, RUN_SUMMARY_FILE};
use plab_runner::{
    parse_overrides, plan, CallbackError, CompositionError, EngineSettings, Error, ExitCode,
    JobContext, JobState, JobStateData, ResolvedConfig, RunSummary, Status,
};

fn settings(ws: &Workspace) -> EngineSettings {
    EngineSettings::build(&ws.primary().settings, &[], None).unwrap()
}

fn run(ws: &Workspace, overrides: &[&str], multirun: bool, callback: &dyn plab_runner::JobCallback) -> RunSummary {
    run_with(ws, overrides, multirun, settings(ws), callback)
}

fn run_with(
    ws: &Workspace,
    overrides: &[&str],
    multirun: bool,
    settings: EngineSettings,
    callback: &dyn plab_runner::JobCallback,
) -> RunSummary {
    let overrides = parse_overrides(overrides).unwrap();
    let plan = plan(&ws.store(), &ws.primary(), &overrides, multirun).unwrap();
    ws.runner(settings, at(10, 0, 0)).run(plan, callback).unwrap()
}

fn ok(_: &ResolvedConfig, _: &Path, _: &JobContext) -> Result<(), CallbackError> {
    Ok(())
}

fn sweep_dir(ws: &Workspace) -> PathBuf {
    ws.root().join("multirun/2024-05-01/10-00-00")
}

fn job_dirs(summary: &RunSummary) -> Vec<PathBuf> {
    summary
        .jobs
        .iter()
        .filter_map(|j| j.working_dir.as_ref().map(PathBuf::from))
        .collect()
}

fn read_config(dir: &Path) -> serde_json::Value {
    let text = fs::read_to_string(dir.join(".plab/config.json")).unwrap();
    serde_json::from_str(&text).unwrap()
}

#[test]
fn test_fragment_sweep_runs_one_job_per_fragment() {
    let ws = Workspace::new();
    let summary = run(&ws, &["fit=weibull_min,lognorm,gamma"], true, &ok);

    assert_eq!(summary.job_count, 3);
    assert_eq!(summary.status, Status::Success);

    let dirs = job_dirs(&summary);
    assert_eq!(dirs.len(), 3);
    let dists: Vec<String> = dirs
        .iter()
        .map(|d| read_config(d)["fit"]["dist"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(dists, vec!["weibull_min", "lognorm", "gamma"]);
    assert_eq!(dirs.iter().collect::<HashSet<_>>().len(), 3);
    assert_eq!(dirs[0], sweep_dir(&ws).join("0"));
}

#[test]
fn test_grid_sweep_produces_six_distinct_dirs() {
    let ws = Workspace::new();
    let summary = run(&ws, &["++x=1,2,3", "++y=a,b"], true, &ok);

    assert_eq!(summary.job_count, 6);
    assert_eq!(summary.jobs_succeeded, 6);

    let dirs = job_dirs(&summary);
    assert_eq!(dirs.iter().collect::<HashSet<_>>().len(), 6);

    let points: Vec<(i64, String)> = dirs
        .iter()
        .map(|d| {
            let cfg = read_config(d);
            (cfg["x"].as_i64().unwrap(), cfg["y"].as_str().unwrap().to_string())
        })
        .collect();
    assert_eq!(points[0], (1, "a".to_string()));
    assert_eq!(points[1], (1, "b".to_string()));
    assert_eq!(points[5], (3, "b".to_string()));
}

#[test]
fn test_job_artifacts_and_run_summary() {
    let ws = Workspace::new();
    let summary = run(&ws, &["extreme.threshold=0.9,0.95"], true, &ok);

    let dir = &job_dirs(&summary)[1];
    let overrides: Vec<String> =
        serde_json::from_str(&fs::read_to_string(dir.join(".plab/overrides.json")).unwrap()).unwrap();
    assert_eq!(overrides, vec!["extreme.threshold=0.95".to_string()]);

    let state = JobStateData::from_file(&dir.join(".plab/job_state.json")).unwrap();
    assert_eq!(state.state, JobState::Succeeded);
    assert_eq!(state.config_digest, summary.jobs[1].config_digest);

    let persisted = RunSummary::from_file(&sweep_dir(&ws).join(RUN_SUMMARY_FILE)).unwrap();
    assert_eq!(persisted.run_id, summary.run_id);
    assert_eq!(persisted.job_count, 2);
    assert!(persisted.multirun);
}

#[test]
fn test_callback_failure_does_not_affect_siblings() {
    let ws = Workspace::new();
    let callback = |cfg: &ResolvedConfig, _: &Path, _: &JobContext| -> Result<(), CallbackError> {
        if cfg.get_str("fit.dist") == Some("lognorm") {
            return Err("fit did not converge".into());
        }
        Ok(())
    };
    let summary = run(&ws, &["fit=weibull_min,lognorm,gamma"], true, &callback);

    assert_eq!(summary.status, Status::Failed);
    assert_eq!(summary.exit_code_enum(), Some(ExitCode::JobExecution));
    assert_eq!(summary.jobs_succeeded, 2);
    assert_eq!(summary.jobs_failed, 1);

    let failed = summary.job(1).unwrap();
    assert_eq!(failed.failure_kind, Some(FailureKind::Execution));
    assert!(failed.human_summary.contains("fit did not converge"));
    assert!(failed.human_summary.contains(failed.job_id()));
}

#[test]
fn test_value_override_failure_is_per_job() {
    let ws = Workspace::new();
    // gamma has no floc key, so the set fails only for that job
    let summary = run(&ws, &["fit=weibull_min,gamma", "fit.floc=1.5"], true, &ok);

    assert_eq!(summary.jobs_succeeded, 1);
    let failed = summary.job(1).unwrap();
    assert_eq!(failed.failure_kind, Some(FailureKind::Composition));
    assert!(failed.working_dir.is_none());
    assert_eq!(summary.exit_code, 20);
}

#[test]
fn test_same_timestamp_collides_instead_of_overwriting() {
    let ws = Workspace::new();

    let first = run(&ws, &[], false, &ok);
    assert_eq!(first.status, Status::Success);
    let dir = job_dirs(&first).remove(0);
    let original = fs::read(dir.join(".plab/config.json")).unwrap();

    let second = run(&ws, &["fit.dist=lognorm"], false, &ok);
    assert_eq!(second.status, Status::Failed);
    assert_eq!(second.jobs[0].failure_kind, Some(FailureKind::Composition));
    assert!(second.jobs[0].human_summary.contains("collision"));
    assert_eq!(fs::read(dir.join(".plab/config.json")).unwrap(), original);
}

#[test]
fn test_distinct_timestamps_get_distinct_dirs() {
    let ws = Workspace::new();
    let overrides = parse_overrides(&[] as &[&str]).unwrap();

    let mut dirs = Vec::new();
    for second in [0, 1] {
        let plan = plan(&ws.store(), &ws.primary(), &overrides, false).unwrap();
        let summary = ws
            .runner(settings(&ws), at(10, 0, second))
            .run(plan, &ok)
            .unwrap();
        assert_eq!(summary.status, Status::Success);
        dirs.extend(job_dirs(&summary));
    }

    assert_ne!(dirs[0], dirs[1]);
    assert_eq!(
        fs::read(dirs[0].join(".plab/config.json")).unwrap(),
        fs::read(dirs[1].join(".plab/config.json")).unwrap()
    );
}

#[test]
fn test_cancellation_stops_scheduling() {
    let ws = Workspace::new();
    let overrides = parse_overrides(&["++x=1,2,3,4"]).unwrap();
    let plan = plan(&ws.store(), &ws.primary(), &overrides, true).unwrap();
    let runner = ws.runner(settings(&ws), at(10, 0, 0));
    let token = runner.cancel_token().clone();

    let callback = move |_: &ResolvedConfig, _: &Path, _: &JobContext| -> Result<(), CallbackError> {
        token.cancel();
        Ok(())
    };
    let summary = runner.run(plan, &callback).unwrap();

    assert_eq!(summary.status, Status::Cancelled);
    assert_eq!(summary.exit_code, 80);
    assert_eq!(summary.jobs_succeeded, 1);
    assert_eq!(summary.jobs_cancelled, 3);
    assert!(sweep_dir(&ws).join(RUN_SUMMARY_FILE).is_file());
}

#[test]
fn test_abandon_policy_cancels_running_job() {
    let ws = Workspace::new();
    let mut settings = settings(&ws);
    settings.launcher.cancel_policy = CancelPolicy::Abandon;

    let overrides = parse_overrides(&["++x=1,2"]).unwrap();
    let plan = plan(&ws.store(), &ws.primary(), &overrides, true).unwrap();
    let runner = ws.runner(settings, at(10, 0, 0));
    let token = runner.cancel_token().clone();

    let callback = move |_: &ResolvedConfig, _: &Path, ctx: &JobContext| -> Result<(), CallbackError> {
        token.cancel();
        assert!(ctx.is_cancelled());
        Ok(())
    };
    let summary = runner.run(plan, &callback).unwrap();

    assert_eq!(summary.jobs_cancelled, 2);
    let state = JobStateData::from_file(&sweep_dir(&ws).join("0/.plab/job_state.json")).unwrap();
    assert_eq!(state.state, JobState::Cancelled);
}

#[test]
fn test_parallel_run_matches_sequential_order() {
    let ws = Workspace::new();
    let mut settings = settings(&ws);
    settings.launcher.parallelism = 4;

    let seen = Mutex::new(Vec::new());
    let active = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);
    let callback = |cfg: &ResolvedConfig, _: &Path, _: &JobContext| -> Result<(), CallbackError> {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(20));
        seen.lock().unwrap().push(cfg.get_i64("x").unwrap());
        active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    };

    let summary = run_with(&ws, &["++x=0,1,2,3,4,5,6,7"], true, settings, &callback);

    assert_eq!(summary.jobs_succeeded, 8);
    let nums: Vec<usize> = summary.jobs.iter().map(|j| j.num()).collect();
    assert_eq!(nums, (0..8).collect::<Vec<_>>());
    assert_eq!(seen.lock().unwrap().len(), 8);
    assert!(peak.load(Ordering::SeqCst) <= 4);
}

#[test]
fn test_dry_run_creates_no_directories() {
    let ws = Workspace::new();
    let overrides = parse_overrides(&["fit=lognorm,gamma", "+viz=basic"]).unwrap();
    let plan = plan(&ws.store(), &ws.primary(), &overrides, true).unwrap();

    let jobs = ws.runner(settings(&ws), at(10, 0, 0)).dry_run(plan).unwrap();

    assert_eq!(jobs.len(), 2);
    let config = jobs[1].result.as_ref().unwrap();
    assert_eq!(config.get_str("viz.title"), Some("gamma fit of value"));
    assert_eq!(jobs[1].working_dir.as_deref(), Some(sweep_dir(&ws).join("1").as_path()));
    assert!(!ws.root().join("multirun").exists());
}

#[test]
fn test_single_run_uses_run_dir_template() {
    let ws = Workspace::new();
    let summary = run(&ws, &["fit=gamma"], false, &ok);

    assert!(!summary.multirun);
    let dir = job_dirs(&summary).remove(0);
    assert_eq!(dir, ws.root().join("outputs/2024-05-01/10-00-00"));
    assert_eq!(read_config(&dir)["fit"]["dist"], "gamma");
}

#[test]
fn test_repeated_multirun_keeps_first_run_summary() {
    let ws = Workspace::new();
    let first = run(&ws, &["fit=weibull_min,gamma"], true, &ok);
    let summary_path = sweep_dir(&ws).join(RUN_SUMMARY_FILE);
    let original = fs::read(&summary_path).unwrap();

    let overrides = parse_overrides(&["fit=lognorm,gamma"]).unwrap();
    let plan = plan(&ws.store(), &ws.primary(), &overrides, true).unwrap();
    let err = ws.runner(settings(&ws), at(10, 0, 0)).run(plan, &ok).unwrap_err();

    assert!(matches!(
        err,
        Error::Composition(CompositionError::DirectoryCollision { .. })
    ));
    assert_eq!(err.exit_code(), ExitCode::Composition);
    assert_eq!(fs::read(&summary_path).unwrap(), original);
    assert_eq!(read_config(&job_dirs(&first)[0])["fit"]["dist"], "weibull_min");
}

#[test]
fn test_repeated_multirun_with_overwrite() {
    let ws = Workspace::new();
    run(&ws, &["++x=1,2"], true, &ok);

    let mut settings = settings(&ws);
    settings.job.overwrite = true;
    let second = run_with(&ws, &["++x=3,4"], true, settings, &ok);

    assert_eq!(second.status, Status::Success);
    let persisted = RunSummary::from_file(&sweep_dir(&ws).join(RUN_SUMMARY_FILE)).unwrap();
    assert_eq!(persisted.run_id, second.run_id);
    assert_eq!(read_config(&sweep_dir(&ws).join("0"))["x"], 3);
}

#[test]
fn test_zone_time_format_fails_only_its_job() {
    let ws = Workspace::new();
    let summary = run(
        &ws,
        &["++stamp_format=%Y,%Z", "++label=${now:${stamp_format}}"],
        true,
        &ok,
    );

    assert_eq!(summary.job_count, 2);
    assert_eq!(summary.jobs_succeeded, 1);
    assert_eq!(read_config(&job_dirs(&summary)[0])["label"], "2024");

    let failed = summary.job(1).unwrap();
    assert_eq!(failed.failure_kind, Some(FailureKind::Interpolation));
    assert!(failed.human_summary.contains("needs a time zone"));
    assert_eq!(summary.exit_code, 30);
}
