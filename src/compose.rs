//! Run planning
//!
//! Turns a primary config and command-line overrides into the jobs of a run:
//!
//! 1. `plab.*` overrides are set aside for the engine settings.
//! 2. Overrides whose key is a bare group name edit the defaults list; every
//!    other override amends the merged tree.
//! 3. The sweep is expanded, each point gets its own defaults list and the
//!    base tree of each distinct list is merged once and shared.
//!
//! Anything wrong with the defaults list aborts planning before a job
//! exists. Value overrides are applied per job, so a bad one fails only the
//! jobs that carry it.

use std::collections::HashMap;
use std::sync::Arc;

use plab_override::{Override, OverrideOp};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{is_settings_override, DefaultsList, DefaultsResolver, ResolvedConfig};
use crate::error::{CompositionError, Error};
use crate::interp::{Interpolator, ResolverRegistry};
use crate::job::{generate_run_id, Job, JobError};
use crate::store::{GroupStore, PrimaryConfig};
use crate::sweep;

/// The jobs of one run, in sweep order
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub run_id: String,
    pub multirun: bool,
    /// Name of the primary config
    pub config_name: String,
    pub jobs: Vec<Job>,
}

impl RunPlan {
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}

/// True when `ov` selects a fragment of a config group
pub fn is_group_override(ov: &Override, store: &GroupStore, defaults: &DefaultsList) -> bool {
    if ov.key_path.len() != 1 {
        return false;
    }
    let root = ov.root_key();
    store.has_group(root) || defaults.entries().iter().any(|e| e.group_name() == Some(root))
}

/// Overrides addressed to the engine settings (`plab.*`)
pub fn settings_overrides(overrides: &[Override]) -> Vec<Override> {
    overrides.iter().filter(|o| is_settings_override(o)).cloned().collect()
}

/// Plan the jobs of a run.
pub fn plan(
    store: &GroupStore,
    primary: &PrimaryConfig,
    overrides: &[Override],
    multirun: bool,
) -> Result<RunPlan, Error> {
    let config_overrides: Vec<Override> = overrides
        .iter()
        .filter(|o| !is_settings_override(o))
        .cloned()
        .collect();

    for ov in &config_overrides {
        if is_group_override(ov, store, &primary.defaults) {
            validate_selection(ov, store, multirun)?;
        }
    }

    let points = sweep::expand(&config_overrides, multirun)?;
    let run_id = generate_run_id();
    let resolver = DefaultsResolver::new(store);
    let mut bases: HashMap<DefaultsList, Arc<Value>> = HashMap::new();
    let mut jobs = Vec::with_capacity(points.len());

    for (num, point) in points.into_iter().enumerate() {
        let mut defaults = primary.defaults.clone();
        let mut value_overrides = Vec::new();
        for ov in &point {
            if is_group_override(ov, store, &primary.defaults) {
                defaults.apply_selection(ov, store)?;
            } else {
                value_overrides.push(ov.clone());
            }
        }

        let base = match bases.get(&defaults) {
            Some(base) => Arc::clone(base),
            None => {
                let tree = Arc::new(resolver.resolve(&defaults, &primary.inline)?);
                debug!(defaults = ?defaults.labels(), "Merged defaults list");
                bases.insert(defaults.clone(), Arc::clone(&tree));
                tree
            }
        };

        jobs.push(Job::new(&run_id, num, point, value_overrides, defaults, base));
    }

    info!(
        run_id = %run_id,
        jobs = jobs.len(),
        base_trees = bases.len(),
        multirun,
        "Planned run"
    );

    Ok(RunPlan {
        run_id,
        multirun,
        config_name: primary.name.clone(),
        jobs,
    })
}

/// Compose and resolve a single config without running anything.
pub fn compose(
    store: &GroupStore,
    primary: &PrimaryConfig,
    overrides: &[Override],
    registry: &ResolverRegistry,
) -> Result<ResolvedConfig, Error> {
    let plan = plan(store, primary, overrides, false)?;
    let mut job = plan
        .jobs
        .into_iter()
        .next()
        .ok_or_else(|| Error::Job(JobError::State("run has no jobs".to_string())))?;
    let interpolator = Interpolator::new(registry);
    let resolved = job.compose(&interpolator).map_err(Error::from)?;
    Ok(resolved.clone())
}

/// Check every value of a group-selection override before any job exists.
fn validate_selection(ov: &Override, store: &GroupStore, multirun: bool) -> Result<(), CompositionError> {
    let group = ov.root_key();

    if !multirun && ov.values.len() > 1 {
        return Err(CompositionError::AmbiguousSelection {
            group: group.to_string(),
            count: ov.values.len(),
        });
    }

    for value in &ov.values {
        match value {
            Value::String(name) => {
                store.fragment(group, name)?;
            }
            Value::Null if ov.op == OverrideOp::Set => {}
            other => {
                return Err(CompositionError::InvalidSelection {
                    group: group.to_string(),
                    value: plab_override::format_value(other),
                })
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefaultsEntry;
    use crate::store::Fragment;
    use chrono::NaiveDate;
    use plab_override::parse_overrides;
    use serde_json::json;

    fn store() -> GroupStore {
        GroupStore::new()
            .with_fragment("fit", "weibull_min", Fragment::new(json!({"dist": "weibull_min", "floc": 0})))
            .unwrap()
            .with_fragment("fit", "lognorm", Fragment::new(json!({"dist": "lognorm", "floc": 0})))
            .unwrap()
            .with_fragment("fit", "gamma", Fragment::new(json!({"dist": "gamma", "floc": 0})))
            .unwrap()
            .with_fragment("viz", "basic", Fragment::new(json!({"dpi": 100})))
            .unwrap()
    }

    fn primary() -> PrimaryConfig {
        PrimaryConfig {
            name: "config".to_string(),
            defaults: vec![DefaultsEntry::group("fit", "weibull_min")].into(),
            inline: json!({"seed": 42}),
            settings: json!({}),
            source: None,
        }
    }

    fn registry() -> ResolverRegistry {
        ResolverRegistry::at(
            NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        )
    }

    fn ovs(items: &[&str]) -> Vec<Override> {
        parse_overrides(items).unwrap()
    }

    #[test]
    fn test_single_run_plan() {
        let plan = plan(&store(), &primary(), &ovs(&["seed=7"]), false).unwrap();
        assert_eq!(plan.job_count(), 1);
        assert!(!plan.multirun);
        assert_eq!(plan.jobs[0].base(), &json!({"fit": {"dist": "weibull_min", "floc": 0}, "seed": 42}));
    }

    #[test]
    fn test_group_sweep_shares_nothing_but_identical_bases() {
        let plan = plan(&store(), &primary(), &ovs(&["fit=weibull_min,lognorm", "seed=1,2"]), true).unwrap();
        assert_eq!(plan.job_count(), 4);
        assert_eq!(plan.jobs[0].defaults().selection("fit"), Some("weibull_min"));
        assert_eq!(plan.jobs[2].defaults().selection("fit"), Some("lognorm"));
        assert!(std::ptr::eq(plan.jobs[0].base(), plan.jobs[1].base()));
        assert!(!std::ptr::eq(plan.jobs[1].base(), plan.jobs[2].base()));
    }

    #[test]
    fn test_settings_overrides_are_set_aside() {
        let all = ovs(&["plab.launcher.parallelism=4", "seed=3"]);
        let plan = plan(&store(), &primary(), &all, false).unwrap();
        assert_eq!(plan.jobs[0].literal_overrides(), vec!["seed=3".to_string()]);
        assert_eq!(settings_overrides(&all).len(), 1);
    }

    #[test]
    fn test_missing_fragment_aborts_planning() {
        let err = plan(&store(), &primary(), &ovs(&["fit=weibull_min,cauchy"]), true).unwrap_err();
        assert!(matches!(
            err,
            Error::Composition(CompositionError::MissingFragment { ref fragment, .. }) if fragment == "cauchy"
        ));
    }

    #[test]
    fn test_ambiguous_selection_outside_multirun() {
        let err = plan(&store(), &primary(), &ovs(&["fit=gamma,lognorm"]), false).unwrap_err();
        assert!(matches!(
            err,
            Error::Composition(CompositionError::AmbiguousSelection { count: 2, .. })
        ));
    }

    #[test]
    fn test_append_group() {
        let plan = plan(&store(), &primary(), &ovs(&["+viz=basic"]), false).unwrap();
        assert_eq!(plan.jobs[0].base()["viz"], json!({"dpi": 100}));
    }

    #[test]
    fn test_bad_value_override_only_fails_at_compose() {
        let plan = plan(&store(), &primary(), &ovs(&["nope=1"]), false).unwrap();
        assert_eq!(plan.job_count(), 1);

        let err = compose(&store(), &primary(), &ovs(&["nope=1"]), &registry()).unwrap_err();
        assert!(matches!(err, Error::Composition(CompositionError::KeyMissing { .. })));
    }

    #[test]
    fn test_compose_selects_and_overrides() {
        let cfg = compose(&store(), &primary(), &ovs(&["fit=gamma", "fit.floc=1"]), &registry()).unwrap();
        assert_eq!(cfg.get_str("fit.dist"), Some("gamma"));
        assert_eq!(cfg.get_i64("fit.floc"), Some(1));
        assert_eq!(cfg.get_i64("seed"), Some(42));
    }
}
