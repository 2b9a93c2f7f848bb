//! Test fixtures: a probability-lab config tree written into a temp dir
//!
//! ```text
//! conf/
//!   config.toml
//!   data/csv_template.toml
//!   fit/{weibull_min,lognorm,gamma}.toml
//!   extreme/{peaks_over_threshold,block_maxima}.toml
//!   viz/basic.json
//! ```

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use plab_runner::{EngineSettings, GroupStore, JobRunner, PrimaryConfig, ResolverRegistry};
use tempfile::TempDir;

pub const PRIMARY: &str = r#"
defaults = [
    { data = "csv_template" },
    { fit = "weibull_min" },
    { extreme = "peaks_over_threshold" },
    "_self_",
]

seed = 42
theme = "light"
default_distributions = ["expon", "weibull_min", "lognorm", "gamma", "genextreme", "gpd"]

[plab.run]
dir = "outputs/${now:%Y-%m-%d}/${now:%H-%M-%S}"
"#;

pub const CSV_TEMPLATE: &str = r#"
path = "data/sample.csv"
column = "value"
weights_column = ""
"#;

pub const WEIBULL_MIN: &str = r#"
dist = "weibull_min"
column = "${data.column}"
floc = 0.0
n_points = 400
output_dir = "outputs"
"#;

pub const LOGNORM: &str = r#"
dist = "lognorm"
column = "${data.column}"
floc = 0.0
n_points = 400
output_dir = "outputs"
"#;

pub const GAMMA: &str = r#"
dist = "gamma"
column = "${data.column}"
n_points = 200
output_dir = "outputs"
"#;

pub const PEAKS_OVER_THRESHOLD: &str = r#"
enabled = true
method = "gpd"
threshold = 0.9
"#;

pub const BLOCK_MAXIMA: &str = r#"
enabled = true
method = "genextreme"
block_size = 50
"#;

pub const VIZ_BASIC: &str = r#"{
    "dpi": 100,
    "title": "${fit.dist} fit of ${data.column}",
    "qq": true
}"#;

/// A temp workspace holding `conf/` and receiving job outputs
pub struct Workspace {
    pub temp: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("create temp dir");
        let conf = temp.path().join("conf");
        write(&conf.join("config.toml"), PRIMARY);
        write(&conf.join("data/csv_template.toml"), CSV_TEMPLATE);
        write(&conf.join("fit/weibull_min.toml"), WEIBULL_MIN);
        write(&conf.join("fit/lognorm.toml"), LOGNORM);
        write(&conf.join("fit/gamma.toml"), GAMMA);
        write(&conf.join("extreme/peaks_over_threshold.toml"), PEAKS_OVER_THRESHOLD);
        write(&conf.join("extreme/block_maxima.toml"), BLOCK_MAXIMA);
        write(&conf.join("viz/basic.json"), VIZ_BASIC);
        Self { temp }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn conf_dir(&self) -> PathBuf {
        self.temp.path().join("conf")
    }

    pub fn store(&self) -> GroupStore {
        GroupStore::load(&self.conf_dir()).expect("load store")
    }

    pub fn primary(&self) -> PrimaryConfig {
        PrimaryConfig::load(&self.conf_dir(), "config").expect("load primary config")
    }

    /// Runner rooted in the workspace with a fixed clock
    pub fn runner(&self, settings: EngineSettings, now: NaiveDateTime) -> JobRunner {
        JobRunner::new(settings, ResolverRegistry::at(now)).with_root_dir(self.root())
    }
}

pub fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create fixture dir");
    }
    fs::write(path, contents).expect("write fixture");
}

pub fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 1)
        .and_then(|d| d.and_hms_opt(h, m, s))
        .expect("valid timestamp")
}
