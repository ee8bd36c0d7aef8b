use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::assemble::SortOrder;
use crate::dedup::{DEFAULT_THRESHOLD, MAX_THRESHOLD};
use crate::pipeline::EngineConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory scanned for `.eml` files
    pub input_dir: PathBuf,

    /// Directory receiving one sub-directory per processed input
    pub output_dir: PathBuf,

    /// Where processed inputs are moved; `None` leaves them in place
    pub done_dir: Option<PathBuf>,

    /// Chronological order of the rendered thread
    pub order: SortOrder,

    /// Maximum Hamming distance for two messages to count as duplicates
    pub dedup_threshold: u32,

    /// Number of files processed concurrently
    pub workers: usize,
}

fn dir_var(name: &str, default: &str) -> PathBuf {
    env::var(name)
        .map(|val| {
            log::info!("Config: Using {} from env: {}", name, val);
            PathBuf::from(val)
        })
        .unwrap_or_else(|_| {
            log::info!("Config: Using default {}: {}", name, default);
            PathBuf::from(default)
        })
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (optional)
        let _ = dotenv::dotenv();

        let input_dir = dir_var("MAIL_WEAVE_INPUT_DIR", "input");
        let output_dir = dir_var("MAIL_WEAVE_OUTPUT_DIR", "output");

        let done_dir = match env::var("MAIL_WEAVE_DONE_DIR") {
            Ok(val) if val.trim().is_empty() => {
                log::info!("Config: MAIL_WEAVE_DONE_DIR is empty, processed inputs stay in place");
                None
            }
            Ok(val) => {
                log::info!("Config: Using MAIL_WEAVE_DONE_DIR from env: {}", val);
                Some(PathBuf::from(val))
            }
            Err(_) => {
                log::info!("Config: Using default MAIL_WEAVE_DONE_DIR: done");
                Some(PathBuf::from("done"))
            }
        };

        let order_str = env::var("MAIL_WEAVE_ORDER").unwrap_or_else(|_| "ascending".to_string());
        let order = match order_str.parse::<SortOrder>() {
            Ok(order) => order,
            Err(e) => {
                let err_msg = format!(
                    "MAIL_WEAVE_ORDER ('{}') must be 'ascending' or 'descending'",
                    order_str
                );
                log::error!("{}: {}", err_msg, e);
                return Err(anyhow!(e).context(err_msg));
            }
        };
        log::info!("Config: Using order: {}", order);

        let threshold_str = env::var("MAIL_WEAVE_DEDUP_THRESHOLD")
            .unwrap_or_else(|_| DEFAULT_THRESHOLD.to_string());
        let dedup_threshold = match threshold_str.trim().parse::<u32>() {
            Ok(value) if value <= MAX_THRESHOLD => value,
            Ok(value) => {
                let err_msg = format!(
                    "MAIL_WEAVE_DEDUP_THRESHOLD ('{}') must be between 0 and {}",
                    threshold_str, MAX_THRESHOLD
                );
                log::error!("{}", err_msg);
                return Err(anyhow!("threshold {} is out of range", value).context(err_msg));
            }
            Err(e) => {
                let err_msg = format!(
                    "MAIL_WEAVE_DEDUP_THRESHOLD ('{}') must be an integer between 0 and {}",
                    threshold_str, MAX_THRESHOLD
                );
                log::error!("{}: {}", err_msg, e);
                return Err(anyhow!(e).context(err_msg));
            }
        };
        log::info!("Config: Using dedup_threshold: {}", dedup_threshold);

        let workers_str = env::var("MAIL_WEAVE_WORKERS").unwrap_or_else(|_| "4".to_string());
        let workers = match workers_str.trim().parse::<usize>() {
            Ok(n) if n >= 1 => n,
            Ok(_) => {
                let err_msg = format!("MAIL_WEAVE_WORKERS ('{}') must be at least 1", workers_str);
                log::error!("{}", err_msg);
                return Err(anyhow!("no workers requested").context(err_msg));
            }
            Err(e) => {
                let err_msg = format!("MAIL_WEAVE_WORKERS ('{}') must be a positive integer", workers_str);
                log::error!("{}: {}", err_msg, e);
                return Err(anyhow!(e).context(err_msg));
            }
        };
        log::info!("Config: Using workers: {}", workers);

        Ok(Config {
            input_dir,
            output_dir,
            done_dir,
            order,
            dedup_threshold,
            workers,
        })
    }

    /// The subset of settings the reconstruction engine needs.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            order: self.order,
            threshold: self.dedup_threshold,
        }
    }
}
