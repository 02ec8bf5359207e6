use std::io::Write;

use anyhow::{anyhow, Context, Result};
use rayon::prelude::*;
use structopt::StructOpt;

use admission::config::{read_config, ExperimentConfig};
use admission::experiment::{run_trial, Report};

#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "Admission Experiment", about = "Admission Experiment")]
pub struct Opt {
    /// The configure file
    #[structopt(short = "c", long = "config")]
    pub config: std::path::PathBuf,

    /// Print the configuration and the topology, then exit
    #[structopt(short = "n", long = "dry-run")]
    pub dry_run: bool,

    /// The maximal concurrency to run the trials
    #[structopt(short = "P", long = "parallel")]
    pub parallel: Option<usize>,
}

fn set_env_vars(config: &ExperimentConfig) -> Result<()> {
    for (k, v) in config.envs.iter() {
        let v = v
            .as_str()
            .ok_or_else(|| anyhow!("environment {} expects a string, got {}", k, v))?;
        log::debug!("setting environment {}={}", k, v);
        std::env::set_var(k, v);
    }
    Ok(())
}

fn save_result(path: &std::path::Path, reports: &[Report]) -> Result<()> {
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("fail to open {:?}", path))?;
    for r in reports {
        writeln!(f, "{}", r)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    logging::init_log();

    let opt = Opt::from_args();
    log::info!("Opts: {:#?}", opt);

    log::info!("parsing experiment configuration from file: {:?}", opt.config);
    let config = read_config(&opt.config)?;
    log::info!("config: {:#?}", config);

    set_env_vars(&config)?;

    if opt.dry_run {
        let cluster = vcguard::architecture::build_tree(&config.brain.topology)?;
        println!("{:#?}", config);
        println!("{}", cluster.to_dot());
        return Ok(());
    }

    if let Some(n) = opt.parallel {
        log::info!("using {} threads", n);
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()?;
    }

    // create the output directory if it does not exist
    let result_file = match &config.directory {
        Some(path) => {
            std::fs::create_dir_all(path)
                .with_context(|| format!("fail to create directory {:?}", path))?;
            let file = path.join("result.txt");
            // then write parsed configuration to it, replacing the previous result
            std::fs::write(&file, format!("{:#?}\n", config))?;
            Some(file)
        }
        None => None,
    };

    let mut reports = (0..config.repeat)
        .into_par_iter()
        .map(|trial| run_trial(&config, trial))
        .collect::<Result<Vec<_>>>()?;
    reports.sort_by_key(|r| r.trial);

    for r in &reports {
        log::info!("{}", r);
        println!("{}", r);
    }

    if let Some(file) = result_file {
        save_result(&file, &reports)?;
    }

    Ok(())
}
