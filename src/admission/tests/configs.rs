use std::path::PathBuf;

use admission::config::read_config;
use admission::workload::Workload;

fn configs() -> Vec<PathBuf> {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("configs");
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().map_or(false, |ext| ext == "toml"))
        .collect();
    files.sort();
    files
}

#[test]
fn shipped_configs_parse() {
    logging::init_log();
    let files = configs();
    assert!(!files.is_empty());
    for path in files {
        let config = read_config(&path).unwrap_or_else(|e| panic!("{:?}: {:#}", path, e));
        vcguard::architecture::build_tree(&config.brain.topology).unwrap();
        let w = Workload::generate(&config, config.seed).unwrap();
        assert_eq!(w.tenants.len(), config.ncases);
    }
}

#[test]
fn missing_file_is_an_error() {
    assert!(read_config("/nonexistent/admission.toml").is_err());
}
