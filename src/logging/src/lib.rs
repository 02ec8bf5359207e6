use log::info;

/// Initialize `env_logger` with a timestamped `file:line` format.
///
/// The default filter is `info`, use `RUST_LOG` to override it. Calling this
/// more than once (e.g. from several tests in one binary) is harmless.
pub fn init_log() {
    use chrono::Utc;
    use std::io::Write;

    let env = env_logger::Env::default().default_filter_or("info");
    let res = env_logger::Builder::from_env(env)
        .format(|buf, record| {
            let level_style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S%.6f"),
                level_style.value(record.level()),
                record.file().unwrap_or("<unnamed>"),
                record.line().unwrap_or(0),
                &record.args()
            )
        })
        .try_init();

    if res.is_ok() {
        info!("env_logger initialized");
    }
}
