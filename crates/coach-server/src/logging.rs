//! Logging/tracing bootstrap for the server binary. `env_logger` drives the
//! startup banner the way the teacher's `agent-server`/`bamboo-server`
//! binaries do; `tracing` + `tracing-subscriber` with an `EnvFilter` carry
//! the structured per-request spans inside the pipeline crates (§7
//! "Observability").

pub fn init_logging(debug: bool) {
    let filter = if debug { "debug" } else { "info" };

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", filter);
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{}] {} [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init()
        .ok();
}
