#[macro_use]
extern crate log;

use std::sync::Arc;

#[cfg(feature = "enable_mimalloc")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

use ninjacore::activity_log::ActivityLogger;
use ninjacore::cache::CacheManager;
use ninjacore::checker::PermissionChecker;
use ninjacore::store::BlobStore;
use ninjacore::unknown_user_log::UnknownUserLogger;
use ninjacore::{api, binding, CONFIG};

/// Sets up the `log` backend (teacher's `fern`+`syslog` stack):
/// human-readable lines to stdout, plus a syslog chain on Unix targets. Only
/// the console chain is unconditional — syslog failures are logged and
/// otherwise ignored rather than aborting startup.
fn init_logging() -> Result<(), fern::InitError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stdout());

    #[cfg(unix)]
    {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_USER,
            hostname: None,
            process: "ninjacore".into(),
            pid: std::process::id(),
        };

        match syslog::unix(formatter) {
            Ok(logger) => dispatch = dispatch.chain(logger),
            Err(e) => eprintln!("syslog unavailable, logging to stdout only: {e}"),
        }
    }

    dispatch.apply()?;
    Ok(())
}

/// Probes the blob store at startup so a misconfigured backend fails fast
/// rather than on the first request.
async fn validate_store(store: &BlobStore) {
    BlobStore::with_retries(|| store.read::<serde_json::Value>("system://apps.json"))
        .await
        .unwrap_or_else(|e| panic!("blob store unreachable at startup: {e:?}"));
}

#[rocket::main]
async fn main() -> Result<(), rocket::Error> {
    init_logging().expect("failed to initialize logging");

    info!("starting ninjacore, private_backend={}", CONFIG.private_backend());

    let store = Arc::new(BlobStore::new().expect("failed to initialize blob store"));
    validate_store(&store).await;

    let cache = Arc::new(CacheManager::new(Arc::clone(&store)));
    let unknown_logger = Arc::new(UnknownUserLogger::new(Arc::clone(&store)));
    let activity_logger = Arc::new(ActivityLogger::new(Arc::clone(&cache), Arc::clone(&store)));
    let checker = PermissionChecker::new(cache, unknown_logger);

    let _ = rocket::build()
        .manage(checker)
        .manage(activity_logger)
        .mount("/api", api::routes())
        .register("/", binding::catchers())
        .launch()
        .await?;

    Ok(())
}
