//! Process-wide interceptor, built once by the load-time constructor.

use once_cell::sync::OnceCell;
use zzuf_config::logging::{init_logging, LogLevel};
use zzuf_config::{log_config_error, log_lifecycle_info, Config, ENV_DEBUG};
use zzuf_stream::Interceptor;

/// `None` once initialization decided the layer stays unarmed.
static INTERCEPTOR: OnceCell<Option<Interceptor>> = OnceCell::new();

pub fn init() {
    INTERCEPTOR.get_or_init(build);
}

/// The armed interceptor, if any. Hooks never initialize on their own: a
/// call that arrives before the constructor simply passes through.
#[inline]
pub fn active() -> Option<&'static Interceptor> {
    INTERCEPTOR.get().and_then(Option::as_ref)
}

fn build() -> Option<Interceptor> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            if std::env::var_os(ENV_DEBUG).is_some() {
                init_logging(LogLevel::Warn, None);
            }
            log_config_error!(
                "configuration rejected, stdio passes through",
                error = tracing::field::display(&e)
            );
            return None;
        }
    };

    if config.log.debug {
        init_logging(config.log.level, config.log.file.as_deref());
    }
    if !config.stream.enabled {
        log_lifecycle_info!("layer disabled by configuration");
        return None;
    }

    let zz = match Interceptor::from_config(&config) {
        Ok(zz) => zz,
        Err(e) => {
            log_config_error!(
                "watch policy rejected, stdio passes through",
                error = tracing::field::display(&e)
            );
            return None;
        }
    };
    zz.arm();
    log_lifecycle_info!(
        "armed",
        pid = std::process::id(),
        mode = zz.mode().as_str(),
        seed = config.fuzz.seed,
        ratio = config.fuzz.ratio,
        include = config.watch.include.len(),
        exclude = config.watch.exclude.len()
    );
    Some(zz)
}
