use once_cell::sync::OnceCell;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

static INIT: OnceCell<()> = OnceCell::new();

/// Install the console tracing subscriber. Idempotent; the filter comes
/// from `RUST_LOG` and defaults to `info`.
pub fn init() {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = fmt::layer();
        let _ = tracing_subscriber::registry()
            .with(fmt_layer.with_filter(filter))
            .try_init();
    });
}
