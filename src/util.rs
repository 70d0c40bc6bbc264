pub mod log {
    use std::sync::Once;

    use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

    /// Default filter when `RUST_LOG` is unset.
    const DEFAULT_DIRECTIVE: &str = "piezomap=debug,info";

    pub fn init() {
        static ONCE: Once = Once::new();
        ONCE.call_once(|| {
            let builder = tracing_subscriber::fmt()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(false)
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE)),
                );

            // Local offset can only be determined while single threaded.
            #[cfg(not(test))]
            {
                if let Ok(timer) = tracing_subscriber::fmt::time::OffsetTime::local_rfc_3339() {
                    _ = builder.with_timer(timer).try_init();
                    return;
                }
            }

            _ = builder.try_init();
        })
    }
}
