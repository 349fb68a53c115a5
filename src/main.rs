use std::{env, error::Error};

use fathom::{
    config::{FathomConfig, FathomConfigLoadError},
    server::Fathom,
    telemetry::oltp::init_meter,
    utils::leak,
};
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = dotenvy::dotenv();
    #[cfg(debug_assertions)]
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .init();
    #[cfg(not(debug_assertions))]
    env_logger::init();

    let provider = if dotenvy::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        Some(init_meter())
    } else {
        None
    };

    let current_dir = env::current_dir()?;
    let config_file = current_dir.join("settings.toml");

    let config = match FathomConfig::load(&config_file) {
        Ok(config) => {
            // Save config to fill missing fields
            let _ = config.save(&config_file);
            Ok(config)
        }
        Err(error) => {
            match error {
                FathomConfigLoadError::Io(_) => {
                    // If config loading fails we generate a default config
                    let default_config = FathomConfig::default();
                    let _ = default_config.save(&config_file);
                    Ok(default_config)
                }
                FathomConfigLoadError::Parse(parse_error) => Err(parse_error),
            }
        }
    }?;

    let stop = leak(broadcast::channel(1).0);
    let fathom = leak(Fathom::new(config, stop));
    tokio::spawn(async move {
        if let Err(e) = fathom.start().await {
            log::error!("{e}");
        }
        if let Some(provider) = provider {
            let _ = provider.shutdown();
        }
    });
    {
        use futures::future::{select_all, FutureExt};
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let sigint_fut = sigint.recv().boxed();
        let sigterm_fut = sigterm.recv().boxed();

        let _ = select_all([sigint_fut, sigterm_fut]).await;
        log::info!("Received signal, stopping...");
        stop.send(())?;
    }
    Ok(())
}
