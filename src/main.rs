use std::path::PathBuf;
use tracing::{warn, Level};
use vidtag::{AppError, Configuration, CoordinatorBuilder};

fn init_logging(level: Level) {
    tracing_subscriber::fmt().with_max_level(level).init();
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // vidtag [config.toml [video ...]]
    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let videos: Vec<String> = args.collect();
    let configuration = Configuration::load(config_path.as_deref())?;
    init_logging(configuration.log_level()?);

    let mut builder = CoordinatorBuilder::new(configuration);
    if !videos.is_empty() {
        builder = builder.videos(videos);
    }
    let coordinator = builder.build()?;
    let cancel_token = coordinator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current frames");
            cancel_token.cancel();
        }
    });

    coordinator.run().await?.into_result()?;
    Ok(())
}
