use clap::ArgMatches;
use server::config::Config;

pub async fn run(matches: &ArgMatches) -> Result<(), server::error::StartupError> {
    let mut config = Config::from_env();
    if let Some(port) = matches.get_one::<u16>("port") {
        config.port = *port;
        if std::env::var("SIMSYNC_PUBLIC_URL").is_err() {
            config.public_url = format!("http://localhost:{port}");
        }
    }
    tracing::info!("database: {}", config.db_path().display());
    server::run(config).await
}
