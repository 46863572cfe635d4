use docuchat::{init_tracing, load_config, run_api_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = load_config()?;
    tracing::debug!("Loaded configuration:\n{}", config);

    run_api_server(config).await?;

    Ok(())
}
