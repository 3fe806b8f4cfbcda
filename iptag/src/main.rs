use args::Args;
use clap::Parser;
use config::Config;
use server::ServeConfig;

mod args;

const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    server::logger::init(&args.log);

    let config = Config::load(&args.config)?;

    log::info!(
        "Loaded {} tag rule(s) from {}",
        config.ip_tagging.tags.len(),
        args.config.display()
    );

    let listen_address = args
        .listen_address
        .or(config.server.listen_address)
        .unwrap_or_else(|| {
            DEFAULT_LISTEN_ADDRESS
                .parse()
                .expect("default listen address is valid")
        });

    server::serve(ServeConfig { listen_address, config }).await?;

    Ok(())
}
