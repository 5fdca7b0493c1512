mod cli;
mod decode;

use anyhow::Result;

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let options = cli::Options::parse(std::env::args().skip(1))?;
    cli::run(options)
}
