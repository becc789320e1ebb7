use clap::Parser;
use imcatalog::cli::SubCommandExtend;
use imcatalog::config::SubCommand;
use imcatalog::Opts;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Add(config) => config.run(&opts).await,
        SubCommand::List(config) => config.run(&opts).await,
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::Build(config) => config.run(&opts).await,
        SubCommand::Sync(config) => config.run(&opts).await,
        SubCommand::Prune(config) => config.run(&opts).await,
        SubCommand::Server(config) => config.run(&opts).await,
    }
}
