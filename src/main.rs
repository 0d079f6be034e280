use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cfg = vfido::config::Config::parse();
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            if cfg.wipe {
                vfido::wipe(cfg).await
            } else {
                vfido::run(cfg).await
            }
        })
}
