use anyhow::Context;
use lantern::config::Config;
use lantern::server::reactor::Reactor;

fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;
    let _log_guard = lantern::logging::init(&cfg.log)?;

    if let Err(e) = cfg.validate() {
        tracing::error!("invalid configuration: {:#}", e);
        return Err(e);
    }

    let mut reactor = match Reactor::new(&cfg.server) {
        Ok(reactor) => reactor,
        Err(e) => {
            tracing::error!("========== Server init error: {:#} ==========", e);
            return Err(e);
        }
    };

    let handle = reactor.handle();
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received");
        handle.shutdown();
    })
    .context("failed to install signal handler")?;

    reactor.run()
}
