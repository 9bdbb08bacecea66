use std::sync::Arc;
use std::thread;

use ring_logger::{ring_log, ConsoleSink, Level, RingLogger, RingLoggerConfig};
use tracing_subscriber::EnvFilter;

fn main() -> ring_logger::Result<()> {
    // Logger diagnostics go through tracing; RUST_LOG=ring_logger=debug shows them.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = RingLoggerConfig::new(1024)?.with_min_level(Level::Debug);
    let logger = Arc::new(RingLogger::new(config, ConsoleSink)?);

    let workers: Vec<_> = (0..4u8)
        .map(|component| {
            let logger = logger.clone();
            thread::spawn(move || {
                for i in 0..5 {
                    ring_log!(logger, Level::Info, component, "worker {} step {}", component, i);
                }
                logger.write_str(Level::Error, component, "worker finished with a simulated error");
            })
        })
        .collect();
    for worker in workers {
        let _ = worker.join();
    }

    logger.shutdown()?;
    let stats = logger.stats();
    eprintln!(
        "published={} delivered={} dropped={}",
        stats.published, stats.delivered, stats.dropped_overflow
    );
    Ok(())
}
