//! Halcyon UCI entry point. Protocol I/O stays on stdout; diagnostics go
//! to stderr through the logger so GUIs never see them.

use anyhow::Result;
use halcyon::uci::UciDriver;

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().filter_or(
        env_logger::DEFAULT_FILTER_ENV,
        "warn",
    ));

    let mut driver = UciDriver::new()?;
    driver.run()
}
