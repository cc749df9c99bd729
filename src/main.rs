//! Treasury is a microservice that keeps the money ledger of the crowdfunding platform.
//! This create is for running the service from `treasury_lib`. See `treasury_lib` for details.

extern crate env_logger;
#[macro_use]
extern crate log;
extern crate treasury_lib;

use std::process;

fn main() {
    // Prepare logger
    env_logger::init();

    let config = match treasury_lib::config::Config::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Can't load app config: {}", e);
            process::exit(1);
        }
    };

    // Prepare sentry integration
    let _sentry = treasury_lib::sentry_integration::init(config.sentry.as_ref());

    if let Err(e) = treasury_lib::start_server(config) {
        let causes = e.iter_chain().map(|cause| cause.to_string()).collect::<Vec<_>>();
        error!("Treasury failed to start: {}", causes.join(" | "));
        process::exit(1);
    }
}
