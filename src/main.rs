use anyhow::{anyhow, Result};
use env_logger::Env;

use fleet_poller::argsets::{KvsGetArgs, KvsSetArgs, RunArgs};
use fleet_poller::command;
use fleet_poller::constants::{defaults, envvars};
use fleet_poller::helpers::load_dotenv;

const CMD_RUN: &str = "run";
const CMD_KVS_GET: &str = "kvs-get";
const CMD_KVS_SET: &str = "kvs-set";

fn main() -> Result<()> {
    load_dotenv();
    env_logger::Builder::from_env(Env::default().filter_or(envvars::LOG_LEVEL, defaults::LOG_LEVEL))
        .init();

    let mut args = pico_args::Arguments::from_env();
    match args.subcommand()?.as_deref() {
        Some(CMD_RUN) => {
            let run_args = RunArgs {
                config: args.opt_value_from_str("--config")?,
                port: args.opt_value_from_str("--port")?,
            };
            tokio::runtime::Runtime::new()?.block_on(command::run(run_args))
        }
        Some(CMD_KVS_GET) => command::kvs_get(KvsGetArgs {
            key: args.free_from_str()?,
        }),
        Some(CMD_KVS_SET) => command::kvs_set(KvsSetArgs {
            key: args.free_from_str()?,
            value: args.free_from_str()?,
        }),
        _ => Err(anyhow!("Subcommand must be one of 'run', 'kvs-get', 'kvs-set'")),
    }
}
