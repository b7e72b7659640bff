//! `labctl pool`: Preview the address range of a subnet.

use clap::Args;
use labnet_common::config::LabConfig;
use labnet_common::constants::DEFAULT_SUBNET;
use labnet_runtime::pool::AddressPool;

/// Arguments for the `pool` command.
#[derive(Args, Debug)]
pub struct PoolArgs {
    /// Lab subnet in CIDR notation.
    #[arg(long, env = "LABNET_SUBNET", default_value = DEFAULT_SUBNET)]
    pub subnet: String,

    /// Gateway address (defaults to the first host).
    #[arg(long, env = "LABNET_GATEWAY")]
    pub gateway: Option<String>,

    /// Cap on the number of candidate addresses.
    #[arg(long)]
    pub max: Option<usize>,
}

/// Executes the `pool` command.
///
/// # Errors
///
/// Returns an error if the subnet or gateway is invalid.
pub fn execute(args: &PoolArgs) -> anyhow::Result<()> {
    let config = LabConfig {
        subnet: args.subnet.clone(),
        gateway: args.gateway.clone(),
        max_pool_size: args.max,
        ..LabConfig::default()
    };
    let pool = AddressPool::from_config(&config)?;
    let (first, last) = pool.bounds();

    println!("{:<10} {}", "SUBNET", pool.subnet());
    println!("{:<10} {}", "GATEWAY", pool.gateway());
    println!("{:<10} {first}", "FIRST");
    println!("{:<10} {last}", "LAST");
    println!("{:<10} {}", "CAPACITY", pool.capacity());
    Ok(())
}
