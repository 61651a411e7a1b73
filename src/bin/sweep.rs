//! KBA sweep driver
//!
//! With arguments: size the problem from the flags, perform the requested
//! sweeps, and print a single result line
//! `Normsq result: <e>  diff: <e>  {PASS|FAIL}  time: <s>  GF/s: <r>`.
//! Exit status is non-zero on any configuration error, exchange failure, or
//! validation failure.
//!
//! Without arguments: self-test mode. The same small problem is run twice in
//! one process; both runs must pass and agree on the norm.

use snsweep::{launch, Args, RunConfig, RunData};

fn perform(mut args: Args) -> anyhow::Result<RunData> {
    let cfg = RunConfig::from_args(&mut args)?;
    args.finish()?;
    let data = launch(&cfg)?;
    Ok(data)
}

fn print_result(data: &RunData) {
    println!(
        "Normsq result: {:.8e}  diff: {:.3e}  {}  time: {:.3}  GF/s: {:.3}",
        data.normsq,
        data.normsqdiff,
        if data.pass() { "PASS" } else { "FAIL" },
        data.time,
        data.floprate,
    );
}

fn self_test() -> anyhow::Result<bool> {
    const CASE: &str = "--nx 3 --ny 5 --nz 6 --ne 2 --na 5 --nblock_z 2 --nproc_x 1";

    print!("{CASE} // ");
    let first = perform(Args::parse_str(CASE))?;
    print!("{CASE} // ");
    let second = perform(Args::parse_str(CASE))?;

    let pass = first.pass() && second.pass() && first.normsq == second.normsq;
    println!(
        "{:e} {:e} {:e} {:e} // {} {} {} // {}",
        first.normsqdiff,
        second.normsqdiff,
        first.normsq,
        second.normsq,
        u8::from(first.normsq == second.normsq),
        u8::from(first.pass()),
        u8::from(second.pass()),
        if pass { "PASS" } else { "FAIL" },
    );
    Ok(pass)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let argv: Vec<String> = std::env::args().skip(1).collect();

    if argv.is_empty() {
        if !self_test()? {
            std::process::exit(1);
        }
        return Ok(());
    }

    let data = perform(Args::new(argv))?;
    print_result(&data);
    if !data.pass() {
        std::process::exit(1);
    }
    Ok(())
}
