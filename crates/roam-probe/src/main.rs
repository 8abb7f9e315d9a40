//! roam-probe — command-line client for Roam servers.
//!
//! Streams the globally-synchronous view of a simulation to stdout, one
//! line per agent per intersection window.

use anyhow::{bail, Context, Result};

use libroam::{time_limit_ms, Command, FeatureSet, MvispClient, ProtocolError, SimulationSpec, UampClient};

const DEFAULT_ADDR: &str = "127.0.0.1:4211";

fn print_usage() {
    println!("Usage: roam-probe [options] <command>");
    println!();
    println!("Commands");
    println!("  uamp                        Propose a simulation and stream it");
    println!("  mvisp                       Watch the server's published simulation");
    println!();
    println!("Options");
    println!("  --addr <host:port>          Server address (default: {DEFAULT_ADDR})");
    println!("  --windows <n>               Stop after n intersection windows (0 = run out)");
    println!("  --agents <n>                uamp: agents to simulate (default: 4)");
    println!("  --duration <s>              uamp: simulation length in seconds (default: 60)");
    println!("  --seed <n>                  uamp: simulation seed (default: 1)");
    println!("  --states <a,b,c>            mvisp: state table to accept with");
    println!("  --mark <agent:time:state>   mvisp: send one state change (repeatable)");
    println!();
    println!("Examples:");
    println!("  roam-probe uamp --agents 10 --duration 120 --seed 7");
    println!("  roam-probe --addr sim.example.org:4211 mvisp --states idle,busy");
}

struct Options {
    addr: String,
    windows: u64,
    agents: u32,
    duration_s: f64,
    seed: u32,
    states: Vec<String>,
    marks: Vec<(u32, f64, u32)>,
    command: Option<String>,
}

fn parse_args() -> Result<Options> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut opts = Options {
        addr: DEFAULT_ADDR.to_string(),
        windows: 0,
        agents: 4,
        duration_s: 60.0,
        seed: 1,
        states: vec!["idle".to_string(), "busy".to_string()],
        marks: Vec::new(),
        command: None,
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--addr" => {
                i += 1;
                opts.addr = args.get(i).context("--addr requires a value")?.clone();
            }
            "--windows" => {
                i += 1;
                opts.windows = args
                    .get(i)
                    .context("--windows requires a value")?
                    .parse()
                    .context("--windows must be a number")?;
            }
            "--agents" => {
                i += 1;
                opts.agents = args
                    .get(i)
                    .context("--agents requires a value")?
                    .parse()
                    .context("--agents must be a number")?;
            }
            "--duration" => {
                i += 1;
                opts.duration_s = args
                    .get(i)
                    .context("--duration requires a value")?
                    .parse()
                    .context("--duration must be seconds")?;
            }
            "--seed" => {
                i += 1;
                opts.seed = args
                    .get(i)
                    .context("--seed requires a value")?
                    .parse()
                    .context("--seed must be a number")?;
            }
            "--states" => {
                i += 1;
                opts.states = args
                    .get(i)
                    .context("--states requires a,b,c")?
                    .split(',')
                    .map(str::to_string)
                    .collect();
            }
            "--mark" => {
                i += 1;
                let text = args.get(i).context("--mark requires agent:time:state")?;
                let parts: Vec<&str> = text.split(':').collect();
                let [agent, time, state] = parts.as_slice() else {
                    bail!("--mark expects agent:time:state");
                };
                opts.marks.push((
                    agent.parse().context("--mark: bad agent")?,
                    time.parse().context("--mark: bad time")?,
                    state.parse().context("--mark: bad state")?,
                ));
            }
            other if opts.command.is_none() && !other.starts_with('-') => {
                opts.command = Some(other.to_string());
            }
            other => {
                print_usage();
                bail!("unknown option: {other}");
            }
        }
        i += 1;
    }
    Ok(opts)
}

fn print_window(cmd: &Command) {
    let presence = if cmd.present { "" } else { "  (away)" };
    println!(
        "[{:8.3}s -> {:8.3}s] agent {:>4}  ({:8.2}, {:8.2}, {:6.2}) -> ({:8.2}, {:8.2}, {:6.2}){}",
        cmd.from_time,
        cmd.to_time,
        cmd.agent,
        cmd.from_x,
        cmd.from_y,
        cmd.from_z,
        cmd.to_x,
        cmd.to_y,
        cmd.to_z,
        presence,
    );
}

fn run_uamp(opts: &Options) -> Result<()> {
    let spec = SimulationSpec {
        num_agents: opts.agents,
        time_limit_ms: time_limit_ms(opts.duration_s)?,
        seed: opts.seed,
    };
    let mut client = UampClient::connect(&opts.addr, spec, FeatureSet::default())
        .context("connecting")?;
    println!(
        "simulating {} agents for {:.1}s (seed {})",
        client.num_agents(),
        client.duration(),
        opts.seed
    );

    let mut window = 0u64;
    loop {
        if opts.windows > 0 && window == opts.windows {
            break;
        }
        for agent in 0..client.num_agents() {
            print_window(&client.intersect_command(agent)?);
        }
        match client.advance_oldest() {
            Ok(()) => window += 1,
            Err(ProtocolError::NoMoreData(_)) => break,
            Err(e) => return Err(e.into()),
        }
    }
    client.terminate()?;
    Ok(())
}

fn run_mvisp(opts: &Options) -> Result<()> {
    let states = opts.states.clone();
    let client = MvispClient::connect(&opts.addr, FeatureSet::default(), move |offer| {
        println!(
            "offered {} agents for {:.1}s",
            offer.num_agents,
            offer.time_limit_ms as f64 / 1000.0
        );
        Some(states)
    })
    .context("connecting")?;

    let Some(mut client) = client else {
        println!("offer denied");
        return Ok(());
    };

    for &(agent, time, state) in &opts.marks {
        client.change_state(agent, time, state)?;
        println!("marked agent {agent} as {} at {time}s", client.state_name(state));
    }

    let mut window = 0u64;
    loop {
        if opts.windows > 0 && window == opts.windows {
            break;
        }
        for agent in 0..client.num_agents() {
            print_window(&client.intersect_command(agent)?);
        }
        match client.advance_oldest() {
            Ok(()) => window += 1,
            Err(ProtocolError::NoMoreData(_)) => break,
            Err(e) => return Err(e.into()),
        }
    }
    client.terminate()?;
    Ok(())
}

fn main() -> Result<()> {
    let opts = parse_args()?;
    match opts.command.as_deref() {
        Some("uamp") => run_uamp(&opts),
        Some("mvisp") => run_mvisp(&opts),
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}");
        }
        None => {
            print_usage();
            bail!("a command is required");
        }
    }
}
