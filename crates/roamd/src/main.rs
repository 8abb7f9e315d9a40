//! roamd — Roam mobility server daemon.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use roam_core::config::RoamConfig;
use roam_core::error::ProtocolError;
use roamd::{bind_with_retry, LogObserver, Server};

fn print_usage() {
    println!("Usage: roamd [options]");
    println!();
    println!("Protocol");
    println!("  --uamp                  Serve UAMP: clients propose simulations (default)");
    println!("  --mvisp                 Serve MVISP: publish the configured simulation");
    println!("  --3d                    Advertise 3D coordinates");
    println!("  --appearance            Advertise agent appearance/disappearance");
    println!();
    println!("Simulation (MVISP offer; also the UAMP map and sampling)");
    println!("  --agents <n>            Agents in the published simulation");
    println!("  --duration <s>          Published simulation length in seconds");
    println!("  --map <WxH[xD]>         Map extent in metres, e.g. 1000x800 or 500x500x50");
    println!("  --speed <lo:hi>         Agent speed range in m/s");
    println!("  --pause <lo:hi>         Pause range at destinations in seconds");
    println!("  --step <ms>             Milliseconds between updates");
    println!();
    println!("Server");
    println!("  --port <port>           Listening port");
    println!("  --threads <n>           Simulation workers per connection (0 = all cores)");
    println!("  --daemon                Detach after binding");
    println!("  --config <path>         Config file (default: $ROAM_CONFIG or XDG path)");
    println!();
    println!("Examples:");
    println!("  roamd --port 4211 --threads 4");
    println!("  roamd --mvisp --agents 50 --duration 600 --daemon");
}

fn parse_range(text: &str, flag: &str) -> Result<(f64, f64)> {
    let (lo, hi) = text
        .split_once(':')
        .with_context(|| format!("{flag} expects lo:hi"))?;
    let lo: f64 = lo.parse().with_context(|| format!("{flag}: bad low bound"))?;
    let hi: f64 = hi.parse().with_context(|| format!("{flag}: bad high bound"))?;
    if lo < 0.0 || hi < lo {
        bail!("{flag}: range must satisfy 0 <= lo <= hi");
    }
    Ok((lo, hi))
}

fn parse_map(text: &str) -> Result<(f64, f64, Option<f64>)> {
    let parts: Vec<&str> = text.split('x').collect();
    match parts.as_slice() {
        [w, h] => Ok((w.parse()?, h.parse()?, None)),
        [w, h, d] => Ok((w.parse()?, h.parse()?, Some(d.parse()?))),
        _ => bail!("--map expects WxH or WxHxD in metres"),
    }
}

fn main() -> Result<()> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=debug roamd
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config_path: Option<PathBuf> = None;

    // First pass: find --config and --help before anything else matters.
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--config" => {
                i += 1;
                config_path = Some(PathBuf::from(
                    args.get(i).context("--config requires a path")?,
                ));
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => RoamConfig::load_from(path).context("loading config")?,
        None => RoamConfig::load().context("loading config")?,
    };

    // Second pass: flags override the loaded config.
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => i += 1,
            "--uamp" => config.server.protocol = "uamp".to_string(),
            "--mvisp" => config.server.protocol = "mvisp".to_string(),
            "--3d" => config.server.three_d = true,
            "--appearance" => config.server.appearance = true,
            "--daemon" => config.server.daemon = true,
            "--port" => {
                i += 1;
                let text = args.get(i).context("--port requires a value")?;
                config.network.port = text
                    .parse()
                    .map_err(|_| ProtocolError::InvalidPort(text.clone()))?;
            }
            "--threads" => {
                i += 1;
                config.server.worker_threads = args
                    .get(i)
                    .context("--threads requires a value")?
                    .parse()
                    .context("--threads must be a number")?;
            }
            "--agents" => {
                i += 1;
                config.mobility.agents = args
                    .get(i)
                    .context("--agents requires a value")?
                    .parse()
                    .context("--agents must be a number")?;
            }
            "--duration" => {
                i += 1;
                config.mobility.duration_s = args
                    .get(i)
                    .context("--duration requires a value")?
                    .parse()
                    .context("--duration must be seconds")?;
            }
            "--step" => {
                i += 1;
                config.mobility.step_ms = args
                    .get(i)
                    .context("--step requires a value")?
                    .parse()
                    .context("--step must be milliseconds")?;
            }
            "--speed" => {
                i += 1;
                let range = args.get(i).context("--speed requires lo:hi")?;
                let (lo, hi) = parse_range(range, "--speed")?;
                config.mobility.speed_min_mps = lo;
                config.mobility.speed_max_mps = hi;
            }
            "--pause" => {
                i += 1;
                let range = args.get(i).context("--pause requires lo:hi")?;
                let (lo, hi) = parse_range(range, "--pause")?;
                config.mobility.pause_min_s = lo;
                config.mobility.pause_max_s = hi;
            }
            "--map" => {
                i += 1;
                let (w, h, d) = parse_map(args.get(i).context("--map requires WxH[xD]")?)?;
                config.mobility.map_width_m = w;
                config.mobility.map_height_m = h;
                if let Some(d) = d {
                    config.mobility.map_depth_m = d;
                }
            }
            other => {
                print_usage();
                bail!("unknown option: {other}");
            }
        }
        i += 1;
    }

    let server = Arc::new(Server {
        config: config.clone(),
        observer: Arc::new(LogObserver),
    });
    if server.variant().is_none() {
        bail!("unknown protocol {:?}; expected \"uamp\" or \"mvisp\"", config.server.protocol);
    }
    if config.server.protocol == "mvisp" && config.mobility.agents == 0 {
        bail!("an MVISP server needs at least one agent to publish");
    }

    let listener = bind_with_retry(
        config.network.port,
        config.network.bind_retries,
        Duration::from_secs(config.network.bind_retry_secs),
    )
    .context("binding listener")?;

    if config.server.daemon {
        daemonize(config.network.port)?;
    }

    tracing::info!(
        port = config.network.port,
        protocol = %config.server.protocol,
        "roamd serving"
    );
    server.run(listener);
    Ok(())
}

/// Fork into the background. The parent announces the child on stdout and
/// exits; the child detaches from the terminal and closes its standard
/// streams.
fn daemonize(port: u16) -> Result<()> {
    unsafe {
        let pid = libc::fork();
        if pid < 0 {
            bail!("fork failed");
        }
        if pid > 0 {
            println!("ready on port {port} with PID {pid}");
            std::process::exit(0);
        }

        libc::setsid();
        let devnull = libc::open(b"/dev/null\0".as_ptr() as *const libc::c_char, libc::O_RDWR);
        if devnull >= 0 {
            libc::dup2(devnull, 0);
            libc::dup2(devnull, 1);
            libc::dup2(devnull, 2);
            if devnull > 2 {
                libc::close(devnull);
            }
        }
    }
    Ok(())
}
