mod logger;
mod parse_args;

use anyhow::Context;
use dzrp_debugger::{DzrpServer, Machine, MemoryMachine, ServerConfig};
use log::info;
use parse_args::parse_args;

use std::sync::Arc;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error parsing arguments: {}", e);
            std::process::exit(1);
        }
    };

    logger::init(args.verbosity, args.log_file.as_deref())?;
    if let Some(path) = &args.log_file {
        eprintln!("Logging to: {}", path);
    }

    let config = ServerConfig {
        port: args.port,
        max_frame_len: args.max_frame_len,
        ..ServerConfig::default()
    };
    let machine: Arc<dyn Machine> = Arc::new(MemoryMachine::new());
    let mut server = DzrpServer::bind(config, machine).context("failed to start DZRP server")?;
    let handle = server.handle();
    eprintln!(
        "DZRP server on {}, waiting for DeZog (Ctrl-C to quit)",
        server.local_addr()?
    );

    let ctrlc_handle = handle.clone();
    ctrlc::set_handler(move || ctrlc_handle.shutdown())
        .context("failed to install Ctrl-C handler")?;

    let server_thread = std::thread::Builder::new()
        .name("dzrp".to_string())
        .spawn(move || server.run())
        .context("failed to spawn server thread")?;

    // Stand-in for the emulator's frame loop
    let tick = Duration::from_millis(args.tick_ms.max(1));
    while !server_thread.is_finished() {
        handle.tick();
        std::thread::sleep(tick);
    }
    server_thread
        .join()
        .map_err(|_| anyhow::anyhow!("server thread panicked"))?;

    info!(target: "dzrp", "exiting");
    Ok(())
}
