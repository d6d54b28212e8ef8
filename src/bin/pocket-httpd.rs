use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;
use nix::unistd::{chdir, chroot};

use pocket_http::config::{Invocation, ServerConfig};
use pocket_http::server::{create_listener, install_signal_handlers, Server};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args();
    let name = args.next().unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
    let mut server = match ServerConfig::from_args(args)? {
        Invocation::Run(server) => server,
        Invocation::Usage(failed) => {
            print!("{}", ServerConfig::default().usage(&name));
            std::process::exit(if failed { 1 } else { 0 });
        }
    };

    println!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    info!("preparing socket");
    let socket_addr = server.socket_addr().context("malformed --addr argument")?;
    let listener = create_listener(socket_addr)?;

    install_signal_handlers()?;

    if server.want_chroot {
        chdir(server.wwwroot.as_path()).with_context(|| {
            format!(
                "failed to change working directory to {}",
                server.wwwroot.display()
            )
        })?;
        chroot(server.wwwroot.as_path()).with_context(|| {
            format!(
                "failed to change root directory to {}",
                server.wwwroot.display()
            )
        })?;
        info!("chrooted to `{}'", server.wwwroot.display());

        server.wwwroot = PathBuf::from("/");
    }

    info!("listening for connections on http://{}/", socket_addr);
    Server::new(listener, server.wwwroot, server.max_request_len).run()?;

    // Termination is only ever requested by a signal.
    std::process::exit(1)
}
