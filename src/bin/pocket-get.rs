use std::fs::File;
use std::io::BufWriter;

use anyhow::{Context, Result};
use chrono::Utc;

use pocket_http::client::{connect, receive, send_request};
use pocket_http::config::{ClientConfig, Invocation};
use pocket_http::url::Target;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args();
    let name = args.next().unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
    let client = match ClientConfig::from_args(args)? {
        Invocation::Run(client) => client,
        Invocation::Usage(failed) => {
            print!("{}", ClientConfig::usage(&name));
            std::process::exit(if failed { 1 } else { 0 });
        }
    };

    let target = Target::parse(&client.url)?;
    let since = client.since.map(|offset| offset.encode(Utc::now()));

    println!(
        "connecting to [{}], proto [{}], resource [/{}], port [{}]",
        target.host, target.scheme, target.resource, target.port
    );
    let mut stream = connect(&target)?;

    let method = send_request(&mut stream, client.method, &target, since.as_deref())?;
    println!("sent {} request", method);

    let output = File::create(&client.output).with_context(|| {
        format!(
            "failed to open response file [{}] for writing",
            client.output.display()
        )
    })?;
    let mut sink = BufWriter::new(output);
    let received = receive(&mut stream, &mut sink)?;

    match &received.status {
        Some(status) => println!("received response {}", status),
        None => println!("received no status line"),
    }
    println!(
        "wrote {} bytes to {}",
        received.bytes,
        client.output.display()
    );
    Ok(())
}
