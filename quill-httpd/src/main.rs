use std::path::PathBuf;
use std::process;

use quill_httpd as httpd;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = parse_options()?;

    httpd::logger::init().expect("Global logger hasn't already been set");
    tracing::info!("version {}", env!("CARGO_PKG_VERSION"));

    match httpd::run(options).await {
        Ok(()) => {}
        Err(err) => {
            tracing::error!("Fatal: {:#}", err);
            process::exit(1);
        }
    }
    Ok(())
}

/// Parse command-line arguments into daemon options.
fn parse_options() -> anyhow::Result<httpd::Options> {
    use lexopt::prelude::*;

    let mut parser = lexopt::Parser::from_env();
    let mut config = None;
    let mut listen = None;

    while let Some(arg) = parser.next()? {
        match arg {
            Long("config") | Short('c') => {
                let path = PathBuf::from(parser.value()?);
                config = Some(path);
            }
            Long("listen") => {
                let addr = parser.value()?.parse()?;
                listen = Some(addr);
            }
            Long("help") | Short('h') => {
                println!("usage: quill-httpd --config <path> [--listen <addr>]");
                process::exit(0);
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(httpd::Options {
        config: config.ok_or_else(|| anyhow::anyhow!("a --config <path> is required"))?,
        listen,
    })
}
