use pktsynth::export::PcapSink;
use pktsynth::{instantiate_root, Context, SpecNode};
mod cmd;

use std::process;

use clap::Parser;

/// The entry point of the application.
///
/// It loads the spec, compiles it and exports the requested number of packets
fn main() {
    let args = cmd::Args::parse();
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = args.log_level {
        builder.filter_level(level.into());
    }
    builder.init();

    match run(args) {
        Ok(count) => log::info!("{count} packets generated"),
        Err(e) => {
            log::error!("{e}");
            process::exit(1);
        }
    }
}

fn run(args: cmd::Args) -> pktsynth::Result<u64> {
    if let Some(s) = args.random_seed {
        log::info!("Generating with seed {s}");
    }
    let spec = SpecNode::from_file(&args.spec)?;
    let mut ctx = Context::for_spec_file(&args.spec, args.random_seed);
    let (directives, stream) = instantiate_root(&spec, &mut ctx)?;
    let count = match args.count {
        Some(count) => count,
        None => match directives.get("count") {
            Some(value) => value.as_u64().ok_or_else(|| {
                pktsynth::Error::Semantic(format!("invalid packet count {value}"))
            })?,
            None => 1,
        },
    };
    let sink = PcapSink::new(&args.outfile, count);
    log::debug!("Exporting {} packets", sink.count());
    sink.write(stream)
}
