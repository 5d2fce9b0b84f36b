use std::{path::Path, process};

use caboot::{
    cli::{
        Context,
        options::Options,
        report::{ReportFormat, error_report},
    },
    commons::error::Error,
    config::Config,
};

fn load_config(path: Option<&Path>) -> Result<Config, Error> {
    match path {
        Some(path) => Ok(Config::parse(path)?),
        None => Ok(Config::default()),
    }
}

fn exit_with(e: &Error, format: ReportFormat) -> ! {
    eprintln!("{}", error_report(e, format));
    process::exit(1);
}

#[tokio::main]
async fn main() {
    let options = Options::from_args();
    let format = options.general.format;

    let config = match load_config(options.general.config.as_deref()) {
        Ok(config) => config,
        Err(e) => exit_with(&e, format),
    };

    let ctx = Context::new(config, &options.general);
    if let Err(e) = ctx.config().init_logging() {
        exit_with(&Error::from(e), format);
    }

    match options.command.run(&ctx).await {
        Ok(outcome) => println!("{}", outcome.report(format)),
        Err(e) => exit_with(&e, format),
    }
}
