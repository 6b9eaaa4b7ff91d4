// CLI modules
mod cli;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use cli::{args::Args, op::Op, Publish, Rm, Serve};

command_enum! {
    (Publish, Publish),
    (Serve, Serve),
    (Rm, Rm),
}

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        // Usage goes to stderr; stdout only ever carries command output
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                eprint!("{}", e.render());
                std::process::exit(0);
            }
            _ => e.exit(),
        },
    };

    let ctx = match cli::op::OpContext::load(args.config.as_deref(), args.log_dir.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let guards = drivecast::process::init_logging(ctx.log_dir());
    tracing::debug!(command = ?args.command, "parsed command line");

    // Exit explicitly: a blocking stdin reader would otherwise hold the
    // runtime open after the command is done
    match args.command.execute(&ctx).await {
        Ok(output) => {
            let output = output.to_string();
            if !output.is_empty() {
                println!("{}", output);
            }
            drop(guards);
            std::process::exit(0);
        }
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            drop(guards);
            std::process::exit(1);
        }
    }
}
