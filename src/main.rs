// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Init { name, path, force }) => commands::cmd_init(&name, &path, force),
        Some(Commands::Build {
            path,
            output,
            install_dir,
            tool_dir,
        }) => commands::cmd_build(&path, &output, install_dir.as_deref(), tool_dir.as_deref()),
        Some(Commands::Manifest { path, output }) => commands::cmd_manifest(&path, &output),
        Some(Commands::Deps { path, format }) => commands::cmd_deps(&path, format),
        Some(Commands::Validate {
            content,
            allow_list,
        }) => commands::cmd_validate(&content, &allow_list),
        Some(Commands::Keygen {
            output,
            key_id,
            force,
        }) => commands::cmd_keygen(&output, key_id, force),
        Some(Commands::Verify {
            package,
            certificate,
            alignment,
        }) => commands::cmd_verify(&package, certificate.as_deref(), alignment),
        None => {
            println!("apexbuild v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'apexbuild --help' for usage information");
            Ok(())
        }
    };

    if let Err(err) = &result {
        let status = exit_status(err);
        if status != 1 {
            eprintln!("Error: {:?}", err);
            std::process::exit(status);
        }
    }

    result
}

/// Exit status for a failed command; allow-list violations exit with 2
fn exit_status(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<apexbuild::Error>() {
        Some(e) if e.is_content_violation() => 2,
        _ => 1,
    }
}
