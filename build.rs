// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: path to apex.toml or its directory
fn config_arg() -> Arg {
    Arg::new("path")
        .default_value(".")
        .help("Path to apex.toml or directory containing it")
}

/// Common argument: output directory
fn output_arg() -> Arg {
    Arg::new("output")
        .short('o')
        .long("output")
        .value_name("DIR")
        .default_value("./out/apex")
        .help("Output directory")
}

fn build_cli() -> Command {
    Command::new("apexbuild")
        .version(env!("CARGO_PKG_VERSION"))
        .author("apexbuild contributors")
        .about("Assemble signed filesystem-image packages")
        .subcommand_required(false)
        .subcommand(
            Command::new("init")
                .about("Create a minimal apex.toml")
                .arg(Arg::new("name").required(true).help("Package name"))
                .arg(Arg::new("path").default_value(".").help("Directory to write apex.toml into"))
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Overwrite an existing apex.toml"),
                ),
        )
        .subcommand(
            Command::new("build")
                .about("Build a package")
                .arg(config_arg())
                .arg(output_arg())
                .arg(
                    Arg::new("install_dir")
                        .long("install-dir")
                        .value_name("DIR")
                        .help("Copy installable packages into this directory"),
                )
                .arg(
                    Arg::new("tool_dir")
                        .long("tool-dir")
                        .value_name("DIR")
                        .help("Directory searched for external tools before PATH"),
                ),
        )
        .subcommand(
            Command::new("manifest")
                .about("Generate the manifest outputs without building an image")
                .arg(config_arg())
                .arg(output_arg()),
        )
        .subcommand(
            Command::new("deps")
                .about("Show the dependency-info report")
                .arg(config_arg())
                .arg(
                    Arg::new("format")
                        .long("format")
                        .value_parser(["text", "json"])
                        .default_value("text")
                        .help("Output format"),
                ),
        )
        .subcommand(
            Command::new("validate")
                .about("Check a content listing against an allow-list")
                .arg(Arg::new("content").required(true).help("Content listing"))
                .arg(Arg::new("allow_list").required(true).help("Reviewed allow-list")),
        )
        .subcommand(
            Command::new("keygen")
                .about("Generate an Ed25519 container signing key pair")
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .default_value("apex-container-key")
                        .help("Output path for key files (without extension)"),
                )
                .arg(Arg::new("key_id").long("key-id").help("Key identifier"))
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Overwrite existing key files"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify a signed package")
                .arg(Arg::new("package").required(true).help("Path to the .apex package"))
                .arg(
                    Arg::new("certificate")
                        .long("certificate")
                        .help("Require the package to be signed by this certificate"),
                )
                .arg(
                    Arg::new("alignment")
                        .long("alignment")
                        .default_value("4096")
                        .help("Expected payload alignment in bytes"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("apexbuild.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
