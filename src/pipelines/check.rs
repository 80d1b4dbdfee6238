use anyhow::Result;
use colored::*;
use std::path::{Path, PathBuf};

use wasmode::config;
use wasmode::detect::{detect, DetectInput};
use wasmode::shim::SHIM_FILE_NAME;
use wasmode::toolchain::{install_hint, version};
use wasmode::{ProjectKind, Toolchain};

/// Reports toolchain availability and what kind of project lives at `root`.
///
/// Fails only when the standard Go toolchain is missing, since every mode
/// but Large is optional.
pub fn execute_check_pipeline(root: &Path) -> Result<()> {
    let config = config::load_or_default(root)?;

    let mut go_missing = false;
    for toolchain in [Toolchain::Go, Toolchain::TinyGo] {
        match version(toolchain) {
            Ok(output) => println!("{} {}: {}", "[OK]".green().bold(), toolchain, output),
            Err(e) => {
                println!(
                    "{} {}: {:#} ({})",
                    "[WARN]".yellow().bold(),
                    toolchain,
                    e,
                    install_hint(toolchain)
                );
                go_missing |= toolchain == Toolchain::Go;
            }
        }
    }

    let source_dir = PathBuf::from(&config.build.source_dir);
    let kind = detect(&DetectInput {
        root_dir: root,
        source_dir: &source_dir,
        main_input_file: &config.build.main_input_file,
        shim_path: Some(root.join(&config.serve.shim_output_dir).join(SHIM_FILE_NAME)),
    });
    match kind {
        ProjectKind::Standard => println!("{} Go WebAssembly project detected", "[OK]".green().bold()),
        ProjectKind::Enhanced => println!(
            "{} Go WebAssembly project detected (TinyGo runtime shim)",
            "[OK]".green().bold()
        ),
        ProjectKind::Undetected | ProjectKind::Unrecognized => println!(
            "{} No Go WebAssembly project found under {}",
            "[WARN]".yellow().bold(),
            root.display()
        ),
    }

    if go_missing {
        anyhow::bail!("Go toolchain is required: {}", install_hint(Toolchain::Go));
    }

    println!("{} Environment check passed", "[OK]".green().bold());
    Ok(())
}
