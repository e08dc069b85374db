use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use imgbak_core::monitor::{self, CopyCommand, CopyReport};
use imgbak_core::units::{human_time, to_human};
use imgbak_core::{DEFAULT_BLOCK_SIZE, Device, ToolConfig, space, topology};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Parser)]
#[command(name = "imgbak")]
#[command(about = "Back up a block device to an image file with dd", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    tools: ToolArgs,

    /// Print debug logging (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Args)]
struct ToolArgs {
    /// Block size passed to dd as bs=
    #[arg(long, global = true, env = "IMGBAK_BLOCK_SIZE", default_value = DEFAULT_BLOCK_SIZE)]
    block_size: String,

    /// Do not prefix fdisk and dd with sudo
    #[arg(long, global = true, env = "IMGBAK_NO_SUDO")]
    no_sudo: bool,

    /// The dd program to run
    #[arg(long, global = true, env = "IMGBAK_DD", default_value = "dd")]
    dd: String,

    /// The fdisk program to run
    #[arg(long, global = true, env = "IMGBAK_FDISK", default_value = "fdisk")]
    fdisk: String,
}

impl From<&ToolArgs> for ToolConfig {
    fn from(args: &ToolArgs) -> Self {
        Self {
            fdisk_program: args.fdisk.clone(),
            dd_program: args.dd.clone(),
            block_size: args.block_size.clone(),
            use_sudo: !args.no_sudo,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Back up a device or partition to an image file
    Backup {
        /// Output image file
        #[arg(required = true)]
        image: PathBuf,

        /// Device or partition to read (asked interactively when omitted)
        #[arg(short = 'D', long)]
        device: Option<String>,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Do not show live progress, just wait for dd to finish
        #[arg(short, long)]
        quiet: bool,

        /// Bytes to keep free on the image's filesystem
        #[arg(long, env = "IMGBAK_SPACE_MARGIN", default_value_t = 0)]
        space_margin: u64,
    },
    /// List devices and partitions reported by fdisk
    List,
}

/// Presents an interactive menu for the user to select a device or partition.
fn select_source(devices: &[Device], prompt: &str) -> Result<String> {
    let mut paths = Vec::new();
    let mut items = Vec::new();
    for device in devices {
        paths.push(device.path.clone());
        items.push(device.to_string());
        for partition in &device.partitions {
            paths.push(partition.path.clone());
            items.push(format!("  {partition}"));
        }
    }

    if items.is_empty() {
        return Err(anyhow!("fdisk reported no devices."));
    }

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(&items)
        .default(0)
        .interact()?;

    Ok(paths.swap_remove(selection))
}

/// Presents a final "Yes/No" confirmation to the user.
fn confirm_operation(prompt: &str) -> Result<bool> {
    let confirmation = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(confirmation)
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn print_report(report: &CopyReport, interrupted: bool) {
    println!();
    println!(
        "{}",
        style(format!(
            "Total time: {}",
            human_time(report.wall_time.as_secs())
        ))
        .green()
    );
    if let Some(bytes) = report.artifact_bytes {
        println!(
            "{}",
            style(format!(
                "Final image size: {}",
                to_human(bytes, true, true, false)
            ))
            .green()
        );
    }

    if interrupted {
        println!(
            "{} The copy was interrupted; the image is incomplete and should be deleted.",
            style("WARNING:").red().bold()
        );
    } else if report.is_success() {
        println!("\n✨ {}", style("Successfully created image!").green());
    } else {
        println!(
            "{} dd ended with {} (the image might be ok, verify it manually).",
            style("WARNING:").yellow().bold(),
            report.exit
        );
    }
}

fn backup(
    config: &ToolConfig,
    image: &Path,
    device: Option<String>,
    yes: bool,
    quiet: bool,
    space_margin: u64,
) -> Result<()> {
    let devices = topology::list_devices(config).context("Could not list devices")?;
    let source = match device {
        Some(path) => path,
        None => select_source(&devices, "Select the device or partition to back up")?,
    };
    let size = topology::resolve_size(&devices, &source)
        .ok_or_else(|| anyhow!("Device or partition '{source}' not found."))?;

    let free = space::space_for(image)
        .with_context(|| format!("Could not determine free space for {}", image.display()))?;
    println!(
        "{}",
        style(format!(
            "Approximate image size: {}",
            to_human(size, true, true, false)
        ))
        .underlined()
    );
    println!(
        "{}",
        style(format!(
            "Free space on image partition: {}",
            to_human(free.available_bytes, true, true, true)
        ))
        .underlined()
    );
    space::ensure_free_space(&free, size, space_margin)?;

    let command = CopyCommand::new(&source, image, config);
    println!("  Device:  {}", style(&source).cyan());
    println!("  Image:   {}", style(image.display()).cyan());
    println!("  Command: {}", style(command.display()).green());
    println!();

    if !yes && !confirm_operation("Create the image now?")? {
        println!("Image creation cancelled.");
        return Ok(());
    }

    // The copy cannot be cancelled; Ctrl+C only lets us report the truncated image.
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })?;

    let report = if quiet {
        monitor::run_quiet(&command)?
    } else {
        println!();
        let copy_pb = ProgressBar::new(size);
        copy_pb.set_prefix("Copying");
        copy_pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:10} [{bar:30.green/black}] {msg}")?
                .progress_chars("■ "),
        );

        let result = monitor::run(&command, size, |row| {
            copy_pb.set_position(row.copied_bytes.min(size));
            copy_pb.set_message(row.to_string());
        });

        match result {
            Ok(report) => {
                copy_pb.finish();
                report
            }
            Err(e) => {
                copy_pb.finish_with_message("❌ Operation failed.");
                return Err(e.into());
            }
        }
    };

    print_report(&report, interrupted.load(Ordering::SeqCst));
    Ok(())
}

fn list(config: &ToolConfig) -> Result<()> {
    let devices = topology::list_devices(config).context("Could not list devices")?;
    if devices.is_empty() {
        println!("fdisk reported no devices.");
        return Ok(());
    }

    println!("Found {} devices:", devices.len());
    println!("\n  {:<18} {:>10}  {}", "DEVICE", "SIZE", "TYPE");
    println!("  {:-<18} {:-<10}  {:-<20}", "", "", "");
    for device in &devices {
        let label = device.disklabel.as_deref().unwrap_or("-");
        let ntfs = if device.is_ntfs { " (NTFS)" } else { "" };
        println!(
            "  {:<18} {:>10}  {}{}",
            style(&device.path).cyan(),
            device.size_human(),
            label,
            ntfs
        );
        for partition in &device.partitions {
            let boot = if partition.is_boot { " *" } else { "" };
            println!(
                "    {:<16} {:>10}  {}{}",
                partition.path,
                to_human(partition.size_bytes, true, true, true),
                partition.kind,
                boot
            );
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    let config = ToolConfig::from(&cli.tools);
    debug!("tool configuration: {config:?}");

    match cli.command {
        Commands::Backup {
            image,
            device,
            yes,
            quiet,
            space_margin,
        } => backup(&config, &image, device, yes, quiet, space_margin),
        Commands::List => list(&config),
    }
}
