use anyhow::Result;
use clap::Parser;
use randr_manager::config::{self, Settings};
use randr_manager::hooks::ScriptRunner;
use randr_manager::xrandr::Xrandr;
use randr_manager::{ChangeOutcome, Manager, Options, ProfileStore, virtual_profile, watch};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Select and apply a display layout for the currently connected outputs.
///
/// Without an action, lists the stored profiles and which of them match the
/// connected hardware.
#[derive(Debug, Parser)]
#[command(name = "randr-manager", version, about)]
struct Cli {
    /// Load the first profile detected for the connected outputs
    #[arg(short, long)]
    change: bool,

    /// Load the detected profile following the currently active one
    #[arg(long, conflicts_with = "change")]
    cycle: bool,

    /// Load a profile or virtual layout by name
    #[arg(short, long, value_name = "PROFILE")]
    load: Option<String>,

    /// Save the current setup under this name
    #[arg(short, long, value_name = "PROFILE", conflicts_with_all = ["load", "change", "cycle"])]
    save: Option<String>,

    /// Remove a saved profile
    #[arg(short, long, value_name = "PROFILE", conflicts_with_all = ["load", "save", "change", "cycle"])]
    remove: Option<String>,

    /// Profile to fall back to when no stored profile matches
    #[arg(short, long, value_name = "PROFILE")]
    default: Option<String>,

    /// Print the fingerprint of the connected outputs and exit
    #[arg(long)]
    fingerprint: bool,

    /// Dump the current configuration in the profile file format and exit
    #[arg(long = "config")]
    dump_config: bool,

    /// Only list profiles matching the connected outputs
    #[arg(long, conflicts_with = "current")]
    detected: bool,

    /// Only list profiles the live configuration already satisfies
    #[arg(long)]
    current: bool,

    /// List as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Apply the chosen profile even when nothing seems to have changed
    #[arg(short, long)]
    force: bool,

    /// Print the xrandr invocations instead of executing them
    #[arg(long)]
    dry_run: bool,

    /// Match outputs by panel identity instead of connector name
    #[arg(long)]
    match_edid: bool,

    /// Keep lid-closed internal panels in the fingerprint
    #[arg(long)]
    ignore_lid: bool,

    /// Comma separated option names to ignore when comparing and applying
    #[arg(long, value_name = "OPTIONS")]
    skip_options: Vec<String>,

    /// Keep running and re-detect every SECONDS
    #[arg(long, value_name = "SECONDS")]
    watch: Option<u64>,

    /// Verbose output
    #[arg(long)]
    debug: bool,

    /// Same as --load
    #[arg(value_name = "PROFILE")]
    profile: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.debug { "debug" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    // Extra profile roots can only come from settings, so the settings are
    // read from the base roots first.
    let settings = Settings::load(&config::profile_roots(&Settings::default()));
    let roots = config::profile_roots(&settings);
    let store = ProfileStore::load(&roots);

    let skip_options = if cli.skip_options.is_empty() {
        config::normalize_skip_options(&settings.skip_options)
    } else {
        config::normalize_skip_options(&cli.skip_options)
    };
    let options = Options {
        default_profile: cli.default.clone().or(settings.default_profile.clone()),
        skip_options,
        match_edid: cli.match_edid || settings.match_edid,
        ignore_lid: cli.ignore_lid || settings.ignore_lid,
        force: cli.force,
        cycle: cli.cycle,
    };

    let mut manager = Manager::new(
        Box::new(Xrandr::new(cli.dry_run)),
        Box::new(ScriptRunner::new(config::hook_dirs())),
        store,
        options,
    );

    if let Some(name) = &cli.save {
        manager.save(name)?;
        println!("Saved current configuration as profile '{}'", name);
        return Ok(());
    }
    if let Some(name) = &cli.remove {
        manager.remove(name)?;
        println!("Removed profile '{}'", name);
        return Ok(());
    }
    if cli.fingerprint {
        let outputs = manager.query()?;
        for line in manager.fingerprint_lines(&outputs) {
            println!("{}", line);
        }
        return Ok(());
    }
    if cli.dump_config {
        let outputs = manager.query()?;
        for line in manager.config_lines(&outputs) {
            println!("{}", line);
        }
        return Ok(());
    }

    if let Some(seconds) = cli.watch {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        return runtime.block_on(watch::run(&mut manager, Duration::from_secs(seconds.max(1))));
    }

    let requested = cli.load.as_deref().or(cli.profile.as_deref());
    if requested.is_some() || cli.change || cli.cycle {
        return match manager.change(requested)? {
            ChangeOutcome::Applied { profile } => {
                println!("Applied profile '{}'", profile);
                Ok(())
            }
            ChangeOutcome::AlreadyCurrent { profile } => {
                println!("Profile '{}' is already active", profile);
                Ok(())
            }
            ChangeOutcome::NoMatch => {
                println!("No matching profile; configuration left unchanged");
                Ok(())
            }
        };
    }

    list(&manager, &cli)
}

fn list(manager: &Manager, cli: &Cli) -> Result<()> {
    let mut rows = manager.list()?;
    if cli.detected {
        rows.retain(|row| row.detected && !row.blocked);
    }
    if cli.current {
        rows.retain(|row| row.current && !row.blocked);
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if cli.detected || cli.current {
        for row in rows {
            println!("{}", row.name);
        }
        return Ok(());
    }

    for row in rows {
        let mut props = Vec::new();
        if row.blocked {
            props.push("(blocked)");
        } else {
            if row.detected {
                props.push("(detected)");
            }
            if row.current {
                props.push("(current)");
            }
        }
        if props.is_empty() {
            println!("{}", row.name);
        } else {
            println!("{} {}", row.name, props.join(" "));
        }
    }

    println!("\nVirtual layouts (always available with --load):");
    for (name, description) in virtual_profile::RESERVED {
        println!("  {:<15}{}", name, description);
    }
    Ok(())
}
