use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use panelbus::{
    Bus, Config, ConstraintRange, Controllee, Controller, LogListener, MemoryHub, Panel,
    PropertyType, PropertyValue, Widget, WidgetSnapshot,
};

/// Bus name the configured panels are published under
const DEVICE_NAME: &str = "device";

/// Bus name of the mirroring controller
const CONSOLE_NAME: &str = "console";

/// panelbus - publish and mirror remote control panels
#[derive(Parser)]
#[command(name = "panelbus", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/panelbus/config.toml)
    #[arg(short, long, env = "PANELBUS_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Publish the configured panels and print the tree a controller sees
    Show {
        /// Print JSON instead of a tree
        #[arg(long)]
        json: bool,
    },
    /// Print the object paths the configured panels occupy
    Paths,
    /// Write a property through a controller and print the mirrored result
    Set {
        /// Widget as `<panel>/<name>/...`, e.g. `main/temp`
        widget: String,
        /// New value, parsed as the property's type
        value: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,panelbus=info",
        1 => "info,panelbus=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Show { json } => cmd_show(&config, json).await,
        Command::Paths => cmd_paths(&config),
        Command::Set { widget, value } => cmd_set(&config, &widget, &value).await,
    }
}

/// Panels from the config file, or a small oven panel if none are declared
fn panels(config: &Config) -> anyhow::Result<Vec<Widget>> {
    if config.panels.is_empty() {
        tracing::info!("no panels configured, using the demo panel");
        return Ok(vec![demo_panel()?]);
    }
    Ok(config
        .panels
        .iter()
        .map(panelbus::PanelConfig::build)
        .collect::<panelbus::Result<_>>()?)
}

fn demo_panel() -> anyhow::Result<Widget> {
    let root = Widget::container("main").with_label("Oven");
    root.add_child(
        &Widget::property("temp", PropertyValue::U16(180))
            .with_label("Temperature")
            .with_unit_of_measure("C")
            .with_constraint_range(ConstraintRange::new(
                PropertyValue::U16(50),
                PropertyValue::U16(250),
                PropertyValue::U16(5),
            )?),
    )?;
    root.add_child(
        &Widget::action("start")
            .with_label("Start")
            .on_execute(|| tracing::info!("oven started")),
    )?;
    root.add_child(&Widget::label("status", "Idle"))?;
    Ok(root)
}

/// Publish every panel on an in-process bus and mirror them from a controller
async fn mirror(config: &Config) -> anyhow::Result<(Controllee, Controller, Vec<Panel>)> {
    let hub = MemoryHub::new();
    let device: Arc<dyn Bus> = Arc::new(hub.connect(DEVICE_NAME)?);
    let console: Arc<dyn Bus> = Arc::new(hub.connect(CONSOLE_NAME)?);

    let controllee = Controllee::new(device, config)?;
    for root in panels(config)? {
        controllee.publish_panel(&root)?;
    }

    let controller = Controller::new(console, config, Arc::new(LogListener))?;
    let mirrored = controller.discover_all(DEVICE_NAME).await?;
    Ok((controllee, controller, mirrored))
}

async fn cmd_show(config: &Config, json: bool) -> anyhow::Result<()> {
    let (_controllee, _controller, mirrored) = mirror(config).await?;

    if json {
        let snapshots: Vec<_> = mirrored.iter().map(Panel::snapshot).collect();
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
        return Ok(());
    }

    for panel in &mirrored {
        println!(
            "{}/{} [{}]",
            panel.unit(),
            panel.name(),
            panel.languages().join(", ")
        );
        print_tree(&panel.root().snapshot(), 1);
    }
    Ok(())
}

fn print_tree(node: &WidgetSnapshot, depth: usize) {
    let indent = "  ".repeat(depth);
    let label = node
        .languages
        .first()
        .and_then(|l| l.opt_params.as_ref())
        .and_then(|p| p.label.as_deref())
        .unwrap_or("");
    let mut line = format!("{indent}{} ({})", node.name, node.widget_type);
    if !label.is_empty() {
        let _ = write!(line, " \"{label}\"");
    }
    if let Some(value) = &node.value {
        let _ = write!(line, " = {value}");
    }
    if let Some(text) = node.languages.first().and_then(|l| l.text.as_deref()) {
        let _ = write!(line, " \"{text}\"");
    }
    if let Some(error) = &node.error {
        let _ = write!(line, " !! {error}");
    }
    println!("{line}");
    for child in &node.children {
        print_tree(child, depth + 1);
    }
}

fn cmd_paths(config: &Config) -> anyhow::Result<()> {
    let hub = MemoryHub::new();
    let device: Arc<dyn Bus> = Arc::new(hub.connect(DEVICE_NAME)?);
    let controllee = Controllee::new(device, config)?;
    for root in panels(config)? {
        for path in controllee.planned_paths(&root)? {
            println!("{path}");
        }
    }
    Ok(())
}

async fn cmd_set(config: &Config, widget: &str, raw: &str) -> anyhow::Result<()> {
    let (panel_name, rest) = widget
        .split_once('/')
        .ok_or_else(|| anyhow::anyhow!("expected <panel>/<widget>, got {widget}"))?;
    let (_controllee, _controller, mirrored) = mirror(config).await?;

    let panel = mirrored
        .iter()
        .find(|p| p.name() == panel_name)
        .ok_or_else(|| anyhow::anyhow!("no panel named {panel_name}"))?;
    let target = panel
        .find(rest)
        .ok_or_else(|| anyhow::anyhow!("no widget {rest} in {panel_name}"))?;
    let ty = target
        .property_type()
        .ok_or_else(|| anyhow::anyhow!("{widget} is not a property"))?;

    target.set_value(parse_value(ty, raw)?).await?;
    // ValueChanged lands asynchronously; read back what the device stored
    target.refresh().await?;
    match target.value() {
        Some(value) => println!("{widget} = {value}"),
        None => println!("{widget} has no value"),
    }
    Ok(())
}

fn parse_value(ty: PropertyType, raw: &str) -> anyhow::Result<PropertyValue> {
    let value = match ty {
        PropertyType::U16 => PropertyValue::U16(raw.parse()?),
        PropertyType::I16 => PropertyValue::I16(raw.parse()?),
        PropertyType::U32 => PropertyValue::U32(raw.parse()?),
        PropertyType::I32 => PropertyValue::I32(raw.parse()?),
        PropertyType::U64 => PropertyValue::U64(raw.parse()?),
        PropertyType::I64 => PropertyValue::I64(raw.parse()?),
        PropertyType::Double => PropertyValue::Double(raw.parse()?),
        PropertyType::String => PropertyValue::String(raw.to_string()),
        PropertyType::Bool => PropertyValue::Bool(raw.parse()?),
        PropertyType::Date => {
            let date = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")?;
            PropertyValue::Date(date_from(date)?)
        }
        PropertyType::Time => {
            let time = chrono::NaiveTime::parse_from_str(raw, "%H:%M:%S")?;
            PropertyValue::Time(time_from(time)?)
        }
    };
    Ok(value)
}

fn date_from(date: chrono::NaiveDate) -> anyhow::Result<panelbus::Date> {
    use chrono::Datelike;
    Ok(panelbus::Date::new(
        u16::try_from(date.year())?,
        u16::try_from(date.month())?,
        u16::try_from(date.day())?,
    )?)
}

fn time_from(time: chrono::NaiveTime) -> anyhow::Result<panelbus::Time> {
    use chrono::Timelike;
    Ok(panelbus::Time::new(
        u16::try_from(time.hour())?,
        u16::try_from(time.minute())?,
        u16::try_from(time.second())?,
    )?)
}
