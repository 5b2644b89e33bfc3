// crates/flowcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flowcore::{ExecutionEvent, GraphTemplate, InstanceId, NodeSpec, Severity, TemplateRef, DEFAULT_INPUT, DEFAULT_OUTPUT};
use flowruntime::{DirectorySaveStore, FlowSubsystem, JsonDirectorySource, NodeRegistry, RuntimeConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow graph CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a graph template as a root flow
    Run {
        /// Template path, relative to the template directory and without `.json`
        template: String,

        /// Directory holding `<path>.json` templates
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Owner the root flow is started for
        #[arg(long, default_value = "cli")]
        owner: String,

        /// Number of clock ticks to simulate after starting
        #[arg(long, default_value_t = 0)]
        ticks: u32,

        /// Seconds per simulated tick
        #[arg(long, default_value_t = 0.1)]
        tick_seconds: f64,

        /// Custom events fired right after start, in order
        #[arg(short, long)]
        event: Vec<String>,

        /// Save slot written when the run ends
        #[arg(long)]
        save: Option<String>,

        /// Save slot the flow is restored from instead of starting fresh
        #[arg(long)]
        load: Option<String>,

        /// Directory holding save slots
        #[arg(long, default_value = "saves")]
        save_dir: PathBuf,

        /// Runtime configuration JSON
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a template file
    Validate {
        /// Path to template JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example template
    Init {
        /// Output file path
        #[arg(short, long, default_value = "example.json")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            template,
            dir,
            owner,
            ticks,
            tick_seconds,
            event,
            save,
            load,
            save_dir,
            config,
            verbose,
        } => {
            init_logging(verbose);
            let options = RunOptions {
                template: TemplateRef::from(template),
                dir,
                owner,
                ticks,
                tick_seconds,
                events: event,
                save,
                load,
                save_dir,
                config,
            };
            run_flow(options).await?;
        }

        Commands::Validate { file } => {
            validate_template(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_template(output)?;
        }
    }

    Ok(())
}

struct RunOptions {
    template: TemplateRef,
    dir: PathBuf,
    owner: String,
    ticks: u32,
    tick_seconds: f64,
    events: Vec<String>,
    save: Option<String>,
    load: Option<String>,
    save_dir: PathBuf,
    config: Option<PathBuf>,
}

fn print_events(events: &mut broadcast::Receiver<ExecutionEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            ExecutionEvent::FlowStarted { instance_name, template, .. } => {
                println!("▶️  Flow {} started ({})", instance_name, template);
            }
            ExecutionEvent::NodeActivated { node_guid, node_type, pin, .. } => {
                println!("  ⚡ {} ({}) <- {}", node_guid, node_type, pin);
            }
            ExecutionEvent::OutputTriggered { node_guid, pin, .. } => {
                println!("  ➡️  {} -> {}", node_guid, pin);
            }
            ExecutionEvent::NodeFinished { node_guid, .. } => {
                println!("  ✅ {} finished", node_guid);
            }
            ExecutionEvent::Message { node_guid, severity, message, .. } => {
                let node = node_guid.map(|g| g.to_string()).unwrap_or_else(|| "flow".to_string());
                match severity {
                    Severity::Error => println!("     ❌ [{}] {}", node, message),
                    Severity::Warning => println!("     ⚠️  [{}] {}", node, message),
                    Severity::Note => println!("     ℹ️  [{}] {}", node, message),
                }
            }
            ExecutionEvent::FlowFinished { template, policy, .. } => {
                println!("✨ Flow {} finished ({:?})", template, policy);
            }
        }
    }
}

async fn run_flow(options: RunOptions) -> Result<()> {
    let config = match &options.config {
        Some(path) => RuntimeConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    let mut subsystem = FlowSubsystem::with_config(Arc::new(flownodes::standard_registry()), config)
        .with_template_source(Arc::new(JsonDirectorySource::new(&options.dir)))
        .with_save_store(Box::new(DirectorySaveStore::new(&options.save_dir)));

    println!("🚀 Loading {} from: {}", options.template, options.dir.display());
    let template = subsystem.load_template_tree(&options.template).await?;
    println!("📋 Template: {}", template.name);
    println!("   Nodes: {}", template.node_count());
    println!("   Links: {}", template.links().len());
    println!();

    let mut events = subsystem.subscribe_events();
    let id: InstanceId = match &options.load {
        Some(slot) => {
            subsystem.load_game_from_store(slot)?;
            subsystem.load_root_flow(options.owner.as_str(), &options.template)?
        }
        None => subsystem.start_root_flow(options.owner.as_str(), &options.template)?,
    };
    print_events(&mut events);

    for event in &options.events {
        println!("📨 Custom event '{}'", event);
        subsystem.trigger_custom_event(id, event);
        print_events(&mut events);
    }

    for tick in 0..options.ticks {
        if subsystem.instance(id).is_none() {
            break;
        }
        tracing::debug!("Tick {} (+{}s)", tick + 1, options.tick_seconds);
        subsystem.tick(options.tick_seconds);
        print_events(&mut events);
    }

    if let Some(slot) = &options.save {
        subsystem.save_game_to_store(slot)?;
        println!("💾 Saved to slot '{}'", slot);
    }

    println!();
    println!("📊 Summary:");
    println!("   Clock: {:.2}s", subsystem.now());
    match subsystem.instance(id) {
        None => println!("   Flow finished"),
        Some(instance) => {
            println!("   Flow {} still running", instance.name());
            for guid in instance.active_nodes() {
                let node_type = instance.node_type(guid).unwrap_or("?");
                match instance.node_status(guid) {
                    Some(status) => println!("     {} ({}): {}", guid, node_type, status),
                    None => println!("     {} ({})", guid, node_type),
                }
            }
        }
    }

    Ok(())
}

fn validate_template(file: &Path) -> Result<()> {
    println!("🔍 Validating template: {}", file.display());

    let json = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let template = GraphTemplate::from_json(&json)?;
    let registry = flownodes::standard_registry();

    let mut problems = Vec::new();
    for node in template.nodes() {
        if !registry.contains(&node.node_type) {
            problems.push(format!("{}: unknown node type '{}'", node.display_name(), node.node_type));
        } else if let Err(e) = registry.create_node(node) {
            problems.push(format!("{}: {}", node.display_name(), e));
        }
    }

    let starts: Vec<&NodeSpec> = template.nodes_of_type("route.start").collect();
    match starts.len() {
        0 => problems.push("no Start node".to_string()),
        1 => {
            let reachable = template.connection_graph().reachable_from(starts[0].guid);
            for node in template.nodes() {
                let entry = matches!(node.node_type.as_str(), "route.start" | "route.custom_input");
                if !entry && !reachable.contains(&node.guid) {
                    println!("   ⚠️  {} is not reachable from Start", node.display_name());
                }
            }
        }
        n => problems.push(format!("{} Start nodes, expected one", n)),
    }

    for link in template.dangling_connections() {
        problems.push(format!("link {}:{} points at missing node {}", link.from_node, link.from_pin, link.to_node));
    }

    if !problems.is_empty() {
        for problem in &problems {
            println!("   ❌ {}", problem);
        }
        bail!("{} has {} problem(s)", file.display(), problems.len());
    }

    println!("✅ Template is valid:");
    println!("   Name: {}", template.name);
    println!("   Nodes: {}", template.node_count());
    println!("   Links: {}", template.links().len());
    for asset in template.nodes().flat_map(|n| registry.referenced_assets(n)) {
        println!("   Uses: {}", asset);
    }

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry: NodeRegistry = flownodes::standard_registry();

    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            let pins = |pins: &[flowcore::FlowPin]| pins.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ");
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
            println!("    [{}] -> [{}]", pins(&metadata.inputs), pins(&metadata.outputs));
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_template(output: PathBuf) -> Result<()> {
    let path = output.with_extension("");
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("example")
        .to_string();
    let mut template = GraphTemplate::new(name.as_str());
    template.description = Some("Logs a greeting, waits a second, then finishes".to_string());

    let start = template.add_node(NodeSpec::new("route.start").with_inputs(Vec::<&str>::new()).with_position(0.0, 0.0))?;
    let log = template.add_node(
        NodeSpec::new("utils.log")
            .with_name("Greet")
            .with_config("message", "Hello from the flow")
            .with_config("severity", "note")
            .with_position(200.0, 0.0),
    )?;
    let delay = template.add_node(
        NodeSpec::new("route.delay")
            .with_name("Wait")
            .with_config("delay_seconds", 1.0)
            .with_outputs(["Finished"])
            .with_position(400.0, 0.0),
    )?;
    let finish = template.add_node(NodeSpec::new("route.finish").with_outputs(Vec::<&str>::new()).with_position(600.0, 0.0))?;

    template.connect(start, DEFAULT_OUTPUT, log, DEFAULT_INPUT)?;
    template.connect(log, DEFAULT_OUTPUT, delay, DEFAULT_INPUT)?;
    template.connect(delay, "Finished", finish, DEFAULT_INPUT)?;

    std::fs::write(&output, template.to_json()?)?;

    println!("✨ Created example template: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  flow run {} --ticks 20", name);

    Ok(())
}
