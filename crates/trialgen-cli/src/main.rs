use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use trialgen_core::{
    block_to_string, build_structure, generate_seeded_session, session_rng, Block,
    ConditionCode, ExperimentStructure, FactorSet, GeneratedSession, SessionConfig,
    StructureError,
};

#[derive(Parser)]
#[command(name = "trialgen", version = "0.3.0", about = "Factorial trial/block generator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Conditions {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    Describe {
        condition: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    Build {
        condition: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        no_practice: bool,
        #[arg(long)]
        max_trials: Option<usize>,
        #[arg(long)]
        full_shuffle: bool,
        #[arg(long)]
        dump: Option<PathBuf>,
        #[arg(long)]
        trials_out: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    Preview {
        factors: PathBuf,
        #[arg(long)]
        trials: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        full_shuffle: bool,
        #[arg(long, default_value = "")]
        label: String,
        #[arg(long)]
        practice: bool,
        #[arg(long)]
        json: bool,
    },
    Init {
        #[arg(long, default_value = "session.yaml")]
        path: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trialgen=info")),
        )
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error(error_code(&err), format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Conditions { config, json } => {
            let config = load_config(config.as_deref())?;
            let mut rows = Vec::new();
            for code in &config.conditions {
                let condition: ConditionCode = code.parse()?;
                let structure = build_structure(condition)?;
                rows.push(condition_to_json(&structure, code == &config.default_condition));
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "conditions",
                    "conditions": rows
                })));
            }
            for row in &rows {
                println!(
                    "{}{}: cue={} order={} blocks={} trials={}",
                    row["code"].as_str().unwrap_or_default(),
                    if row["default"].as_bool() == Some(true) { " (default)" } else { "" },
                    row["cue"].as_str().unwrap_or_default(),
                    row["instruction_order"],
                    row["blocks"],
                    row["total_trials"]
                );
            }
        }
        Commands::Describe {
            condition,
            config,
            json,
        } => {
            let config = load_config(config.as_deref())?;
            let condition = config.resolve_condition(condition.as_deref())?;
            let structure = build_structure(condition)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "structure": structure_to_json(&structure, &config)
                })));
            }
            print_structure(&structure, &config);
        }
        Commands::Build {
            condition,
            config,
            seed,
            no_practice,
            max_trials,
            full_shuffle,
            dump,
            trials_out,
            json,
        } => {
            let mut config = load_config(config.as_deref())?;
            if seed.is_some() {
                config.random_seed = seed;
            }
            if no_practice {
                config.run_practice_blocks = false;
            }
            if max_trials.is_some() {
                config.max_trials_per_block = max_trials;
            }
            if full_shuffle {
                config.full_shuffle = true;
            }
            if let Some(dump) = dump {
                config.dump_path = dump;
            }
            config.validate()?;

            let condition = config.resolve_condition(condition.as_deref())?;
            let structure = build_structure(condition)?;
            let session = generate_seeded_session(&structure, &config)?;
            session.write_dump(&config.dump_path)?;
            if let Some(path) = &trials_out {
                session.write_trials_json(path)?;
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "build",
                    "session": session_to_json(&session),
                    "dump": config.dump_path.display().to_string(),
                    "trials_out": trials_out.as_ref().map(|p| p.display().to_string())
                })));
            }
            print_session(&session);
            println!("dump: {}", config.dump_path.display());
            if let Some(path) = &trials_out {
                println!("trials_out: {}", path.display());
            }
        }
        Commands::Preview {
            factors,
            trials,
            seed,
            full_shuffle,
            label,
            practice,
            json,
        } => {
            let set = load_factor_set(&factors)?;
            let mut block = Block::new(set).with_label(label).with_practice(practice);
            if let Some(n) = trials {
                block = block.with_trials(n);
            }
            let (mut rng, seed) = session_rng(seed);
            let generated = block.get_trials(&mut rng, full_shuffle)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "preview",
                    "seed": seed,
                    "factors": block.factors(),
                    "set_length": block.factor_set().set_length(),
                    "label": block.label(),
                    "practice": block.practice(),
                    "trials": generated
                })));
            }
            println!("seed: {}", seed);
            println!("set_length: {}", block.factor_set().set_length());
            print!("{}", block_to_string(&block, &generated, 1));
        }
        Commands::Init { path, force } => {
            if !force && path.exists() {
                return Err(anyhow!(
                    "config file already exists (use --force): {}",
                    path.display()
                ));
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, SessionConfig::template())?;
            println!("wrote: {}", path.display());
            println!("next: trialgen describe --config {}", path.display());
        }
    }
    Ok(None)
}

fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    match path {
        Some(p) => SessionConfig::load(p),
        None => Ok(SessionConfig::default()),
    }
}

fn load_factor_set(path: &Path) -> Result<FactorSet> {
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read factors {}: {}", path.display(), e))?;
    let set: FactorSet = serde_yaml::from_str(&raw)
        .map_err(|e| anyhow!("invalid factors {}: {}", path.display(), e))?;
    Ok(set)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn error_code(err: &anyhow::Error) -> &'static str {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<StructureError>())
        .map(StructureError::code)
        .unwrap_or("command_failed")
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Conditions { json, .. }
        | Commands::Describe { json, .. }
        | Commands::Build { json, .. }
        | Commands::Preview { json, .. } => *json,
        Commands::Init { .. } => false,
    }
}

fn condition_to_json(structure: &ExperimentStructure, is_default: bool) -> Value {
    let condition = structure.condition();
    json!({
        "code": condition.to_string(),
        "default": is_default,
        "cue": condition.cue.description(),
        "blocks_per_instruction": condition.cue.policy().blocks_per_instruction,
        "instruction_order": condition
            .order
            .instructions()
            .iter()
            .map(|i| i.label())
            .collect::<Vec<_>>(),
        "blocks": structure.len(),
        "total_trials": structure.total_trials()
    })
}

fn block_to_json(index: usize, block: &Block) -> Value {
    json!({
        "number": index + 1,
        "label": block.label(),
        "practice": block.practice(),
        "trials": block.trialcount(),
        "set_length": block.factor_set().set_length(),
        "factors": block.factors()
    })
}

fn structure_to_json(structure: &ExperimentStructure, config: &SessionConfig) -> Value {
    json!({
        "condition": condition_to_json(structure, false),
        "run_practice_blocks": config.run_practice_blocks,
        "max_trials_per_block": config.max_trials_per_block,
        "blocks": structure
            .blocks()
            .iter()
            .enumerate()
            .map(|(i, b)| block_to_json(i, b))
            .collect::<Vec<_>>()
    })
}

fn session_to_json(session: &GeneratedSession) -> Value {
    json!({
        "condition": session.condition().to_string(),
        "seed": session.seed(),
        "blocks_per_experiment": session.blocks_per_experiment(),
        "practice_blocks": session.practice_blocks(),
        "total_trials": session.total_trials(),
        "labels": session.labels(),
        "digest": session.digest()
    })
}

fn print_structure(structure: &ExperimentStructure, config: &SessionConfig) {
    let condition = structure.condition();
    println!("condition: {}", condition);
    println!("cue: {}", condition.cue.description());
    println!(
        "blocks_per_instruction: {}",
        condition.cue.policy().blocks_per_instruction
    );
    println!("run_practice_blocks: {}", config.run_practice_blocks);
    if let Some(max) = config.max_trials_per_block {
        println!("max_trials_per_block: {}", max);
    }
    println!("total_trials: {}", structure.total_trials());
    for (i, block) in structure.blocks().iter().enumerate() {
        println!(
            "  {:>2}. {:<4} trials={:<3}{}",
            i + 1,
            block.label(),
            block.trialcount(),
            if block.practice() { " practice" } else { "" }
        );
    }
}

fn print_session(session: &GeneratedSession) {
    println!("condition: {}", session.condition());
    if let Some(seed) = session.seed() {
        println!("seed: {}", seed);
    }
    println!("blocks_per_experiment: {}", session.blocks_per_experiment());
    println!("practice_blocks: {}", session.practice_blocks());
    println!("total_trials: {}", session.total_trials());
    println!("labels: {}", session.labels().join(","));
    println!("digest: {}", session.digest());
}
